mod common;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use common::{assert_failed, FakeSandbox, Script};
use ranalyst::{
    execution::{
        environment_info, info, observer::OutputObserver, ExecutionRunner, FailureKind, FailurePolicy, Language,
    },
    sandbox::{OutputChunk, SandboxError, SandboxSession},
};

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Recorder(Mutex<Vec<OutputChunk>>);

impl OutputObserver for Recorder {
    fn on_chunk(&self, chunk: &OutputChunk) {
        self.0.lock().unwrap().push(chunk.clone());
    }
}

#[tokio::test]
async fn stderr_fails_under_default_policy() {
    let sandbox = FakeSandbox::with_scripts([Script::Complete {
        stdout: "partial\n".into(),
        stderr: "Warning message: NAs introduced\n".into(),
        files: Vec::new(),
    }]);
    let session = sandbox.session("s");
    let recorder = Arc::new(Recorder::default());
    let runner = ExecutionRunner::new(Language::R, "/home/user").with_observer(recorder.clone());

    let result = runner.run_once(&session, "as.numeric('a')", TIMEOUT).await;

    assert_failed(&result);
    assert_eq!(result.failure_kind, Some(FailureKind::Stderr));
    assert_eq!(result.stdout, "partial\n");
    assert_eq!(result.error_context(), "Warning message: NAs introduced\n");
    assert_eq!(
        *recorder.0.lock().unwrap(),
        vec![
            OutputChunk::stdout("partial\n"),
            OutputChunk::stderr("Warning message: NAs introduced\n"),
        ]
    );
}

#[tokio::test]
async fn blank_stderr_output_still_fails() {
    let sandbox = FakeSandbox::with_scripts([Script::stderr("\n")]);
    let session = sandbox.session("s");
    let runner = ExecutionRunner::new(Language::R, "/home/user");

    let result = runner.run_once(&session, "message()", TIMEOUT).await;

    assert_failed(&result);
    assert_eq!(result.failure_kind, Some(FailureKind::Stderr));
    // Nothing useful in the stream, so the model sees the failure message
    assert_eq!(result.error_context(), "execution wrote to standard error");
}

#[tokio::test]
async fn stderr_tolerated_when_policy_allows() {
    let sandbox = FakeSandbox::with_scripts([Script::stderr("Loading required package: stats4\n")]);
    let session = sandbox.session("s");
    let runner = ExecutionRunner::new(Language::R, "/home/user")
        .with_policy(FailurePolicy { stderr_is_failure: false });

    let result = runner.run_once(&session, "library(stats4)", TIMEOUT).await;

    assert!(result.succeeded);
    assert_eq!(result.stderr, "Loading required package: stats4\n");
    assert_eq!(result.failure_kind, None);
}

#[tokio::test]
async fn remote_error_keeps_created_files() {
    let sandbox = FakeSandbox::with_scripts([Script::raise("ValueError", "bad shape")]);
    sandbox.put_file("/home/user/partial.csv", b"a\n");
    let session = sandbox.session("s");
    let runner = ExecutionRunner::new(Language::Python, "/home/user");

    let result = runner.run_once(&session, "raise ValueError('bad shape')", TIMEOUT).await;

    assert_failed(&result);
    assert_eq!(result.failure_kind, Some(FailureKind::Remote));
    assert_eq!(result.error_context(), "ValueError: bad shape");
    assert!(result.created_file_paths.is_empty());
}

#[tokio::test]
async fn rewritten_files_count_as_created() {
    let sandbox = FakeSandbox::with_scripts([Script::writes(
        "",
        &[("/home/user/summary.csv", b"a,b\n1,2\n"), ("/home/user/sub/deep.png", b"x")],
    )]);
    sandbox.put_file("/home/user/summary.csv", b"old\n");
    sandbox.put_file("/home/user/untouched.txt", b"same");
    let session = sandbox.session("s");
    let runner = ExecutionRunner::new(Language::R, "/home/user");

    let result = runner.run_once(&session, "write.csv(df)", TIMEOUT).await;

    assert!(result.succeeded);
    assert_eq!(result.created_file_paths, vec!["/home/user/summary.csv".to_string()]);
}

#[tokio::test]
async fn preamble_is_prepended_at_execution_time() {
    let sandbox = FakeSandbox::with_scripts([Script::ok("")]);
    let session = sandbox.session("s");
    let runner = ExecutionRunner::new(Language::R, "/home/user").with_install_preamble(true);
    let code = "library(ggplot2)\nggplot(mtcars, aes(wt, mpg)) + geom_point()";

    let result = runner.run_once(&session, code, TIMEOUT).await;

    assert!(result.succeeded);
    let executed = sandbox.executed();
    assert!(executed[0].contains("install.packages"));
    assert!(executed[0].contains("ggplot2"));
    assert!(executed[0].ends_with(code));
}

#[tokio::test]
async fn no_preamble_for_plain_code() {
    let sandbox = FakeSandbox::with_scripts([Script::ok("3\n")]);
    let session = sandbox.session("s");
    let runner = ExecutionRunner::new(Language::Python, "/home/user").with_install_preamble(true);

    runner.run_once(&session, "import os\nprint(1 + 2)", TIMEOUT).await;

    assert_eq!(sandbox.executed(), vec!["import os\nprint(1 + 2)".to_string()]);
}

#[tokio::test]
async fn close_is_idempotent() {
    let sandbox = FakeSandbox::default();
    let mut session = sandbox.session("s");

    session.close().await.unwrap();
    session.close().await.unwrap();

    assert_eq!(sandbox.events(), vec!["close s"]);
}

#[tokio::test]
async fn environment_info_runs_the_plain_script() {
    let sandbox = FakeSandbox::with_scripts([Script::ok(
        "R Version: 4.3.1 \nSystem Info: sysname: Linux \nInstalled Packages: base (4.3.1), stats (4.3.1) \n",
    )]);
    let session = sandbox.session("s");
    let runner = ExecutionRunner::new(Language::R, "/home/user");

    let env = environment_info(&runner, &session, info::INFO_TIMEOUT).await.unwrap();

    assert_eq!(env.version.as_deref(), Some("4.3.1"));
    assert_eq!(env.system_info.as_deref(), Some("sysname: Linux"));
    assert_eq!(env.installed_packages, vec!["base (4.3.1)", "stats (4.3.1)"]);
    assert_eq!(sandbox.executed(), vec![info::script(Language::R).to_string()]);
}

#[tokio::test]
async fn failed_environment_query_is_an_error() {
    let sandbox = FakeSandbox::with_scripts([Script::raise("ModuleNotFoundError", "No module named 'importlib'")]);
    let session = sandbox.session("s");
    let runner = ExecutionRunner::new(Language::Python, "/home/user");

    let err = environment_info(&runner, &session, info::INFO_TIMEOUT).await.unwrap_err();

    assert!(matches!(err, SandboxError::Provider(ref m) if m.contains("No module named 'importlib'")));
}
