//! System instruction and user-prompt assembly for code generation.

use crate::execution::Language;

/// Where generated code finds inputs and leaves outputs.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub workdir: String,
    pub upload_dir: String,
    pub uploaded_files: Vec<String>,
}

impl Default for Workspace {
    fn default() -> Self {
        Self {
            workdir: "/home/user".into(),
            upload_dir: "/home/user/uploads".into(),
            uploaded_files: Vec::new(),
        }
    }
}

pub fn system_instruction(language: Language, workspace: &Workspace) -> String {
    let saving = match language {
        Language::R => "Save every plot to a file with png(), pdf() or ggsave() and close devices with dev.off().",
        Language::Python => "Save every plot to a file with matplotlib's savefig() and never call plt.show().",
    };
    let mut text = format!(
        "You are an expert {language} programmer writing scripts for data analysis.\n\
         Provide only {language} source code as output without any description.\n\
         Provide only code in plain text format without Markdown formatting.\n\
         Do not include symbols such as ``` or ```{tag}.\n\
         If there is a lack of details, provide the most logical solution.\n\
         You are not allowed to ask for more details.\n\
         The script runs non-interactively in {workdir}; write output files there.\n\
         {saving}\n\
         Input files are stored in {upload}.",
        tag = language.tag(),
        workdir = workspace.workdir,
        upload = workspace.upload_dir,
    );
    if !workspace.uploaded_files.is_empty() {
        text.push_str("\nAvailable input files:\n");
        for f in &workspace.uploaded_files {
            text.push_str(&format!("- {f}\n"));
        }
    }
    text
}

/// The user-facing prompt, with the previous attempt's error appended when present.
pub fn user_prompt(prompt: &str, error_context: Option<&str>) -> String {
    match error_context {
        Some(err) => format!(
            "{prompt}\n\nThe previous code resulted in the following error: `{err}`. Please fix the code and try again."
        ),
        None => prompt.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_context_is_appended_verbatim() {
        let p = user_prompt("plot x vs y", Some("Error: object 'y' not found"));
        assert_eq!(
            p,
            "plot x vs y\n\nThe previous code resulted in the following error: `Error: object 'y' not found`. Please fix the code and try again."
        );
        assert_eq!(user_prompt("plot x vs y", None), "plot x vs y");
    }

    #[test]
    fn instruction_lists_uploaded_files() {
        let ws = Workspace { uploaded_files: vec!["/home/user/uploads/data.csv".into()], ..Default::default() };
        let text = system_instruction(Language::R, &ws);
        assert!(text.contains("Provide only R source code"));
        assert!(text.contains("- /home/user/uploads/data.csv"));
        assert!(text.contains("ggsave()"));
    }
}
