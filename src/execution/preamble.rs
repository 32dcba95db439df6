//! Dependency-installation preamble prepended to code before it runs.

use super::Language;

const CRAN_MIRROR: &str = "https://cloud.r-project.org";

const R_BASE_PACKAGES: &[&str] = &[
    "base", "compiler", "datasets", "grDevices", "graphics", "grid", "methods", "parallel",
    "splines", "stats", "stats4", "tcltk", "tools", "utils",
];

const PYTHON_STDLIB: &[&str] = &[
    "__future__", "abc", "argparse", "array", "asyncio", "base64", "bisect", "calendar",
    "collections", "contextlib", "copy", "csv", "dataclasses", "datetime", "decimal", "enum",
    "functools", "gc", "glob", "gzip", "hashlib", "heapq", "html", "http", "importlib", "io",
    "itertools", "json", "logging", "math", "multiprocessing", "operator", "os", "pathlib",
    "pickle", "platform", "pprint", "random", "re", "shutil", "signal", "socket", "sqlite3",
    "statistics", "string", "struct", "subprocess", "sys", "tempfile", "textwrap", "threading",
    "time", "timeit", "traceback", "typing", "unittest", "urllib", "uuid", "warnings", "zipfile",
];

// Import name -> distribution name where they differ
const PYTHON_DISTRIBUTIONS: &[(&str, &str)] = &[
    ("sklearn", "scikit-learn"),
    ("PIL", "pillow"),
    ("cv2", "opencv-python"),
    ("yaml", "pyyaml"),
    ("bs4", "beautifulsoup4"),
];

/// `code` prefixed with install guards for the packages it references.
pub fn with_preamble(language: Language, code: &str) -> String {
    let preamble = build(language, code);
    if preamble.is_empty() {
        code.to_string()
    } else {
        format!("{preamble}\n{code}")
    }
}

/// Install guards for `code`, or an empty string when nothing is referenced.
pub fn build(language: Language, code: &str) -> String {
    match language {
        Language::R => r_preamble(&r_packages(code)),
        Language::Python => python_preamble(&python_modules(code)),
    }
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|n| n == name) {
        list.push(name.to_string());
    }
}

/// `line` up to its first `#` that is not inside a quoted string.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '#' => return &line[..i],
            None if matches!(c, '"' | '\'' | '`') => quote = Some(c),
            None => {}
        }
    }
    line
}

fn is_r_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '_'
}

/// Packages named by `library()`, `require()`, `requireNamespace()` or `pkg::`.
pub fn r_packages(code: &str) -> Vec<String> {
    let mut found = Vec::new();
    for line in code.lines() {
        let line = strip_comment(line);

        for call in ["library(", "require(", "requireNamespace("] {
            let mut rest = line;
            while let Some(pos) = rest.find(call) {
                let preceded_by_ident = rest[..pos].chars().next_back().is_some_and(is_r_ident_char);
                let after = &rest[pos + call.len()..];
                rest = after;
                if preceded_by_ident {
                    continue;
                }
                let arg = after.split([')', ',']).next().unwrap_or("");
                let name = arg.trim().trim_matches(|c| c == '"' || c == '\'');
                if !name.is_empty() && name.chars().all(is_r_ident_char) {
                    push_unique(&mut found, name);
                }
            }
        }

        let mut rest = line;
        while let Some(pos) = rest.find("::") {
            let name: String = rest[..pos]
                .chars()
                .rev()
                .take_while(|c| is_r_ident_char(*c))
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            if !name.is_empty() && name.starts_with(|c: char| c.is_ascii_alphabetic()) {
                push_unique(&mut found, &name);
            }
            rest = &rest[pos + 2..];
        }
    }
    found.retain(|p| !R_BASE_PACKAGES.contains(&p.as_str()));
    found
}

fn r_preamble(packages: &[String]) -> String {
    if packages.is_empty() {
        return String::new();
    }
    let mut out = String::from("invisible(suppressWarnings(suppressMessages({\n");
    for p in packages {
        out.push_str(&format!(
            "  if (!requireNamespace(\"{p}\", quietly = TRUE)) install.packages(\"{p}\", repos = \"{CRAN_MIRROR}\", quiet = TRUE)\n"
        ));
    }
    out.push_str("})))\n");
    out
}

/// Top-level, non-stdlib modules named by `import` and `from ... import`.
pub fn python_modules(code: &str) -> Vec<String> {
    let mut found = Vec::new();
    for line in code.lines() {
        let line = strip_comment(line).trim();
        let names: Vec<&str> = if let Some(rest) = line.strip_prefix("import ") {
            rest.split(',')
                .map(|part| part.split_whitespace().next().unwrap_or(""))
                .collect()
        } else if let Some(rest) = line.strip_prefix("from ") {
            match rest.split_whitespace().next() {
                Some(module) if !module.starts_with('.') => vec![module],
                _ => Vec::new(),
            }
        } else {
            Vec::new()
        };
        for name in names {
            let top = name.split('.').next().unwrap_or("");
            let valid = !top.is_empty() && top.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if valid && !PYTHON_STDLIB.contains(&top) {
                push_unique(&mut found, top);
            }
        }
    }
    found
}

fn python_preamble(modules: &[String]) -> String {
    if modules.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = modules
        .iter()
        .map(|m| {
            let dist = PYTHON_DISTRIBUTIONS
                .iter()
                .find(|(import, _)| import == m)
                .map(|(_, dist)| *dist)
                .unwrap_or(m.as_str());
            format!("(\"{m}\", \"{dist}\")")
        })
        .collect();
    format!(
        "import importlib.util as _ilu, subprocess as _sp, sys as _sys\n\
         for _mod, _dist in [{}]:\n    \
         if _ilu.find_spec(_mod) is None:\n        \
         _sp.run([_sys.executable, \"-m\", \"pip\", \"install\", \"-q\", _dist], stdout=_sp.DEVNULL, stderr=_sp.DEVNULL)\n",
        pairs.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r_packages_in_first_appearance_order() {
        let code = r#"
library(ggplot2)
suppressMessages(require("dplyr"))
x <- readr::read_csv("uploads/data.csv")
library(ggplot2)
stats::lm(y ~ x, data = x)
# library(commented)
mylibrary(fake)
"#;
        assert_eq!(r_packages(code), vec!["ggplot2", "dplyr", "readr"]);
    }

    #[test]
    fn hash_inside_strings_is_not_a_comment() {
        let code = "ggplot2::ggplot(df) + ggplot2::geom_point(col = \"#fff\"); dplyr::glimpse(df) # tidyr::x";
        assert_eq!(r_packages(code), vec!["ggplot2", "dplyr"]);
        assert_eq!(python_modules("import numpy, scipy  # 'pandas'"), vec!["numpy", "scipy"]);
    }

    #[test]
    fn escaped_quotes_stay_inside_the_string() {
        assert_eq!(strip_comment(r##"print("say \"#\" now") # note"##), r##"print("say \"#\" now") "##);
        assert_eq!(strip_comment("`odd#name` <- 1 # x"), "`odd#name` <- 1 ");
        assert_eq!(strip_comment("no comment here"), "no comment here");
    }

    #[test]
    fn r_preamble_guards_each_package() {
        let out = build(Language::R, "library(ggplot2)\nlibrary(tidyr)");
        assert!(out.contains("requireNamespace(\"ggplot2\", quietly = TRUE)"));
        assert!(out.contains("install.packages(\"tidyr\""));
        assert!(out.starts_with("invisible("));
    }

    #[test]
    fn python_modules_skip_stdlib_and_relative_imports() {
        let code = "import os, numpy as np\nfrom sklearn.linear_model import LinearRegression\nfrom . import local\nimport matplotlib.pyplot as plt\n";
        assert_eq!(python_modules(code), vec!["numpy", "sklearn", "matplotlib"]);
        let out = build(Language::Python, code);
        assert!(out.contains("(\"sklearn\", \"scikit-learn\")"));
    }

    #[test]
    fn no_references_means_code_unchanged() {
        assert_eq!(with_preamble(Language::R, "print(1 + 1)"), "print(1 + 1)");
        assert_eq!(with_preamble(Language::Python, "import json\nprint(1)"), "import json\nprint(1)");
    }
}
