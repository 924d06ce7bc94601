use colored::*;

pub struct FeedbackAnalyzer;

impl FeedbackAnalyzer {
    /// A one-paragraph hint for common compiler and linker failures.
    pub fn analyze(output: &str) -> Option<String> {
        // 1. Main function missing (specific linker error)
        if output.contains("undefined reference to `main'")
            || output.contains("entry point must be defined")
            || output.contains("LNK1561")
        {
            return Some(format!(
                "This project is missing a {} function.\nAdd an entry point, or set {} if it is a library.",
                "main()".bold().yellow(),
                "type = \"static\"".bold().green()
            ));
        }

        // 2. Unresolved symbols
        if output.contains("LNK2019") || output.contains("undefined reference to") {
            return Some(format!(
                "It looks like a {} error.\nA library may be missing from {} or from the project's {}.",
                "Linker".bold().red(),
                "libraries".bold().yellow(),
                "depends".bold().yellow()
            ));
        }

        // 3. Missing header
        if output.contains("fatal error: ") && output.contains("No such file or directory")
            || output.contains("cannot open include file")
        {
            return Some(format!(
                "It looks like a {} error.\nCheck {} in ccf.toml, or whether the header belongs to a project this one should depend on.",
                "Missing Header".bold().red(),
                "include_dirs".bold().yellow()
            ));
        }

        // 4. Library lookup
        if output.contains("cannot find -l") || output.contains("LNK1104") {
            return Some(format!(
                "The linker could not locate a library.\nAdd its directory to {}.",
                "library_dirs".bold().yellow()
            ));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::strip_ansi;

    #[test]
    fn test_linker_error() {
        let err = "error LNK2019: unresolved external symbol foo";
        let msg = strip_ansi(&FeedbackAnalyzer::analyze(err).unwrap());
        assert!(msg.contains("Linker error"));
        assert!(msg.contains("depends"));
    }

    #[test]
    fn test_include_error() {
        let err = "fatal error: foo.h: No such file or directory";
        let msg = strip_ansi(&FeedbackAnalyzer::analyze(err).unwrap());
        assert!(msg.contains("Missing Header"));
    }

    #[test]
    fn test_main_error() {
        let err = "undefined reference to `main'";
        let msg = strip_ansi(&FeedbackAnalyzer::analyze(err).unwrap());
        assert!(msg.contains("missing a main() function"));
    }

    #[test]
    fn test_library_not_found() {
        let err = "/usr/bin/ld: cannot find -lfoo: No such file or directory";
        let msg = strip_ansi(&FeedbackAnalyzer::analyze(err).unwrap());
        assert!(msg.contains("library_dirs"));
    }

    #[test]
    fn test_clean_output_has_no_hint() {
        assert!(FeedbackAnalyzer::analyze("main.cpp: warning: unused variable").is_none());
    }
}
