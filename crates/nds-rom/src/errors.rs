use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Build rule file not found: {path}")]
    #[diagnostic(
        code(rules::file_not_found),
        help("Pass the path of the build rule text file; extraction writes one next to the extracted sections")
    )]
    RuleFileNotFound { path: PathBuf },

    #[error("Unknown build rule: {name}")]
    #[diagnostic(
        code(rules::unknown_rule),
        help("Fix the rule name or remove the line; run with --help for the documented rule set")
    )]
    UnknownRule { name: String },

    #[error("Unable to resolve '{value}' for rule '{name}'")]
    #[diagnostic(
        code(rules::invalid_value),
        help("'{name}' accepts: {expected}. Relative paths are resolved against the rule file's directory")
    )]
    InvalidRuleValue {
        name: String,
        value: String,
        expected: String,
    },

    #[error("No value given for rule '{name}'")]
    #[diagnostic(
        code(rules::missing_value),
        help("Every section rule must name an existing file or directory before packing starts")
    )]
    MissingRuleValue { name: &'static str },

    #[error("IO operation failed")]
    #[diagnostic(code(io::operation_failed))]
    IoError {
        #[from]
        source: std::io::Error,
    },
}
