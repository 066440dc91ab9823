//! Error types for the migration engine.
//!
//! Only unparseable input (or a rewrite that would produce unparseable
//! output) aborts a transform. Candidates that do not fit a recognized
//! shape are skipped silently and never surface here.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Failed to parse source at line {line}, column {column}")]
    Parse { line: usize, column: usize },

    #[error("Failed to set language: {0}")]
    Language(String),

    #[error("Unsupported file extension: {0:?}")]
    UnsupportedExtension(String),

    #[error("Invalid option {name}: {value:?} is not a valid identifier")]
    InvalidOption { name: &'static str, value: String },

    #[error("Invalid options: {0}")]
    Options(#[from] serde_json::Error),

    #[error("Rewrite produced unparseable source at line {line}, column {column}")]
    InvalidRewrite { line: usize, column: usize },
}

pub type Result<T> = std::result::Result<T, MigrateError>;
