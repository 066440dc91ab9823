//! Per-invocation options for the migration pipelines.
//!
//! Options deserialize from the same camelCase object a codemod runner would
//! hand over, with every key optional.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::codemod::error::{MigrateError, Result};

// ============ Constants ============

pub const DEFAULT_SUITE_FUNC_NAME: &str = "describe";
pub const DEFAULT_TEST_FUNC_NAME: &str = "it";
pub const DEFAULT_SKIP_ACCESSOR: &str = "skip";
pub const DEFAULT_COMPLETION_PARAM_NAME: &str = "done";

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("identifier pattern is valid"));

// ============ Modes ============

/// What happens to a call of the completion parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionMode {
    /// Delete the call
    #[default]
    #[serde(alias = "rm")]
    Remove,
    /// Replace the call with a `throw` flagging a manual follow-up
    Throw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStyle {
    #[default]
    Single,
    Double,
}

impl QuoteStyle {
    /// Render `text` as a string literal in this quote style
    pub fn quote(&self, text: &str) -> String {
        let q = match self {
            Self::Single => '\'',
            Self::Double => '"',
        };
        let mut out = String::with_capacity(text.len() + 2);
        out.push(q);
        for ch in text.chars() {
            if ch == q || ch == '\\' {
                out.push('\\');
            }
            out.push(ch);
        }
        out.push(q);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LineTerminator {
    #[default]
    #[serde(rename = "\n", alias = "lf")]
    Lf,
    #[serde(rename = "\r\n", alias = "crlf")]
    CrLf,
}

impl LineTerminator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }

    /// Rewrite every line ending in `text` to this terminator
    pub fn normalize(&self, text: &str) -> String {
        let unified = text.replace("\r\n", "\n");
        match self {
            Self::Lf => unified,
            Self::CrLf => unified.replace('\n', self.as_str()),
        }
    }
}

// ============ Options ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MigrationOptions {
    #[serde(alias = "describeFuncName")]
    pub suite_func_name: String,
    #[serde(alias = "itFuncName")]
    pub test_func_name: String,
    #[serde(alias = "skipFuncName")]
    pub skip_accessor: String,
    #[serde(alias = "doneFuncName")]
    pub completion_param_name: String,
    #[serde(alias = "rmDoneFunc")]
    pub remove_completion_func: bool,
    #[serde(alias = "rmDoneFuncMode")]
    pub completion_mode: CompletionMode,
    pub quote: QuoteStyle,
    pub line_terminator: LineTerminator,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            suite_func_name: DEFAULT_SUITE_FUNC_NAME.to_string(),
            test_func_name: DEFAULT_TEST_FUNC_NAME.to_string(),
            skip_accessor: DEFAULT_SKIP_ACCESSOR.to_string(),
            completion_param_name: DEFAULT_COMPLETION_PARAM_NAME.to_string(),
            remove_completion_func: false,
            completion_mode: CompletionMode::Remove,
            quote: QuoteStyle::Single,
            line_terminator: LineTerminator::Lf,
        }
    }
}

impl MigrationOptions {
    /// Parse a JSON option object, filling missing keys with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Options with completion-call rewriting switched on in `mode`
    pub fn with_completion(mut self, mode: CompletionMode) -> Self {
        self.remove_completion_func = true;
        self.completion_mode = mode;
        self
    }

    /// Check that every configured name is a usable identifier
    pub fn validate(&self) -> Result<()> {
        let names: [(&'static str, &str); 4] = [
            ("suiteFuncName", &self.suite_func_name),
            ("testFuncName", &self.test_func_name),
            ("skipAccessor", &self.skip_accessor),
            ("completionParamName", &self.completion_param_name),
        ];
        for (name, value) in names {
            if !is_identifier(value) {
                return Err(MigrateError::InvalidOption {
                    name,
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }
}

pub fn is_identifier(value: &str) -> bool {
    IDENTIFIER.is_match(value)
}
