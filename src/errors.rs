use std::fmt;

use thiserror::Error;

/// Errors surfaced to the embedding host through `Result` returns.
///
/// Script-level problems (bad lookups, range clamps, recursion limits) are
/// not errors in this sense: they are reported through the state's error
/// hook and evaluation continues with a zero value.
#[derive(Debug, Error)]
pub enum CsError {
    #[error("builtin {name} declared with illegal type: {spec}")]
    IllegalArgType { name: String, spec: char },

    #[error("builtin {name} declared with too many arguments: {count}")]
    TooManyArgs { name: String, count: usize },

    #[error("redefinition of ident '{0}'")]
    Redefinition(String),

    #[error("'{0}' is not a valid identifier name")]
    InvalidName(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Loop control raised by the `break` and `continue` commands.
///
/// Command callbacks propagate this with `?`; the enclosing loop construct
/// catches it. Unwinding releases every intermediate resource through
/// ordinary drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Break,
    Continue,
}

/// Result type for registered command callbacks.
pub type CmdResult = Result<(), Control>;

/// A diagnostic produced during compilation or execution.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    /// The bare message, without location prefix.
    pub message: String,
    /// Byte offset into the current source, when known.
    pub offset: Option<usize>,
    /// Source file name, when a file is being executed.
    pub file: Option<String>,
    /// 1-based line number derived from `offset`.
    pub line: Option<usize>,
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{}:{}: {}", file, line, self.message),
            (None, Some(line)) => write!(f, "{}: {}", line, self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}
