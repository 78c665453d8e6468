use thiserror::Error;

/// Errors produced while loading, compiling, caching or rendering a template.
#[derive(Error, Debug)]
pub enum TplError {
    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("Unknown helper: {0}")]
    UnknownHelper(String),
    #[error("Template not found: {0}")]
    NotFound(String),
    #[error("Cache error for key {key}: {message}")]
    Cache { key: String, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Render error: {0}")]
    Render(String),
    #[error("Value error: {0}")]
    Value(String),
}

impl TplError {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        TplError::Parse {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn cache(key: &str, message: impl std::fmt::Display) -> Self {
        TplError::Cache {
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

impl serde::ser::Error for TplError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        TplError::Value(msg.to_string())
    }
}
