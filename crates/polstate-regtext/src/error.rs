use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegTextError {
    #[error("missing registry editor header")]
    BadHeader,

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
}

impl RegTextError {
    pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
        RegTextError::Syntax {
            line,
            message: message.into(),
        }
    }
}
