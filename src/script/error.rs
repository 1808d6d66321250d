use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("script `{0}` not found")]
    NotFound(String),

    #[error("script `{0}` is already running")]
    AlreadyRunning(String),

    #[error("script validation failed: {0:?}")]
    Invalid(Vec<String>),
}
