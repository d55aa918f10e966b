use thiserror::Error;

/// C4's rejection/failure surface. A `SandboxError` for one operation is
/// never fatal to the caller — the executor records it and moves on.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum SandboxError {
    #[error("unsafe: {0}")]
    Unsafe(String),

    #[error("syntax: {0}")]
    Syntax(String),

    #[error("runtime: {0}")]
    Runtime(String),
}

impl SandboxError {
    pub fn unsafe_(reason: impl Into<String>) -> Self {
        SandboxError::Unsafe(reason.into())
    }
}
