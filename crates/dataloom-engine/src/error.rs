use thiserror::Error;

/// Engine-wide failure surface. One variant per kind named in the
/// orchestrator's error-handling design; the orchestrator is responsible
/// for translating any of these into a single `error` tape event.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum EngineError {
    #[error("input error: {0}")]
    Input(String),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("llm timeout")]
    LlmTimeout,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("sandbox {kind}: {message}")]
    Sandbox { kind: String, message: String },

    #[error("session cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<dataloom_llm::LLMError> for EngineError {
    fn from(e: dataloom_llm::LLMError) -> Self {
        if e.is_timeout() {
            EngineError::LlmTimeout
        } else {
            EngineError::Llm(e.to_string())
        }
    }
}

impl From<dataloom_sandbox::SandboxError> for EngineError {
    fn from(e: dataloom_sandbox::SandboxError) -> Self {
        let kind = match &e {
            dataloom_sandbox::SandboxError::Unsafe(_) => "unsafe",
            dataloom_sandbox::SandboxError::Syntax(_) => "syntax",
            dataloom_sandbox::SandboxError::Runtime(_) => "runtime",
        };
        EngineError::Sandbox { kind: kind.to_string(), message: e.to_string() }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}
