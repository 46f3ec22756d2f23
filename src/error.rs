use thiserror::Error;

/// Errors that abort a run before the agent is invoked, plus cache IO
/// failures surfaced for logging. Anything that happens after the agent
/// starts is recorded in the `RunResult` instead of being returned here.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("invalid eval definition: {0}")]
    Schema(String),

    #[error("unknown grader type: {0}")]
    UnknownGraderType(String),

    #[error("cache io: {0}")]
    CacheIo(#[source] std::io::Error),
}
