//! Grading and execution of biology-data agent evals.
//!
//! An eval pairs a natural-language task with a typed grader config; the
//! runner hands the task to an agent, normalizes whatever the agent produced
//! into an answer mapping, and grades it with one of the registered
//! comparators. Completed runs can be cached by fingerprint so re-grading a
//! benchmark never re-invokes the agent.

pub mod agent;
pub mod answer;
pub mod cache;
pub mod config;
pub mod error;
pub mod eval;
pub mod graders;
pub mod runner;
pub mod workdir;

pub use agent::CommandAgent;
pub use cache::RunCache;
pub use config::Config;
pub use error::EvalError;
pub use eval::{load_evals, EvalDefinition, GraderSpec};
pub use graders::{get_grader, Grader, GraderResult};
pub use runner::{EvalRunner, FailureKind, RunMetadata, RunResult};
