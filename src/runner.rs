use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

use crate::answer::{self, ANSWER_FILE};
use crate::cache::{fingerprint, RunCache};
use crate::error::EvalError;
use crate::eval::EvalDefinition;
use crate::graders::{get_grader, GraderResult};
use crate::workdir::WorkDir;

/// Why a run produced no verdict (or a degraded one). "Could not grade" is
/// distinct from "graded as wrong": neither kind coerces `passed` to false
/// on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The agent function failed or the work directory could not be
    /// prepared; grading never ran.
    AgentExecutionFailure,
    /// The agent ran to completion but no answer could be extracted.
    AnswerMissing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub duration_ms: u64,
    pub cache_hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    pub agent_identity: String,
}

/// Outcome of executing one eval against one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub eval_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grader_result: Option<GraderResult>,
    /// Free-form metadata the agent attached via the answer envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_metadata: Option<Value>,
    pub metadata: RunMetadata,
}

impl RunResult {
    /// Absent when grading did not occur (agent failure).
    pub fn passed(&self) -> Option<bool> {
        self.grader_result.as_ref().map(|g| g.passed)
    }
}

/// Executes one `EvalDefinition` against one agent function.
///
/// The agent is an opaque async callable `(task_prompt, work_dir) -> answer`.
/// It may return an answer mapping, an `{answer, metadata}` envelope, or
/// write `eval_answer.json` into the work directory. The runner imposes no
/// timeout of its own; long-running agents are the caller's concern.
pub struct EvalRunner {
    eval: EvalDefinition,
    workspace_base: PathBuf,
    agent_identity: String,
}

impl EvalRunner {
    pub fn new(eval: EvalDefinition, workspace_base: PathBuf, agent_identity: String) -> Self {
        Self {
            eval,
            workspace_base,
            agent_identity,
        }
    }

    pub fn eval(&self) -> &EvalDefinition {
        &self.eval
    }

    pub async fn run<F, Fut>(
        &self,
        agent: F,
        cache: Option<&RunCache>,
    ) -> Result<RunResult, EvalError>
    where
        F: FnOnce(String, PathBuf) -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        // Resolve the grader before any agent work: an eval that cannot be
        // graded must not burn agent compute.
        let grader = get_grader(&self.eval.grader.kind)?;

        let fp = fingerprint(&self.eval.id, &self.eval.grader.config, &self.agent_identity);
        if let Some(cache) = cache {
            if let Some(mut hit) = cache.get(&fp) {
                info!("[{}] cache hit ({})", self.eval.id, fp);
                hit.metadata.cache_hit = true;
                return Ok(hit);
            }
        }

        let start = Instant::now();

        let work_dir = match WorkDir::create(&self.workspace_base, &self.eval.id) {
            Ok(dir) => dir,
            Err(e) => {
                warn!("[{}] work dir setup failed: {:#}", self.eval.id, e);
                return Ok(self.failed_result(FailureKind::AgentExecutionFailure, start));
            }
        };

        let prompt = build_task_prompt(&self.eval);
        let returned = match agent(prompt, work_dir.path().to_path_buf()).await {
            Ok(value) => value,
            Err(e) => {
                warn!("[{}] agent execution failed: {:#}", self.eval.id, e);
                return Ok(self.failed_result(FailureKind::AgentExecutionFailure, start));
            }
        };

        let Some(agent_answer) = answer::normalize(returned, work_dir.path()) else {
            info!("[{}] no answer extracted from agent run", self.eval.id);
            let mut result = self.failed_result(FailureKind::AnswerMissing, start);
            result.grader_result = Some(GraderResult::fail(
                "Failed to extract an answer from the agent run",
            ));
            if let Some(cache) = cache {
                cache.put(&fp, &result);
            }
            return Ok(result);
        };

        let grader_result = grader.evaluate(&agent_answer.fields, &self.eval.grader.config);
        info!(
            "[{}] graded: {}",
            self.eval.id,
            if grader_result.passed { "PASS" } else { "FAIL" }
        );

        let result = RunResult {
            eval_id: self.eval.id.clone(),
            answer: Some(Value::Object(agent_answer.fields)),
            grader_result: Some(grader_result),
            agent_metadata: agent_answer.metadata,
            metadata: RunMetadata {
                duration_ms: start.elapsed().as_millis() as u64,
                cache_hit: false,
                failure_kind: None,
                agent_identity: self.agent_identity.clone(),
            },
        };

        if let Some(cache) = cache {
            cache.put(&fp, &result);
        }
        Ok(result)
    }

    fn failed_result(&self, kind: FailureKind, start: Instant) -> RunResult {
        RunResult {
            eval_id: self.eval.id.clone(),
            answer: None,
            grader_result: None,
            agent_metadata: None,
            metadata: RunMetadata {
                duration_ms: start.elapsed().as_millis() as u64,
                cache_hit: false,
                failure_kind: Some(kind),
                agent_identity: self.agent_identity.clone(),
            },
        }
    }
}

/// The prompt handed to the agent: the eval task, the answer-file contract,
/// and any opaque data-node context the eval carries.
fn build_task_prompt(eval: &EvalDefinition) -> String {
    let mut prompt = eval.task.trim().to_string();

    prompt.push_str(&format!(
        "\n\nIMPORTANT: When you have completed this task:\n\
         1. Write your final answer as a JSON object to a file named `{}` in your working directory\n\
         2. The file should contain ONLY the JSON object with the required fields",
        ANSWER_FILE
    ));

    if let Some(data_node) = &eval.data_node {
        prompt.push_str(&format!("\n\nInput data reference: {}", data_node));
    }

    prompt
}
