use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::Config;

/// Combined stdout/stderr transcript of the agent process, left in the work
/// directory so it is available while the run is being graded.
pub const AGENT_LOG_FILE: &str = "agent_output.log";

/// Agent backed by a shell command.
///
/// The command runs with the work directory as its cwd and receives the task
/// prompt on stdin. It reports its answer by writing `eval_answer.json` into
/// the cwd, or by printing a JSON object as the last line of stdout.
pub struct CommandAgent {
    shell_cmd: String,
    timeout: Duration,
    max_output_bytes: usize,
}

impl CommandAgent {
    pub fn new(shell_cmd: String, timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            shell_cmd,
            timeout,
            max_output_bytes,
        }
    }

    pub fn from_config(shell_cmd: String, config: &Config) -> Self {
        Self::new(
            shell_cmd,
            Duration::from_secs(config.agent_timeout_secs),
            config.max_output_bytes,
        )
    }

    /// Stable identity string for cache fingerprinting: two different agent
    /// commands must never share cached results.
    pub fn identity(&self) -> String {
        format!("cmd:{}", self.shell_cmd)
    }

    pub async fn run(&self, prompt: &str, work_dir: &Path) -> Result<Value> {
        info!("Running agent in {}", work_dir.display());

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.shell_cmd)
            .current_dir(work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn agent process")?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .context("Failed to write prompt to agent stdin")?;
            // Dropping stdin closes the pipe so the agent sees EOF.
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(o)) => o,
            Ok(Err(e)) => anyhow::bail!("Agent process error: {}", e),
            Err(_) => anyhow::bail!("Agent timed out after {}s", self.timeout.as_secs()),
        };

        let stdout = self.truncate_output(&output.stdout);
        let stderr = self.truncate_output(&output.stderr);

        let transcript = format!("=== stdout ===\n{}\n\n=== stderr ===\n{}\n", stdout, stderr);
        if let Err(e) = std::fs::write(work_dir.join(AGENT_LOG_FILE), &transcript) {
            debug!("Failed to write agent transcript: {}", e);
        }

        if !output.status.success() {
            anyhow::bail!(
                "Agent exited with status {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.lines().last().unwrap_or("")
            );
        }

        // The answer file is the primary channel; a JSON object on the last
        // stdout line is accepted as a convenience for simple agents.
        Ok(parse_stdout_answer(&stdout).unwrap_or(Value::Null))
    }

    fn truncate_output(&self, raw: &[u8]) -> String {
        if raw.len() <= self.max_output_bytes {
            String::from_utf8_lossy(raw).to_string()
        } else {
            let t = String::from_utf8_lossy(&raw[..self.max_output_bytes]).to_string();
            format!(
                "{}\n\n... [truncated at {} bytes, total {}]",
                t,
                self.max_output_bytes,
                raw.len()
            )
        }
    }
}

fn parse_stdout_answer(stdout: &str) -> Option<Value> {
    let last = stdout.trim().lines().last()?;
    match serde_json::from_str::<Value>(last.trim()) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn agent(cmd: &str) -> CommandAgent {
        CommandAgent::new(cmd.to_string(), Duration::from_secs(10), 1024 * 1024)
    }

    #[tokio::test]
    async fn test_stdout_json_answer() {
        let tmp = tempfile::tempdir().unwrap();
        let result = agent(r#"echo '{"n_cells": 5000}'"#)
            .run("count cells", tmp.path())
            .await
            .unwrap();
        assert_eq!(result, json!({"n_cells": 5000}));
    }

    #[tokio::test]
    async fn test_non_json_stdout_yields_null() {
        let tmp = tempfile::tempdir().unwrap();
        let result = agent("echo done").run("task", tmp.path()).await.unwrap();
        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn test_answer_file_written_in_cwd() {
        let tmp = tempfile::tempdir().unwrap();
        agent(r#"echo '{"answer": "B"}' > eval_answer.json"#)
            .run("task", tmp.path())
            .await
            .unwrap();
        let raw = std::fs::read_to_string(tmp.path().join("eval_answer.json")).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&raw).unwrap(),
            json!({"answer": "B"})
        );
    }

    #[tokio::test]
    async fn test_prompt_delivered_on_stdin() {
        let tmp = tempfile::tempdir().unwrap();
        agent("cat > prompt.txt")
            .run("analyze the dataset", tmp.path())
            .await
            .unwrap();
        let raw = std::fs::read_to_string(tmp.path().join("prompt.txt")).unwrap();
        assert_eq!(raw, "analyze the dataset");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = agent("echo oops >&2; exit 3")
            .run("task", tmp.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("status 3"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let slow = CommandAgent::new("sleep 5".to_string(), Duration::from_millis(100), 1024);
        let err = slow.run("task", tmp.path()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_transcript_left_in_work_dir() {
        let tmp = tempfile::tempdir().unwrap();
        agent("echo hello; echo warn >&2")
            .run("task", tmp.path())
            .await
            .unwrap();
        let transcript = std::fs::read_to_string(tmp.path().join(AGENT_LOG_FILE)).unwrap();
        assert!(transcript.contains("hello"));
        assert!(transcript.contains("warn"));
    }

    #[test]
    fn test_truncation_marker() {
        let a = CommandAgent::new("true".into(), Duration::from_secs(1), 8);
        let out = a.truncate_output(b"0123456789abcdef");
        assert!(out.starts_with("01234567"));
        assert!(out.contains("truncated at 8 bytes, total 16"));
    }

    #[test]
    fn test_identity_distinguishes_commands() {
        assert_ne!(agent("a").identity(), agent("b").identity());
    }
}
