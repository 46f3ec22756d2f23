use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::info;

use crate::error::EvalError;

/// A single task definition paired with its grading specification.
///
/// `data_node` and `metadata` are opaque pass-through: the runner hands them
/// to the agent prompt / result consumers without interpreting them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalDefinition {
    pub id: String,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_node: Option<Value>,
    pub grader: GraderSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraderSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl EvalDefinition {
    pub fn from_json(raw: &str) -> Result<Self, EvalError> {
        let eval: EvalDefinition =
            serde_json::from_str(raw).map_err(|e| EvalError::Schema(e.to_string()))?;
        eval.validate()?;
        Ok(eval)
    }

    pub fn load(path: &Path) -> Result<Self, EvalError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EvalError::Schema(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    fn validate(&self) -> Result<(), EvalError> {
        if self.id.trim().is_empty() {
            return Err(EvalError::Schema("missing field: id".into()));
        }
        if self.task.trim().is_empty() {
            return Err(EvalError::Schema("missing field: task".into()));
        }
        if self.grader.kind.trim().is_empty() {
            return Err(EvalError::Schema("missing field: grader.type".into()));
        }
        Ok(())
    }
}

/// Load every `*.json` eval document under `path` (a file or a directory,
/// searched recursively), sorted by file name for stable batch ordering.
pub fn load_evals(path: &Path) -> Result<Vec<EvalDefinition>, EvalError> {
    if path.is_file() {
        return Ok(vec![EvalDefinition::load(path)?]);
    }

    let mut files = Vec::new();
    collect_json_files(path, &mut files)?;
    files.sort();

    let mut evals = Vec::new();
    for file in &files {
        evals.push(EvalDefinition::load(file)?);
    }
    info!("Loaded {} eval definitions from {}", evals.len(), path.display());
    Ok(evals)
}

fn collect_json_files(dir: &Path, out: &mut Vec<std::path::PathBuf>) -> Result<(), EvalError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| EvalError::Schema(format!("{}: {}", dir.display(), e)))?;
    for entry in entries {
        let entry = entry.map_err(|e| EvalError::Schema(e.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            collect_json_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
    Ok(())
}
