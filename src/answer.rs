use serde_json::{Map, Value};
use std::path::Path;
use tracing::warn;

/// File an agent may write into its work directory instead of returning an
/// answer value directly.
pub const ANSWER_FILE: &str = "eval_answer.json";

/// Normalized agent answer: the answer mapping itself plus any free-form
/// metadata the agent attached via the `{answer, metadata}` envelope.
#[derive(Debug, Clone)]
pub struct AgentAnswer {
    pub fields: Map<String, Value>,
    pub metadata: Option<Value>,
}

/// Normalize whatever the agent produced into an `AgentAnswer`.
///
/// Accepted shapes, in order of preference:
/// 1. an `{answer, metadata}` envelope whose `answer` is a mapping
/// 2. a bare mapping returned directly
/// 3. an `eval_answer.json` artifact in the work directory
///
/// An explicit return value wins over a file artifact; the file is only
/// consulted when the returned value carries no usable answer.
pub fn normalize(returned: Value, work_dir: &Path) -> Option<AgentAnswer> {
    if let Value::Object(map) = returned {
        if map.contains_key("answer") && (map.len() <= 2 || map.contains_key("metadata")) {
            let metadata = map.get("metadata").cloned();
            match map.get("answer") {
                Some(Value::Object(fields)) => {
                    return Some(AgentAnswer {
                        fields: fields.clone(),
                        metadata,
                    });
                }
                // Envelope present but answer empty: fall back to the file,
                // keeping the envelope metadata.
                Some(Value::Null) | None => {
                    return read_answer_file(work_dir).map(|fields| AgentAnswer {
                        fields,
                        metadata,
                    });
                }
                // Scalar answers wrap into the conventional field name used
                // by the multiple-choice grader.
                Some(other) => {
                    let mut fields = Map::new();
                    fields.insert("answer".into(), other.clone());
                    return Some(AgentAnswer { fields, metadata });
                }
            }
        }
        return Some(AgentAnswer {
            fields: map,
            metadata: None,
        });
    }

    read_answer_file(work_dir).map(|fields| AgentAnswer {
        fields,
        metadata: None,
    })
}

fn read_answer_file(work_dir: &Path) -> Option<Map<String, Value>> {
    let path = work_dir.join(ANSWER_FILE);
    let raw = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => {
            warn!("{} is not a JSON object", path.display());
            None
        }
        Err(e) => {
            warn!("Failed to parse {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_mapping() {
        let tmp = tempfile::tempdir().unwrap();
        let answer = normalize(json!({"n_cells": 5000}), tmp.path()).unwrap();
        assert_eq!(answer.fields["n_cells"], json!(5000));
        assert!(answer.metadata.is_none());
    }

    #[test]
    fn test_envelope_with_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        let answer = normalize(
            json!({"answer": {"n_cells": 5000}, "metadata": {"model": "sonnet"}}),
            tmp.path(),
        )
        .unwrap();
        assert_eq!(answer.fields["n_cells"], json!(5000));
        assert_eq!(answer.metadata.unwrap()["model"], json!("sonnet"));
    }

    #[test]
    fn test_file_artifact_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(ANSWER_FILE),
            json!({"answer": "B"}).to_string(),
        )
        .unwrap();
        let answer = normalize(Value::Null, tmp.path()).unwrap();
        assert_eq!(answer.fields["answer"], json!("B"));
    }

    #[test]
    fn test_return_value_wins_over_file() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(ANSWER_FILE),
            json!({"n_cells": 1}).to_string(),
        )
        .unwrap();
        let answer = normalize(json!({"n_cells": 2}), tmp.path()).unwrap();
        assert_eq!(answer.fields["n_cells"], json!(2));
    }

    #[test]
    fn test_envelope_null_answer_falls_back_to_file() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(ANSWER_FILE),
            json!({"n_cells": 7}).to_string(),
        )
        .unwrap();
        let answer = normalize(
            json!({"answer": null, "metadata": {"duration_s": 12}}),
            tmp.path(),
        )
        .unwrap();
        assert_eq!(answer.fields["n_cells"], json!(7));
        assert!(answer.metadata.is_some());
    }

    #[test]
    fn test_scalar_envelope_answer_wraps() {
        let tmp = tempfile::tempdir().unwrap();
        let answer = normalize(json!({"answer": "C"}), tmp.path()).unwrap();
        assert_eq!(answer.fields["answer"], json!("C"));
    }

    #[test]
    fn test_no_answer_anywhere() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(normalize(Value::Null, tmp.path()).is_none());
    }

    #[test]
    fn test_malformed_answer_file() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(ANSWER_FILE), "{broken").unwrap();
        assert!(normalize(Value::Null, tmp.path()).is_none());
    }

    #[test]
    fn test_answer_file_non_object_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(ANSWER_FILE), "[1, 2, 3]").unwrap();
        assert!(normalize(Value::Null, tmp.path()).is_none());
    }
}
