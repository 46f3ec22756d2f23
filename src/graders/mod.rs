mod distribution;
mod label_set;
mod marker_gene;
mod multiple_choice;
mod numeric;
mod spatial;

pub use distribution::DistributionComparisonGrader;
pub use label_set::LabelSetJaccardGrader;
pub use marker_gene::{MarkerGenePrecisionRecallGrader, MarkerGeneSeparationGrader};
pub use multiple_choice::MultipleChoiceGrader;
pub use numeric::NumericToleranceGrader;
pub use spatial::SpatialAdjacencyGrader;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EvalError;

/// Verdict produced by a single grader invocation.
///
/// `reasoning` is always non-empty on failure and names the first failing
/// criterion; `metrics` carries per-field diagnostics for downstream tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraderResult {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub reasoning: String,
    #[serde(default)]
    pub metrics: Map<String, Value>,
}

impl GraderResult {
    /// Fail-closed result for structurally unusable answers or configs.
    /// A malformed answer is a grading outcome, not a system fault.
    pub fn fail(reasoning: impl Into<String>) -> Self {
        Self {
            passed: false,
            score: Some(0.0),
            reasoning: reasoning.into(),
            metrics: Map::new(),
        }
    }
}

/// Shared contract for all comparators: a deterministic, side-effect-free
/// function of the agent answer and the grader config.
pub trait Grader: Send + Sync + std::fmt::Debug {
    fn evaluate(&self, answer: &Map<String, Value>, config: &Map<String, Value>) -> GraderResult;
}

/// Resolve a grader-type tag to its comparator. The set of variants is fixed
/// at compile time; unknown tags fail fast so no agent compute is wasted on
/// an eval that cannot be graded.
pub fn get_grader(kind: &str) -> Result<&'static dyn Grader, EvalError> {
    static NUMERIC: NumericToleranceGrader = NumericToleranceGrader;
    static LABEL_SET: LabelSetJaccardGrader = LabelSetJaccardGrader;
    static DISTRIBUTION: DistributionComparisonGrader = DistributionComparisonGrader;
    static PRECISION_RECALL: MarkerGenePrecisionRecallGrader = MarkerGenePrecisionRecallGrader;
    static SEPARATION: MarkerGeneSeparationGrader = MarkerGeneSeparationGrader;
    static SPATIAL: SpatialAdjacencyGrader = SpatialAdjacencyGrader;
    static MULTIPLE_CHOICE: MultipleChoiceGrader = MultipleChoiceGrader;

    match kind {
        "numeric_tolerance" => Ok(&NUMERIC),
        "label_set_jaccard" | "jaccard_label_set" => Ok(&LABEL_SET),
        "distribution_comparison" => Ok(&DISTRIBUTION),
        "marker_gene_precision_recall" => Ok(&PRECISION_RECALL),
        "marker_gene_separation" => Ok(&SEPARATION),
        "spatial_adjacency" => Ok(&SPATIAL),
        "multiple_choice" => Ok(&MULTIPLE_CHOICE),
        other => Err(EvalError::UnknownGraderType(other.to_string())),
    }
}

/// Look up a possibly dotted path (`"qc.n_cells"`) in an answer mapping.
pub(crate) fn nested_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    if !key.contains('.') {
        return obj.get(key);
    }
    let mut current = obj;
    let mut parts = key.split('.').peekable();
    while let Some(part) = parts.next() {
        let value = current.get(part)?;
        if parts.peek().is_none() {
            return Some(value);
        }
        current = value.as_object()?;
    }
    None
}

pub(crate) fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 1.0)
}

/// Partial credit for an error measured against a tolerance: full credit
/// within tolerance, then decaying as tolerance/error.
pub(crate) fn tolerance_score(error: f64, tolerance: f64) -> f64 {
    if error <= tolerance {
        return 1.0;
    }
    if tolerance > 0.0 && error > 0.0 {
        return clamp_score(tolerance / error);
    }
    0.0
}

/// Extract a list of strings from a JSON value, accepting any scalar list by
/// stringifying entries (gene symbols sometimes arrive as bare numbers).
pub(crate) fn string_list(value: &Value) -> Option<Vec<String>> {
    let arr = value.as_array()?;
    Some(
        arr.iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
    )
}

pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_resolves_all_builtins() {
        for kind in [
            "numeric_tolerance",
            "label_set_jaccard",
            "jaccard_label_set",
            "distribution_comparison",
            "marker_gene_precision_recall",
            "marker_gene_separation",
            "spatial_adjacency",
            "multiple_choice",
        ] {
            assert!(get_grader(kind).is_ok(), "expected builtin: {}", kind);
        }
    }

    #[test]
    fn test_registry_rejects_unknown_type() {
        let err = get_grader("semantic_similarity").unwrap_err();
        assert!(matches!(err, EvalError::UnknownGraderType(_)));
        assert!(err.to_string().contains("semantic_similarity"));
    }

    #[test]
    fn test_nested_field_flat_and_dotted() {
        let obj = json!({"n_cells": 5000, "qc": {"doublet_rate": 0.04}});
        let obj = obj.as_object().unwrap();
        assert_eq!(nested_field(obj, "n_cells"), Some(&json!(5000)));
        assert_eq!(nested_field(obj, "qc.doublet_rate"), Some(&json!(0.04)));
        assert_eq!(nested_field(obj, "qc.missing"), None);
        assert_eq!(nested_field(obj, "n_cells.deeper"), None);
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(1.5), 1.0);
        assert_eq!(clamp_score(-0.2), 0.0);
        assert_eq!(clamp_score(f64::NAN), 0.0);
        assert_eq!(clamp_score(0.42), 0.42);
    }

    #[test]
    fn test_tolerance_score() {
        assert_eq!(tolerance_score(0.0, 0.0), 1.0);
        assert_eq!(tolerance_score(1.0, 1.0), 1.0);
        assert_eq!(tolerance_score(2.0, 1.0), 0.5);
        assert_eq!(tolerance_score(5.0, 0.0), 0.0);
    }

    #[test]
    fn test_as_f64_coercions() {
        assert_eq!(as_f64(&json!(3.5)), Some(3.5));
        assert_eq!(as_f64(&json!("12")), Some(12.0));
        assert_eq!(as_f64(&json!(true)), Some(1.0));
        assert_eq!(as_f64(&json!("abc")), None);
        assert_eq!(as_f64(&json!(null)), None);
    }
}
