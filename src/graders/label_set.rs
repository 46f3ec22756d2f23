use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

use super::{string_list, Grader, GraderResult};

const DEFAULT_PASS_THRESHOLD: f64 = 0.90;
const DEFAULT_ANSWER_FIELD: &str = "cell_types_predicted";

/// Jaccard similarity between the predicted label set and
/// `config.ground_truth_labels`: `|A∩B| / |A∪B| >= scoring.pass_threshold`.
/// Two empty sets are a perfect match (ratio 1.0).
#[derive(Debug)]
pub struct LabelSetJaccardGrader;

impl Grader for LabelSetJaccardGrader {
    fn evaluate(&self, answer: &Map<String, Value>, config: &Map<String, Value>) -> GraderResult {
        let Some(truth) = config.get("ground_truth_labels").and_then(string_list) else {
            return GraderResult::fail("Grader config missing required list: ground_truth_labels");
        };
        let threshold = config
            .get("scoring")
            .and_then(Value::as_object)
            .and_then(|s| s.get("pass_threshold"))
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_PASS_THRESHOLD);
        let answer_field = config
            .get("answer_field")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_ANSWER_FIELD);

        let Some(predicted) = answer.get(answer_field) else {
            return GraderResult::fail(format!(
                "Agent answer missing required field: {}",
                answer_field
            ));
        };
        let Some(predicted) = string_list(predicted) else {
            return GraderResult::fail(format!("Field {} is not a list of labels", answer_field));
        };

        let truth: BTreeSet<String> = truth.into_iter().collect();
        let predicted: BTreeSet<String> = predicted.into_iter().collect();

        let intersection: Vec<&String> = truth.intersection(&predicted).collect();
        let union_len = truth.union(&predicted).count();
        let jaccard = if union_len == 0 {
            1.0
        } else {
            intersection.len() as f64 / union_len as f64
        };
        let passed = jaccard >= threshold;

        let missing: Vec<&String> = truth.difference(&predicted).collect();
        let extra: Vec<&String> = predicted.difference(&truth).collect();

        let mut metrics = Map::new();
        metrics.insert("jaccard_index".into(), json!(jaccard));
        metrics.insert("pass_threshold".into(), json!(threshold));
        metrics.insert("true_positives".into(), json!(intersection));
        metrics.insert("false_negatives".into(), json!(missing));
        metrics.insert("false_positives".into(), json!(extra));
        metrics.insert("predicted_count".into(), json!(predicted.len()));
        metrics.insert("ground_truth_count".into(), json!(truth.len()));

        let mut lines = vec![
            format!(
                "Label Set Comparison: {}",
                if passed { "PASS" } else { "FAIL" }
            ),
            String::new(),
            format!(
                "  {} Jaccard Index: {:.3} (threshold: {:.3})",
                if passed { "+" } else { "x" },
                jaccard,
                threshold
            ),
        ];
        push_label_section(&mut lines, "Correct Labels", "+", &intersection);
        push_label_section(&mut lines, "Missing Labels", "-", &missing);
        push_label_section(&mut lines, "Extra Labels", "?", &extra);

        GraderResult {
            passed,
            score: Some(jaccard),
            reasoning: lines.join("\n"),
            metrics,
        }
    }
}

fn push_label_section(lines: &mut Vec<String>, title: &str, mark: &str, labels: &[&String]) {
    lines.push(String::new());
    lines.push(format!("{} ({}):", title, labels.len()));
    if labels.is_empty() {
        lines.push("  None".into());
    } else {
        for label in labels {
            lines.push(format!("  {} {}", mark, label));
        }
    }
}
