use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

use super::{clamp_score, string_list, Grader, GraderResult};

const DEFAULT_PR_ANSWER_FIELD: &str = "top_marker_genes";
const DEFAULT_SEP_ANSWER_FIELD: &str = "marker_genes";
const DEFAULT_PRECISION_FLOOR: f64 = 0.5;
const DEFAULT_RECALL_FLOOR: f64 = 0.5;

type GeneSet = BTreeSet<String>;

/// Per-group precision/recall of predicted marker genes against
/// `config.canonical_markers`. Both metrics must clear the configured floors
/// (`scoring.pass_thresholds.precision_at_k` / `recall_at_k`) in every group;
/// partial credit is the mean per-group harmonic mean (F1).
#[derive(Debug)]
pub struct MarkerGenePrecisionRecallGrader;

impl Grader for MarkerGenePrecisionRecallGrader {
    fn evaluate(&self, answer: &Map<String, Value>, config: &Map<String, Value>) -> GraderResult {
        let canonical = config
            .get("canonical_markers")
            .or_else(|| config.get("ground_truth_labels"));
        let Some(canonical) = canonical else {
            return GraderResult::fail("Grader config missing required mapping: canonical_markers");
        };
        let Some(truth_by_group) = gene_sets_by_group(canonical) else {
            return GraderResult::fail("canonical_markers must map groups to gene lists");
        };

        let thresholds = config
            .get("scoring")
            .and_then(Value::as_object)
            .and_then(|s| s.get("pass_thresholds"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let precision_floor = thresholds
            .get("precision_at_k")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_PRECISION_FLOOR);
        let recall_floor = thresholds
            .get("recall_at_k")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_RECALL_FLOOR);

        let answer_field = config
            .get("answer_field")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PR_ANSWER_FIELD);
        let Some(predicted_raw) = answer.get(answer_field) else {
            return GraderResult::fail(format!(
                "Agent answer missing required field: {}",
                answer_field
            ));
        };
        let Some(predicted_by_group) = gene_sets_by_group(predicted_raw) else {
            return GraderResult::fail(format!(
                "Field {} must map groups to gene lists",
                answer_field
            ));
        };

        let mut metrics = Map::new();
        let mut all_pass = true;
        let mut failures = Vec::new();
        let mut f1_scores = Vec::new();
        let mut lines = Vec::new();

        for (group, truth) in &truth_by_group {
            let Some((_, predicted)) = predicted_by_group.iter().find(|(g, _)| g == group) else {
                all_pass = false;
                failures.push(format!("Missing group: {}", group));
                f1_scores.push(0.0);
                lines.push(format!("  x {}: no predicted markers", group));
                continue;
            };

            let hits = truth.intersection(predicted).count() as f64;
            let precision = if predicted.is_empty() {
                0.0
            } else {
                hits / predicted.len() as f64
            };
            let recall = if truth.is_empty() {
                1.0
            } else {
                hits / truth.len() as f64
            };
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            let group_pass = precision >= precision_floor && recall >= recall_floor;

            metrics.insert(format!("{}_precision", group), json!(precision));
            metrics.insert(format!("{}_recall", group), json!(recall));
            metrics.insert(format!("{}_f1", group), json!(f1));
            metrics.insert(format!("{}_pass", group), json!(group_pass));
            f1_scores.push(f1);

            lines.push(format!(
                "  {} {}: precision {:.3} (floor {:.3}), recall {:.3} (floor {:.3})",
                if group_pass { "+" } else { "x" },
                group,
                precision,
                precision_floor,
                recall,
                recall_floor
            ));

            if !group_pass {
                all_pass = false;
                failures.push(format!(
                    "{}: precision {:.3} / recall {:.3} below floors {:.3} / {:.3}",
                    group, precision, recall, precision_floor, recall_floor
                ));
            }
        }

        let overall = if f1_scores.is_empty() {
            0.0
        } else {
            clamp_score(f1_scores.iter().sum::<f64>() / f1_scores.len() as f64)
        };
        metrics.insert("score".into(), json!(overall));

        let mut reasoning = vec![
            format!(
                "Marker Gene Precision/Recall: {}",
                if all_pass { "PASS" } else { "FAIL" }
            ),
            format!("Overall score: {:.3}", overall),
            String::new(),
        ];
        reasoning.extend(lines);
        if !failures.is_empty() {
            reasoning.push(String::new());
            reasoning.push("Failures:".into());
            for failure in &failures {
                reasoning.push(format!("  - {}", failure));
            }
        }

        GraderResult {
            passed: all_pass,
            score: Some(overall),
            reasoning: reasoning.join("\n"),
            metrics,
        }
    }
}

/// Checks that marker genes claimed for distinct biological groups stay
/// distinct: the pairwise overlap fraction `|Gi∩Gj| / min(|Gi|, |Gj|)` must
/// not exceed `scoring.max_overlap_fraction` for any pair of groups.
#[derive(Debug)]
pub struct MarkerGeneSeparationGrader;

impl Grader for MarkerGeneSeparationGrader {
    fn evaluate(&self, answer: &Map<String, Value>, config: &Map<String, Value>) -> GraderResult {
        let max_overlap = config
            .get("scoring")
            .and_then(Value::as_object)
            .and_then(|s| s.get("max_overlap_fraction"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        let answer_field = config
            .get("answer_field")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_SEP_ANSWER_FIELD);
        let Some(raw) = answer.get(answer_field) else {
            return GraderResult::fail(format!(
                "Agent answer missing required field: {}",
                answer_field
            ));
        };
        let Some(by_group) = raw.as_object() else {
            return GraderResult::fail(format!(
                "Field {} must map groups to gene lists",
                answer_field
            ));
        };

        let mut groups: Vec<(String, GeneSet)> = Vec::new();
        for (group, genes) in by_group {
            let Some(genes) = string_list(genes) else {
                return GraderResult::fail(format!("{}: gene list is not a list", group));
            };
            groups.push((group.clone(), genes.into_iter().collect()));
        }

        let mut metrics = Map::new();
        let mut failures = Vec::new();
        let mut worst: f64 = 0.0;
        let mut lines = Vec::new();

        for i in 0..groups.len() {
            for j in (i + 1)..groups.len() {
                let (name_a, set_a) = &groups[i];
                let (name_b, set_b) = &groups[j];
                let smaller = set_a.len().min(set_b.len());
                if smaller == 0 {
                    continue;
                }
                let shared: Vec<&String> = set_a.intersection(set_b).collect();
                let overlap = shared.len() as f64 / smaller as f64;
                worst = worst.max(overlap);

                let pair = format!("{}|{}", name_a, name_b);
                metrics.insert(format!("{}_overlap", pair), json!(overlap));

                if overlap > max_overlap {
                    failures.push(format!(
                        "{} / {}: overlap {:.3} > {:.3} (shared: {})",
                        name_a,
                        name_b,
                        overlap,
                        max_overlap,
                        shared
                            .iter()
                            .map(|s| s.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ));
                } else {
                    lines.push(format!(
                        "  + {} / {}: overlap {:.3} (max {:.3})",
                        name_a, name_b, overlap, max_overlap
                    ));
                }
            }
        }

        let passed = failures.is_empty();
        let score = clamp_score(1.0 - worst);
        metrics.insert("max_observed_overlap".into(), json!(worst));
        metrics.insert("score".into(), json!(score));

        let mut reasoning = vec![
            format!(
                "Marker Gene Separation: {}",
                if passed { "PASS" } else { "FAIL" }
            ),
            format!(
                "Worst pairwise overlap: {:.3} (allowed: {:.3})",
                worst, max_overlap
            ),
            String::new(),
        ];
        reasoning.extend(lines);
        if !failures.is_empty() {
            reasoning.push("Contaminated pairs:".into());
            for failure in &failures {
                reasoning.push(format!("  - {}", failure));
            }
        }

        GraderResult {
            passed,
            score: Some(score),
            reasoning: reasoning.join("\n"),
            metrics,
        }
    }
}

/// Accepts either `{group: [genes]}` or a bare `[genes]` list (treated as a
/// single unnamed group).
fn gene_sets_by_group(value: &Value) -> Option<Vec<(String, GeneSet)>> {
    match value {
        Value::Object(map) => {
            let mut groups = Vec::new();
            for (group, genes) in map {
                let genes = string_list(genes)?;
                groups.push((group.clone(), genes.into_iter().collect()));
            }
            Some(groups)
        }
        Value::Array(_) => {
            let genes = string_list(value)?;
            Some(vec![("all".to_string(), genes.into_iter().collect())])
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn pr_config() -> Map<String, Value> {
        obj(json!({
            "canonical_markers": {
                "T cell": ["CD3D", "CD3E", "CD2"],
                "B cell": ["CD79A", "MS4A1"]
            },
            "scoring": {"pass_thresholds": {"precision_at_k": 0.5, "recall_at_k": 0.5}},
            "answer_field": "top_marker_genes"
        }))
    }

    #[test]
    fn test_exact_markers_pass_with_full_score() {
        let answer = obj(json!({
            "top_marker_genes": {
                "T cell": ["CD3D", "CD3E", "CD2"],
                "B cell": ["CD79A", "MS4A1"]
            }
        }));
        let result = MarkerGenePrecisionRecallGrader.evaluate(&answer, &pr_config());
        assert!(result.passed);
        assert_eq!(result.score, Some(1.0));
    }

    #[test]
    fn test_partial_overlap_scores_harmonic_mean() {
        let answer = obj(json!({
            "top_marker_genes": {
                "T cell": ["CD3D", "CD3E", "GAPDH"],
                "B cell": ["CD79A", "MS4A1"]
            }
        }));
        let result = MarkerGenePrecisionRecallGrader.evaluate(&answer, &pr_config());
        // T cell: precision 2/3, recall 2/3 -> both above 0.5 floor
        assert!(result.passed, "{}", result.reasoning);
        let f1 = result.metrics["T cell_f1"].as_f64().unwrap();
        assert!((f1 - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_below_recall_floor_fails_group() {
        let answer = obj(json!({
            "top_marker_genes": {
                "T cell": ["CD3D"],
                "B cell": ["CD79A", "MS4A1"]
            }
        }));
        let result = MarkerGenePrecisionRecallGrader.evaluate(&answer, &pr_config());
        // T cell recall 1/3 < 0.5
        assert!(!result.passed);
        assert!(result.reasoning.contains("T cell"));
        assert_eq!(result.metrics["B cell_pass"], json!(true));
    }

    #[test]
    fn test_missing_group_fails() {
        let answer = obj(json!({"top_marker_genes": {"T cell": ["CD3D", "CD3E"]}}));
        let result = MarkerGenePrecisionRecallGrader.evaluate(&answer, &pr_config());
        assert!(!result.passed);
        assert!(result.reasoning.contains("Missing group: B cell"));
    }

    #[test]
    fn test_flat_gene_list_single_group() {
        let config = obj(json!({
            "canonical_markers": ["EPCAM", "KRT8"],
            "scoring": {"pass_thresholds": {"precision_at_k": 0.5, "recall_at_k": 0.5}}
        }));
        let answer = obj(json!({"top_marker_genes": ["EPCAM", "KRT8"]}));
        let result = MarkerGenePrecisionRecallGrader.evaluate(&answer, &config);
        assert!(result.passed);
    }

    #[test]
    fn test_missing_answer_field_names_it() {
        let result =
            MarkerGenePrecisionRecallGrader.evaluate(&obj(json!({"genes": []})), &pr_config());
        assert!(!result.passed);
        assert!(result.reasoning.contains("top_marker_genes"));
    }

    #[test]
    fn test_separation_disjoint_groups_pass() {
        let config = obj(json!({"scoring": {"max_overlap_fraction": 0.0}}));
        let answer = obj(json!({
            "marker_genes": {
                "T cell": ["CD3D", "CD3E"],
                "B cell": ["CD79A", "MS4A1"]
            }
        }));
        let result = MarkerGeneSeparationGrader.evaluate(&answer, &config);
        assert!(result.passed);
        assert_eq!(result.score, Some(1.0));
    }

    #[test]
    fn test_separation_contamination_fails_and_names_genes() {
        let config = obj(json!({"scoring": {"max_overlap_fraction": 0.0}}));
        let answer = obj(json!({
            "marker_genes": {
                "T cell": ["CD3D", "MS4A1"],
                "B cell": ["CD79A", "MS4A1"]
            }
        }));
        let result = MarkerGeneSeparationGrader.evaluate(&answer, &config);
        assert!(!result.passed);
        assert!(result.reasoning.contains("MS4A1"));
        assert_eq!(result.score, Some(0.5));
    }

    #[test]
    fn test_separation_tolerated_overlap() {
        let config = obj(json!({"scoring": {"max_overlap_fraction": 0.5}}));
        let answer = obj(json!({
            "marker_genes": {
                "T cell": ["CD3D", "MS4A1"],
                "B cell": ["CD79A", "MS4A1"]
            }
        }));
        let result = MarkerGeneSeparationGrader.evaluate(&answer, &config);
        assert!(result.passed);
    }

    #[test]
    fn test_separation_single_group_trivially_passes() {
        let config = obj(json!({"scoring": {}}));
        let answer = obj(json!({"marker_genes": {"T cell": ["CD3D"]}}));
        let result = MarkerGeneSeparationGrader.evaluate(&answer, &config);
        assert!(result.passed);
        assert_eq!(result.score, Some(1.0));
    }
}
