use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

use super::{as_f64, clamp_score, tolerance_score, Grader, GraderResult};

const DEFAULT_PCT_TOLERANCE: f64 = 3.0;

/// Compares an empirical cell-type distribution against
/// `config.ground_truth.cell_type_distribution`: each type's percentage must
/// sit within `tolerances.cell_type_percentages.value` points of the truth,
/// and `total_cells` (when both sides report it) within
/// `tolerances.total_cells.value`. Lower divergence is always better; extra
/// predicted types penalize every component score.
#[derive(Debug)]
pub struct DistributionComparisonGrader;

impl Grader for DistributionComparisonGrader {
    fn evaluate(&self, answer: &Map<String, Value>, config: &Map<String, Value>) -> GraderResult {
        let Some(ground_truth) = config.get("ground_truth").and_then(Value::as_object) else {
            return GraderResult::fail("Grader config missing required mapping: ground_truth");
        };
        let Some(gt_distribution) = ground_truth
            .get("cell_type_distribution")
            .and_then(Value::as_object)
        else {
            return GraderResult::fail(
                "Grader config missing required mapping: ground_truth.cell_type_distribution",
            );
        };

        let tolerances = config
            .get("tolerances")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let pct_tolerance = tolerances
            .get("cell_type_percentages")
            .and_then(Value::as_object)
            .and_then(|t| t.get("value"))
            .and_then(as_f64)
            .unwrap_or(DEFAULT_PCT_TOLERANCE);

        let Some(agent_distribution) = answer
            .get("cell_type_distribution")
            .and_then(Value::as_object)
        else {
            return GraderResult::fail(
                "Agent answer missing required field: cell_type_distribution",
            );
        };

        let mut metrics = Map::new();
        let mut all_pass = true;
        let mut failures = Vec::new();
        let mut component_scores = Vec::new();
        let mut lines = Vec::new();

        // Optional total-cells check, only when both sides report a count.
        let gt_total = ground_truth.get("total_cells").and_then(as_f64);
        let agent_total = answer.get("total_cells").and_then(as_f64);
        if let (Some(expected), Some(actual)) = (gt_total, agent_total) {
            let tol = tolerances
                .get("total_cells")
                .and_then(Value::as_object)
                .and_then(|t| t.get("value"))
                .and_then(as_f64)
                .unwrap_or(0.0);
            let diff = (actual - expected).abs();
            let within = diff <= tol;
            let score = clamp_score(tolerance_score(diff, tol));

            metrics.insert("total_cells_actual".into(), json!(actual));
            metrics.insert("total_cells_expected".into(), json!(expected));
            metrics.insert("total_cells_diff".into(), json!(diff));
            metrics.insert("total_cells_pass".into(), json!(within));
            metrics.insert("total_cells_score".into(), json!(score));
            component_scores.push(score);

            if !within {
                all_pass = false;
                failures.push(format!(
                    "total_cells: {} vs {} (diff: {})",
                    actual, expected, diff
                ));
            }
        }

        for (cell_type, expected) in gt_distribution {
            let Some(expected) = as_f64(expected) else {
                all_pass = false;
                failures.push(format!("{}: ground truth percentage is not numeric", cell_type));
                component_scores.push(0.0);
                continue;
            };

            let Some(actual) = agent_distribution.get(cell_type).and_then(as_f64) else {
                all_pass = false;
                failures.push(format!("Missing cell type: {}", cell_type));
                metrics.insert(format!("{}_pass", cell_type), json!(false));
                metrics.insert(format!("{}_score", cell_type), json!(0.0));
                component_scores.push(0.0);
                lines.push(format!("  x {}: MISSING vs {:.2}%", cell_type, expected));
                continue;
            };

            let diff = (actual - expected).abs();
            let within = diff <= pct_tolerance;
            let score = clamp_score(tolerance_score(diff, pct_tolerance));

            metrics.insert(format!("{}_actual", cell_type), json!(actual));
            metrics.insert(format!("{}_expected", cell_type), json!(expected));
            metrics.insert(format!("{}_diff", cell_type), json!(diff));
            metrics.insert(format!("{}_pass", cell_type), json!(within));
            metrics.insert(format!("{}_score", cell_type), json!(score));
            component_scores.push(score);

            lines.push(format!(
                "  {} {}: {:.2}% vs {:.2}% (diff: {:.2}%, score: {:.3})",
                if within { "+" } else { "x" },
                cell_type,
                actual,
                expected,
                diff,
                score
            ));

            if !within {
                all_pass = false;
                failures.push(format!(
                    "{}: {:.2}% vs {:.2}% (diff: {:.2}%)",
                    cell_type, actual, expected, diff
                ));
            }
        }

        // Hallucinated cell types dilute every component score.
        let expected_types: BTreeSet<&String> = gt_distribution.keys().collect();
        let extra_types: Vec<&String> = agent_distribution
            .keys()
            .filter(|k| !expected_types.contains(k))
            .collect();
        if !extra_types.is_empty() && !expected_types.is_empty() {
            let penalty =
                expected_types.len() as f64 / (expected_types.len() + extra_types.len()) as f64;
            for score in &mut component_scores {
                *score *= penalty;
            }
            metrics.insert("extra_cell_types".into(), json!(extra_types));
            metrics.insert("extra_type_penalty_factor".into(), json!(penalty));
        }

        let overall = if component_scores.is_empty() {
            0.0
        } else {
            clamp_score(component_scores.iter().sum::<f64>() / component_scores.len() as f64)
        };
        metrics.insert("score".into(), json!(overall));

        let mut reasoning = vec![
            format!(
                "Distribution Comparison: {}",
                if all_pass { "PASS" } else { "FAIL" }
            ),
            format!("Overall score: {:.3}", overall),
            String::new(),
            format!("Cell type percentages (tolerance: +/-{}%):", pct_tolerance),
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
