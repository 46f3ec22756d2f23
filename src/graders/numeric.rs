use serde_json::{json, Map, Value};

use super::{as_f64, clamp_score, nested_field, tolerance_score, Grader, GraderResult};

/// Division-by-zero floor for relative tolerances against a zero truth value.
const RELATIVE_EPSILON: f64 = 1e-12;

/// Per-field numeric comparison against `config.ground_truth`, with a
/// tolerance spec per field in `config.tolerances`:
///
/// - `absolute`: `|answer - truth| <= value`, or asymmetric `lower`/`upper`
///   bounds around the truth value
/// - `relative`: `|answer - truth| / max(|truth|, epsilon) <= value`
/// - `min` / `max`: one-sided threshold on the answer itself
///
/// All configured fields must pass; reasoning enumerates every field and
/// lists each failure with its delta.
#[derive(Debug)]
pub struct NumericToleranceGrader;

struct FieldOutcome {
    passed: bool,
    score: f64,
    line: String,
    failure: Option<String>,
}

impl Grader for NumericToleranceGrader {
    fn evaluate(&self, answer: &Map<String, Value>, config: &Map<String, Value>) -> GraderResult {
        let Some(ground_truth) = config.get("ground_truth").and_then(Value::as_object) else {
            return GraderResult::fail("Grader config missing required mapping: ground_truth");
        };
        let tolerances = config
            .get("tolerances")
            .or_else(|| config.get("tolerance"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut metrics = Map::new();
        let mut all_pass = true;
        let mut failures = Vec::new();
        let mut field_scores = Vec::new();
        let mut lines = Vec::new();

        for (field, expected) in ground_truth {
            let outcome = check_field(answer, field, expected, tolerances.get(field), &mut metrics);
            if !outcome.passed {
                all_pass = false;
            }
            field_scores.push(outcome.score);
            lines.push(outcome.line);
            if let Some(failure) = outcome.failure {
                failures.push(failure);
            }
        }

        let overall = if field_scores.is_empty() {
            0.0
        } else {
            clamp_score(field_scores.iter().sum::<f64>() / field_scores.len() as f64)
        };
        metrics.insert("score".into(), json!(overall));

        let mut reasoning = vec![
            format!(
                "Numeric Tolerance Check: {}",
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

fn check_field(
    answer: &Map<String, Value>,
    field: &str,
    expected: &Value,
    tolerance: Option<&Value>,
    metrics: &mut Map<String, Value>,
) -> FieldOutcome {
    let record_fail = |metrics: &mut Map<String, Value>, failure: String| {
        metrics.insert(format!("{}_pass", field), json!(false));
        metrics.insert(format!("{}_score", field), json!(0.0));
        FieldOutcome {
            passed: false,
            score: 0.0,
            line: format!("  x {}: {}", field, failure),
            failure: Some(format!("{}: {}", field, failure)),
        }
    };

    let Some(expected) = as_f64(expected) else {
        return record_fail(metrics, "ground truth value is not numeric".into());
    };

    let Some(raw) = nested_field(answer, field) else {
        return record_fail(metrics, "missing field".into());
    };
    let Some(actual) = as_f64(raw) else {
        return record_fail(metrics, format!("cannot interpret {} as a number", raw));
    };

    let tol = tolerance.and_then(Value::as_object).cloned().unwrap_or_default();
    let tol_type = tol
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("absolute");
    let tol_value = tol.get("value").and_then(as_f64).unwrap_or(0.0);
    let lower = tol.get("lower").and_then(as_f64);
    let upper = tol.get("upper").and_then(as_f64);
    let asymmetric = lower.is_some() && upper.is_some();

    let (within, error, score, detail) = match tol_type {
        "absolute" if asymmetric => {
            let (lower, upper) = (lower.unwrap_or(0.0), upper.unwrap_or(0.0));
            let within = actual >= expected - lower && actual <= expected + upper;
            let error = (actual - expected).abs();
            let directional = if actual >= expected { upper } else { lower };
            (
                within,
                error,
                tolerance_score(error, directional),
                format!("{} vs {} (allowed: -{}/+{})", actual, expected, lower, upper),
            )
        }
        "absolute" => {
            let error = (actual - expected).abs();
            (
                error <= tol_value,
                error,
                tolerance_score(error, tol_value),
                format!(
                    "{} vs {} (delta {} vs tolerance {})",
                    actual, expected, error, tol_value
                ),
            )
        }
        "relative" => {
            let error = (actual - expected).abs() / expected.abs().max(RELATIVE_EPSILON);
            (
                error <= tol_value,
                error,
                tolerance_score(error, tol_value),
                format!(
                    "{} vs {} (relative error {:.4} vs tolerance {})",
                    actual, expected, error, tol_value
                ),
            )
        }
        "min" => {
            let within = actual >= tol_value;
            let error = if within { 0.0 } else { tol_value - actual };
            let score = if tol_value > 0.0 {
                clamp_score(actual / tol_value)
            } else if within {
                1.0
            } else {
                0.0
            };
            (
                within,
                error,
                score,
                format!("{} (minimum required: {})", actual, tol_value),
            )
        }
        "max" => {
            let within = actual <= tol_value;
            let error = if within { 0.0 } else { actual - tol_value };
            let score = if within {
                1.0
            } else if tol_value > 0.0 && actual > 0.0 {
                clamp_score(tol_value / actual)
            } else {
                0.0
            };
            (
                within,
                error,
                score,
                format!("{} (maximum allowed: {})", actual, tol_value),
            )
        }
        other => {
            return record_fail(metrics, format!("unknown tolerance type: {}", other));
        }
    };

    let score = clamp_score(score);
    metrics.insert(format!("{}_actual", field), json!(actual));
    metrics.insert(format!("{}_expected", field), json!(expected));
    metrics.insert(format!("{}_error", field), json!(error));
    metrics.insert(format!("{}_pass", field), json!(within));
    metrics.insert(format!("{}_score", field), json!(score));

    FieldOutcome {
        passed: within,
        score,
        line: format!(
            "  {} {}: {} (score: {:.3})",
            if within { "+" } else { "x" },
            field,
            detail,
            score
        ),
        failure: (!within).then(|| format!("{}: {}", field, detail)),
    }
}
