use serde_json::{json, Map, Value};

use super::{as_f64, clamp_score, Grader, GraderResult};

const DEFAULT_MAX_MEDIAN_UM: f64 = 25.0;
const DEFAULT_MAX_P90_UM: f64 = 80.0;
const DEFAULT_MIN_PCT_WITHIN_15UM: f64 = 60.0;
const DEFAULT_MIN_PCT_MIXED_WITHIN_55UM: f64 = 60.0;

const REQUIRED_FIELDS: [&str; 5] = [
    "median_ic_to_pc_um",
    "p90_ic_to_pc_um",
    "pct_ic_within_15um",
    "pct_ic_mixed_within_55um",
    "adjacency_pass",
];

/// Compares reported immune-cell-to-parenchymal-cell adjacency statistics
/// against distance/coverage thresholds from `scoring.pass_thresholds`. All
/// four distance checks and the agent's own adjacency verdict must hold.
#[derive(Debug)]
pub struct SpatialAdjacencyGrader;

impl Grader for SpatialAdjacencyGrader {
    fn evaluate(&self, answer: &Map<String, Value>, config: &Map<String, Value>) -> GraderResult {
        let thresholds = config
            .get("scoring")
            .and_then(Value::as_object)
            .and_then(|s| s.get("pass_thresholds"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let max_median = thresholds
            .get("max_median_ic_to_pc_um")
            .and_then(as_f64)
            .unwrap_or(DEFAULT_MAX_MEDIAN_UM);
        let max_p90 = thresholds
            .get("max_p90_ic_to_pc_um")
            .and_then(as_f64)
            .unwrap_or(DEFAULT_MAX_P90_UM);
        let min_pct_15 = thresholds
            .get("min_pct_ic_within_15um")
            .and_then(as_f64)
            .unwrap_or(DEFAULT_MIN_PCT_WITHIN_15UM);
        let min_pct_55 = thresholds
            .get("min_pct_ic_mixed_within_55um")
            .and_then(as_f64)
            .unwrap_or(DEFAULT_MIN_PCT_MIXED_WITHIN_55UM);

        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|f| !answer.contains_key(*f))
            .collect();
        if !missing.is_empty() {
            return GraderResult::fail(format!(
                "Agent answer missing required fields: {}",
                missing.join(", ")
            ));
        }

        let Some(median) = answer.get("median_ic_to_pc_um").and_then(as_f64) else {
            return GraderResult::fail("median_ic_to_pc_um is not numeric");
        };
        let Some(p90) = answer.get("p90_ic_to_pc_um").and_then(as_f64) else {
            return GraderResult::fail("p90_ic_to_pc_um is not numeric");
        };
        let Some(pct_15) = answer.get("pct_ic_within_15um").and_then(as_f64) else {
            return GraderResult::fail("pct_ic_within_15um is not numeric");
        };
        let Some(pct_55) = answer.get("pct_ic_mixed_within_55um").and_then(as_f64) else {
            return GraderResult::fail("pct_ic_mixed_within_55um is not numeric");
        };
        let adjacency_pass = answer
            .get("adjacency_pass")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let median_pass = median <= max_median;
        let p90_pass = p90 <= max_p90;
        let pct_15_pass = pct_15 >= min_pct_15;
        let pct_55_pass = pct_55 >= min_pct_55;
        let passed = median_pass && p90_pass && pct_15_pass && pct_55_pass && adjacency_pass;

        let median_score = upper_bound_score(median, max_median);
        let p90_score = upper_bound_score(p90, max_p90);
        let pct_15_score = lower_bound_score(pct_15, min_pct_15);
        let pct_55_score = lower_bound_score(pct_55, min_pct_55);
        let adjacency_score = if adjacency_pass { 1.0 } else { 0.0 };
        let overall = clamp_score(
            (median_score + p90_score + pct_15_score + pct_55_score + adjacency_score) / 5.0,
        );

        let mut metrics = Map::new();
        metrics.insert("median_ic_to_pc_um".into(), json!(median));
        metrics.insert("p90_ic_to_pc_um".into(), json!(p90));
        metrics.insert("pct_ic_within_15um".into(), json!(pct_15));
        metrics.insert("pct_ic_mixed_within_55um".into(), json!(pct_55));
        metrics.insert("adjacency_pass".into(), json!(adjacency_pass));
        metrics.insert("median_pass".into(), json!(median_pass));
        metrics.insert("p90_pass".into(), json!(p90_pass));
        metrics.insert("within_15um_pass".into(), json!(pct_15_pass));
        metrics.insert("mixed_55um_pass".into(), json!(pct_55_pass));
        metrics.insert("score".into(), json!(overall));

        let mut lines = vec![
            format!(
                "Spatial Adjacency Analysis: {}",
                if passed { "PASS" } else { "FAIL" }
            ),
            format!("Overall score: {:.3}", overall),
            String::new(),
            "IC->PC Distance Metrics:".into(),
            format!(
                "  {} Median distance: {:.2} um (threshold: <={:.2} um)",
                mark(median_pass),
                median,
                max_median
            ),
            format!(
                "  {} 90th percentile: {:.2} um (threshold: <={:.2} um)",
                mark(p90_pass),
                p90,
                max_p90
            ),
            String::new(),
            "IC Proximity to PC:".into(),
            format!(
                "  {} IC within 15 um: {:.1}% (threshold: >={:.1}%)",
                mark(pct_15_pass),
                pct_15,
                min_pct_15
            ),
            format!(
                "  {} IC with PC within 55 um: {:.1}% (threshold: >={:.1}%)",
                mark(pct_55_pass),
                pct_55,
                min_pct_55
            ),
            String::new(),
            format!(
                "Agent adjacency assessment: {} {}",
                mark(adjacency_pass),
                adjacency_pass
            ),
        ];

        if !passed {
            let mut failures = Vec::new();
            if !median_pass {
                failures.push(format!("Median {:.2} > {:.2} um", median, max_median));
            }
            if !p90_pass {
                failures.push(format!("P90 {:.2} > {:.2} um", p90, max_p90));
            }
            if !pct_15_pass {
                failures.push(format!("Within 15 um {:.1}% < {:.1}%", pct_15, min_pct_15));
            }
            if !pct_55_pass {
                failures.push(format!("Within 55 um {:.1}% < {:.1}%", pct_55, min_pct_55));
            }
            if !adjacency_pass {
                failures.push("Agent marked adjacency_pass as false".into());
            }
            lines.push(String::new());
            lines.push(format!("Failure: {}", failures.join("; ")));
        }

        GraderResult {
            passed,
            score: Some(overall),
            reasoning: lines.join("\n"),
            metrics,
        }
    }
}

fn mark(passed: bool) -> &'static str {
    if passed {
        "+"
    } else {
        "x"
    }
}

fn upper_bound_score(value: f64, bound: f64) -> f64 {
    if value <= bound {
        1.0
    } else {
        clamp_score(bound / value)
    }
}

fn lower_bound_score(value: f64, bound: f64) -> f64 {
    if bound > 0.0 {
        clamp_score(value / bound)
    } else if value >= bound {
        1.0
    } else {
        0.0
    }
}
