use serde_json::{json, Map, Value};

use super::{Grader, GraderResult};

/// Case-normalized exact match of `answer.answer` against one accepted
/// option (`config.correct_answer`) or several (`config.correct_answers`).
#[derive(Debug)]
pub struct MultipleChoiceGrader;

impl Grader for MultipleChoiceGrader {
    fn evaluate(&self, answer: &Map<String, Value>, config: &Map<String, Value>) -> GraderResult {
        let accepted: Vec<String> = match config.get("correct_answers") {
            Some(Value::Array(options)) => options
                .iter()
                .filter_map(Value::as_str)
                .map(normalize)
                .collect(),
            _ => config
                .get("correct_answer")
                .and_then(Value::as_str)
                .map(normalize)
                .into_iter()
                .collect(),
        };
        if accepted.is_empty() {
            return GraderResult::fail(
                "Grader config missing required field: correct_answer or correct_answers",
            );
        }

        let Some(choice) = answer.get("answer") else {
            return GraderResult::fail("Agent answer missing required field: answer");
        };
        let choice = match choice {
            Value::String(s) => normalize(s),
            other => normalize(&other.to_string()),
        };

        let passed = accepted.contains(&choice);

        let mut metrics = Map::new();
        metrics.insert("correct_answers".into(), json!(accepted));
        metrics.insert("agent_answer".into(), json!(choice));
        metrics.insert("score".into(), json!(if passed { 1.0 } else { 0.0 }));

        let reasoning = if passed {
            format!("Multiple Choice: PASS\n\n  + Agent answered: {} (correct)", choice)
        } else {
            format!(
                "Multiple Choice: FAIL\n\n  x Agent answered: {}\n    Correct answer(s): {}",
                choice,
                metrics["correct_answers"]
            )
        };

        GraderResult {
            passed,
            score: Some(if passed { 1.0 } else { 0.0 }),
            reasoning,
            metrics,
        }
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_exact_match_passes() {
        let result = MultipleChoiceGrader.evaluate(
            &obj(json!({"answer": "B"})),
            &obj(json!({"correct_answer": "B"})),
        );
        assert!(result.passed);
        assert_eq!(result.score, Some(1.0));
    }

    #[test]
    fn test_case_and_whitespace_normalized() {
        let result = MultipleChoiceGrader.evaluate(
            &obj(json!({"answer": "  b "})),
            &obj(json!({"correct_answer": "B"})),
        );
        assert!(result.passed);
    }

    #[test]
    fn test_multiple_accepted_options() {
        let config = obj(json!({"correct_answers": ["A", "C"]}));
        assert!(MultipleChoiceGrader
            .evaluate(&obj(json!({"answer": "c"})), &config)
            .passed);
        assert!(!MultipleChoiceGrader
            .evaluate(&obj(json!({"answer": "B"})), &config)
            .passed);
    }

    #[test]
    fn test_wrong_answer_reasoning_shows_correct() {
        let result = MultipleChoiceGrader.evaluate(
            &obj(json!({"answer": "D"})),
            &obj(json!({"correct_answer": "A"})),
        );
        assert!(!result.passed);
        assert!(result.reasoning.contains("Agent answered: D"));
        assert!(result.reasoning.contains("Correct answer(s)"));
    }

    #[test]
    fn test_non_string_choice_is_stringified() {
        let result = MultipleChoiceGrader.evaluate(
            &obj(json!({"answer": 3})),
            &obj(json!({"correct_answer": "3"})),
        );
        assert!(result.passed);
    }

    #[test]
    fn test_missing_answer_field_fails_closed() {
        let result = MultipleChoiceGrader.evaluate(
            &obj(json!({"choice": "A"})),
            &obj(json!({"correct_answer": "A"})),
        );
        assert!(!result.passed);
        assert!(result.reasoning.contains("missing required field: answer"));
    }

    #[test]
    fn test_missing_config_fails_closed() {
        let result = MultipleChoiceGrader.evaluate(&obj(json!({"answer": "A"})), &Map::new());
        assert!(!result.passed);
        assert!(result.reasoning.contains("correct_answer"));
    }
}
