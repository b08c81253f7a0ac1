use std::collections::HashSet;

use crate::types::Rubric;

/// Deterministic rescoring of an evaluator's `criteria_met` set against a
/// rubric's own point values (spec §4.5). Pure function: same inputs always
/// yield the same `(score, applied_ids)`, and the result does not depend on
/// the order criteria_met was produced in.
pub fn score(rubric: &Rubric, criteria_met: &[String]) -> (f32, Vec<String>) {
    let met: HashSet<&str> = criteria_met.iter().map(|s| s.as_str()).collect();
    let mut total = 0.0f32;
    let mut applied = Vec::new();

    for criterion in &rubric.full_credit_criteria {
        if met.contains(criterion.id.as_str()) {
            total += criterion.points;
            applied.push(criterion.id.clone());
        }
    }

    for rule in &rubric.partial_credit_rules {
        if met.contains(rule.id.as_str())
            && rule.dependencies.iter().all(|dep| met.contains(dep.as_str()))
        {
            total += rule.points;
            applied.push(rule.id.clone());
        }
    }

    for mistake in &rubric.common_mistakes {
        if met.contains(mistake.id.as_str()) {
            total -= mistake.penalty;
            applied.push(mistake.id.clone());
        }
    }

    (total.max(0.0), applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommonMistake, FullCreditCriterion, PartialCreditRule};

    fn sample_rubric() -> Rubric {
        Rubric {
            full_credit_criteria: vec![
                FullCreditCriterion {
                    id: "c1".into(),
                    description: "".into(),
                    points: 5.0,
                },
                FullCreditCriterion {
                    id: "c2".into(),
                    description: "".into(),
                    points: 3.0,
                },
            ],
            partial_credit_rules: vec![PartialCreditRule {
                id: "r1".into(),
                points: 2.0,
                dependencies: vec!["c1".into()],
            }],
            common_mistakes: vec![CommonMistake {
                id: "m1".into(),
                description: "".into(),
                penalty: 4.0,
            }],
        }
    }

    #[test]
    fn test_dependency_satisfied_scores_full() {
        let rubric = sample_rubric();
        let (score_val, applied) = score(
            &rubric,
            &["c1".to_string(), "r1".to_string(), "m1".to_string()],
        );
        assert_eq!(score_val, 3.0);
        assert_eq!(applied, vec!["c1", "r1", "m1"]);
    }

    #[test]
    fn test_missing_dependency_drops_partial_rule() {
        let rubric = sample_rubric();
        let (score_val, applied) = score(&rubric, &["r1".to_string(), "m1".to_string()]);
        assert_eq!(score_val, 0.0);
        assert_eq!(applied, vec!["m1"]);
    }

    #[test]
    fn test_negative_total_clamps_to_zero() {
        let rubric = sample_rubric();
        let (score_val, _) = score(&rubric, &["m1".to_string()]);
        assert_eq!(score_val, 0.0);
    }

    #[test]
    fn test_result_invariant_under_permutation() {
        let rubric = sample_rubric();
        let (score_a, mut applied_a) = score(
            &rubric,
            &["m1".to_string(), "c1".to_string(), "r1".to_string()],
        );
        let (score_b, mut applied_b) = score(
            &rubric,
            &["r1".to_string(), "c1".to_string(), "m1".to_string()],
        );
        applied_a.sort();
        applied_b.sort();
        assert_eq!(score_a, score_b);
        assert_eq!(applied_a, applied_b);
    }

    #[test]
    fn test_no_criteria_met_yields_zero() {
        let rubric = sample_rubric();
        let (score_val, applied) = score(&rubric, &[]);
        assert_eq!(score_val, 0.0);
        assert!(applied.is_empty());
    }
}
