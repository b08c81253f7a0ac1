/// Fixed roster of evaluator personas (spec §6). Each persona carries its own
/// temperature and system-prompt bias; the three run concurrently against
/// the same answer in [`crate::grading::GradingEngine`].
#[derive(Debug, Clone, Copy)]
pub struct EvaluatorProfile {
    pub id: &'static str,
    pub name: &'static str,
    pub system_prompt: &'static str,
    pub temperature: f32,
    pub perspective: &'static str,
    pub focus_areas: &'static [&'static str],
}

pub const RUBRIC_ENFORCER: EvaluatorProfile = EvaluatorProfile {
    id: "rubric_enforcer",
    name: "Rubric Enforcer",
    system_prompt: "You are a strict grader who follows the rubric exactly.\nAward full credit only when ALL criteria are explicitly met.\nDo not give partial credit unless the rubric specifically allows it.\nYour job is to ensure consistency and fairness.",
    temperature: 0.1,
    perspective: "strict",
    focus_areas: &["rubric_compliance", "completeness"],
};

pub const REASONING_VALIDATOR: EvaluatorProfile = EvaluatorProfile {
    id: "reasoning_validator",
    name: "Reasoning Validator",
    system_prompt: "You are an educator who values logical thinking.\nReward students for correct reasoning even if execution has minor errors.\nLook for conceptual understanding, not just correct final answers.\nPartial credit should be generous for good reasoning with small mistakes.",
    temperature: 0.3,
    perspective: "lenient",
    focus_areas: &["logical_flow", "conceptual_understanding"],
};

pub const STRUCTURAL_ANALYZER: EvaluatorProfile = EvaluatorProfile {
    id: "structural_analyzer",
    name: "Structural Analyzer",
    system_prompt: "You evaluate answer structure and organization.\nCheck for: clear introduction, step-by-step work, labeled diagrams.\nPenalize disorganized answers even if content is correct.\nReward well-structured answers with clear explanations.",
    temperature: 0.2,
    perspective: "balanced",
    focus_areas: &["organization", "clarity", "presentation"],
};

/// The full registry, in a fixed order. The "fan out to three" step in the
/// grading engine iterates this slice directly.
pub const EVALUATOR_REGISTRY: [EvaluatorProfile; 3] =
    [RUBRIC_ENFORCER, REASONING_VALIDATOR, STRUCTURAL_ANALYZER];

/// Subject-specific prompt bias merged into the base grading prompt. Unknown
/// subjects degrade to an empty bias rather than erroring, so a misspelled
/// or unsupported `subject` field never blocks grading.
pub fn subject_bias(subject: &str) -> &'static str {
    match subject.to_lowercase().as_str() {
        "mathematics" => "Prioritize numerical accuracy and logical derivation steps.",
        "science" => "Focus on scientific principles and accurate representation of phenomena.",
        "english" => "Value clear expression, persuasive structure, and creative depth.",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_three_distinct_personas() {
        let ids: Vec<&str> = EVALUATOR_REGISTRY.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["rubric_enforcer", "reasoning_validator", "structural_analyzer"]);
    }

    #[test]
    fn test_unknown_subject_degrades_to_empty_bias() {
        assert_eq!(subject_bias("history"), "");
    }

    #[test]
    fn test_known_subject_is_case_insensitive() {
        assert_eq!(subject_bias("Mathematics"), subject_bias("mathematics"));
    }
}
