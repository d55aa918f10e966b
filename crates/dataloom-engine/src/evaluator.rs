//! C8: scores results against the request and decides whether to replan.
//! `needs_replan` is kept as a standalone pure function so the
//! orchestrator's termination decision is testable without an LLM call.

use dataloom_llm::{ChatParams, ChatProvider};
use serde::Deserialize;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::{Observation, Plan, Results};

#[derive(Debug, Deserialize)]
struct EvaluationResponse {
    #[serde(default)]
    quality_score: f64,
    #[serde(default)]
    feedback: String,
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default)]
    next_actions: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn build_prompt(request: &str, plan: &Plan, results: &Results) -> String {
    let results_json = serde_json::to_string(results).unwrap_or_default();
    format!(
        "Evaluate whether these results answer the request.\nRequest: {request}\n\
         Plan task type: {}\nResults: {results_json}\n\
         Respond with strict JSON: {{\"quality_score\":number in [0,1],\"meets_requirements\":bool,\
         \"feedback\":string,\"success\":bool,\"next_actions\":[string]}}",
        plan.task_type
    )
}

/// `evaluate(request, plan, results, settings) -> Observation`. A parse
/// failure degrades to [`Observation::failed`] (and forces a replan via
/// [`needs_replan`]); an LLM-level failure is propagated so the
/// orchestrator can decide fatality based on iteration number.
pub async fn evaluate(request: &str, plan: &Plan, results: Results, config: &EngineConfig, llm: &dyn ChatProvider) -> Result<Observation, EngineError> {
    let prompt = build_prompt(request, plan, &results);
    let params = ChatParams {
        model: config.model_name.clone(),
        temperature: config.temperature as f32,
        max_tokens: config.max_tokens,
        top_p: config.top_p as f32,
        frequency_penalty: config.frequency_penalty as f32,
        api_key: config.api_key.clone(),
        base_url: config.base_url.clone(),
        ..Default::default()
    };

    let response = llm.complete(&prompt, params).await?;

    Ok(match parse_evaluation(&response) {
        Ok(parsed) => Observation {
            results,
            quality_score: parsed.quality_score.clamp(0.0, 1.0),
            success: parsed.success,
            feedback: parsed.feedback,
            next_actions: parsed.next_actions,
        },
        Err(e) => {
            let mut obs = Observation::failed(e.to_string());
            obs.results = results;
            obs
        }
    })
}

fn parse_evaluation(text: &str) -> Result<EvaluationResponse, serde_json::Error> {
    let slice = extract_json_object(text).unwrap_or(text);
    serde_json::from_str(slice)
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    for (i, c) in text[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// `true` iff `quality_score < quality_threshold OR not success OR
/// next_actions non-empty`.
pub fn needs_replan(observation: &Observation, quality_threshold: f64) -> bool {
    observation.quality_score < quality_threshold || !observation.success || !observation.next_actions.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_quality_score_triggers_replan() {
        let obs = Observation { quality_score: 0.3, success: true, feedback: String::new(), next_actions: Vec::new(), results: Results::new() };
        assert!(needs_replan(&obs, 0.7));
    }

    #[test]
    fn high_quality_and_success_with_no_next_actions_accepts() {
        let obs = Observation { quality_score: 0.95, success: true, feedback: String::new(), next_actions: Vec::new(), results: Results::new() };
        assert!(!needs_replan(&obs, 0.7));
    }

    #[test]
    fn failure_flag_forces_replan_even_with_high_score() {
        let obs = Observation { quality_score: 0.99, success: false, feedback: String::new(), next_actions: Vec::new(), results: Results::new() };
        assert!(needs_replan(&obs, 0.7));
    }

    #[test]
    fn pending_next_actions_force_replan() {
        let obs = Observation { quality_score: 0.99, success: true, feedback: String::new(), next_actions: vec!["add trend".to_string()], results: Results::new() };
        assert!(needs_replan(&obs, 0.7));
    }

    #[test]
    fn parses_minimal_evaluation_response() {
        let parsed = parse_evaluation("{\"quality_score\":0.9,\"success\":true}").unwrap();
        assert_eq!(parsed.quality_score, 0.9);
        assert!(parsed.success);
        assert!(parsed.next_actions.is_empty());
    }
}
