//! C6: turns a request (+ plan history + evaluation feedback) into a
//! structured [`Plan`], consulting the Plan Cache first.

use dataloom_llm::{ChatParams, ChatProvider};

use crate::cache::{PlanCache, PlanCacheKey};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::{Observation, Plan, Results};
use crate::vocabulary::operation_names;

/// Feedback carried into a replanning call: the prior observation plus any
/// vocabulary operations that never appeared in the last `Results`.
pub struct ReplanContext<'a> {
    pub observation: &'a Observation,
    pub missing_operations: Vec<&'static str>,
}

pub fn missing_operations(results: &Results) -> Vec<&'static str> {
    operation_names()
        .into_iter()
        .filter(|op| !results.keys().any(|k| k.contains(op)))
        .collect()
}

fn build_prompt(
    request: &str,
    document_preview: &str,
    plan_history: &[Plan],
    replan: Option<&ReplanContext>,
) -> String {
    let vocabulary: String = crate::vocabulary::OPERATIONS
        .iter()
        .map(|(name, desc)| format!("- {name}: {desc}"))
        .collect::<Vec<_>>()
        .join("\n");

    let columns_hint = document_preview
        .lines()
        .next()
        .map(|line| format!("Detected columns: {line}"))
        .unwrap_or_default();

    let history_summary: String = plan_history
        .iter()
        .rev()
        .take(3)
        .map(|p| format!("- task_type={}, ops={:?}, expected_output={}", p.task_type, p.operations.iter().map(|o| o.name.clone()).collect::<Vec<_>>(), p.expected_output))
        .collect::<Vec<_>>()
        .join("\n");

    let improvement = replan
        .map(|ctx| {
            format!(
                "\nImprovement guidance:\nPrevious feedback: {}\nOperations not yet covered: {:?}\n",
                ctx.observation.feedback, ctx.missing_operations
            )
        })
        .unwrap_or_default();

    format!(
        "You are a data-analysis planner. Request: {request}\n{columns_hint}\n\
         Operation vocabulary:\n{vocabulary}\n\
         Recent plan history:\n{history_summary}\n{improvement}\n\
         Respond with strict JSON matching: {{\"task_type\":string,\"columns\":[string],\
         \"operations\":[{{\"name\":string,\"column\":string|[string]|object,\"description\":string}}],\
         \"expected_output\":string,\"rationale\":string}}"
    )
}

/// `plan(request, document_preview, settings, plan_history) -> Plan`.
/// Consults the cache first; on miss asks the LLM and falls back to
/// [`Plan::fallback`] when the response doesn't parse. A parse failure
/// degrades gracefully; an LLM-level failure is propagated so the
/// orchestrator can decide fatality based on iteration number.
#[allow(clippy::too_many_arguments)]
pub async fn plan(
    request: &str,
    document_full: &str,
    document_preview: &str,
    config: &EngineConfig,
    plan_history: &[Plan],
    cache: &PlanCache,
    llm: &dyn ChatProvider,
    replan: Option<ReplanContext<'_>>,
) -> Result<Plan, EngineError> {
    let task_type_tag = if replan.is_some() { "replan" } else { "initial" };
    let key = PlanCacheKey::compute(request, document_full, task_type_tag);

    if replan.is_none() {
        if let Some(cached) = cache.get(&key).await {
            tracing::info!("plan cache hit");
            return Ok(cached);
        }
    }

    let prompt = build_prompt(request, document_preview, plan_history, replan.as_ref());
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

    let plan = match parse_plan_response(&response) {
        Ok(plan) => plan,
        Err(e) => {
            tracing::warn!(error = %e, "planner response failed to parse");
            return Ok(Plan::fallback(e.to_string()));
        }
    };

    cache.set(key, plan.clone()).await;
    Ok(plan)
}

fn parse_plan_response(text: &str) -> Result<Plan, serde_json::Error> {
    let json_slice = extract_json_object(text).unwrap_or(text);
    serde_json::from_str(json_slice)
}

/// LLMs routinely wrap JSON in prose or code fences; this extracts the
/// first balanced `{...}` block.
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
