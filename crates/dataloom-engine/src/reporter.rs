//! C9: synthesizes the final narrative/table report from accepted
//! results.

use dataloom_llm::{ChatParams, ChatProvider};

use crate::config::EngineConfig;
use crate::model::{Plan, Results};

fn build_prompt(plan: &Plan, results: &Results, as_table: bool, report_date: &str) -> String {
    let results_json = serde_json::to_string_pretty(results).unwrap_or_default();
    let format_hint = if as_table {
        "Favor Markdown tables wherever the data supports it."
    } else {
        "Write flowing prose; tables only where essential."
    };
    format!(
        "Write a business-oriented analysis report dated {report_date}.\n\
         Plan: task_type={}, expected_output={}\nResults:\n{results_json}\n\
         Cover: indicator performance, findings, insights, business impact, recommendations, risks.\n\
         {format_hint}",
        plan.task_type, plan.expected_output
    )
}

/// `report(plan, results, settings, as_table) -> text`.
pub async fn report(plan: &Plan, results: &Results, config: &EngineConfig, as_table: bool, report_date: &str, llm: &dyn ChatProvider) -> Result<String, dataloom_llm::LLMError> {
    let prompt = build_prompt(plan, results, as_table, report_date);
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
    llm.complete(&prompt, params).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_mentions_report_date_and_plan_task_type() {
        let plan = Plan { task_type: "basic".to_string(), ..Default::default() };
        let results = Results::new();
        let prompt = build_prompt(&plan, &results, false, "2026-07-31");
        assert!(prompt.contains("2026-07-31"));
        assert!(prompt.contains("basic"));
    }

    #[test]
    fn as_table_hint_prefers_markdown_tables() {
        let plan = Plan::default();
        let results = Results::new();
        let prompt = build_prompt(&plan, &results, true, "2026-07-31");
        assert!(prompt.contains("Markdown tables"));
    }
}
