//! C10: the Plan-Execute-Observe-Replan loop. A request with no document
//! text and no analysis intent bypasses the loop entirely and streams a
//! plain chat reply instead.

use dataloom_llm::{ChatMessage, ChatParams, ChatProvider};
use dataloom_tablestore::{Dataset, Table};
use futures_util::StreamExt;

use crate::cache::PlanCache;
use crate::config::EngineConfig;
use crate::events::{EngineEvent, EventObserver};
use crate::history;
use crate::model::{ErrorInfo, Message, Observation, Plan, Role, SessionState, Step};
use crate::planner::{self, ReplanContext};
use crate::{evaluator, executor, reporter};

const ANALYSIS_KEYWORDS: &[&str] = &[
    "analyze",
    "analyse",
    "statistics",
    "compute",
    "pivot",
    "report",
    "trend",
    "compare",
    "step-by-step",
    "step by step",
    "分析",
    "统计",
    "计算",
    "透视",
    "报告",
    "趋势",
    "比较",
];

/// Whether this request should run the full engine loop rather than a bare
/// chat reply: any non-empty document, or an analysis-flavored request.
fn wants_engine(document_text: &str, request: &str) -> bool {
    if !document_text.trim().is_empty() {
        return true;
    }
    let lower = request.to_lowercase();
    ANALYSIS_KEYWORDS.iter().any(|kw| lower.contains(&kw.to_lowercase()))
}

fn chat_params(config: &EngineConfig) -> ChatParams {
    ChatParams {
        model: config.model_name.clone(),
        temperature: config.temperature as f32,
        max_tokens: config.max_tokens,
        top_p: config.top_p as f32,
        frequency_penalty: config.frequency_penalty as f32,
        api_key: config.api_key.clone(),
        base_url: config.base_url.clone(),
        ..Default::default()
    }
}

fn to_chat_messages(history: &[Message]) -> Vec<ChatMessage> {
    history
        .iter()
        .map(|m| match m.role {
            Role::User => ChatMessage::user(m.content.clone()),
            Role::Assistant => ChatMessage::assistant(m.content.clone()),
            Role::System => ChatMessage::system(m.content.clone()),
        })
        .collect()
}

/// Trims `document_full` to at most 70% of the configured token budget,
/// reusing [`history::estimate_tokens`]'s CJK-aware heuristic.
fn derive_preview(document_full: &str, max_tokens: u32) -> String {
    let budget = max_tokens as f64 * 0.7;
    if history::estimate_tokens(document_full) <= budget {
        return document_full.to_string();
    }
    let mut preview = String::new();
    let mut running = 0.0;
    for line in document_full.lines() {
        let cost = history::estimate_tokens(line) + 0.25;
        if running + cost > budget && !preview.is_empty() {
            break;
        }
        running += cost;
        preview.push_str(line);
        preview.push('\n');
    }
    preview
}

fn current_report_date() -> String {
    time::OffsetDateTime::now_utc().date().to_string()
}

/// Runs a single request end to end, emitting tape events through
/// `observer`. Never panics: every failure path emits an `error` event and
/// returns.
pub async fn run(
    request: String,
    document_text: String,
    history_in: Vec<Message>,
    config: EngineConfig,
    llm: &dyn ChatProvider,
    cache: &PlanCache,
    observer: &dyn EventObserver,
) {
    if request.trim().is_empty() && document_text.trim().is_empty() {
        observer.on_event(EngineEvent::error("both request and document are empty")).await;
        return;
    }

    let compressed_history =
        history::compress(&history_in, config.max_tokens, config.keep_recent_ratio, llm, chat_params(&config)).await;

    if !wants_engine(&document_text, &request) {
        run_bypass_chat(&request, &compressed_history, &config, llm, observer).await;
        return;
    }

    let table = match resolve_table(&document_text) {
        Ok(table) => table,
        Err(e) => {
            observer.on_event(EngineEvent::error(format!("could not parse document: {e}"))).await;
            return;
        }
    };

    macro_rules! emit_or_cancel {
        ($event:expr) => {
            if !observer.on_event($event).await {
                tracing::debug!("consumer disconnected, cancelling the orchestration loop");
                return;
            }
        };
    }

    let mut state = SessionState::new(request.clone(), document_text.clone(), compressed_history, config.max_iterations);
    state.document_preview = derive_preview(&state.document_full, config.max_tokens);

    loop {
        let is_replan = state.current_plan.is_some();
        state.step = if is_replan { Step::Replanning } else { Step::Planning };

        let plan = match run_planning(&state, &config, cache, llm).await {
            Ok(plan) => plan,
            Err(e) => {
                if state.iteration == 0 {
                    fail(&mut state, observer, e.to_string()).await;
                    return;
                }
                tracing::warn!(error = %e, iteration = state.iteration, "planner failed on a later iteration, falling back to a bare plan");
                Plan::fallback(e.to_string())
            }
        };

        state.plan_history.push(plan.clone());
        state.current_plan = Some(plan.clone());
        emit_or_cancel!(EngineEvent::plan(plan.clone(), state.iteration + 1, is_replan));

        state.step = Step::Processing;
        let results = executor::execute(&plan, &table, &config, llm).await;
        state.results = Some(results.clone());
        emit_or_cancel!(EngineEvent::compute(results.clone()));

        state.step = Step::Observing;
        let observation = match evaluator::evaluate(&state.request, &plan, results, &config, llm).await {
            Ok(obs) => obs,
            Err(e) => {
                if state.iteration == 0 {
                    fail(&mut state, observer, e.to_string()).await;
                    return;
                }
                tracing::warn!(error = %e, iteration = state.iteration, "evaluator failed on a later iteration, forcing a replan");
                Observation::failed(e.to_string())
            }
        };

        let replan_needed = evaluator::needs_replan(&observation, config.quality_threshold);
        state.needs_replan = replan_needed;
        emit_or_cancel!(EngineEvent::observe(&observation, replan_needed));
        state.observation = Some(observation.clone());

        if observation.quality_score >= config.early_stop_threshold && !replan_needed {
            break;
        }
        if replan_needed && state.iteration + 1 < state.max_iterations {
            state.iteration += 1;
            continue;
        }
        break;
    }

    state.step = Step::Reporting;
    let plan = state.current_plan.clone().unwrap_or_default();
    let results = state.results.clone().unwrap_or_default();
    let report_date = current_report_date();

    match reporter::report(&plan, &results, &config, config.output_as_table, &report_date, llm).await {
        Ok(text) => {
            state.report = Some(text.clone());
            state.step = Step::Done;
            observer.on_event(EngineEvent::report(text)).await;
        }
        Err(e) => {
            fail(&mut state, observer, e.to_string()).await;
        }
    }
}

async fn run_planning(
    state: &SessionState,
    config: &EngineConfig,
    cache: &PlanCache,
    llm: &dyn ChatProvider,
) -> Result<Plan, crate::error::EngineError> {
    let missing = state.results.as_ref().map(|r| planner::missing_operations(r)).unwrap_or_default();
    let replan_ctx = state.observation.as_ref().map(|obs| ReplanContext { observation: obs, missing_operations: missing });
    planner::plan(
        &state.request,
        &state.document_full,
        &state.document_preview,
        config,
        &state.plan_history,
        cache,
        llm,
        replan_ctx,
    )
    .await
}

async fn run_bypass_chat(
    request: &str,
    history: &[Message],
    config: &EngineConfig,
    llm: &dyn ChatProvider,
    observer: &dyn EventObserver,
) {
    let params = chat_params(config).with_history(to_chat_messages(history));
    match llm.stream(request, params).await {
        Ok(mut stream) => {
            // Dropping `stream` (by returning early) cancels the
            // in-flight HTTP request; returning as soon as the consumer
            // is gone is what actually aborts the underlying C1 call.
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(text) => {
                        if !observer.on_event(EngineEvent::reply(text)).await {
                            tracing::debug!("consumer disconnected, cancelling the streamed reply");
                            return;
                        }
                    }
                    Err(e) => {
                        observer.on_event(EngineEvent::error(e.to_string())).await;
                        return;
                    }
                }
            }
        }
        Err(e) => {
            observer.on_event(EngineEvent::error(e.to_string())).await;
        }
    }
}

fn resolve_table(document_text: &str) -> Result<Table, dataloom_tablestore::TableError> {
    if document_text.trim().is_empty() {
        return Ok(Table::default());
    }
    Dataset::parse(document_text).map(|ds| ds.merged_view())
}

async fn fail(state: &mut SessionState, observer: &dyn EventObserver, message: String) {
    state.step = Step::Error;
    state.error = Some(ErrorInfo { kind: "llm".to_string(), message: message.clone() });
    observer.on_event(EngineEvent::error(message)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dataloom_llm::{ChatStream, LLMError};
    use std::sync::Mutex;

    struct RecordingObserver {
        events: Mutex<Vec<EngineEvent>>,
    }

    impl RecordingObserver {
        fn new() -> Self {
            RecordingObserver { events: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl EventObserver for RecordingObserver {
        async fn on_event(&self, event: EngineEvent) -> bool {
            self.events.lock().unwrap().push(event);
            true
        }
    }

    /// An LLM whose `complete` responses are consumed in order and whose
    /// `stream` yields a single fixed chunk.
    struct ScriptedLlm {
        completions: Mutex<Vec<Result<String, LLMError>>>,
    }

    #[async_trait]
    impl ChatProvider for ScriptedLlm {
        async fn complete(&self, _query: &str, _params: ChatParams) -> Result<String, LLMError> {
            let mut completions = self.completions.lock().unwrap();
            if completions.is_empty() {
                return Ok("{}".to_string());
            }
            completions.remove(0)
        }

        async fn stream(&self, _query: &str, _params: ChatParams) -> Result<ChatStream, LLMError> {
            Ok(Box::pin(futures_util::stream::iter(vec![Ok("hello".to_string())])))
        }

        async fn embed(&self, _text: &str, _params: ChatParams) -> Result<Vec<f32>, LLMError> {
            unimplemented!("not exercised by orchestrator tests")
        }
    }

    #[test]
    fn analysis_keyword_routes_into_the_engine_even_without_a_document() {
        assert!(wants_engine("", "please analyze this"));
        assert!(wants_engine("", "请做一下分析"));
        assert!(!wants_engine("", "what's the weather like"));
    }

    #[test]
    fn non_empty_document_always_routes_into_the_engine() {
        assert!(wants_engine("a|b\n1|2", "hi"));
    }

    #[tokio::test]
    async fn bypass_mode_streams_a_reply_event() {
        let observer = RecordingObserver::new();
        let llm = ScriptedLlm { completions: Mutex::new(Vec::new()) };
        let cache = PlanCache::new(10, std::time::Duration::from_secs(60));
        run("what's the weather".to_string(), String::new(), Vec::new(), EngineConfig::default(), &llm, &cache, &observer).await;
        let events = observer.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, EngineEvent::Reply { .. })));
    }

    #[tokio::test]
    async fn empty_request_and_document_emits_an_error_event_only() {
        let observer = RecordingObserver::new();
        let llm = ScriptedLlm { completions: Mutex::new(Vec::new()) };
        let cache = PlanCache::new(10, std::time::Duration::from_secs(60));
        run(String::new(), String::new(), Vec::new(), EngineConfig::default(), &llm, &cache, &observer).await;
        let events = observer.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], EngineEvent::Error { .. }));
    }

    #[tokio::test]
    async fn high_quality_first_pass_emits_plan_compute_observe_report_in_order() {
        let observer = RecordingObserver::new();
        let plan_json = "{\"task_type\":\"basic\",\"operations\":[{\"name\":\"sum\",\"column\":\"sales\"}]}".to_string();
        let eval_json = "{\"quality_score\":0.95,\"success\":true}".to_string();
        let llm = ScriptedLlm {
            completions: Mutex::new(vec![Ok(plan_json), Ok("df['sales'].sum()".to_string()), Ok(eval_json), Ok("done".to_string())]),
        };
        let cache = PlanCache::new(10, std::time::Duration::from_secs(60));
        run("sum sales".to_string(), "sales\n10\n20".to_string(), Vec::new(), EngineConfig::default(), &llm, &cache, &observer).await;

        let events = observer.events.lock().unwrap();
        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                EngineEvent::Plan { .. } => "plan",
                EngineEvent::Compute { .. } => "compute",
                EngineEvent::Observe { .. } => "observe",
                EngineEvent::Report { .. } => "report",
                EngineEvent::Reply { .. } => "reply",
                EngineEvent::Error { .. } => "error",
            })
            .collect();
        assert_eq!(kinds, vec!["plan", "compute", "observe", "report"]);
    }

    #[tokio::test]
    async fn low_quality_first_pass_triggers_a_second_planning_round() {
        let observer = RecordingObserver::new();
        let plan_json = "{\"task_type\":\"basic\"}".to_string();
        let low_eval = "{\"quality_score\":0.1,\"success\":true,\"next_actions\":[\"add mean\"]}".to_string();
        let high_eval = "{\"quality_score\":0.95,\"success\":true}".to_string();
        let llm = ScriptedLlm {
            completions: Mutex::new(vec![Ok(plan_json.clone()), Ok(low_eval), Ok(plan_json), Ok(high_eval), Ok("done".to_string())]),
        };
        let cache = PlanCache::new(10, std::time::Duration::from_secs(60));
        run("summarize".to_string(), "sales\n10\n20".to_string(), Vec::new(), EngineConfig::default(), &llm, &cache, &observer).await;

        let events = observer.events.lock().unwrap();
        let plan_count = events.iter().filter(|e| matches!(e, EngineEvent::Plan { .. })).count();
        assert_eq!(plan_count, 2);
    }

    /// An observer that reports the consumer gone after a fixed number of
    /// events, simulating a dropped SSE connection.
    struct CancellingObserver {
        remaining: Mutex<u32>,
        seen: Mutex<Vec<EngineEvent>>,
    }

    #[async_trait]
    impl EventObserver for CancellingObserver {
        async fn on_event(&self, event: EngineEvent) -> bool {
            self.seen.lock().unwrap().push(event);
            let mut remaining = self.remaining.lock().unwrap();
            if *remaining == 0 {
                return false;
            }
            *remaining -= 1;
            true
        }
    }

    #[tokio::test]
    async fn consumer_disconnect_stops_the_loop_before_reporting() {
        let observer = CancellingObserver { remaining: Mutex::new(0), seen: Mutex::new(Vec::new()) };
        let plan_json = "{\"task_type\":\"basic\",\"operations\":[{\"name\":\"sum\",\"column\":\"sales\"}]}".to_string();
        let llm = ScriptedLlm {
            completions: Mutex::new(vec![Ok(plan_json), Ok("df['sales'].sum()".to_string()), Ok("{}".to_string()), Ok("done".to_string())]),
        };
        let cache = PlanCache::new(10, std::time::Duration::from_secs(60));
        run("sum sales".to_string(), "sales\n10\n20".to_string(), Vec::new(), EngineConfig::default(), &llm, &cache, &observer).await;

        let seen = observer.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], EngineEvent::Plan { .. }));
        assert!(!seen.iter().any(|e| matches!(e, EngineEvent::Report { .. })));
    }

    #[tokio::test]
    async fn first_iteration_llm_failure_is_fatal() {
        let observer = RecordingObserver::new();
        let llm = ScriptedLlm { completions: Mutex::new(vec![Err(LLMError::MissingApiKey)]) };
        let cache = PlanCache::new(10, std::time::Duration::from_secs(60));
        run("summarize".to_string(), "sales\n10\n20".to_string(), Vec::new(), EngineConfig::default(), &llm, &cache, &observer).await;

        let events = observer.events.lock().unwrap();
        assert!(matches!(events.last(), Some(EngineEvent::Error { .. })));
        assert!(!events.iter().any(|e| matches!(e, EngineEvent::Report { .. })));
    }
}
