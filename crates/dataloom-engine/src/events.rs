use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{Observation, Plan, Results};

/// The tape's six event kinds (§6). `step` numbers match the wire contract
/// verbatim: 1=plan, 2=compute, 3=observe, 4=report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EngineEvent {
    Plan { step: u8, message: String, result: Plan },
    Compute { step: u8, message: String, result: Results },
    Observe { step: u8, message: String, result: ObserveResult },
    Report { step: u8, message: String, result: String },
    Reply { reply: String },
    Error { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserveResult {
    pub quality_score: f64,
    pub feedback: String,
    pub success: bool,
    pub next_actions: Vec<String>,
    pub needs_replanning: bool,
}

impl EngineEvent {
    pub fn plan(plan: Plan, iteration: u32, replan: bool) -> Self {
        let message = if replan {
            format!("replanning (iteration {iteration})")
        } else {
            format!("planning (iteration {iteration})")
        };
        EngineEvent::Plan { step: 1, message, result: plan }
    }

    pub fn compute(results: Results) -> Self {
        EngineEvent::Compute { step: 2, message: "computing results".to_string(), result: results }
    }

    pub fn observe(observation: &Observation, needs_replanning: bool) -> Self {
        EngineEvent::Observe {
            step: 3,
            message: "evaluating results".to_string(),
            result: ObserveResult {
                quality_score: observation.quality_score,
                feedback: observation.feedback.clone(),
                success: observation.success,
                next_actions: observation.next_actions.clone(),
                needs_replanning,
            },
        }
    }

    pub fn report(text: String) -> Self {
        EngineEvent::Report { step: 4, message: "report ready".to_string(), result: text }
    }

    pub fn reply(chunk: String) -> Self {
        EngineEvent::Reply { reply: chunk }
    }

    pub fn error(message: impl Into<String>) -> Self {
        EngineEvent::Error { error: message.into() }
    }

    /// Renders this event as a single SSE `data: <json>\n\n` line.
    pub fn to_sse_line(&self) -> String {
        format!("data: {}\n\n", serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string()))
    }
}

/// The SSE terminator line.
pub const DONE_LINE: &str = "data: [DONE]\n\n";

#[async_trait]
pub trait EventObserver: Send + Sync {
    /// Returns `false` once the consumer has gone away (the tape's sink
    /// is closed); the orchestrator checks this after every emission and
    /// stops producing further events as soon as it sees `false`.
    async fn on_event(&self, event: EngineEvent) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_event_round_trips_through_json() {
        let plan = Plan { task_type: "basic".to_string(), ..Default::default() };
        let event = EngineEvent::plan(plan.clone(), 1, false);
        let json = serde_json::to_string(&event).unwrap();
        let decoded: EngineEvent = serde_json::from_str(&json).unwrap();
        match decoded {
            EngineEvent::Plan { result, .. } => assert_eq!(result, plan),
            _ => panic!("expected a plan event"),
        }
    }

    #[test]
    fn sse_line_is_single_data_prefixed_line() {
        let event = EngineEvent::reply("hi".to_string());
        let line = event.to_sse_line();
        assert!(line.starts_with("data: "));
        assert!(line.ends_with("\n\n"));
    }
}
