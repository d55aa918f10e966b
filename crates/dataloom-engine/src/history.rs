//! C2: keeps chat history under a token budget via truncation, falling
//! back to LLM summarization when truncation alone isn't enough.

use dataloom_llm::{ChatParams, ChatProvider};

use crate::model::Message;

/// Cheap token-count heuristic: CJK-range characters count 1.5, every
/// other character counts 0.25.
pub fn estimate_tokens(text: &str) -> f64 {
    text.chars().map(|c| if is_cjk(c) { 1.5 } else { 0.25 }).sum()
}

fn is_cjk(c: char) -> bool {
    let cp = c as u32;
    (0x4E00..=0x9FFF).contains(&cp)
        || (0x3400..=0x4DBF).contains(&cp)
        || (0x3040..=0x30FF).contains(&cp)
        || (0xAC00..=0xD7A3).contains(&cp)
}

fn history_tokens(history: &[Message]) -> f64 {
    history.iter().map(|m| estimate_tokens(&m.content)).sum()
}

/// `compress(history, max_tokens, keep_recent_ratio, settings) -> history'`.
/// Returns `history` unchanged when it already fits comfortably; otherwise
/// truncates from the tail backwards and, if still too large, asks `llm`
/// for a summary of the dropped segment.
pub async fn compress(
    history: &[Message],
    max_tokens: u32,
    keep_recent_ratio: f64,
    llm: &dyn ChatProvider,
    params: ChatParams,
) -> Vec<Message> {
    let budget = max_tokens as f64;
    let total = history_tokens(history);
    if total <= budget * 0.7 {
        return history.to_vec();
    }

    let keep_budget = budget * keep_recent_ratio;
    let mut kept_rev = Vec::new();
    let mut running = 0.0;
    for msg in history.iter().rev() {
        let cost = estimate_tokens(&msg.content);
        if running + cost > keep_budget && !kept_rev.is_empty() {
            break;
        }
        running += cost;
        kept_rev.push(msg.clone());
    }
    kept_rev.reverse();
    let truncated = kept_rev;

    if history_tokens(&truncated) <= budget * 0.6 {
        return truncated;
    }

    let dropped_count = history.len() - truncated.len();
    let dropped_text: String = history[..dropped_count]
        .iter()
        .map(|m| format!("{:?}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n");

    let summary_prompt = format!(
        "Summarize the following conversation history in at most 200 characters:\n{dropped_text}"
    );

    match llm.complete(&summary_prompt, params).await {
        Ok(summary) => {
            let clipped: String = summary.chars().take(200).collect();
            let mut out = vec![Message::system(format!("summary: {clipped}"))];
            if let Some(last) = truncated.last() {
                out.push(last.clone());
            }
            out
        }
        Err(_) => truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dataloom_llm::{ChatStream, LLMError};

    struct FakeLlm {
        summary: Result<String, ()>,
    }

    #[async_trait]
    impl ChatProvider for FakeLlm {
        async fn complete(&self, _query: &str, _params: ChatParams) -> Result<String, LLMError> {
            self.summary.clone().map_err(|_| LLMError::Malformed("boom".to_string()))
        }

        async fn stream(&self, _query: &str, _params: ChatParams) -> Result<ChatStream, LLMError> {
            unimplemented!("not exercised by history compressor tests")
        }

        async fn embed(&self, _text: &str, _params: ChatParams) -> Result<Vec<f32>, LLMError> {
            unimplemented!("not exercised by history compressor tests")
        }
    }

    #[test]
    fn cjk_characters_weigh_more_than_ascii() {
        assert!(estimate_tokens("你") > estimate_tokens("a"));
    }

    #[tokio::test]
    async fn leaves_small_history_untouched() {
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let llm = FakeLlm { summary: Ok("s".to_string()) };
        let out = compress(&history, 1_000_000, 0.7, &llm, ChatParams::default()).await;
        assert_eq!(out, history);
    }

    #[tokio::test]
    async fn falls_back_to_truncated_form_when_summarization_fails() {
        let history: Vec<Message> = (0..500).map(|i| Message::user("x".repeat(50) + &i.to_string())).collect();
        let llm = FakeLlm { summary: Err(()) };
        let out = compress(&history, 100, 0.7, &llm, ChatParams::default()).await;
        assert!(estimate_tokens(&out.iter().map(|m| m.content.clone()).collect::<String>()) <= 100.0 * 2.0);
    }

    #[tokio::test]
    async fn summarization_success_yields_exactly_two_messages() {
        let history: Vec<Message> = (0..500).map(|i| Message::user("x".repeat(50) + &i.to_string())).collect();
        let llm = FakeLlm { summary: Ok("brief recap".to_string()) };
        let out = compress(&history, 100, 0.7, &llm, ChatParams::default()).await;
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0].role, crate::model::Role::System));
    }
}
