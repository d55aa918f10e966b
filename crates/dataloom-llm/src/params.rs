use serde::{Deserialize, Serialize};

use crate::message::ChatMessage;

/// Sampling and routing parameters for a chat completion. Numeric fields are
/// clamped to their documented ranges in [`ChatParams::clamp`] rather than
/// rejected, matching the upstream Qwen-compatible API's own tolerance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub api_key: String,
    pub base_url: String,
    #[serde(skip)]
    pub history: Vec<ChatMessage>,
    pub enable_thinking: bool,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            model: "qwen-max".to_string(),
            temperature: 0.7,
            max_tokens: 8192,
            top_p: 0.9,
            frequency_penalty: 0.5,
            api_key: String::new(),
            base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            history: Vec::new(),
            enable_thinking: true,
        }
    }
}

impl ChatParams {
    /// Clamps every sampling field into its documented range. Called once,
    /// right before building the request payload.
    pub fn clamp(mut self) -> Self {
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.max_tokens = self.max_tokens.clamp(1, 8192);
        self.top_p = self.top_p.clamp(0.0, 1.0);
        self.frequency_penalty = self.frequency_penalty.clamp(-2.0, 2.0);
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_out_of_range_values() {
        let p = ChatParams {
            temperature: 5.0,
            max_tokens: 100_000,
            top_p: -3.0,
            frequency_penalty: 9.0,
            ..Default::default()
        }
        .clamp();
        assert_eq!(p.temperature, 2.0);
        assert_eq!(p.max_tokens, 8192);
        assert_eq!(p.top_p, 0.0);
        assert_eq!(p.frequency_penalty, 2.0);
    }

    #[test]
    fn leaves_in_range_values_untouched() {
        let p = ChatParams { temperature: 0.3, max_tokens: 500, top_p: 0.5, frequency_penalty: -1.0, ..Default::default() }.clamp();
        assert_eq!(p.temperature, 0.3);
        assert_eq!(p.max_tokens, 500);
    }
}
