//! `EngineConfig` construction.
//!
//! A single immutable value built once from environment variables (or a
//! caller-supplied settings object) and threaded explicitly through every
//! component call. Nothing re-reads the environment after this point.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model_name: String,
    pub base_url: String,
    pub api_key: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub max_iterations: u32,
    pub quality_threshold: f64,
    pub early_stop_threshold: f64,
    pub output_as_table: bool,
    pub step_by_step: bool,
    pub keep_recent_ratio: f64,
    pub cache_max_size: u64,
    pub cache_ttl: Duration,
    pub llm_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            model_name: "qwen-max".to_string(),
            base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            api_key: String::new(),
            temperature: 0.7,
            max_tokens: 8192,
            top_p: 0.9,
            frequency_penalty: 0.5,
            max_iterations: 5,
            quality_threshold: 0.7,
            early_stop_threshold: 0.85,
            output_as_table: false,
            step_by_step: false,
            keep_recent_ratio: 0.7,
            cache_max_size: 1000,
            cache_ttl: Duration::from_secs(3600),
            llm_timeout: Duration::from_secs(120),
        }
    }
}

impl EngineConfig {
    /// Builds config from the environment variables named in the engine's
    /// external-interface table, falling back to defaults for anything
    /// unset or unparsable.
    pub fn from_env() -> Self {
        let mut cfg = EngineConfig::default();
        if let Ok(v) = env::var("QWEN_MODEL_NAME") {
            cfg.model_name = v;
        }
        if let Ok(v) = env::var("QWEN_BASE_URL") {
            cfg.base_url = v;
        }
        if let Ok(v) = env::var("QWEN_API_KEY") {
            cfg.api_key = v;
        }
        if let Some(v) = parse_env("QWEN_TEMPERATURE") {
            cfg.temperature = v;
        }
        if let Some(v) = parse_env::<u32>("MAX_TOKENS").or_else(|| parse_env("QWEN_MAX_TOKENS")) {
            cfg.max_tokens = v;
        }
        if let Some(v) = parse_env("QWEN_TOP_P") {
            cfg.top_p = v;
        }
        if let Some(v) = parse_env("QWEN_FREQUENCY_PENALTY") {
            cfg.frequency_penalty = v;
        }
        if let Some(v) = parse_env("QUALITY_THRESHOLD") {
            cfg.quality_threshold = v;
        }
        cfg
    }

    /// Overlays per-request settings (the engine's public `Settings`
    /// object) onto a base config, returning a new, still-immutable value.
    pub fn with_settings(&self, settings: &EngineSettings) -> Self {
        let mut cfg = self.clone();
        if let Some(v) = &settings.model_name {
            cfg.model_name = v.clone();
        }
        if let Some(v) = &settings.base_url {
            cfg.base_url = v.clone();
        }
        if let Some(v) = &settings.api_key {
            cfg.api_key = v.clone();
        }
        if let Some(v) = settings.temperature {
            cfg.temperature = v;
        }
        if let Some(v) = settings.max_tokens {
            cfg.max_tokens = v;
        }
        if let Some(v) = settings.top_p {
            cfg.top_p = v;
        }
        if let Some(v) = settings.frequency_penalty {
            cfg.frequency_penalty = v;
        }
        if let Some(v) = settings.max_iterations {
            cfg.max_iterations = v;
        }
        if let Some(v) = settings.quality_threshold {
            cfg.quality_threshold = v;
        }
        if let Some(v) = settings.early_stop_threshold {
            cfg.early_stop_threshold = v;
        }
        if let Some(v) = settings.output_as_table {
            cfg.output_as_table = v;
        }
        if let Some(v) = settings.step_by_step {
            cfg.step_by_step = v;
        }
        cfg
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

/// The engine's public settings object, as received per-request.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    pub model_name: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub max_iterations: Option<u32>,
    pub quality_threshold: Option<f64>,
    pub early_stop_threshold: Option<f64>,
    pub output_as_table: Option<bool>,
    pub step_by_step: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_iterations, 5);
        assert_eq!(cfg.quality_threshold, 0.7);
        assert_eq!(cfg.early_stop_threshold, 0.85);
    }

    #[test]
    fn settings_overlay_only_touches_present_fields() {
        let base = EngineConfig::default();
        let settings = EngineSettings { max_iterations: Some(3), ..Default::default() };
        let merged = base.with_settings(&settings);
        assert_eq!(merged.max_iterations, 3);
        assert_eq!(merged.quality_threshold, base.quality_threshold);
    }
}
