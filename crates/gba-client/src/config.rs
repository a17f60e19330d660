use crate::channel::DEFAULT_BACKEND_URL;
use anyhow::{anyhow, Context};
use gba_core::{
    default_genome, genome_preset,
    logging::{env_switch, StdoutLogging, DEFAULT_LOG_DIR},
    GenomePreset, ModelConfig, GENOME_PRESETS,
};
use std::env;
use url::Url;

fn env_value(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn flag_or_env(flag: &str, name: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.to_string());
    }
    env_value(name)
}

pub fn resolve_backend_url(flag: &str) -> anyhow::Result<Url> {
    let raw = flag_or_env(flag, "GBA_BACKEND_URL").unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
    let url = Url::parse(&raw).with_context(|| format!("invalid backend url: {raw}"))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(anyhow!("backend url must use ws or wss, got {other}")),
    }
}

pub fn resolve_model_config(api_base_url: &str, api_key: &str, model_name: &str) -> ModelConfig {
    ModelConfig {
        api_base_url: flag_or_env(api_base_url, "GBA_API_BASE_URL").unwrap_or_default(),
        api_key: flag_or_env(api_key, "GBA_API_KEY").unwrap_or_default(),
        model_name: flag_or_env(model_name, "GBA_MODEL_NAME").unwrap_or_default(),
    }
}

pub fn resolve_genome(flag: &str) -> anyhow::Result<&'static GenomePreset> {
    let Some(id) = flag_or_env(flag, "GBA_GENOME") else {
        return Ok(default_genome());
    };
    genome_preset(&id).ok_or_else(|| {
        let known: Vec<_> = GENOME_PRESETS.iter().map(|preset| preset.id).collect();
        anyhow!("unknown genome {id}; expected one of {}", known.join(", "))
    })
}

pub fn resolve_log_dir(flag: &str) -> String {
    flag_or_env(flag, "GBA_LOG_DIR").unwrap_or_else(|| DEFAULT_LOG_DIR.to_string())
}

/// The REPL owns stdout, so log lines go only to the file unless
/// `GBA_LOG_STDOUT` is set.
pub fn resolve_stdout_logging() -> StdoutLogging {
    if env_switch("GBA_LOG_STDOUT") {
        StdoutLogging::Always
    } else {
        StdoutLogging::WithoutFile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_url_flag_wins_and_must_be_websocket() {
        let url = resolve_backend_url("ws://10.0.0.5:8000/ws").expect("url");
        assert_eq!(url.host_str(), Some("10.0.0.5"));
        assert!(resolve_backend_url("http://localhost:8000/ws").is_err());
        assert!(resolve_backend_url("not a url").is_err());
    }

    #[test]
    fn genome_flag_is_validated() {
        assert_eq!(resolve_genome("hg38-ucsc").expect("preset").id, "hg38-ucsc");
        let err = resolve_genome("mm39").expect_err("unknown");
        assert!(err.to_string().contains("hg38"));
    }

    #[test]
    fn model_flags_override_environment() {
        let config = resolve_model_config("https://llm.example.test", "sk-flag", "qwen-max");
        assert_eq!(config.api_key, "sk-flag");
        assert_eq!(config.model_name, "qwen-max");
    }
}
