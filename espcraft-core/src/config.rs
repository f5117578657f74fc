//! # Configuration
//!
//! Settings come from three layers, highest priority first: explicit
//! overrides (CLI flags), environment variables, built-in defaults.
//! Loading a `.env` file is the binary's job; this module only reads
//! whatever lookup it is handed.

use crate::error::{self, Result};
use crate::provider::{ProviderConfig, ProviderType};
use std::time::Duration;

pub const ENV_PROVIDER: &str = "ESPCRAFT_PROVIDER";
pub const ENV_MODEL: &str = "ESPCRAFT_MODEL";
pub const ENV_MODEL_TIER: &str = "ESPCRAFT_MODEL_TIER";
pub const ENV_BASE_URL: &str = "ESPCRAFT_BASE_URL";
pub const ENV_TEMPERATURE: &str = "ESPCRAFT_TEMPERATURE";
pub const ENV_TIMEOUT_SECS: &str = "ESPCRAFT_TIMEOUT_SECS";

pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const MAX_TIMEOUT_SECS: u64 = 3600;

/// Name reported for a timeout that came from the command line
const FLAG_TIMEOUT: &str = "--timeout";

/// Groq model presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelTier {
    #[default]
    Fast,
    Balanced,
    Powerful,
}

impl ModelTier {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "fast" => Some(ModelTier::Fast),
            "balanced" => Some(ModelTier::Balanced),
            "powerful" => Some(ModelTier::Powerful),
            _ => None,
        }
    }

    pub fn groq_model(&self) -> &'static str {
        match self {
            ModelTier::Fast => "llama3-8b-8192",
            ModelTier::Balanced => "deepseek-r1-distill-llama-70b",
            ModelTier::Powerful => "llama-3.3-70b-versatile",
        }
    }
}

/// Values that win over the environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub tier: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Fully resolved application settings
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub temperature: f32,
    pub call_timeout: Duration,
}

impl AppConfig {
    /// Resolve from the process environment
    pub fn from_env(overrides: &Overrides) -> Result<Self> {
        Self::resolve(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve using `lookup` in place of the environment
    pub fn resolve<F>(overrides: &Overrides, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider_name = overrides
            .provider
            .clone()
            .or_else(|| lookup(ENV_PROVIDER))
            .unwrap_or_else(|| ProviderType::Groq.as_str().to_string());
        let provider_type = ProviderType::parse(&provider_name).ok_or_else(|| {
            error::config_invalid(ENV_PROVIDER, format!("unknown provider '{}'", provider_name))
        })?;

        let tier = match overrides.tier.clone().or_else(|| lookup(ENV_MODEL_TIER)) {
            Some(name) => ModelTier::parse(&name).ok_or_else(|| {
                error::config_invalid(ENV_MODEL_TIER, format!("unknown model tier '{}'", name))
            })?,
            None => ModelTier::default(),
        };
        let model = overrides.model.clone().or_else(|| lookup(ENV_MODEL));

        let api_key = match provider_type.api_key_var() {
            Some(var) => Some(lookup(var).ok_or_else(|| {
                error::config_invalid(var, format!("{} is not set", var))
                    .with_context("provider", provider_type.as_str())
            })?),
            None => None,
        };

        let mut provider = match provider_type {
            ProviderType::Groq => {
                ProviderConfig::groq(api_key.unwrap_or_default()).with_model(tier.groq_model())
            }
            ProviderType::OpenAI => ProviderConfig::openai(api_key.unwrap_or_default()),
            ProviderType::Anthropic => ProviderConfig::anthropic(api_key.unwrap_or_default()),
            ProviderType::Ollama => ProviderConfig::ollama("llama3"),
        };
        if let Some(model) = model {
            provider = provider.with_model(model);
        }
        if let Some(url) = overrides.base_url.clone().or_else(|| lookup(ENV_BASE_URL)) {
            provider = provider.with_base_url(url);
        }

        let temperature = match lookup(ENV_TEMPERATURE) {
            Some(raw) => raw.trim().parse::<f32>().ok().filter(|t| (0.0..=2.0).contains(t)).ok_or_else(
                || error::config_invalid(ENV_TEMPERATURE, format!("invalid temperature '{}'", raw)),
            )?,
            None => DEFAULT_TEMPERATURE,
        };

        let (timeout_secs, timeout_key) = match overrides.timeout_secs {
            Some(secs) => (secs, FLAG_TIMEOUT),
            None => match lookup(ENV_TIMEOUT_SECS) {
                Some(raw) => {
                    let secs = raw.trim().parse::<u64>().map_err(|e| {
                        error::config_invalid(ENV_TIMEOUT_SECS, format!("invalid timeout '{}': {}", raw, e))
                    })?;
                    (secs, ENV_TIMEOUT_SECS)
                }
                None => (DEFAULT_TIMEOUT_SECS, ENV_TIMEOUT_SECS),
            },
        };
        if !(1..=MAX_TIMEOUT_SECS).contains(&timeout_secs) {
            return Err(error::config_invalid(
                timeout_key,
                format!("{} must be between 1 and {} seconds, got {}", timeout_key, MAX_TIMEOUT_SECS, timeout_secs),
            ));
        }
        // the HTTP client gets a little slack so our own deadline fires first
        let provider = provider.with_timeout(timeout_secs.saturating_add(5));

        Ok(Self {
            provider,
            temperature,
            call_timeout: Duration::from_secs(timeout_secs),
        })
    }
}
