use crate::error::{GatewayError, Result};
use crate::protocol::{Protocol, DEFAULT_MODEL_ALIAS};
use crate::providers::ProviderPreset;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Provider name that selects the in-process scripted provider.
pub const SCRIPTED_PROVIDER: &str = "scripted";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub defaults: DefaultModels,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub models: HashMap<String, String>,
    #[serde(default)]
    pub params: ParamsConfig,
}

/// Models used when a client asks for the reserved `default` model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultModels {
    #[serde(default = "default_model")]
    pub openai: String,
    #[serde(default = "default_model")]
    pub anthropic: String,
    #[serde(default = "default_model")]
    pub gemini: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_name")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

/// Inbound parameters never forwarded upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamsConfig {
    #[serde(default = "default_drop_params")]
    pub drop: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4333
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_provider_name() -> String {
    "openai".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_drop_params() -> Vec<String> {
    vec![
        "betas".to_string(),
        "anthropic_beta".to_string(),
        "anthropic-beta".to_string(),
        "metadata".to_string(),
        "thinking".to_string(),
        "context_management".to_string(),
        "safetySettings".to_string(),
        "cachedContent".to_string(),
        "top_k".to_string(),
    ]
}

impl Default for DefaultModels {
    fn default() -> Self {
        Self {
            openai: default_model(),
            anthropic: default_model(),
            gemini: default_model(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: None,
            api_key_env: default_api_key_env(),
        }
    }
}

impl Default for ParamsConfig {
    fn default() -> Self {
        Self {
            drop: default_drop_params(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            defaults: DefaultModels::default(),
            provider: ProviderConfig::default(),
            models: HashMap::new(),
            params: ParamsConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir. Built-in defaults when none exists.
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(&candidate);
            }
        }

        tracing::info!("No config file found, using built-in defaults");
        Ok(Self::default())
    }

    /// Replace the reserved `default` model id with this protocol's configured model.
    pub fn resolve_model(&self, protocol: Protocol, requested: &str) -> String {
        if requested != DEFAULT_MODEL_ALIAS {
            return requested.to_string();
        }
        match protocol {
            Protocol::OpenAi => self.defaults.openai.clone(),
            Protocol::Anthropic => self.defaults.anthropic.clone(),
            Protocol::Gemini => self.defaults.gemini.clone(),
        }
    }

    pub fn is_scripted(&self) -> bool {
        self.provider.name.eq_ignore_ascii_case(SCRIPTED_PROVIDER)
    }

    /// Resolve the effective base URL (config override or provider preset default)
    pub fn effective_base_url(&self) -> Result<String> {
        if let Some(ref url) = self.provider.base_url {
            return Ok(url.clone());
        }

        let preset = ProviderPreset::from_name(&self.provider.name).ok_or_else(|| {
            GatewayError::config(format!(
                "Unknown provider '{}' and no base_url configured. Known providers: {}",
                self.provider.name,
                ProviderPreset::names().collect::<Vec<_>>().join(", ")
            ))
        })?;

        Ok(preset.base_url.to_string())
    }

    /// Switch to another provider, taking its preset's key variable when it has one.
    pub fn set_provider(&mut self, name: &str) {
        self.provider.name = name.to_string();
        if let Some(preset) = ProviderPreset::from_name(name) {
            self.provider.base_url = None;
            self.provider.api_key_env = preset.default_api_key_env.to_string();
        }
    }

    /// The API key, if the configured environment variable is set.
    ///
    /// Local upstreams (Ollama, llama.cpp) need no key, so a missing variable is not an error.
    pub fn api_key(&self) -> Option<String> {
        if self.provider.api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.provider.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }

    /// True when the upstream expects credentials and none are available.
    pub fn missing_api_key(&self) -> bool {
        let required = ProviderPreset::from_name(&self.provider.name)
            .map_or(true, |p| p.requires_api_key);
        required && !self.is_scripted() && self.api_key().is_none()
    }

    /// `tracing` filter directive for the configured verbosity.
    pub fn tracing_directive(&self) -> String {
        format!("lm_gateway={0},tower_http={0}", self.log_level)
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("lm-gateway.toml"));

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("lm-gateway").join("config.toml"));
    }
    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("lm-gateway").join("config.toml"));
        paths.push(home.join(".lm-gateway.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
