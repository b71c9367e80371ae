//! Configuration types for the execution companion.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable that overrides [`StoreConfig::db_path`].
pub const DB_PATH_ENV: &str = "ECOS_DB_PATH";

/// Environment variable that overrides [`GeneratorConfig::model`].
pub const MODEL_ENV: &str = "OPENAI_MODEL";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EcosConfig {
    /// Durable store settings.
    pub store: StoreConfig,
    /// External content generator settings.
    pub generator: GeneratorConfig,
    /// Step sizing and review tuning.
    pub flow: FlowConfig,
}

/// SQLite store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the SQLite database file.
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_data_dir().join("ecos.db"),
        }
    }
}

impl StoreConfig {
    /// Database path after applying the `ECOS_DB_PATH` override.
    pub fn effective_db_path(&self) -> PathBuf {
        match std::env::var_os(DB_PATH_ENV) {
            Some(p) if !p.is_empty() => PathBuf::from(p),
            _ => self.db_path.clone(),
        }
    }
}

/// OpenAI-compatible content generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Disable to always serve fallback content.
    pub enabled: bool,
    /// Provider base URL (without `/v1/...`).
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Per-attempt timeout in seconds.
    pub timeout_secs: u64,
    /// Retries after a schema-invalid response.
    pub max_retries: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum completion tokens.
    pub max_tokens: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openai.com".to_owned(),
            model: "gpt-4o-mini".to_owned(),
            api_key_env: "OPENAI_API_KEY".to_owned(),
            timeout_secs: 20,
            max_retries: 1,
            temperature: 0.7,
            max_tokens: 800,
        }
    }
}

impl GeneratorConfig {
    /// Resolve the API key from the configured environment variable.
    ///
    /// Returns `None` when the variable is unset or blank.
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    }

    /// Model after applying the `OPENAI_MODEL` override.
    pub fn effective_model(&self) -> String {
        std::env::var(MODEL_ENV)
            .ok()
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.model.clone())
    }
}

/// Step sizing and review tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Duration of a micro (starter) step, in minutes.
    pub micro_minutes: u32,
    /// Duration of an upgrade (follow-on) step, in minutes.
    pub upgrade_minutes: u32,
    /// Duration of a shrunk step. Always the minimum size.
    pub shrink_minutes: u32,
    /// Characters of the completed instruction quoted in evidence.
    pub evidence_excerpt_chars: usize,
    /// Evidence rows fetched as context for self-limiting interventions.
    pub self_limiting_lookup: usize,
    /// Maximum evidence quotes shown with an intervention.
    pub evidence_quote_limit: usize,
    /// Characters per evidence quote.
    pub evidence_quote_chars: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            micro_minutes: 2,
            upgrade_minutes: 8,
            shrink_minutes: 2,
            evidence_excerpt_chars: 40,
            self_limiting_lookup: 5,
            evidence_quote_limit: 3,
            evidence_quote_chars: 60,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("ecos"))
        .unwrap_or_else(|| PathBuf::from("/tmp/ecos-data"))
}

impl EcosConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::EcosError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::EcosError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/ecos/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("ecos").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("/tmp/ecos-config/config.toml"))
    }
}
