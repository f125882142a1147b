use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ConfabError, Result};

/// Top-level configuration for Confab.
///
/// Loaded from `~/.confab/config.toml` by default. Each section corresponds
/// to one collaborator of the chat orchestrator or to the binary itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfabConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl ConfabConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ConfabConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfabError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database and the API token.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// API server port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.confab/data".to_string(),
            log_level: "info".to_string(),
            port: 3040,
        }
    }
}

/// Model selection and provider credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier. `gpt*` routes to OpenAI, `claude*` to Anthropic,
    /// anything else to the local OpenAI-compatible endpoint.
    pub model: String,
    /// OpenAI API key.
    pub openai_api_key: Option<String>,
    /// Anthropic API key.
    pub anthropic_api_key: Option<String>,
    /// Base URL for the OpenAI API.
    pub openai_base_url: String,
    /// Base URL for the Anthropic API.
    pub anthropic_base_url: String,
    /// Base URL for a local OpenAI-compatible server (no credential).
    pub local_base_url: String,
    /// Maximum tokens per response.
    pub max_tokens: u32,
    /// Optional system prompt sent ahead of the history.
    pub system_prompt: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-5-sonnet-20240620".to_string(),
            openai_api_key: None,
            anthropic_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            anthropic_base_url: "https://api.anthropic.com/v1".to_string(),
            local_base_url: "http://127.0.0.1:11434/v1".to_string(),
            max_tokens: 4096,
            system_prompt: None,
        }
    }
}

/// Voice input configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Transcription provider: "auto" (live when an OpenAI key is set),
    /// "live" or "stand_in".
    pub provider: String,
    /// Language hint passed to the transcription service.
    pub language: String,
    /// Remote Whisper model name.
    pub whisper_model: String,
    /// Sample rate of the pushed PCM audio, in Hz.
    pub sample_rate: u32,
    /// Text produced by the stand-in provider.
    pub stand_in_text: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            provider: "auto".to_string(),
            language: "en".to_string(),
            whisper_model: "whisper-1".to_string(),
            sample_rate: 16_000,
            stand_in_text: "[voice input]".to_string(),
        }
    }
}

/// Local storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file name inside the data directory.
    pub database_file: String,
    /// When set, the chat client persists through a remote `confab serve`
    /// instance at this URL instead of the local database.
    pub remote_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: "confab.db".to_string(),
            remote_url: None,
        }
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Identity that authenticated requests act as.
    pub user_id: String,
    /// Token file name inside the data directory.
    pub token_file: String,
    /// Bearer token used by the remote persistence client.
    pub token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            user_id: "local".to_string(),
            token_file: "api_token".to_string(),
            token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = ConfabConfig::default();
        assert_eq!(config.general.data_dir, "~/.confab/data");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.port, 3040);
        assert!(config.model.openai_api_key.is_none());
        assert_eq!(config.voice.provider, "auto");
        assert_eq!(config.storage.database_file, "confab.db");
        assert_eq!(config.api.user_id, "local");
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/custom/data"
log_level = "debug"
port = 8080

[model]
model = "gpt-4o"
openai_api_key = "sk-test"

[voice]
provider = "stand_in"
stand_in_text = "hello from the mic"
"#;
        let file = create_temp_config(content);
        let config = ConfabConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/custom/data");
        assert_eq!(config.general.port, 8080);
        assert_eq!(config.model.model, "gpt-4o");
        assert_eq!(config.model.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.voice.provider, "stand_in");
        assert_eq!(config.voice.stand_in_text, "hello from the mic");
        // Untouched fields keep their defaults.
        assert_eq!(config.model.max_tokens, 4096);
        assert_eq!(config.voice.sample_rate, 16_000);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = ConfabConfig::load(file.path()).unwrap();
        assert_eq!(config.general.port, 3040);
        assert_eq!(config.model.model, "claude-3-5-sonnet-20240620");
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("[general\nport = ");
        let result = ConfabConfig::load(file.path());
        assert!(matches!(result, Err(ConfabError::Config(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = ConfabConfig::load_or_default(Path::new("/nonexistent/confab.toml"));
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ConfabConfig::default();
        config.model.model = "gpt-4o-mini".to_string();
        config.storage.remote_url = Some("http://127.0.0.1:3040".to_string());
        config.save(&path).unwrap();

        let loaded = ConfabConfig::load(&path).unwrap();
        assert_eq!(loaded.model.model, "gpt-4o-mini");
        assert_eq!(
            loaded.storage.remote_url.as_deref(),
            Some("http://127.0.0.1:3040")
        );
    }
}
