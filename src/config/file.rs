//! TOML configuration file loading
//!
//! Supports `~/.config/robin/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct RobinConfigFile {
    #[serde(default)]
    pub voice: VoiceFileConfig,

    #[serde(default)]
    pub playback: PlaybackFileConfig,

    #[serde(default)]
    pub llm: LlmFileConfig,

    #[serde(default)]
    pub tts: TtsFileConfig,

    #[serde(default)]
    pub stt: SttFileConfig,

    #[serde(default)]
    pub server: ServerFileConfig,

    #[serde(default)]
    pub history: HistoryFileConfig,

    #[serde(default)]
    pub restart: RestartFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Capture and output configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Recognition language (e.g. "fa-IR")
    pub language: Option<String>,
    /// Quiet interval that ends an utterance
    pub silence_ms: Option<u64>,
    /// Hard ceiling on one listening session
    pub max_listen_secs: Option<u64>,
    /// Output volume, 0.0 to 1.0
    pub volume: Option<f32>,
}

/// Reply playback configuration
#[derive(Debug, Default, Deserialize)]
pub struct PlaybackFileConfig {
    pub chunk_max_len: Option<usize>,
    pub inter_chunk_pause_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_base_ms: Option<u64>,
    pub retry_max_ms: Option<u64>,
    pub load_timeout_secs: Option<u64>,
    pub unlock_timeout_secs: Option<u64>,
}

/// Chat-completion configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
    /// Retries per sub-call (reply and classification)
    pub max_retries: Option<u32>,
    pub retry_base_ms: Option<u64>,
    pub retry_max_ms: Option<u64>,
}

/// Synthesis backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    pub url: Option<String>,
    pub speaker: Option<String>,
}

/// Transcription configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    pub url: Option<String>,
    pub model: Option<String>,
}

/// Server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub port: Option<u16>,
    /// Base URL clients use to reach this server
    pub public_url: Option<String>,
    /// Remote backend for the voice loop
    pub backend_url: Option<String>,
    pub data_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryFileConfig {
    pub max_turns: Option<usize>,
}

/// Restart delays, in milliseconds
#[derive(Debug, Default, Deserialize)]
pub struct RestartFileConfig {
    pub after_reply_ms: Option<u64>,
    pub after_empty_ms: Option<u64>,
    pub after_capture_error_ms: Option<u64>,
    pub after_orchestration_failure_ms: Option<u64>,
    pub after_permission_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openrouter: Option<String>,
    pub openai: Option<String>,
    pub tts_gateway: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `RobinConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> RobinConfigFile {
    config_file_path().map_or_else(RobinConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_file_from(path: &Path) -> RobinConfigFile {
    if !path.exists() {
        return RobinConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                RobinConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            RobinConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/robin/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("robin").join("config.toml"))
}
