//! Configuration management for Robin
//!
//! Values resolve as CLI flag, then environment, then the TOML file, then
//! the built-in default.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

pub use file::{RobinConfigFile, config_file_path, load_config_file};

use crate::controller::RestartDelays;
use crate::history::DEFAULT_MAX_TURNS;
use crate::llm::DEFAULT_ENDPOINT;
use crate::playback::PlaybackConfig;
use crate::retry::RetryPolicy;
use crate::speech::{CaptureConfig, DEFAULT_MAX_LEN};

/// Default upstream synthesis gateway
pub const DEFAULT_TTS_URL: &str = "https://partai.gw.isahab.ir/TextToSpeech/v1/speech-synthesys";

/// Default transcription endpoint
pub const DEFAULT_STT_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

const DEFAULT_PORT: u16 = 3001;

/// Robin configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (database)
    pub data_dir: PathBuf,

    /// Remote backend for orchestration and synthesis; in-process when unset
    pub backend_url: Option<String>,

    /// HTTP API server configuration
    pub server: ServerConfig,

    /// Chat-completion configuration
    pub chat: ChatConfig,

    /// Upstream synthesis configuration
    pub tts: TtsConfig,

    /// Microphone transcription configuration
    pub stt: SttConfig,

    /// Endpointing
    pub capture: CaptureConfig,

    /// Reply playback
    pub playback: PlaybackConfig,

    /// Timeout for fetching URL-delivered audio
    pub load_timeout: Duration,

    /// Delays before listening again
    pub restart: RestartDelays,

    /// Turns of history retained
    pub history_max_turns: usize,

    /// Output volume, 0.0 to 1.0
    pub volume: f32,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Base URL used to build proxied audio URLs
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub timeout: Duration,
    /// Applied to each orchestration sub-call
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub url: String,
    pub gateway_token: Option<SecretString>,
    pub speaker: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SttConfig {
    pub url: String,
    pub model: String,
    pub api_key: Option<SecretString>,
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub backend_url: Option<String>,
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the process environment and config file
    #[must_use]
    pub fn load(overrides: &Overrides) -> Self {
        let file = load_config_file();
        Self::from_sources(|name| std::env::var(name).ok(), file, overrides)
    }

    /// Resolve configuration from explicit sources
    #[must_use]
    pub fn from_sources(
        env: impl Fn(&str) -> Option<String>,
        file: RobinConfigFile,
        overrides: &Overrides,
    ) -> Self {
        // Empty variables count as unset
        let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());
        let env_parse = |name: &str| env(name).and_then(|v| v.trim().parse::<u64>().ok());
        let secret = |value: Option<String>| value.map(SecretString::from);
        let millis = |value: Option<u64>, default: u64| Duration::from_millis(value.unwrap_or(default));

        let port = overrides
            .port
            .or_else(|| env("ROBIN_PORT").or_else(|| env("PORT")).and_then(|s| s.parse().ok()))
            .or(file.server.port)
            .unwrap_or(DEFAULT_PORT);

        let public_url = env("ROBIN_PUBLIC_URL")
            .or(file.server.public_url)
            .unwrap_or_else(|| format!("http://localhost:{port}"));

        let backend_url = overrides
            .backend_url
            .clone()
            .or_else(|| env("ROBIN_BACKEND_URL"))
            .or(file.server.backend_url);

        let data_dir = overrides
            .data_dir
            .clone()
            .or_else(|| env("ROBIN_DATA_DIR").map(PathBuf::from))
            .or_else(|| file.server.data_dir.map(PathBuf::from))
            .unwrap_or_else(default_data_dir);

        let request_timeout = Duration::from_secs(
            env_parse("ROBIN_REQUEST_TIMEOUT_SECS")
                .or(file.llm.timeout_secs)
                .unwrap_or(30),
        );

        let chat = ChatConfig {
            endpoint: env("OPENROUTER_URL")
                .or(file.llm.endpoint)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model: env("OPENROUTER_MODEL")
                .or(file.llm.model)
                .unwrap_or_else(|| "openai/gpt-4o-mini".to_string()),
            api_key: secret(env("OPENROUTER_API_KEY").or(file.api_keys.openrouter)),
            timeout: request_timeout,
            retry: RetryPolicy {
                max_retries: file.llm.max_retries.unwrap_or(2),
                base_delay: millis(file.llm.retry_base_ms, 1000),
                max_delay: millis(file.llm.retry_max_ms, 8000),
            },
        };

        let tts = TtsConfig {
            url: env("TTS_API_URL")
                .or(file.tts.url)
                .unwrap_or_else(|| DEFAULT_TTS_URL.to_string()),
            gateway_token: secret(env("TTS_GATEWAY_TOKEN").or(file.api_keys.tts_gateway)),
            speaker: env("TTS_SPEAKER")
                .or(file.tts.speaker)
                .unwrap_or_else(|| "3".to_string()),
            timeout: request_timeout,
        };

        let stt = SttConfig {
            url: env("ROBIN_STT_URL")
                .or(file.stt.url)
                .unwrap_or_else(|| DEFAULT_STT_URL.to_string()),
            model: env("ROBIN_STT_MODEL")
                .or(file.stt.model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            api_key: secret(env("OPENAI_API_KEY").or(file.api_keys.openai)),
        };

        let capture = CaptureConfig {
            language: env("ROBIN_LANGUAGE")
                .or(file.voice.language)
                .unwrap_or_else(|| "fa-IR".to_string()),
            silence_timeout: millis(file.voice.silence_ms, 1200),
            max_duration: Duration::from_secs(file.voice.max_listen_secs.unwrap_or(10)),
        };

        let p = &file.playback;
        let playback = PlaybackConfig {
            max_chunk_len: p.chunk_max_len.unwrap_or(DEFAULT_MAX_LEN),
            inter_chunk_pause: millis(p.inter_chunk_pause_ms, 300),
            retry: RetryPolicy {
                max_retries: p.max_retries.unwrap_or(2),
                base_delay: millis(p.retry_base_ms, 1000),
                max_delay: millis(p.retry_max_ms, 8000),
            },
            unlock_timeout: Duration::from_secs(p.unlock_timeout_secs.unwrap_or(30)),
        };

        let r = &file.restart;
        let restart = RestartDelays {
            after_reply: millis(r.after_reply_ms, 1000),
            after_empty: millis(r.after_empty_ms, 2000),
            after_capture_error: millis(r.after_capture_error_ms, 2000),
            after_orchestration_failure: millis(r.after_orchestration_failure_ms, 1000),
            after_permission: millis(r.after_permission_ms, 1000),
        };

        let config = Self {
            data_dir,
            backend_url,
            server: ServerConfig { port, public_url },
            chat,
            tts,
            stt,
            capture,
            playback,
            load_timeout: Duration::from_secs(file.playback.load_timeout_secs.unwrap_or(20)),
            restart,
            history_max_turns: file.history.max_turns.unwrap_or(DEFAULT_MAX_TURNS),
            volume: file.voice.volume.unwrap_or(1.0).clamp(0.0, 1.0),
        };

        tracing::debug!(
            port = config.server.port,
            backend = config.backend_url.as_deref().unwrap_or("in-process"),
            openrouter_key_present = config.chat.api_key.is_some(),
            tts_token_present = config.tts.gateway_token.is_some(),
            stt_key_present = config.stt.api_key.is_some(),
            "configuration resolved"
        );

        config
    }

    /// Path of the SQLite database
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("robin.db")
    }
}

/// `~/.local/share/robin` on Linux
fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("ir", "robin", "robin")
        .map_or_else(|| PathBuf::from(".robin"), |d| d.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_any_source() {
        let config = Config::from_sources(env_from(&[]), RobinConfigFile::default(), &Overrides::default());

        assert_eq!(config.server.port, 3001);
        assert_eq!(config.server.public_url, "http://localhost:3001");
        assert_eq!(config.capture.language, "fa-IR");
        assert_eq!(config.capture.silence_timeout, Duration::from_millis(1200));
        assert_eq!(config.capture.max_duration, Duration::from_secs(10));
        assert_eq!(config.playback.max_chunk_len, 250);
        assert_eq!(config.playback.inter_chunk_pause, Duration::from_millis(300));
        assert_eq!(config.playback.retry, RetryPolicy::default());
        assert_eq!(config.chat.retry, RetryPolicy::default());
        assert_eq!(config.chat.timeout, Duration::from_secs(30));
        assert_eq!(config.chat.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.tts.speaker, "3");
        assert_eq!(config.history_max_turns, 50);
        assert_eq!(config.restart, RestartDelays::default());
        assert!(config.chat.api_key.is_none());
        assert!(config.backend_url.is_none());
    }

    #[test]
    fn env_beats_file_and_cli_beats_env() {
        let file: RobinConfigFile = toml::from_str(
            r#"
            [server]
            port = 4000
            [llm]
            model = "file-model"
            "#,
        )
        .unwrap();

        let env = env_from(&[
            ("ROBIN_PORT", "5000"),
            ("OPENROUTER_MODEL", "env-model"),
            ("OPENROUTER_API_KEY", "sk-or-test"),
        ]);
        let overrides = Overrides {
            port: Some(6000),
            ..Overrides::default()
        };

        let config = Config::from_sources(env, file, &overrides);
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.chat.model, "env-model");
        assert_eq!(
            config.chat.api_key.as_ref().map(|k| k.expose_secret().to_string()),
            Some("sk-or-test".to_string())
        );
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let config = Config::from_sources(
            env_from(&[("ROBIN_BACKEND_URL", ""), ("ROBIN_REQUEST_TIMEOUT_SECS", "12")]),
            RobinConfigFile::default(),
            &Overrides::default(),
        );
        assert!(config.backend_url.is_none());
        assert_eq!(config.tts.timeout, Duration::from_secs(12));
    }

    #[test]
    fn file_tunables_apply() {
        let file: RobinConfigFile = toml::from_str(
            r"
            [voice]
            silence_ms = 800
            volume = 3.0
            [playback]
            max_retries = 4
            [llm]
            max_retries = 0
            retry_base_ms = 250
            [restart]
            after_empty_ms = 500
            [history]
            max_turns = 10
            ",
        )
        .unwrap();

        let config = Config::from_sources(env_from(&[]), file, &Overrides::default());
        assert_eq!(config.capture.silence_timeout, Duration::from_millis(800));
        assert!((config.volume - 1.0).abs() < f32::EPSILON);
        assert_eq!(config.playback.retry.max_retries, 4);
        assert_eq!(config.chat.retry.max_retries, 0);
        assert_eq!(config.chat.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.chat.retry.max_delay, Duration::from_secs(8));
        assert_eq!(config.restart.after_empty, Duration::from_millis(500));
        assert_eq!(config.history_max_turns, 10);
    }
}
