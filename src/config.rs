//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_SERVER_PORT, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub transcription: TranscriptionSettings,
}

/// Server bind settings.
///
/// The service is designed for a single local client, so the default host is
/// the loopback interface. Binding to `0.0.0.0` exposes an unauthenticated
/// transcription endpoint and should be a deliberate choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Speech-recognition model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Whisper model size to load ("tiny", "base", "small", "medium", "large")
    pub whisper_model: String,

    /// Compute device preference ("auto", "cpu", "cuda", "metal")
    pub device: String,

    /// Language hint applied when the request carries none
    pub default_language: String,
}

/// Tuning knobs for the transcription request pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSettings {
    /// File-path sources smaller than this are rejected as truncated before
    /// any model work happens
    pub min_source_bytes: u64,

    /// RMS energy threshold for the silence gate (0.0..=1.0, permissive)
    pub vad_threshold: f32,

    /// Silent spans shorter than this survive the gate, so quiet speech and
    /// natural pauses are not clipped
    pub min_silence_duration_ms: u64,

    /// Message fragments that mark an inference-layer failure as a corrupted
    /// chunk rather than a fatal error. The decoder classifies structurally;
    /// this list covers error text from the model backend, so swapping the
    /// backend means editing this list, not the code.
    pub corruption_signatures: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8889,
            },
            model: ModelConfig {
                whisper_model: "base".to_string(),
                device: "auto".to_string(),
                default_language: "es".to_string(),
            },
            transcription: TranscriptionSettings {
                min_source_bytes: 1000,
                vad_threshold: 0.3,
                min_silence_duration_ms: 300,
                corruption_signatures: vec![
                    "invalid data".to_string(),
                    "malformed".to_string(),
                    "end of stream".to_string(),
                    "unexpected eof".to_string(),
                ],
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and the environment.
    ///
    /// `HOST`/`PORT` are honored on top of the `APP_` prefix because
    /// deployment wrappers commonly set them without the prefix.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense before the server
    /// starts; a bad value here should fail startup, not the first request.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.model.whisper_model.is_empty() {
            return Err(anyhow::anyhow!("Whisper model size must not be empty"));
        }

        if self.model.default_language.is_empty() {
            return Err(anyhow::anyhow!("Default language hint must not be empty"));
        }

        if self.transcription.min_source_bytes == 0 {
            return Err(anyhow::anyhow!("Minimum source size must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.transcription.vad_threshold) {
            return Err(anyhow::anyhow!(
                "VAD threshold must be within 0.0..=1.0, got {}",
                self.transcription.vad_threshold
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8889);
        assert_eq!(config.model.default_language, "es");
        assert_eq!(config.transcription.min_source_bytes, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.transcription.vad_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.model.default_language = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_signatures_cover_known_corruption_vocabulary() {
        let config = AppConfig::default();
        let signatures = &config.transcription.corruption_signatures;
        assert!(signatures.iter().any(|s| s == "invalid data"));
        assert!(signatures.iter().any(|s| s == "unexpected eof"));
    }
}
