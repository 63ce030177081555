use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::audio::CaptureConstraints;
use crate::provider::{ProviderConfig, ProviderKind};
use crate::refine::RefineConfig;
use crate::session::SessionConfig;

/// Application configuration: provider selection, audio constraint flags,
/// refinement settings. Loaded once and consumed read-only at session
/// start.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderSettings,
    pub audio: AudioSettings,
    pub refine: RefineSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// "deepgram" | "elevenlabs"
    pub stt: ProviderKind,
    pub model: Option<String>,
    pub language: String,
    pub commit_timeout_secs: u64,
    pub keepalive_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            stt: ProviderKind::Deepgram,
            model: None,
            language: "en-US".to_string(),
            commit_timeout_secs: 5,
            keepalive_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub sample_rate: u32,
    pub buffer_duration_ms: u64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        let defaults = CaptureConstraints::default();
        Self {
            echo_cancellation: defaults.echo_cancellation,
            noise_suppression: defaults.noise_suppression,
            sample_rate: defaults.sample_rate,
            buffer_duration_ms: defaults.buffer_duration_ms,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RefineSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for RefineSettings {
    fn default() -> Self {
        let defaults = RefineConfig::default();
        Self {
            enabled: defaults.enabled,
            endpoint: defaults.endpoint,
            model: defaults.model,
            timeout_secs: defaults.timeout.as_secs(),
        }
    }
}

impl Config {
    /// Load settings from an optional file plus `SOTTO_`-prefixed
    /// environment variables (environment wins).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("SOTTO").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Default model per provider when none is configured.
    fn provider_model(&self) -> String {
        if let Some(model) = &self.provider.model {
            return model.clone();
        }
        match self.provider.stt {
            ProviderKind::Deepgram => "nova-2".to_string(),
            ProviderKind::Elevenlabs => "scribe_v1".to_string(),
        }
    }

    /// Session configuration derived from these settings.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            provider: self.provider.stt,
            provider_config: ProviderConfig {
                model: self.provider_model(),
                language: self.provider.language.clone(),
                sample_rate: self.audio.sample_rate,
                keepalive_interval: Duration::from_secs(self.provider.keepalive_secs),
                commit_timeout: Duration::from_secs(self.provider.commit_timeout_secs),
                endpoint: None,
            },
            constraints: CaptureConstraints {
                echo_cancellation: self.audio.echo_cancellation,
                noise_suppression: self.audio.noise_suppression,
                sample_rate: self.audio.sample_rate,
                buffer_duration_ms: self.audio.buffer_duration_ms,
            },
            ..SessionConfig::default()
        }
    }

    pub fn refine_config(&self) -> RefineConfig {
        RefineConfig {
            enabled: self.refine.enabled,
            endpoint: self.refine.endpoint.clone(),
            model: self.refine.model.clone(),
            timeout: Duration::from_secs(self.refine.timeout_secs),
        }
    }
}

/// Per-provider credentials, resolved from the environment at session
/// start.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
    pub refine: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            deepgram: non_empty_env("DEEPGRAM_API_KEY"),
            elevenlabs: non_empty_env("ELEVENLABS_API_KEY"),
            refine: non_empty_env("OPENROUTER_API_KEY"),
        }
    }

    /// The STT key for the selected backend, if configured.
    pub fn for_provider(&self, kind: ProviderKind) -> Option<&str> {
        match kind {
            ProviderKind::Deepgram => self.deepgram.as_deref(),
            ProviderKind::Elevenlabs => self.elevenlabs.as_deref(),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}
