use crate::audio::CodecConfig;
use anyhow::{bail, Result};
use serde::Deserialize;
use std::time::Duration;

/// Top-level service configuration.
///
/// Loaded from an optional file merged under environment variables (separator
/// `__`, e.g. `ASSISTANT__API_KEY`). Credentials are validated up front so a
/// misconfigured process exits before any component starts.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub platform: PlatformSettings,
    pub transcribe: TranscribeSettings,
    pub assistant: AssistantSettings,
    pub speech: SpeechSettings,
    pub capture: CaptureSettings,
    pub codec: CodecConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlatformSettings {
    /// Which voice platform backend to construct ("loopback" for local runs).
    pub backend: String,
    /// Platform credential.
    pub token: String,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            backend: "loopback".to_string(),
            token: String::new(),
        }
    }
}

/// Streaming transcription service settings. The connection is configured for
/// the platform's native audio encoding so captured frames are forwarded
/// verbatim, with no local decoding.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscribeSettings {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub smart_format: bool,
    pub encoding: String,
    pub sample_rate: u32,
}

impl Default for TranscribeSettings {
    fn default() -> Self {
        Self {
            url: "wss://api.deepgram.com/v1/listen".to_string(),
            api_key: String::new(),
            model: "nova-2".to_string(),
            smart_format: true,
            encoding: "opus".to_string(),
            sample_rate: 48_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AssistantSettings {
    /// Base URL of the chat-completions endpoint (without the path).
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    /// Which synthesis engine backend to construct ("command" spawns a
    /// configured program per request).
    pub engine: String,
    /// Synthesis program for the "command" engine.
    pub program: String,
    /// Sample rate the engine reports for its output.
    pub sample_rate: u32,
    /// Engine speaker identity.
    pub speaker: u32,
    /// Speaking speed multiplier.
    pub speed: f32,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            engine: "command".to_string(),
            program: "voice-coach-synth".to_string(),
            sample_rate: 22_050,
            speaker: 0,
            speed: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Continuous non-speech of this length ends the current utterance.
    pub silence_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self { silence_ms: 2000 }
    }
}

impl CaptureSettings {
    pub fn silence(&self) -> Duration {
        Duration::from_millis(self.silence_ms)
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        let cfg: Config = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reports every missing required variable at once rather than failing on
    /// the first, so a fresh deployment can be fixed in one pass.
    fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.platform.token.is_empty() {
            missing.push("PLATFORM__TOKEN");
        }
        if self.transcribe.api_key.is_empty() {
            missing.push("TRANSCRIBE__API_KEY");
        }
        if self.assistant.base_url.is_empty() {
            missing.push("ASSISTANT__BASE_URL");
        }
        if self.assistant.api_key.is_empty() {
            missing.push("ASSISTANT__API_KEY");
        }
        if self.assistant.model.is_empty() {
            missing.push("ASSISTANT__MODEL");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            bail!("missing required configuration: {}", missing.join(", "));
        }
    }
}
