//! Server settings (JSON file, overridable from the environment).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use voxscreen_core::{
    ChatCompletionsConfig, HttpSynthesizerConfig, LiveRecognizerConfig, SessionConfig,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ServerSettings {
    pub bind_address: String,
    pub scripts_path: PathBuf,
    pub recognizer_init_url: String,
    pub recognizer_api_key: Option<String>,
    pub reply_url: String,
    pub reply_api_key: Option<String>,
    pub reply_model: String,
    pub reply_max_tokens: u32,
    pub reply_timeout_secs: u64,
    pub tts_url: String,
    pub tts_speaker: String,
    pub tts_sample_rate: u32,
    pub silence_threshold: u32,
    pub vad_threshold: f32,
    pub vad_hangover_frames: u32,
    pub silero_vad_path: Option<PathBuf>,
    pub silero_vad_threshold: f32,
    pub greeting_delay_ms: u64,
    pub synthesis_fallback_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let recognizer = LiveRecognizerConfig::default();
        let reply = ChatCompletionsConfig::default();
        let tts = HttpSynthesizerConfig::default();
        let session = SessionConfig::default();
        Self {
            bind_address: "0.0.0.0:8080".into(),
            scripts_path: default_data_dir().join("interviews.json"),
            recognizer_init_url: recognizer.init_url,
            recognizer_api_key: None,
            reply_url: reply.url,
            reply_api_key: None,
            reply_model: reply.model,
            reply_max_tokens: reply.max_tokens,
            reply_timeout_secs: session.reply_timeout.as_secs(),
            tts_url: tts.url,
            tts_speaker: tts.speaker,
            tts_sample_rate: tts.sample_rate,
            silence_threshold: session.silence_threshold,
            vad_threshold: session.vad_threshold,
            vad_hangover_frames: session.vad_hangover_frames,
            silero_vad_path: None,
            silero_vad_threshold: 0.5,
            greeting_delay_ms: session.greeting_delay.as_millis() as u64,
            synthesis_fallback_ms: session.synthesis_fallback.as_millis() as u64,
        }
    }
}

impl ServerSettings {
    pub fn normalize(&mut self) {
        let defaults = Self::default();
        if self.bind_address.trim().is_empty() {
            self.bind_address = defaults.bind_address;
        }
        self.bind_address = self.bind_address.trim().to_string();
        self.recognizer_api_key = normalize_secret(self.recognizer_api_key.take());
        self.reply_api_key = normalize_secret(self.reply_api_key.take());
        if self.reply_model.trim().is_empty() {
            self.reply_model = defaults.reply_model;
        }
        self.reply_max_tokens = self.reply_max_tokens.clamp(16, 32_000);
        self.reply_timeout_secs = self.reply_timeout_secs.clamp(5, 600);
        self.tts_sample_rate = self.tts_sample_rate.clamp(8_000, 96_000);
        self.silence_threshold = self.silence_threshold.clamp(5, 500);
        self.vad_threshold = self.vad_threshold.clamp(0.001, 0.5);
        self.vad_hangover_frames = self.vad_hangover_frames.min(50);
        self.silero_vad_threshold = self.silero_vad_threshold.clamp(0.03, 0.95);
        self.greeting_delay_ms = self.greeting_delay_ms.min(30_000);
        self.synthesis_fallback_ms = self.synthesis_fallback_ms.clamp(20, 5_000);
    }

    /// Apply `VOXSCREEN_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("VOXSCREEN_BIND") {
            self.bind_address = v;
        }
        if let Some(v) = lookup("VOXSCREEN_SCRIPTS") {
            self.scripts_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("VOXSCREEN_RECOGNIZER_KEY") {
            self.recognizer_api_key = Some(v);
        }
        if let Some(v) = lookup("VOXSCREEN_REPLY_KEY") {
            self.reply_api_key = Some(v);
        }
        if let Some(v) = lookup("VOXSCREEN_REPLY_MODEL") {
            self.reply_model = v;
        }
        if let Some(v) = lookup("VOXSCREEN_TTS_URL") {
            self.tts_url = v;
        }
        self.normalize();
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            silence_threshold: self.silence_threshold,
            vad_threshold: self.vad_threshold,
            vad_hangover_frames: self.vad_hangover_frames,
            greeting_delay: Duration::from_millis(self.greeting_delay_ms),
            reply_timeout: Duration::from_secs(self.reply_timeout_secs),
            synthesis_fallback: Duration::from_millis(self.synthesis_fallback_ms),
            ..SessionConfig::default()
        }
    }

    pub fn recognizer_config(&self) -> LiveRecognizerConfig {
        LiveRecognizerConfig {
            init_url: self.recognizer_init_url.clone(),
            api_key: self.recognizer_api_key.clone().unwrap_or_default(),
            ..LiveRecognizerConfig::default()
        }
    }

    pub fn reply_config(&self) -> ChatCompletionsConfig {
        ChatCompletionsConfig {
            url: self.reply_url.clone(),
            api_key: self.reply_api_key.clone().unwrap_or_default(),
            model: self.reply_model.clone(),
            max_tokens: self.reply_max_tokens,
            timeout: Duration::from_secs(self.reply_timeout_secs),
        }
    }

    pub fn synthesizer_config(&self) -> HttpSynthesizerConfig {
        HttpSynthesizerConfig {
            url: self.tts_url.clone(),
            speaker: self.tts_speaker.clone(),
            sample_rate: self.tts_sample_rate,
            ..HttpSynthesizerConfig::default()
        }
    }
}

fn normalize_secret(raw: Option<String>) -> Option<String> {
    raw.map(|k| k.trim().to_string()).filter(|k| !k.is_empty())
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("voxscreen")
}

pub fn default_settings_path() -> PathBuf {
    default_data_dir().join("settings.json")
}

/// Read settings from `path`; a missing or unreadable file yields defaults.
pub fn load_settings(path: &Path) -> ServerSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<ServerSettings>(&raw).unwrap_or_else(|e| {
            warn!(?path, "invalid settings file, using defaults: {e}");
            ServerSettings::default()
        }),
        Err(_) => ServerSettings::default(),
    };
    settings.normalize();
    settings
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"bindAddress":"127.0.0.1:9000","silenceThreshold":80}"#).unwrap();

        let settings = load_settings(&path);
        assert_eq!(settings.bind_address, "127.0.0.1:9000");
        assert_eq!(settings.silence_threshold, 80);
        assert_eq!(settings.reply_max_tokens, 5_000);
        assert_eq!(settings.session_config().silence_threshold, 80);
    }

    #[test]
    fn missing_or_broken_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = load_settings(&dir.path().join("nope.json"));
        assert_eq!(missing.silence_threshold, 50);

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{not json").unwrap();
        assert_eq!(load_settings(&broken).bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn normalize_clamps_and_drops_blank_secrets() {
        let mut s = ServerSettings {
            reply_api_key: Some("   ".into()),
            recognizer_api_key: Some(" key ".into()),
            silence_threshold: 0,
            vad_threshold: 4.0,
            bind_address: " ".into(),
            ..ServerSettings::default()
        };
        s.normalize();
        assert_eq!(s.reply_api_key, None);
        assert_eq!(s.recognizer_api_key.as_deref(), Some("key"));
        assert_eq!(s.silence_threshold, 5);
        assert_eq!(s.vad_threshold, 0.5);
        assert_eq!(s.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let env: HashMap<&str, &str> = [
            ("VOXSCREEN_BIND", "127.0.0.1:7000"),
            ("VOXSCREEN_REPLY_KEY", "sk-test"),
        ]
        .into_iter()
        .collect();
        let mut s = ServerSettings::default();
        s.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(s.bind_address, "127.0.0.1:7000");
        assert_eq!(s.reply_config().api_key, "sk-test");
        assert!(s.recognizer_api_key.is_none());
    }
}
