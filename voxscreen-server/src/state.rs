//! Shared server state handed to every axum handler.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use voxscreen_core::{
    ChatCompletionsProvider, HttpSynthesizer, LiveRecognizerClient, SessionConfig,
    SessionRegistry, SessionServices,
};

use crate::scripts::ScriptStore;
use crate::settings::ServerSettings;

#[derive(Clone)]
pub struct AppState {
    pub services: SessionServices,
    pub session_config: SessionConfig,
    pub scripts: Arc<ScriptStore>,
    /// Live peer connections, closed together at shutdown.
    pub registry: Arc<SessionRegistry>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        services: SessionServices,
        session_config: SessionConfig,
        scripts: ScriptStore,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            services,
            session_config,
            scripts: Arc::new(scripts),
            registry,
            started_at: Utc::now(),
        }
    }
}

/// Build the recognizer, reply provider, synthesizer and VAD factory.
pub fn build_services(settings: &ServerSettings) -> anyhow::Result<SessionServices> {
    if settings.recognizer_api_key.is_none() {
        warn!("no recognizer API key configured; transcription will fail");
    }
    if settings.reply_api_key.is_none() {
        warn!("no reply provider API key configured; replies will fail");
    }

    let recognizer = LiveRecognizerClient::new(settings.recognizer_config())
        .context("building recognizer client")?;
    let provider = ChatCompletionsProvider::new(settings.reply_config())
        .context("building reply provider")?;
    let synthesizer = HttpSynthesizer::new(settings.synthesizer_config())
        .context("building speech synthesizer")?;

    Ok(SessionServices {
        recognizer: Arc::new(recognizer),
        provider: Arc::new(provider),
        synthesizer: Arc::new(synthesizer),
        vad: vad_factory(settings),
    })
}

#[cfg(feature = "onnx")]
fn vad_factory(settings: &ServerSettings) -> voxscreen_core::vad::VadFactory {
    match &settings.silero_vad_path {
        Some(path) => {
            info!(?path, "using Silero VAD");
            SessionServices::silero_vad(
                path.clone(),
                settings.silero_vad_threshold,
                &settings.session_config(),
            )
        }
        None => energy_vad(settings),
    }
}

#[cfg(not(feature = "onnx"))]
fn vad_factory(settings: &ServerSettings) -> voxscreen_core::vad::VadFactory {
    if settings.silero_vad_path.is_some() {
        warn!("sileroVadPath is set but the server was built without the onnx feature");
    }
    energy_vad(settings)
}

fn energy_vad(settings: &ServerSettings) -> voxscreen_core::vad::VadFactory {
    info!(
        threshold = settings.vad_threshold,
        hangover = settings.vad_hangover_frames,
        "using energy VAD"
    );
    SessionServices::energy_vad(settings.vad_threshold, settings.vad_hangover_frames)
}
