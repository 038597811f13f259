//! `InterviewSession`: one interview over one peer connection.
//!
//! ## Lifecycle
//!
//! ```text
//! InterviewSession::new()          conversation seeded, nothing running
//!     ├─► take_playback()          transport drives the outbound track
//!     ├─► attach_inbound()         inbound loop spawned, frames flow in
//!     ├─► on_connection_state(Connected)   greeting scheduled (once)
//!     └─► on_connection_state(Failed|Closed) / shutdown()
//!                                  loop, greeting and reply cycles aborted
//! ```
//!
//! The recognizer stream is not opened here; the first inbound frame does it.

pub mod orchestrator;
pub mod pipeline;
pub mod turn;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    audio::frame::InboundFrame,
    connection::{transition, ConnectionAction, ConnectionState},
    conversation::{interview_prompt, Conversation, ConversationTurn},
    error::{Result, VoxscreenError},
    events::SessionEvent,
    playback::{playback_channel, PlaybackItem, PlaybackQueue, PlaybackScheduler, DEFAULT_PULL_TIMEOUT},
    reply::ReplyProvider,
    stt::{link::DEFAULT_CONNECT_TIMEOUT, RecognizerConnector, TranscriptionLink},
    tts::{synthesize_or_silence, SpeechSynthesizer, Synthesized, DEFAULT_FALLBACK_SILENCE},
    vad::{energy::EnergyVad, VadFactory, VoiceActivityDetector, VoiceActivityGate},
};

use orchestrator::{OrchestratorParts, TurnOrchestrator};
use pipeline::{DiagnosticsSnapshot, PipelineContext, PipelineDiagnostics};
use turn::{SharedAggregator, TurnState, UtteranceAggregator, DEFAULT_SILENCE_THRESHOLD};

/// Session events buffered for slow subscribers.
const EVENTS_CAP: usize = 256;
/// Inbound frames buffered ahead of the loop.
const INBOUND_CAP: usize = 64;

/// Per-session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Non-speech frames that must be exceeded to close an utterance. Default: 50.
    pub silence_threshold: u32,
    /// `EnergyVad` RMS threshold. Default: 0.02.
    pub vad_threshold: f32,
    /// `EnergyVad` hangover in frames. Default: 4.
    pub vad_hangover_frames: u32,
    /// Delay between the channel coming up and the welcome line. Default: 3 s.
    pub greeting_delay: Duration,
    /// Bound on one reply provider call. Default: 60 s.
    pub reply_timeout: Duration,
    /// Silence played when synthesis fails. Default: 500 ms.
    pub synthesis_fallback: Duration,
    /// Wait on the playback queue per pull. Default: 1 ms.
    pub pull_timeout: Duration,
    /// Bound on opening a recognizer stream. Default: 30 s.
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            vad_threshold: 0.02,
            vad_hangover_frames: 4,
            greeting_delay: Duration::from_secs(3),
            reply_timeout: Duration::from_secs(60),
            synthesis_fallback: DEFAULT_FALLBACK_SILENCE,
            pull_timeout: DEFAULT_PULL_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// External collaborators shared by every session.
#[derive(Clone)]
pub struct SessionServices {
    pub recognizer: Arc<dyn RecognizerConnector>,
    pub provider: Arc<dyn ReplyProvider>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub vad: VadFactory,
}

impl SessionServices {
    /// Factory producing `EnergyVad`s with the given tuning.
    pub fn energy_vad(threshold: f32, hangover_frames: u32) -> VadFactory {
        Arc::new(move || Box::new(EnergyVad::new(threshold, hangover_frames)) as Box<dyn VoiceActivityDetector>)
    }

    /// Factory producing `SileroVad`s, falling back to `EnergyVad` when the
    /// model cannot be loaded.
    #[cfg(feature = "onnx")]
    pub fn silero_vad(path: std::path::PathBuf, threshold: f32, config: &SessionConfig) -> VadFactory {
        let threshold = threshold.clamp(0.03, 0.95);
        let (energy_threshold, hangover) = (config.vad_threshold, config.vad_hangover_frames);
        Arc::new(move || -> Box<dyn VoiceActivityDetector> {
            match crate::vad::SileroVad::new(&path, threshold) {
                Ok(v) => Box::new(v),
                Err(e) => {
                    warn!("SileroVad load failed ({e}), falling back to EnergyVad");
                    Box::new(EnergyVad::new(energy_threshold, hangover))
                }
            }
        })
    }
}

/// What an interview starts from.
#[derive(Debug, Clone, Default)]
pub struct InterviewScript {
    pub questions: Vec<String>,
    pub welcome_text: String,
}

pub struct InterviewSession {
    id: String,
    config: SessionConfig,
    services: SessionServices,
    welcome_text: String,
    conversation: Arc<Mutex<Conversation>>,
    aggregator: SharedAggregator,
    playback: PlaybackQueue,
    scheduler: Mutex<Option<PlaybackScheduler>>,
    orchestrator: Arc<TurnOrchestrator>,
    events: broadcast::Sender<SessionEvent>,
    diagnostics: Arc<PipelineDiagnostics>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    inbound_attached: AtomicBool,
    greeting_scheduled: AtomicBool,
    closed: AtomicBool,
}

impl InterviewSession {
    /// Build a session. Nothing is spawned until frames or state changes arrive.
    pub fn new(
        id: impl Into<String>,
        config: SessionConfig,
        services: SessionServices,
        script: InterviewScript,
    ) -> Self {
        let id = id.into();
        let conversation = Arc::new(Mutex::new(Conversation::seeded(
            interview_prompt(&script.questions),
            script.welcome_text.as_str(),
        )));
        let aggregator = UtteranceAggregator::shared(config.silence_threshold);
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let (events, _) = broadcast::channel(EVENTS_CAP);
        let (playback, scheduler) = playback_channel(config.pull_timeout);
        let scheduler = scheduler
            .with_diagnostics(Arc::clone(&diagnostics))
            .with_events(events.clone());

        let orchestrator = Arc::new(TurnOrchestrator::new(OrchestratorParts {
            session_id: id.clone(),
            conversation: Arc::clone(&conversation),
            aggregator: Arc::clone(&aggregator),
            provider: Arc::clone(&services.provider),
            synthesizer: Arc::clone(&services.synthesizer),
            playback: playback.clone(),
            events: events.clone(),
            diagnostics: Arc::clone(&diagnostics),
            reply_timeout: config.reply_timeout,
            synthesis_fallback: config.synthesis_fallback,
        }));

        info!(session_id = %id, questions = script.questions.len(), "session created");
        Self {
            id,
            config,
            services,
            welcome_text: script.welcome_text,
            conversation,
            aggregator,
            playback,
            scheduler: Mutex::new(Some(scheduler)),
            orchestrator,
            events,
            diagnostics,
            tasks: Mutex::new(Vec::new()),
            inbound_attached: AtomicBool::new(false),
            greeting_scheduled: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Hand the outbound scheduler to the transport. Only the first call gets it.
    pub fn take_playback(&self) -> Option<PlaybackScheduler> {
        self.scheduler.lock().take()
    }

    /// Spawn the inbound loop and return the sender the transport feeds.
    ///
    /// # Errors
    /// `VoxscreenError::Config` if inbound audio is already attached or the
    /// session is closed.
    pub fn attach_inbound(&self) -> Result<mpsc::Sender<InboundFrame>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VoxscreenError::Config("session is closed".into()));
        }
        if self.inbound_attached.swap(true, Ordering::SeqCst) {
            return Err(VoxscreenError::Config("inbound audio already attached".into()));
        }

        let (tx, rx) = mpsc::channel(INBOUND_CAP);
        let link = TranscriptionLink::new(
            self.id.clone(),
            Arc::clone(&self.services.recognizer),
            Arc::clone(&self.aggregator),
            Arc::clone(&self.diagnostics),
            self.config.connect_timeout,
        );
        let ctx = PipelineContext {
            session_id: self.id.clone(),
            frames: rx,
            gate: VoiceActivityGate::new((self.services.vad)()),
            link,
            aggregator: Arc::clone(&self.aggregator),
            orchestrator: Arc::clone(&self.orchestrator),
            events: self.events.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
        };
        self.track(tokio::spawn(pipeline::run(ctx)));
        Ok(tx)
    }

    /// Apply a transport state change and report what the transport must do.
    pub fn on_connection_state(&self, state: ConnectionState) -> ConnectionAction {
        info!(session_id = %self.id, ?state, "connection state changed");
        let action = transition(state);
        match action {
            ConnectionAction::Activate => self.schedule_greeting(),
            ConnectionAction::Teardown => self.shutdown(),
            ConnectionAction::Continue => {}
        }
        action
    }

    /// Enqueue the welcome line after the greeting delay. Runs at most once.
    pub fn schedule_greeting(&self) {
        if self.welcome_text.trim().is_empty() || self.greeting_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let text = self.welcome_text.clone();
        let delay = self.config.greeting_delay;
        let fallback = self.config.synthesis_fallback;
        let synthesizer = Arc::clone(&self.services.synthesizer);
        let playback = self.playback.clone();
        let diagnostics = Arc::clone(&self.diagnostics);
        let span = info_span!("greeting", session_id = %self.id);

        self.track(tokio::spawn(
            async move {
                tokio::time::sleep(delay).await;
                let pcm = match synthesize_or_silence(synthesizer.as_ref(), &text, fallback).await {
                    Synthesized::Speech(pcm) => pcm,
                    Synthesized::Fallback { silence, error } => {
                        warn!("greeting synthesis failed: {error}");
                        diagnostics.synth_errors.fetch_add(1, Ordering::Relaxed);
                        silence
                    }
                };
                if playback.send(PlaybackItem::new(pcm)).is_err() {
                    debug!("playback closed before greeting");
                } else {
                    debug!("greeting enqueued");
                }
            }
            .instrument(span),
        ));
    }

    /// Stop every task the session owns. Idempotent.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.orchestrator.abort_all();
        info!(
            session_id = %self.id,
            turns = self.conversation.lock().len(),
            diagnostics = ?self.diagnostics.snapshot(),
            "session closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn turn_state(&self) -> TurnState {
        self.aggregator.lock().state()
    }

    pub fn transcript(&self) -> Vec<ConversationTurn> {
        self.conversation.lock().turns().to_vec()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }
}

impl Drop for InterviewSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
