//! One reply cycle per utterance.
//!
//! ```text
//! dispatch(utterance) ── spawn ──► candidate turn → reply (timeout)
//!                                  → interviewer turn → synthesize (or silence)
//!                                  → enqueue PlaybackItem → await start, then completion
//!                                  → finish_reply (ReplyPending → Listening)
//! ```
//!
//! The frame loop never awaits a cycle. Handles are kept so the session can
//! abort in-flight cycles at teardown; finished ones are pruned on dispatch.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    conversation::{Conversation, ConversationTurn, Role},
    engine::{
        pipeline::PipelineDiagnostics,
        turn::{SharedAggregator, TurnState, Utterance},
    },
    error::{Result, VoxscreenError},
    events::SessionEvent,
    playback::{PlaybackItem, PlaybackQueue},
    reply::ReplyProvider,
    tts::{synthesize_or_silence, SpeechSynthesizer, Synthesized},
};

/// Extra time allowed past the audio ahead of a reply for it to start, and
/// past its own length for it to finish.
pub const PLAYBACK_COMPLETION_SLACK: Duration = Duration::from_secs(5);

pub struct TurnOrchestrator {
    session_id: String,
    conversation: Arc<Mutex<Conversation>>,
    aggregator: SharedAggregator,
    provider: Arc<dyn ReplyProvider>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    playback: PlaybackQueue,
    events: broadcast::Sender<SessionEvent>,
    diagnostics: Arc<PipelineDiagnostics>,
    reply_timeout: Duration,
    synthesis_fallback: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Collaborators and limits for a `TurnOrchestrator`.
pub struct OrchestratorParts {
    pub session_id: String,
    pub conversation: Arc<Mutex<Conversation>>,
    pub aggregator: SharedAggregator,
    pub provider: Arc<dyn ReplyProvider>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub playback: PlaybackQueue,
    pub events: broadcast::Sender<SessionEvent>,
    pub diagnostics: Arc<PipelineDiagnostics>,
    pub reply_timeout: Duration,
    pub synthesis_fallback: Duration,
}

impl TurnOrchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        Self {
            session_id: parts.session_id,
            conversation: parts.conversation,
            aggregator: parts.aggregator,
            provider: parts.provider,
            synthesizer: parts.synthesizer,
            playback: parts.playback,
            events: parts.events,
            diagnostics: parts.diagnostics,
            reply_timeout: parts.reply_timeout,
            synthesis_fallback: parts.synthesis_fallback,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start a reply cycle for `utterance` on its own task.
    pub fn dispatch(self: &Arc<Self>, utterance: Utterance) {
        let this = Arc::clone(self);
        let span = info_span!("turn", session_id = %self.session_id, chars = utterance.text.len());
        let handle = tokio::spawn(async move { this.on_utterance(utterance.text).await }.instrument(span));

        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Run one full reply cycle and return the session to `Listening`.
    pub async fn on_utterance(&self, text: String) {
        match self.reply_cycle(&text).await {
            Ok(()) => debug!("reply cycle finished"),
            Err(e) => {
                error!("reply cycle failed: {e}");
                self.diagnostics.reply_errors.fetch_add(1, Ordering::Relaxed);
                let _ = self.events.send(SessionEvent::ReplyFailed {
                    reason: e.to_string(),
                });
            }
        }
        self.finish();
    }

    /// Cycles not yet finished.
    pub fn active_cycles(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.len()
    }

    /// Abort every in-flight cycle.
    pub fn abort_all(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    async fn reply_cycle(&self, text: &str) -> Result<()> {
        let transcript = {
            let mut conversation = self.conversation.lock();
            conversation.push(ConversationTurn::new(Role::Candidate, text));
            conversation.turns().to_vec()
        };

        let reply = tokio::time::timeout(self.reply_timeout, self.provider.reply(&transcript))
            .await
            .map_err(|_| VoxscreenError::ReplyTimeout(self.reply_timeout))??;
        info!(chars = reply.len(), "reply received");
        self.conversation
            .lock()
            .push(ConversationTurn::new(Role::Interviewer, reply.as_str()));
        let _ = self.events.send(SessionEvent::ReplyReady {
            text: reply.clone(),
        });

        let pcm = match synthesize_or_silence(self.synthesizer.as_ref(), &reply, self.synthesis_fallback).await {
            Synthesized::Speech(pcm) => pcm,
            Synthesized::Fallback { silence, error } => {
                warn!("synthesis failed, playing silence instead: {error}");
                self.diagnostics.synth_errors.fetch_add(1, Ordering::Relaxed);
                silence
            }
        };

        let (item, progress) = PlaybackItem::with_completion(pcm);
        let play_bound = item.duration() + PLAYBACK_COMPLETION_SLACK;
        let start_bound = self.playback.backlog() + PLAYBACK_COMPLETION_SLACK;
        self.playback
            .send(item)
            .map_err(|_| VoxscreenError::PlaybackClosed)?;

        // Audio already queued (the greeting, say) plays first; the reply's
        // own bound only starts once the scheduler picks it up.
        match tokio::time::timeout(start_bound, progress.started).await {
            Ok(Ok(())) => debug!("reply playback started"),
            Ok(Err(_)) => {
                warn!("playback stopped before the reply started");
                return Ok(());
            }
            Err(_) => {
                warn!(?start_bound, "reply playback never started");
                return Ok(());
            }
        }
        match tokio::time::timeout(play_bound, progress.done).await {
            Ok(Ok(())) => debug!("reply playback drained"),
            Ok(Err(_)) => warn!("playback stopped before the reply finished"),
            Err(_) => warn!(?play_bound, "reply playback did not finish in time"),
        }
        Ok(())
    }

    fn finish(&self) {
        let from = {
            let mut agg = self.aggregator.lock();
            let from = agg.state();
            agg.finish_reply();
            from
        };
        if from != TurnState::Listening {
            let _ = self.events.send(SessionEvent::StateChanged {
                from,
                to: TurnState::Listening,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::engine::turn::UtteranceAggregator;
    use crate::playback::{playback_channel, PlaybackScheduler, DEFAULT_PULL_TIMEOUT};
    use crate::stt::TranscriptFragment;

    struct Scripted(std::result::Result<&'static str, ()>);

    #[async_trait]
    impl ReplyProvider for Scripted {
        async fn reply(&self, _turns: &[ConversationTurn]) -> Result<String> {
            self.0
                .map(str::to_string)
                .map_err(|_| VoxscreenError::ReplyProvider("down".into()))
        }
    }

    struct Hanging;

    #[async_trait]
    impl ReplyProvider for Hanging {
        async fn reply(&self, _turns: &[ConversationTurn]) -> Result<String> {
            std::future::pending().await
        }
    }

    struct Tone;

    #[async_trait]
    impl SpeechSynthesizer for Tone {
        async fn synthesize(&self, _text: &str) -> Result<Vec<i16>> {
            Ok(vec![1_000; 640])
        }
    }

    struct Fixture {
        orchestrator: Arc<TurnOrchestrator>,
        conversation: Arc<Mutex<Conversation>>,
        aggregator: SharedAggregator,
        queue: PlaybackQueue,
        scheduler: PlaybackScheduler,
        events: broadcast::Receiver<SessionEvent>,
    }

    fn fixture(provider: Arc<dyn ReplyProvider>) -> Fixture {
        let conversation = Arc::new(Mutex::new(Conversation::seeded("rules", "welcome")));
        let aggregator = UtteranceAggregator::shared(1);
        {
            let mut agg = aggregator.lock();
            agg.push_fragment(TranscriptFragment {
                text: "my answer".into(),
                is_final: true,
            });
            agg.record(false);
            agg.record(false);
            assert!(agg.take_endpoint().is_some());
        }
        let (queue, scheduler) = playback_channel(DEFAULT_PULL_TIMEOUT);
        let (events_tx, events) = broadcast::channel(16);
        let orchestrator = Arc::new(TurnOrchestrator::new(OrchestratorParts {
            session_id: "s1".into(),
            conversation: Arc::clone(&conversation),
            aggregator: Arc::clone(&aggregator),
            provider,
            synthesizer: Arc::new(Tone),
            playback: queue.clone(),
            events: events_tx,
            diagnostics: Arc::new(PipelineDiagnostics::default()),
            reply_timeout: Duration::from_secs(60),
            synthesis_fallback: Duration::from_millis(500),
        }));
        Fixture {
            orchestrator,
            conversation,
            aggregator,
            queue,
            scheduler,
            events,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reply_stays_pending_until_playback_drains() {
        let mut f = fixture(Arc::new(Scripted(Ok("Tell me more."))));
        f.orchestrator.dispatch(Utterance {
            text: "my answer".into(),
        });

        // Two frames of reply audio.
        f.scheduler.next_frame().await;
        assert!(f.aggregator.lock().is_reply_pending());
        f.scheduler.next_frame().await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(f.aggregator.lock().state(), TurnState::Listening);
        assert_eq!(f.aggregator.lock().pending_text(), "");
        let turns = f.conversation.lock().turns().to_vec();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[2], ConversationTurn::new(Role::Candidate, "my answer"));
        assert_eq!(turns[3], ConversationTurn::new(Role::Interviewer, "Tell me more."));
        assert_eq!(f.orchestrator.active_cycles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_audio_ahead_of_the_reply_does_not_eat_its_bound() {
        let mut f = fixture(Arc::new(Scripted(Ok("Tell me more."))));
        // Ten seconds of greeting still waiting to play.
        f.queue.send(PlaybackItem::new(vec![500; 16_000 * 10])).unwrap();
        f.orchestrator.dispatch(Utterance {
            text: "my answer".into(),
        });

        let mut first_reply_frame = None;
        let mut listening_at = None;
        for i in 0..520 {
            let out = f.scheduler.next_frame().await;
            if first_reply_frame.is_none() && out.frame.samples().iter().all(|&s| s == 1_000) {
                first_reply_frame = Some(i);
            }
            tokio::task::yield_now().await;
            if listening_at.is_none() && f.aggregator.lock().state() == TurnState::Listening {
                listening_at = Some(i);
            }
        }

        assert_eq!(first_reply_frame, Some(500));
        let listening_at = listening_at.expect("reply cycle finished");
        assert!(listening_at > 500, "listening again at frame {listening_at}");
    }

    #[tokio::test(start_paused = true)]
    async fn provider_failure_returns_to_listening_without_audio() {
        let mut f = fixture(Arc::new(Scripted(Err(()))));
        f.orchestrator
            .on_utterance("my answer".into())
            .await;

        assert_eq!(f.aggregator.lock().state(), TurnState::Listening);
        assert!(f.scheduler.next_frame().await.frame.is_silent());
        let mut saw_failure = false;
        while let Ok(event) = f.events.try_recv() {
            saw_failure |= matches!(event, SessionEvent::ReplyFailed { .. });
        }
        assert!(saw_failure);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_provider_times_out() {
        let f = fixture(Arc::new(Hanging));
        f.orchestrator.on_utterance("my answer".into()).await;
        assert_eq!(f.aggregator.lock().state(), TurnState::Listening);
        assert_eq!(f.conversation.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unplayed_reply_is_released_after_bound() {
        let f = fixture(Arc::new(Scripted(Ok("Hello"))));
        // Nobody pulls frames; the bound is 40 ms of audio plus the slack.
        f.orchestrator.on_utterance("my answer".into()).await;
        assert_eq!(f.aggregator.lock().state(), TurnState::Listening);
    }
}
