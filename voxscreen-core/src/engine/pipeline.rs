//! Inbound frame loop.
//!
//! ## Per-frame stages
//!
//! ```text
//! 1. InboundFrame → FrameResampler → 0..n PcmFrames (malformed: drop, continue)
//! 2. For each PcmFrame:
//!    a. VoiceActivityGate::classify → speech / not speech
//!    b. UtteranceAggregator::record  (silence counter, listening states)
//!    c. TranscriptionLink::send      (muted while a reply is pending)
//!       send error: log, abandon this frame, keep the session
//!    d. UtteranceAggregator::take_endpoint
//!       endpoint: hand the utterance to the TurnOrchestrator (not awaited)
//! ```
//!
//! The loop ends when the transport drops its frame sender.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    audio::{frame::InboundFrame, resample::FrameResampler},
    engine::{
        orchestrator::TurnOrchestrator,
        turn::{SharedAggregator, TurnState},
    },
    events::SessionEvent,
    stt::TranscriptionLink,
    vad::VoiceActivityGate,
};

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub frames_in: AtomicUsize,
    pub frames_resampled: AtomicUsize,
    pub frames_dropped: AtomicUsize,
    pub vad_speech: AtomicUsize,
    pub chunks_sent: AtomicUsize,
    pub chunks_muted: AtomicUsize,
    pub link_errors: AtomicUsize,
    pub endpoints: AtomicUsize,
    pub reply_errors: AtomicUsize,
    pub synth_errors: AtomicUsize,
    pub playback_items: AtomicUsize,
    pub silence_frames_emitted: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_resampled: self.frames_resampled.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            vad_speech: self.vad_speech.load(Ordering::Relaxed),
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            chunks_muted: self.chunks_muted.load(Ordering::Relaxed),
            link_errors: self.link_errors.load(Ordering::Relaxed),
            endpoints: self.endpoints.load(Ordering::Relaxed),
            reply_errors: self.reply_errors.load(Ordering::Relaxed),
            synth_errors: self.synth_errors.load(Ordering::Relaxed),
            playback_items: self.playback_items.load(Ordering::Relaxed),
            silence_frames_emitted: self.silence_frames_emitted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_in: usize,
    pub frames_resampled: usize,
    pub frames_dropped: usize,
    pub vad_speech: usize,
    pub chunks_sent: usize,
    pub chunks_muted: usize,
    pub link_errors: usize,
    pub endpoints: usize,
    pub reply_errors: usize,
    pub synth_errors: usize,
    pub playback_items: usize,
    pub silence_frames_emitted: usize,
}

/// Everything the inbound loop owns, passed as one struct.
pub struct PipelineContext {
    pub session_id: String,
    pub frames: mpsc::Receiver<InboundFrame>,
    pub gate: VoiceActivityGate,
    pub link: TranscriptionLink,
    pub aggregator: SharedAggregator,
    pub orchestrator: Arc<TurnOrchestrator>,
    pub events: broadcast::Sender<SessionEvent>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Run the inbound loop until the frame channel closes.
pub async fn run(ctx: PipelineContext) {
    let span = info_span!("session", session_id = %ctx.session_id);
    run_inner(ctx).instrument(span).await
}

async fn run_inner(mut ctx: PipelineContext) {
    info!("inbound loop started");
    let mut resampler = FrameResampler::new();

    while let Some(inbound) = ctx.frames.recv().await {
        ctx.diagnostics.frames_in.fetch_add(1, Ordering::Relaxed);

        let frames = match resampler.push(inbound) {
            Ok(frames) => frames,
            Err(e) => {
                warn!("dropping inbound frame: {e}");
                ctx.diagnostics.frames_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        for pcm in frames {
            ctx.diagnostics.frames_resampled.fetch_add(1, Ordering::Relaxed);

            let is_speech = ctx.gate.classify(&pcm);
            if is_speech {
                ctx.diagnostics.vad_speech.fetch_add(1, Ordering::Relaxed);
            }

            let before = {
                let mut agg = ctx.aggregator.lock();
                let before = agg.state();
                agg.record(is_speech);
                before
            };

            if let Err(e) = ctx.link.send(&pcm).await {
                warn!("recognizer send failed, frame abandoned: {e}");
                ctx.diagnostics.link_errors.fetch_add(1, Ordering::Relaxed);
                emit_transition(&ctx.events, before, ctx.aggregator.lock().state());
                continue;
            }

            let (after, endpoint) = {
                let mut agg = ctx.aggregator.lock();
                let endpoint = agg.take_endpoint();
                (agg.state(), endpoint)
            };
            emit_transition(&ctx.events, before, after);

            if let Some(utterance) = endpoint {
                ctx.diagnostics.endpoints.fetch_add(1, Ordering::Relaxed);
                info!(chars = utterance.text.len(), "utterance complete");
                let _ = ctx.events.send(SessionEvent::UtteranceCompleted {
                    text: utterance.text.clone(),
                });
                ctx.orchestrator.dispatch(utterance);
            }
        }
    }

    ctx.link.disconnect();
    debug!(pending = resampler.pending_samples(), "inbound frame channel closed");
    info!(diagnostics = ?ctx.diagnostics.snapshot(), "inbound loop stopped");
}

fn emit_transition(events: &broadcast::Sender<SessionEvent>, from: TurnState, to: TurnState) {
    if from != to {
        debug!(?from, ?to, "turn state changed");
        let _ = events.send(SessionEvent::StateChanged { from, to });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes_camel_case() {
        let d = PipelineDiagnostics::default();
        d.chunks_muted.fetch_add(2, Ordering::Relaxed);
        let json = serde_json::to_value(d.snapshot()).unwrap();
        assert_eq!(json["chunksMuted"], 2);
        assert_eq!(json["framesIn"], 0);
    }
}
