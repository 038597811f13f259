//! Utterance aggregation and the turn-taking state machine.
//!
//! ```text
//!             speech                       non-speech
//!   ┌──────────────┐            ┌──────────────────────┐
//!   ▼              │            │                      ▼
//! Listening ───────┴─non-speech─► SilenceCounting ──────┘
//!   ▲                              │        │
//!   │◄──────────speech─────────────┘        │ counter > threshold
//!   │                                       │ AND text buffered
//!   │                                       ▼
//!   └──────── reply playback finished ── ReplyPending
//! ```
//!
//! The silence counter keeps moving in every state; only endpoint evaluation
//! is suspended while a reply is pending.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::stt::TranscriptFragment;

/// Consecutive non-speech frames (20 ms each) that close an utterance.
pub const DEFAULT_SILENCE_THRESHOLD: u32 = 50;

/// Turn-taking state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TurnState {
    /// Waiting for (or hearing) the candidate.
    Listening,
    /// Candidate went quiet; counting toward the endpoint.
    SilenceCounting,
    /// Endpoint reached; reply generation and playback in flight.
    ReplyPending,
}

/// Text the candidate said between two endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
}

/// Buffers final transcript fragments and decides when the candidate is done.
#[derive(Debug)]
pub struct UtteranceAggregator {
    state: TurnState,
    silence_frames: u32,
    threshold: u32,
    fragments: Vec<String>,
}

/// Aggregator shared between the frame loop, the recognizer receive task and
/// the orchestrator.
pub type SharedAggregator = Arc<Mutex<UtteranceAggregator>>;

impl UtteranceAggregator {
    pub fn new(threshold: u32) -> Self {
        Self {
            state: TurnState::Listening,
            silence_frames: 0,
            threshold,
            fragments: Vec::new(),
        }
    }

    pub fn shared(threshold: u32) -> SharedAggregator {
        Arc::new(Mutex::new(Self::new(threshold)))
    }

    /// Buffer a recognizer fragment. Non-final fragments are ignored.
    pub fn push_fragment(&mut self, fragment: TranscriptFragment) {
        if !fragment.is_final {
            return;
        }
        let text = fragment.text.trim();
        if text.is_empty() {
            return;
        }
        self.fragments.push(text.to_string());
    }

    /// Update the silence counter and the listening states for one frame.
    pub fn record(&mut self, is_speech: bool) {
        if is_speech {
            self.silence_frames = 0;
        } else {
            self.silence_frames = self.silence_frames.saturating_add(1);
        }

        if self.state == TurnState::ReplyPending {
            return;
        }
        self.state = if is_speech {
            TurnState::Listening
        } else {
            TurnState::SilenceCounting
        };
    }

    /// Close the utterance if the counter is past the threshold and text is
    /// buffered; the state is then `ReplyPending`. Never fires while a reply
    /// is pending. The text buffer is left intact for `finish_reply`.
    pub fn take_endpoint(&mut self) -> Option<Utterance> {
        if self.state != TurnState::SilenceCounting
            || self.silence_frames <= self.threshold
            || self.fragments.is_empty()
        {
            return None;
        }
        self.state = TurnState::ReplyPending;
        Some(Utterance {
            text: self.pending_text(),
        })
    }

    /// End the reply cycle: drop the dispatched text and listen again.
    pub fn finish_reply(&mut self) {
        self.fragments.clear();
        self.silence_frames = 0;
        self.state = TurnState::Listening;
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_reply_pending(&self) -> bool {
        self.state == TurnState::ReplyPending
    }

    pub fn silence_frames(&self) -> u32 {
        self.silence_frames
    }

    /// Buffered fragments joined with single spaces, in receipt order.
    pub fn pending_text(&self) -> String {
        self.fragments.join(" ")
    }
}

impl Default for UtteranceAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_SILENCE_THRESHOLD)
    }
}
