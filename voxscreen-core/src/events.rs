//! Events broadcast by a running session.
//!
//! Subscribers get a `tokio::sync::broadcast::Receiver<SessionEvent>` from
//! `InterviewSession::subscribe`. Lagging subscribers lose old events; the
//! pipeline never waits on them.

use serde::{Deserialize, Serialize};

use crate::engine::turn::TurnState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// Turn-taking state moved.
    StateChanged { from: TurnState, to: TurnState },
    /// The candidate finished speaking.
    UtteranceCompleted { text: String },
    /// Reply text is available and about to be synthesized.
    ReplyReady { text: String },
    /// No reply could be produced for the last utterance.
    ReplyFailed { reason: String },
    /// One queued playback item has been fully sent.
    PlaybackCompleted { samples: usize },
}
