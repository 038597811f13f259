//! # voxscreen-core
//!
//! Real-time voice interview pipeline.
//!
//! ## Architecture
//!
//! ```text
//! transport ─InboundFrame─► FrameResampler ─PcmFrame─► VoiceActivityGate
//!                                                           │ speech?
//!                                                           ▼
//!                     UtteranceAggregator ◄── TranscriptionLink ◄─ (muted while
//!                           │ endpoint            ▲ final fragments    ReplyPending)
//!                           ▼                     │
//!                    TurnOrchestrator ─► ReplyProvider ─► SpeechSynthesizer
//!                                                           │
//!                                                      PlaybackQueue
//!                                                           │
//! transport ◄─20 ms PcmFrame── PlaybackScheduler ◄──────────┘
//! ```
//!
//! One `InterviewSession` per peer connection; `SessionRegistry` tracks the
//! connections for coordinated shutdown.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod connection;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod events;
pub mod playback;
pub mod registry;
pub mod reply;
pub mod stt;
pub mod tts;
pub mod vad;

// Convenience re-exports for downstream crates
pub use audio::{InboundFrame, PcmFrame};
pub use connection::{ConnectionAction, ConnectionState};
pub use engine::{InterviewScript, InterviewSession, SessionConfig, SessionServices};
pub use error::{Result, VoxscreenError};
pub use events::SessionEvent;
pub use playback::{OutboundFrame, PlaybackScheduler};
pub use registry::{PeerConnection, SessionRegistry};
pub use reply::{ChatCompletionsConfig, ChatCompletionsProvider, ReplyProvider};
pub use stt::{LiveRecognizerClient, LiveRecognizerConfig, RecognizerConnector};
pub use tts::{HttpSynthesizer, HttpSynthesizerConfig, SpeechSynthesizer};

#[cfg(feature = "onnx")]
pub use vad::SileroVad;
