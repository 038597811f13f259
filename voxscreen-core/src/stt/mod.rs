//! Streaming speech recognition.
//!
//! `RecognizerConnector` decouples the pipeline from any specific recognizer
//! service. A connector hands back a `RecognizerChannel`: a sender for raw
//! s16le PCM and a receiver of transcript fragments. Encoding for the wire is
//! the connector's business.
//!
//! `TranscriptionLink` owns one channel per session and opens it lazily.

pub mod client;
pub mod link;
pub mod messages;

pub use client::{LiveRecognizerClient, LiveRecognizerConfig};
pub use link::TranscriptionLink;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// One recognition result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptFragment {
    pub text: String,
    pub is_final: bool,
}

/// A live duplex stream to the recognizer.
pub struct RecognizerChannel {
    /// Raw 16 kHz mono s16le PCM, one chunk per message.
    pub outgoing: mpsc::Sender<Vec<u8>>,
    /// Fragments as the recognizer emits them, final or not.
    pub incoming: mpsc::Receiver<TranscriptFragment>,
}

/// Opens recognizer streams.
#[async_trait]
pub trait RecognizerConnector: Send + Sync + 'static {
    /// Establish a new stream.
    ///
    /// # Errors
    /// `VoxscreenError::RecognizerConnect` when the service refuses or is unreachable.
    async fn connect(&self) -> Result<RecognizerChannel>;
}
