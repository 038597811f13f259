//! Per-session recognizer link.
//!
//! The stream is opened on the first `send`, never before audio exists.
//! Fragments are drained by a dedicated task into the session's
//! `UtteranceAggregator`. While a reply is pending every outgoing chunk is
//! replaced by 320 samples of silence so the recognizer keeps its cadence
//! but never hears the candidate talking over playback.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::RecognizerConnector;
use crate::{
    audio::frame::PcmFrame,
    engine::{pipeline::PipelineDiagnostics, turn::SharedAggregator},
    error::{Result, VoxscreenError},
};

/// Default bound on establishing a recognizer stream.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TranscriptionLink {
    session_id: String,
    connector: Arc<dyn RecognizerConnector>,
    aggregator: SharedAggregator,
    diagnostics: Arc<PipelineDiagnostics>,
    connect_timeout: Duration,
    outgoing: Option<mpsc::Sender<Vec<u8>>>,
    receive_task: Option<JoinHandle<()>>,
}

impl TranscriptionLink {
    pub fn new(
        session_id: impl Into<String>,
        connector: Arc<dyn RecognizerConnector>,
        aggregator: SharedAggregator,
        diagnostics: Arc<PipelineDiagnostics>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            connector,
            aggregator,
            diagnostics,
            connect_timeout,
            outgoing: None,
            receive_task: None,
        }
    }

    /// Send one frame, opening the stream first if none is live.
    ///
    /// The frame is muted when the session is waiting on a reply.
    ///
    /// # Errors
    /// Connect failures and a closed stream are returned to the caller; the
    /// frame is dropped and the next call tries to connect again.
    pub async fn send(&mut self, frame: &PcmFrame) -> Result<()> {
        let muted = self.aggregator.lock().is_reply_pending();
        let payload = if muted {
            PcmFrame::silence().to_le_bytes()
        } else {
            frame.to_le_bytes()
        };

        if self.outgoing.is_none() {
            self.establish().await?;
        }
        let Some(outgoing) = self.outgoing.as_ref() else {
            return Err(VoxscreenError::RecognizerClosed);
        };

        if outgoing.send(payload).await.is_err() {
            warn!(session_id = %self.session_id, "recognizer stream closed; will reconnect on next frame");
            self.disconnect();
            return Err(VoxscreenError::RecognizerClosed);
        }

        self.diagnostics.chunks_sent.fetch_add(1, Ordering::Relaxed);
        if muted {
            self.diagnostics.chunks_muted.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// `true` while a stream is open.
    pub fn is_connected(&self) -> bool {
        self.outgoing.is_some()
    }

    /// Drop the stream and stop its receive task.
    pub fn disconnect(&mut self) {
        self.outgoing = None;
        if let Some(task) = self.receive_task.take() {
            task.abort();
        }
    }

    async fn establish(&mut self) -> Result<()> {
        debug!(session_id = %self.session_id, "opening recognizer stream");
        let channel = tokio::time::timeout(self.connect_timeout, self.connector.connect())
            .await
            .map_err(|_| VoxscreenError::RecognizerTimeout(self.connect_timeout))??;

        let mut incoming = channel.incoming;
        let aggregator = Arc::clone(&self.aggregator);
        let session_id = self.session_id.clone();
        self.receive_task = Some(tokio::spawn(async move {
            while let Some(fragment) = incoming.recv().await {
                if fragment.is_final {
                    debug!(session_id = %session_id, text = %fragment.text, "final fragment");
                    aggregator.lock().push_fragment(fragment);
                }
            }
            debug!(session_id = %session_id, "recognizer receive loop ended");
        }));
        self.outgoing = Some(channel.outgoing);

        info!(session_id = %self.session_id, "recognizer stream open");
        Ok(())
    }
}

impl Drop for TranscriptionLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::engine::turn::UtteranceAggregator;
    use crate::stt::{RecognizerChannel, TranscriptFragment};

    /// Fails the first `failures` connects, then hands out channels whose
    /// audio lands in `received`.
    struct FlakyConnector {
        failures: usize,
        attempts: AtomicUsize,
        received: Arc<Mutex<Vec<Vec<u8>>>>,
        fragments: Mutex<Option<mpsc::Sender<TranscriptFragment>>>,
    }

    impl FlakyConnector {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                attempts: AtomicUsize::new(0),
                received: Arc::new(Mutex::new(Vec::new())),
                fragments: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl RecognizerConnector for FlakyConnector {
        async fn connect(&self) -> Result<RecognizerChannel> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(VoxscreenError::RecognizerConnect("refused".into()));
            }
            let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(64);
            let (frag_tx, frag_rx) = mpsc::channel(64);
            *self.fragments.lock() = Some(frag_tx);
            let received = Arc::clone(&self.received);
            tokio::spawn(async move {
                while let Some(chunk) = out_rx.recv().await {
                    received.lock().push(chunk);
                }
            });
            Ok(RecognizerChannel {
                outgoing: out_tx,
                incoming: frag_rx,
            })
        }
    }

    fn frame_of(value: i16) -> PcmFrame {
        PcmFrame::padded(vec![value; 320])
    }

    fn link_with(connector: Arc<FlakyConnector>, aggregator: SharedAggregator) -> TranscriptionLink {
        TranscriptionLink::new(
            "test",
            connector,
            aggregator,
            Arc::new(PipelineDiagnostics::default()),
            Duration::from_secs(1),
        )
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn connect_failures_drop_chunks_without_resending() {
        let connector = Arc::new(FlakyConnector::new(2));
        let mut link = link_with(Arc::clone(&connector), UtteranceAggregator::shared(50));

        assert!(link.send(&frame_of(1)).await.is_err());
        assert!(link.send(&frame_of(2)).await.is_err());
        assert!(!link.is_connected());
        link.send(&frame_of(3)).await.expect("third send connects");
        settle().await;

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
        let received = connector.received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], frame_of(3).to_le_bytes());
    }

    #[tokio::test]
    async fn link_is_not_opened_before_first_send() {
        let connector = Arc::new(FlakyConnector::new(0));
        let link = link_with(Arc::clone(&connector), UtteranceAggregator::shared(50));
        settle().await;
        assert!(!link.is_connected());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reply_pending_mutes_outgoing_audio() {
        let connector = Arc::new(FlakyConnector::new(0));
        let aggregator = UtteranceAggregator::shared(1);
        let mut link = link_with(Arc::clone(&connector), Arc::clone(&aggregator));

        link.send(&frame_of(900)).await.unwrap();
        {
            let mut agg = aggregator.lock();
            agg.push_fragment(TranscriptFragment {
                text: "done".into(),
                is_final: true,
            });
            agg.record(false);
            agg.record(false);
            assert!(agg.take_endpoint().is_some());
        }
        for v in [1000, 2000, 3000] {
            link.send(&frame_of(v)).await.unwrap();
        }
        settle().await;

        let received = connector.received.lock();
        assert_eq!(received.len(), 4);
        assert_eq!(received[0], frame_of(900).to_le_bytes());
        for chunk in &received[1..] {
            assert_eq!(chunk.len(), 640);
            assert!(chunk.iter().all(|&b| b == 0));
        }
    }

    #[tokio::test]
    async fn only_final_fragments_reach_the_aggregator() {
        let connector = Arc::new(FlakyConnector::new(0));
        let aggregator = UtteranceAggregator::shared(50);
        let mut link = link_with(Arc::clone(&connector), Arc::clone(&aggregator));
        link.send(&frame_of(5)).await.unwrap();

        let tx = connector.fragments.lock().clone().expect("connected");
        for (text, is_final) in [("hel", false), ("hello", true), ("wor", false), ("world", true)] {
            tx.send(TranscriptFragment {
                text: text.into(),
                is_final,
            })
            .await
            .unwrap();
        }
        settle().await;

        assert_eq!(aggregator.lock().pending_text(), "hello world");
    }

    #[tokio::test]
    async fn closed_stream_reconnects_on_next_send() {
        let connector = Arc::new(FlakyConnector::new(0));
        let mut link = link_with(Arc::clone(&connector), UtteranceAggregator::shared(50));
        link.send(&frame_of(1)).await.unwrap();

        // Swap in a channel whose receiver is already gone.
        let (dead_tx, dead_rx) = mpsc::channel(1);
        drop(dead_rx);
        link.outgoing = Some(dead_tx);

        assert!(matches!(
            link.send(&frame_of(2)).await,
            Err(VoxscreenError::RecognizerClosed)
        ));
        assert!(!link.is_connected());
        link.send(&frame_of(3)).await.unwrap();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }
}
