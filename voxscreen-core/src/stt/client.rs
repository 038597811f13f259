//! Live recognizer client: an HTTP init call followed by a WebSocket.
//!
//! ```text
//! POST init_url {encoding, sample_rate, bit_depth, channels}  → 201 {url}
//! WS   url
//!   writer task: mpsc<Vec<u8>> → base64 → {"type":"audio_chunk",...}
//!   reader task: {"type":"transcript",...} → mpsc<TranscriptFragment>
//! ```
//!
//! Dropping the `RecognizerChannel` sender ends the writer, which closes the
//! socket, which ends the reader.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::messages::{parse_recognizer_message, InitRequest, InitResponse, OutboundMessage};
use super::{RecognizerChannel, RecognizerConnector};
use crate::error::{Result, VoxscreenError};

/// Outgoing PCM chunks buffered ahead of the socket (≈1 s of audio).
const OUTGOING_CAP: usize = 50;
/// Transcript fragments buffered ahead of the receive task.
const INCOMING_CAP: usize = 64;

#[derive(Debug, Clone)]
pub struct LiveRecognizerConfig {
    /// Session init endpoint.
    pub init_url: String,
    pub api_key: String,
    /// Header carrying `api_key`.
    pub api_key_header: String,
}

impl Default for LiveRecognizerConfig {
    fn default() -> Self {
        Self {
            init_url: "https://api.gladia.io/v2/live".into(),
            api_key: String::new(),
            api_key_header: "X-Gladia-Key".into(),
        }
    }
}

pub struct LiveRecognizerClient {
    config: LiveRecognizerConfig,
    http: reqwest::Client,
}

impl LiveRecognizerClient {
    pub fn new(config: LiveRecognizerConfig) -> Result<Self> {
        if config.init_url.trim().is_empty() {
            return Err(VoxscreenError::Config("recognizer init url is empty".into()));
        }
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| VoxscreenError::Config(format!("http client: {e}")))?;
        Ok(Self { config, http })
    }

    async fn open_session(&self) -> Result<InitResponse> {
        let resp = self
            .http
            .post(&self.config.init_url)
            .header(self.config.api_key_header.as_str(), self.config.api_key.as_str())
            .json(&InitRequest::default())
            .send()
            .await
            .map_err(|e| VoxscreenError::RecognizerConnect(format!("init request: {e}")))?;

        let status = resp.status();
        if status != StatusCode::CREATED {
            let body = resp.text().await.unwrap_or_default();
            return Err(VoxscreenError::RecognizerConnect(format!(
                "init failed: {status} {body}"
            )));
        }

        resp.json::<InitResponse>()
            .await
            .map_err(|e| VoxscreenError::RecognizerConnect(format!("init response: {e}")))
    }
}

#[async_trait]
impl RecognizerConnector for LiveRecognizerClient {
    async fn connect(&self) -> Result<RecognizerChannel> {
        let session = self.open_session().await?;
        debug!(recognizer_session = ?session.id, "recognizer session created");

        let (ws, _) = connect_async(session.url.as_str())
            .await
            .map_err(|e| VoxscreenError::RecognizerConnect(format!("websocket: {e}")))?;
        let (mut write, mut read) = ws.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(OUTGOING_CAP);
        let (frag_tx, frag_rx) = mpsc::channel(INCOMING_CAP);

        tokio::spawn(async move {
            while let Some(pcm) = out_rx.recv().await {
                let json = match serde_json::to_string(&OutboundMessage::audio_chunk(&pcm)) {
                    Ok(j) => j,
                    Err(e) => {
                        error!("failed to encode audio chunk: {e}");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(json)).await {
                    warn!("recognizer send failed: {e}");
                    break;
                }
            }
            let _ = write.close().await;
            debug!("recognizer writer stopped");
        });

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Some(fragment) = parse_recognizer_message(&text) {
                            if frag_tx.send(fragment).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        info!(?frame, "recognizer closed the stream");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("recognizer stream error: {e}");
                        break;
                    }
                }
            }
            debug!("recognizer reader stopped");
        });

        Ok(RecognizerChannel {
            outgoing: out_tx,
            incoming: frag_rx,
        })
    }
}
