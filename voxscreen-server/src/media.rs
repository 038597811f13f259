//! WebSocket media transport.
//!
//! Binary messages from the client are interleaved s16le PCM at the rate and
//! channel count given in the query string. Binary messages to the client are
//! 20 ms frames of 16 kHz mono s16le, paced by the playback scheduler. Session
//! events go out as JSON text messages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;
use voxscreen_core::{
    ConnectionState, InboundFrame, InterviewScript, InterviewSession, PeerConnection,
    PlaybackScheduler, SessionEvent,
};

use crate::state::AppState;

/// How long `close` waits for the socket tasks to wind down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MediaFormat {
    #[serde(default = "default_rate")]
    pub rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
}

fn default_rate() -> u32 {
    48_000
}

fn default_channels() -> u16 {
    1
}

/// `GET /api/interview/:interview_id/media`
pub async fn media_handler(
    State(state): State<AppState>,
    Path(interview_id): Path<String>,
    Query(format): Query<MediaFormat>,
    ws: WebSocketUpgrade,
) -> Response {
    if format.rate == 0 || format.channels == 0 {
        return (StatusCode::BAD_REQUEST, "rate and channels must be non-zero").into_response();
    }
    let Some(script) = state.scripts.get(&interview_id) else {
        return (StatusCode::NOT_FOUND, format!("unknown interview {interview_id}")).into_response();
    };

    ws.on_upgrade(move |socket| {
        let connection_id = Uuid::new_v4().to_string();
        let span = info_span!("connection", connection_id = %connection_id, interview_id = %interview_id);
        serve(state, connection_id, script, format, socket).instrument(span)
    })
}

/// One media socket as seen by the registry.
pub struct MediaConnection {
    id: String,
    session: Arc<InterviewSession>,
    stop: watch::Sender<bool>,
    finished: watch::Receiver<bool>,
}

#[async_trait]
impl PeerConnection for MediaConnection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn close(&self) {
        self.stop.send_replace(true);
        self.session.on_connection_state(ConnectionState::Closed);
        let mut finished = self.finished.clone();
        let wound_down = async move {
            while !*finished.borrow_and_update() {
                if finished.changed().await.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, wound_down).await.is_err() {
            warn!(connection_id = %self.id, "socket did not wind down in time");
        }
    }
}

async fn serve(
    state: AppState,
    connection_id: String,
    script: InterviewScript,
    format: MediaFormat,
    socket: WebSocket,
) {
    let session = Arc::new(InterviewSession::new(
        connection_id.clone(),
        state.session_config.clone(),
        state.services.clone(),
        script,
    ));
    let (stop_tx, stop_rx) = watch::channel(false);
    let (finished_tx, finished_rx) = watch::channel(false);
    let connection = Arc::new(MediaConnection {
        id: connection_id.clone(),
        session: Arc::clone(&session),
        stop: stop_tx,
        finished: finished_rx,
    });
    state.registry.add(connection.clone());
    session.on_connection_state(ConnectionState::Connecting);

    let outcome = pump(&session, &connection, stop_rx, format, socket).await;
    let final_state = match outcome {
        Ok(()) => ConnectionState::Closed,
        Err(e) => {
            warn!("media connection failed: {e}");
            ConnectionState::Failed
        }
    };
    connection.stop.send_replace(true);
    session.on_connection_state(final_state);
    state.registry.remove(&connection_id);
    finished_tx.send_replace(true);
    info!(diagnostics = ?session.diagnostics(), "media connection finished");
}

async fn pump(
    session: &InterviewSession,
    connection: &MediaConnection,
    mut stop: watch::Receiver<bool>,
    format: MediaFormat,
    socket: WebSocket,
) -> anyhow::Result<()> {
    let frames = session.attach_inbound()?;
    let scheduler = session
        .take_playback()
        .ok_or_else(|| anyhow::anyhow!("playback scheduler already taken"))?;
    let events = session.subscribe();
    let (sink, mut stream) = socket.split();

    // All writes to the socket go through one task.
    let (out_tx, out_rx) = mpsc::channel::<Message>(16);
    let writer = tokio::spawn(write_loop(sink, out_rx));
    let playback = tokio::spawn(playback_loop(scheduler, out_tx.clone(), connection.stop.subscribe()));
    let notifier = tokio::spawn(event_loop(events, out_tx));

    session.on_connection_state(ConnectionState::Connected);

    let result = loop {
        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Binary(bytes))) => {
                    let frame = InboundFrame::from_s16le_bytes(&bytes, format.rate, format.channels);
                    if frames.send(frame).await.is_err() {
                        break Ok(());
                    }
                }
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(Message::Text(text))) => debug!(len = text.len(), "ignoring text message"),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e.into()),
            },
            _ = stop.changed() => break Ok(()),
        }
    };

    drop(frames);
    connection.stop.send_replace(true);
    playback.abort();
    notifier.abort();
    let _ = playback.await;
    let _ = notifier.await;
    let _ = writer.await;
    result
}

async fn write_loop(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut outgoing: mpsc::Receiver<Message>,
) {
    while let Some(message) = outgoing.recv().await {
        if let Err(e) = sink.send(message).await {
            debug!("socket write failed: {e}");
            break;
        }
    }
    let _ = sink.close().await;
}

async fn playback_loop(
    mut scheduler: PlaybackScheduler,
    outgoing: mpsc::Sender<Message>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            out = scheduler.next_frame() => {
                if outgoing.send(Message::Binary(out.frame.to_le_bytes())).await.is_err() {
                    break;
                }
            }
            _ = stop.changed() => break,
        }
    }
}

async fn event_loop(mut events: broadcast::Receiver<SessionEvent>, outgoing: mpsc::Sender<Message>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let Ok(json) = serde_json::to_string(&event) else {
                    continue;
                };
                if outgoing.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "event subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
