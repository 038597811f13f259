//! Outbound audio source.
//!
//! ```text
//! producers (greeting, orchestrator)
//!        │ PlaybackItem
//!        ▼
//!   PlaybackQueue ──► PlaybackScheduler::next_frame ──► transport
//!                         │ buffer empty: wait ≤ pull_timeout, else silence
//!                         │ pace: sleep until start + pts / 16 kHz
//! ```
//!
//! The transport pulls continuously; the scheduler never blocks for longer
//! than the pull timeout plus the pacing sleep, so the outbound track stays
//! fed even when no reply is playing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::audio::frame::{PcmFrame, PCM_FRAME_SAMPLES, PCM_SAMPLE_RATE};
use crate::engine::pipeline::PipelineDiagnostics;
use crate::events::SessionEvent;

/// Default wait on the queue before falling back to silence.
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_millis(1);

/// One block of 16 kHz mono PCM queued for playback.
#[derive(Debug)]
pub struct PlaybackItem {
    samples: Vec<i16>,
    started: Option<oneshot::Sender<()>>,
    done: Option<oneshot::Sender<()>>,
}

/// Receivers following one item through the scheduler. Both resolve with an
/// error if the item is dropped unplayed.
#[derive(Debug)]
pub struct PlaybackProgress {
    /// Resolves when the scheduler takes the item off the queue.
    pub started: oneshot::Receiver<()>,
    /// Resolves once every sample has been emitted.
    pub done: oneshot::Receiver<()>,
}

impl PlaybackItem {
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples,
            started: None,
            done: None,
        }
    }

    /// Item plus receivers for its start and its completion.
    pub fn with_completion(samples: Vec<i16>) -> (Self, PlaybackProgress) {
        let (started_tx, started) = oneshot::channel();
        let (done_tx, done) = oneshot::channel();
        (
            Self {
                samples,
                started: Some(started_tx),
                done: Some(done_tx),
            },
            PlaybackProgress { started, done },
        )
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Real-time length of the audio.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / PCM_SAMPLE_RATE as f64)
    }
}

/// Producer side of a session's playback queue.
///
/// Tracks the samples sent but not yet emitted so producers can tell how
/// much audio is ahead of a new item.
#[derive(Debug, Clone)]
pub struct PlaybackQueue {
    tx: mpsc::UnboundedSender<PlaybackItem>,
    backlog: Arc<AtomicUsize>,
}

impl PlaybackQueue {
    /// Queue `item` behind everything already sent.
    ///
    /// # Errors
    /// Hands the item back when the scheduler has been dropped.
    pub fn send(&self, item: PlaybackItem) -> Result<(), PlaybackItem> {
        let len = item.len();
        self.backlog.fetch_add(len, Ordering::Relaxed);
        self.tx.send(item).map_err(|rejected| {
            self.backlog.fetch_sub(len, Ordering::Relaxed);
            rejected.0
        })
    }

    /// Real-time length of the audio queued or mid-item, not yet emitted.
    pub fn backlog(&self) -> Duration {
        let samples = self.backlog.load(Ordering::Relaxed) as u64;
        Duration::from_micros(samples * 1_000_000 / PCM_SAMPLE_RATE as u64)
    }
}

/// One paced outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Presentation timestamp in samples since the first pull.
    pub pts: u64,
    pub frame: PcmFrame,
}

/// Create a queue and the scheduler that drains it.
pub fn playback_channel(pull_timeout: Duration) -> (PlaybackQueue, PlaybackScheduler) {
    let (tx, rx) = mpsc::unbounded_channel();
    let backlog = Arc::new(AtomicUsize::new(0));
    let queue = PlaybackQueue {
        tx,
        backlog: Arc::clone(&backlog),
    };
    (queue, PlaybackScheduler::new(rx, backlog, pull_timeout))
}

pub struct PlaybackScheduler {
    queue: mpsc::UnboundedReceiver<PlaybackItem>,
    backlog: Arc<AtomicUsize>,
    pull_timeout: Duration,
    buffer: Vec<i16>,
    cursor: usize,
    completion: Option<oneshot::Sender<()>>,
    playing: bool,
    pts: u64,
    start: Option<Instant>,
    diagnostics: Option<Arc<PipelineDiagnostics>>,
    events: Option<broadcast::Sender<SessionEvent>>,
}

impl PlaybackScheduler {
    fn new(
        queue: mpsc::UnboundedReceiver<PlaybackItem>,
        backlog: Arc<AtomicUsize>,
        pull_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            backlog,
            pull_timeout,
            buffer: Vec::new(),
            cursor: 0,
            completion: None,
            playing: false,
            pts: 0,
            start: None,
            diagnostics: None,
            events: None,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<PipelineDiagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn with_events(mut self, events: broadcast::Sender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Produce the next 20 ms frame, sleeping until its presentation time.
    pub async fn next_frame(&mut self) -> OutboundFrame {
        if self.remaining() == 0 {
            self.load_next().await;
        }

        let frame = if self.remaining() > 0 {
            let end = (self.cursor + PCM_FRAME_SAMPLES).min(self.buffer.len());
            let slice = self.buffer[self.cursor..end].to_vec();
            self.backlog.fetch_sub(slice.len(), Ordering::Relaxed);
            self.cursor = end;
            PcmFrame::padded(slice)
        } else {
            if let Some(d) = &self.diagnostics {
                d.silence_frames_emitted.fetch_add(1, Ordering::Relaxed);
            }
            PcmFrame::silence()
        };

        let pts = self.pts;
        self.pts += PCM_FRAME_SAMPLES as u64;
        self.pace(pts).await;

        if self.remaining() == 0 {
            self.complete_current();
        }
        OutboundFrame { pts, frame }
    }

    fn remaining(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    async fn load_next(&mut self) {
        let item = match tokio::time::timeout(self.pull_timeout, self.queue.recv()).await {
            Ok(Some(item)) => item,
            Ok(None) | Err(_) => return,
        };
        debug!(samples = item.samples.len(), "playback item started");
        if let Some(started) = item.started {
            let _ = started.send(());
        }
        self.buffer = item.samples;
        self.cursor = 0;
        self.completion = item.done;
        self.playing = true;
        if self.buffer.is_empty() {
            self.complete_current();
        }
    }

    async fn pace(&mut self, pts: u64) {
        let start = *self.start.get_or_insert_with(Instant::now);
        let due = start + Duration::from_secs_f64(pts as f64 / PCM_SAMPLE_RATE as f64);
        if due > Instant::now() {
            tokio::time::sleep_until(due).await;
        } else {
            trace!(pts, "playback behind schedule");
        }
    }

    fn complete_current(&mut self) {
        if !self.playing {
            return;
        }
        let samples = self.buffer.len();
        self.buffer.clear();
        self.cursor = 0;
        self.playing = false;
        if let Some(done) = self.completion.take() {
            let _ = done.send(());
        }
        debug!(samples, "playback item completed");
        if let Some(d) = &self.diagnostics {
            d.playback_items.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(events) = &self.events {
            let _ = events.send(SessionEvent::PlaybackCompleted { samples });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<i16> {
        (1..=len as i32).map(|v| v as i16).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn empty_queue_yields_silence_frames() {
        let (_queue, mut scheduler) = playback_channel(DEFAULT_PULL_TIMEOUT);
        for expected_pts in [0u64, 320, 640] {
            let out = scheduler.next_frame().await;
            assert_eq!(out.pts, expected_pts);
            assert!(out.frame.is_silent());
            assert_eq!(out.frame.samples().len(), PCM_FRAME_SAMPLES);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn short_tail_is_padded_and_completion_fires_after_it() {
        let (queue, mut scheduler) = playback_channel(DEFAULT_PULL_TIMEOUT);
        let (item, progress) = PlaybackItem::with_completion(ramp(480));
        let mut done = progress.done;
        queue.send(item).unwrap();

        let first = scheduler.next_frame().await;
        assert_eq!(first.pts, 0);
        assert_eq!(first.frame.samples(), &ramp(320)[..]);
        assert!(done.try_recv().is_err());

        let second = scheduler.next_frame().await;
        assert_eq!(second.pts, 320);
        assert_eq!(&second.frame.samples()[..160], &ramp(480)[320..]);
        assert!(second.frame.samples()[160..].iter().all(|&s| s == 0));
        assert!(done.try_recv().is_ok());

        let third = scheduler.next_frame().await;
        assert_eq!(third.pts, 640);
        assert!(third.frame.is_silent());
    }

    #[tokio::test(start_paused = true)]
    async fn frames_are_never_sent_ahead_of_real_time() {
        let (queue, mut scheduler) = playback_channel(DEFAULT_PULL_TIMEOUT);
        queue.send(PlaybackItem::new(vec![100; 320 * 25])).unwrap();

        let start = Instant::now();
        for _ in 0..50 {
            let out = scheduler.next_frame().await;
            let due = Duration::from_millis(out.pts * 1000 / PCM_SAMPLE_RATE as u64);
            assert!(start.elapsed() >= due, "frame at pts {} sent early", out.pts);
        }
        assert!(start.elapsed() >= Duration::from_millis(49 * 20));
    }

    #[tokio::test(start_paused = true)]
    async fn items_play_in_fifo_order() {
        let (queue, mut scheduler) = playback_channel(DEFAULT_PULL_TIMEOUT);
        let (a, mut a_progress) = PlaybackItem::with_completion(vec![1; 320]);
        let (b, mut b_progress) = PlaybackItem::with_completion(vec![2; 320]);
        queue.send(a).unwrap();
        queue.send(b).unwrap();

        let first = scheduler.next_frame().await;
        assert!(first.frame.samples().iter().all(|&s| s == 1));
        assert!(a_progress.done.try_recv().is_ok());
        assert!(b_progress.started.try_recv().is_err());
        assert!(b_progress.done.try_recv().is_err());

        let second = scheduler.next_frame().await;
        assert!(second.frame.samples().iter().all(|&s| s == 2));
        assert!(b_progress.started.try_recv().is_ok());
        assert!(b_progress.done.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn short_second_item_is_padded_then_silence_follows() {
        let (queue, mut scheduler) = playback_channel(DEFAULT_PULL_TIMEOUT);
        let (a, mut a_progress) = PlaybackItem::with_completion(vec![1; 320]);
        let (b, mut b_progress) = PlaybackItem::with_completion(vec![2; 160]);
        queue.send(a).unwrap();
        queue.send(b).unwrap();

        let first = scheduler.next_frame().await;
        assert_eq!(first.pts, 0);
        assert!(first.frame.samples().iter().all(|&s| s == 1));
        assert!(a_progress.done.try_recv().is_ok());
        assert!(b_progress.done.try_recv().is_err());

        let second = scheduler.next_frame().await;
        assert_eq!(second.pts, 320);
        assert!(second.frame.samples()[..160].iter().all(|&s| s == 2));
        assert!(second.frame.samples()[160..].iter().all(|&s| s == 0));
        assert!(b_progress.done.try_recv().is_ok());

        // Queue stays empty past the pull timeout from here on.
        for expected_pts in [640u64, 960] {
            let out = scheduler.next_frame().await;
            assert_eq!(out.pts, expected_pts);
            assert!(out.frame.is_silent());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn started_fires_on_dequeue_not_on_enqueue() {
        let (queue, mut scheduler) = playback_channel(DEFAULT_PULL_TIMEOUT);
        queue.send(PlaybackItem::new(vec![5; 640])).unwrap();
        let (reply, mut progress) = PlaybackItem::with_completion(vec![9; 320]);
        queue.send(reply).unwrap();

        scheduler.next_frame().await;
        assert!(progress.started.try_recv().is_err());
        scheduler.next_frame().await;
        assert!(progress.started.try_recv().is_err());

        let out = scheduler.next_frame().await;
        assert!(out.frame.samples().iter().all(|&s| s == 9));
        assert!(progress.started.try_recv().is_ok());
        assert!(progress.done.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn backlog_counts_down_as_frames_are_emitted() {
        let (queue, mut scheduler) = playback_channel(DEFAULT_PULL_TIMEOUT);
        queue.send(PlaybackItem::new(vec![3; 800])).unwrap();
        queue.send(PlaybackItem::new(vec![4; 800])).unwrap();
        assert_eq!(queue.backlog(), Duration::from_millis(100));

        scheduler.next_frame().await;
        assert_eq!(queue.backlog(), Duration::from_millis(80));
        for _ in 0..5 {
            scheduler.next_frame().await;
        }
        assert_eq!(queue.backlog(), Duration::ZERO);
    }

    #[tokio::test]
    async fn dropped_scheduler_fails_pending_progress() {
        let (queue, scheduler) = playback_channel(DEFAULT_PULL_TIMEOUT);
        let (item, progress) = PlaybackItem::with_completion(vec![1; 320]);
        queue.send(item).unwrap();
        drop(scheduler);
        assert!(progress.started.await.is_err());
        assert!(progress.done.await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_item_completes_immediately() {
        let (queue, mut scheduler) = playback_channel(DEFAULT_PULL_TIMEOUT);
        let (item, progress) = PlaybackItem::with_completion(Vec::new());
        let mut done = progress.done;
        queue.send(item).unwrap();
        let out = scheduler.next_frame().await;
        assert!(out.frame.is_silent());
        assert!(done.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn counters_track_items_and_silence() {
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let (queue, scheduler) = playback_channel(DEFAULT_PULL_TIMEOUT);
        let mut scheduler = scheduler.with_diagnostics(Arc::clone(&diagnostics));
        queue.send(PlaybackItem::with_completion(vec![7; 640]).0).unwrap();
        for _ in 0..4 {
            scheduler.next_frame().await;
        }
        let snap = diagnostics.snapshot();
        assert_eq!(snap.playback_items, 1);
        assert_eq!(snap.silence_frames_emitted, 2);
    }

    #[test]
    fn item_duration_follows_sample_count() {
        assert_eq!(PlaybackItem::new(vec![0; 8_000]).duration(), Duration::from_millis(500));
    }
}
