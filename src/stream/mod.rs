//! Capture-transmit loop (producer) and viewer loop (consumer).
//!
//! Two independently paced activities share the bounded frame queue: a
//! sampling thread drives the frame source at its own cadence, and a
//! transmission task drains the queue toward the relay. Each tick's delay
//! is `target_period - elapsed`, floored at zero — the loop may run slower
//! under load but never races to catch up.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::{connect_with_retry, RelayConnection};
use crate::error::CaptureError;
use crate::protocol::{DEFAULT_KEEPALIVE, DEFAULT_SAMPLE_PERIOD, DEFAULT_SEND_PERIOD, DEFAULT_URL};
use crate::queue::FrameQueue;
use crate::source::SourceFactory;

/// Carries human-readable status strings to whoever fronts the loop.
pub type StatusSender = mpsc::UnboundedSender<String>;

/// Delay before the next tick: never negative, never a catch-up burst.
pub fn pacing_delay(target_period: Duration, elapsed: Duration) -> Duration {
    target_period.saturating_sub(elapsed)
}

/// Displays received or locally previewed frames. External collaborator —
/// the pipeline fires and forgets.
pub trait Renderer: Send + Sync {
    fn display(&self, frame: Bytes);
}

/// Renderer that reports throughput instead of drawing.
pub struct FrameStats {
    label: &'static str,
    frames: AtomicU64,
    bytes: AtomicU64,
    started: Instant,
}

impl FrameStats {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            frames: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}

impl Renderer for FrameStats {
    fn display(&self, frame: Bytes) {
        let frames = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        let bytes = self.bytes.fetch_add(frame.len() as u64, Ordering::Relaxed) + frame.len() as u64;

        if frames % 30 == 0 {
            let secs = self.started.elapsed().as_secs_f64().max(0.001);
            let fps = (frames as f64 / secs * 10.0).round() / 10.0;
            tracing::info!(
                label = self.label,
                frames,
                kib = bytes / 1024,
                fps,
                "frame throughput"
            );
        }
    }
}

/// Renderer that persists the latest frame to a file, for an external
/// display process to pick up.
pub struct FrameFile {
    path: PathBuf,
}

impl FrameFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Renderer for FrameFile {
    fn display(&self, frame: Bytes) {
        if let Err(e) = std::fs::write(&self.path, &frame) {
            tracing::warn!(path = %self.path.display(), error = %e, "frame write failed");
        }
    }
}

/// Tuning for one producer loop.
#[derive(Debug, Clone)]
pub struct ProducerOptions {
    pub url: String,
    pub sample_period: Duration,
    pub send_period: Duration,
    pub keepalive: Duration,
    pub queue_capacity: usize,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            sample_period: DEFAULT_SAMPLE_PERIOD,
            send_period: DEFAULT_SEND_PERIOD,
            keepalive: DEFAULT_KEEPALIVE,
            queue_capacity: 1,
        }
    }
}

/// Spawn the sampling activity on its own OS thread.
///
/// The source is built inside the thread (capturers may not be `Send`).
/// Capture failures are reported and sampling continues; only losing the
/// source entirely, or cancellation, ends the thread.
pub fn spawn_sampler(
    factory: SourceFactory,
    queue: Arc<FrameQueue>,
    period: Duration,
    cancel: CancellationToken,
    status: StatusSender,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut source = match factory() {
            Ok(source) => source,
            Err(e) => {
                let _ = status.send(format!("Capture unavailable: {}", e));
                return;
            }
        };

        while !cancel.is_cancelled() {
            let tick = Instant::now();

            match source.capture_once() {
                Ok(frame) => {
                    queue.push(frame);
                    let dropped = queue.dropped();
                    if dropped > 0 && dropped % 100 == 0 {
                        tracing::debug!(dropped, "transmitter falling behind");
                    }
                }
                Err(CaptureError::NotReady) => {
                    // Nothing this tick; try again next one
                }
                Err(e) => {
                    let _ = status.send(format!("Capture error: {}", e));
                }
            }

            let delay = pacing_delay(period, tick.elapsed());
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
    })
}

enum LoopExit {
    Cancelled,
    ConnectionLost,
}

/// Transmission activity: drain the queue toward the relay at its own
/// cadence, previewing each sent frame locally.
async fn transmit_until_closed(
    conn: &RelayConnection,
    queue: &FrameQueue,
    period: Duration,
    cancel: &CancellationToken,
    status: &StatusSender,
    preview: Option<&dyn Renderer>,
) -> LoopExit {
    loop {
        if cancel.is_cancelled() {
            return LoopExit::Cancelled;
        }
        if !conn.is_open() {
            return LoopExit::ConnectionLost;
        }

        let tick = Instant::now();

        if let Some(frame) = queue.try_pop() {
            match conn.send_binary(frame.payload.clone()) {
                Ok(()) => {
                    if let Some(renderer) = preview {
                        renderer.display(frame.payload);
                    }
                }
                Err(e) => {
                    let _ = status.send(format!("Send failed: {}", e));
                    return LoopExit::ConnectionLost;
                }
            }
        }

        let delay = pacing_delay(period, tick.elapsed());
        tokio::select! {
            _ = cancel.cancelled() => return LoopExit::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Run the full producer loop until cancelled: one sampler thread for the
/// lifetime of the loop, and a transmit task that reconnects with backoff
/// whenever the connection is lost.
pub async fn run_broadcast(
    options: ProducerOptions,
    factory: SourceFactory,
    preview: Option<Arc<dyn Renderer>>,
    cancel: CancellationToken,
    status: StatusSender,
) {
    let queue = Arc::new(FrameQueue::with_capacity(options.queue_capacity));
    let sampler = spawn_sampler(
        factory,
        queue.clone(),
        options.sample_period,
        cancel.clone(),
        status.clone(),
    );

    while !cancel.is_cancelled() {
        let Some(conn) =
            connect_with_retry(&options.url, options.keepalive, &cancel, &status).await
        else {
            break;
        };

        let exit = transmit_until_closed(
            &conn,
            &queue,
            options.send_period,
            &cancel,
            &status,
            preview.as_deref(),
        )
        .await;
        conn.disconnect().await;

        match exit {
            LoopExit::Cancelled => break,
            LoopExit::ConnectionLost => {
                let _ = status.send("Connection lost — reconnecting".to_string());
            }
        }
    }

    // The loop only falls out once cancelled, so the sampler is already
    // on its way down; park the blocking join off the runtime.
    let _ = tokio::task::spawn_blocking(move || sampler.join()).await;
    let _ = status.send("Broadcasting stopped".to_string());
}

/// Run the consumer loop until cancelled: receive broadcast frames and
/// hand each to the renderer, reconnecting with backoff when the stream
/// ends.
pub async fn run_view(
    url: String,
    keepalive: Duration,
    renderer: Arc<dyn Renderer>,
    cancel: CancellationToken,
    status: StatusSender,
) {
    while !cancel.is_cancelled() {
        let Some(mut conn) = connect_with_retry(&url, keepalive, &cancel, &status).await else {
            break;
        };
        let Some(mut frames) = conn.frames() else {
            conn.disconnect().await;
            break;
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    conn.disconnect().await;
                    return;
                }
                frame = frames.recv() => match frame {
                    Some(payload) => renderer.display(payload),
                    None => break, // sequence ended — close frame or socket error
                }
            }
        }

        conn.disconnect().await;
        if !cancel.is_cancelled() {
            let _ = status.send("Stream ended — reconnecting".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Frame;
    use crate::source::FrameSource;

    #[test]
    fn pacing_never_sleeps_negative() {
        let period = Duration::from_millis(100);
        assert_eq!(
            pacing_delay(period, Duration::from_millis(40)),
            Duration::from_millis(60)
        );
        // Overrun: next tick starts immediately, no accumulated catch-up
        assert_eq!(pacing_delay(period, Duration::from_millis(150)), Duration::ZERO);
        assert_eq!(pacing_delay(period, period), Duration::ZERO);
    }

    struct CountingSource {
        next: u8,
    }

    impl FrameSource for CountingSource {
        fn capture_once(&mut self) -> Result<Frame, CaptureError> {
            let frame = Frame::new(vec![self.next]);
            self.next = self.next.wrapping_add(1);
            Ok(frame)
        }
    }

    #[test]
    fn sampler_fills_queue_and_stops_on_cancel() {
        let queue = Arc::new(FrameQueue::new());
        let cancel = CancellationToken::new();
        let (status_tx, _status_rx) = mpsc::unbounded_channel();

        let handle = spawn_sampler(
            Box::new(|| Ok(Box::new(CountingSource { next: 0 }) as Box<dyn FrameSource>)),
            queue.clone(),
            Duration::from_millis(5),
            cancel.clone(),
            status_tx,
        );

        thread::sleep(Duration::from_millis(60));
        cancel.cancel();
        handle.join().unwrap();

        // Several ticks ran; the single slot holds only the newest frame
        let frame = queue.try_pop().expect("sampler produced frames");
        assert!(frame.payload[0] > 0);
        assert!(queue.try_pop().is_none());
        assert!(queue.dropped() > 0);
    }

    #[test]
    fn failing_source_reports_status_and_continues() {
        struct FlakySource {
            calls: u32,
        }

        impl FrameSource for FlakySource {
            fn capture_once(&mut self) -> Result<Frame, CaptureError> {
                self.calls += 1;
                if self.calls % 2 == 1 {
                    Err(CaptureError::Capture("flaky".into()))
                } else {
                    Ok(Frame::new(vec![0xAB]))
                }
            }
        }

        let queue = Arc::new(FrameQueue::new());
        let cancel = CancellationToken::new();
        let (status_tx, mut status_rx) = mpsc::unbounded_channel();

        let handle = spawn_sampler(
            Box::new(|| Ok(Box::new(FlakySource { calls: 0 }) as Box<dyn FrameSource>)),
            queue.clone(),
            Duration::from_millis(5),
            cancel.clone(),
            status_tx,
        );

        thread::sleep(Duration::from_millis(60));
        cancel.cancel();
        handle.join().unwrap();

        // Failures surfaced as status strings, yet frames still arrived
        let status = status_rx.try_recv().expect("at least one capture error");
        assert!(status.contains("Capture error"));
        assert!(queue.try_pop().is_some());
    }

    #[test]
    fn frame_stats_counts_frames() {
        let stats = FrameStats::new("test");
        stats.display(Bytes::from_static(b"abc"));
        stats.display(Bytes::from_static(b"defg"));
        assert_eq!(stats.frames.load(Ordering::Relaxed), 2);
        assert_eq!(stats.bytes.load(Ordering::Relaxed), 7);
    }

    #[test]
    fn frame_file_writes_latest_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.jpg");
        let renderer = FrameFile::new(path.clone());

        renderer.display(Bytes::from_static(b"first"));
        renderer.display(Bytes::from_static(b"second"));

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }
}
