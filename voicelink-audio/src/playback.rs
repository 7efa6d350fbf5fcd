use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use voicelink_core::types::PcmFrame;

use crate::error::DeviceError;

/// A speaker that accepts frames with a blocking write.
///
/// `write` returns once the hardware has taken the frame; it runs on the
/// playback worker thread, never on the async runtime.
pub trait PcmSink: Send + 'static {
    fn write(&mut self, frame: &PcmFrame) -> Result<(), DeviceError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub frames_written: u64,
    pub write_failures: u64,
    pub frames_discarded: u64,
}

/// How long `stop` waits for a busy device write before detaching the worker.
const STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Default)]
struct SharedStats {
    frames_written: AtomicU64,
    write_failures: AtomicU64,
    frames_discarded: AtomicU64,
}

impl SharedStats {
    fn snapshot(&self) -> PlaybackStats {
        PlaybackStats {
            frames_written: self.frames_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
        }
    }
}

enum PlaybackMsg {
    Frame(PcmFrame),
    Stop,
}

/// Async producer handle; `push` suspends while the queue is full.
#[derive(Clone)]
pub struct PlaybackSender {
    tx: mpsc::Sender<PlaybackMsg>,
}

impl PlaybackSender {
    pub async fn push(&self, frame: PcmFrame) -> Result<(), DeviceError> {
        self.tx
            .send(PlaybackMsg::Frame(frame))
            .await
            .map_err(|_| DeviceError::PlaybackClosed)
    }
}

pub struct AudioPlayback {
    tx: Option<mpsc::Sender<PlaybackMsg>>,
    cancelled: Arc<AtomicBool>,
    stats: Arc<SharedStats>,
    worker_handle: Option<std::thread::JoinHandle<()>>,
    stop_grace: Duration,
}

impl AudioPlayback {
    /// Spawns the dedicated writer thread.
    ///
    /// Device writes block, so they must not share the async scheduler used
    /// for event dispatch.
    pub fn start(sink: Box<dyn PcmSink>, capacity: usize) -> Result<Self, DeviceError> {
        let (tx, rx) = mpsc::channel::<PlaybackMsg>(capacity.max(1));
        let cancelled = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(SharedStats::default());
        let cancelled_worker = cancelled.clone();
        let stats_worker = stats.clone();

        let worker_handle = std::thread::Builder::new()
            .name("voicelink-playback".into())
            .spawn(move || run_writer(sink, rx, cancelled_worker, stats_worker))
            .map_err(|e| DeviceError::Worker(format!("spawn playback worker: {e}")))?;

        log::info!("Audio playback started (queue={} frames)", capacity);
        Ok(Self {
            tx: Some(tx),
            cancelled,
            stats,
            worker_handle: Some(worker_handle),
            stop_grace: STOP_GRACE,
        })
    }

    #[cfg(test)]
    fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn sender(&self) -> Option<PlaybackSender> {
        self.tx.as_ref().map(|tx| PlaybackSender { tx: tx.clone() })
    }

    /// Stops the writer thread, discarding frames that have not been written yet.
    ///
    /// Blocks for at most the stop grace period; a worker stuck in a device
    /// write is detached and left to exit on its own. Call from a blocking
    /// context.
    pub fn stop(mut self) -> PlaybackStats {
        self.shutdown()
    }

    fn shutdown(&mut self) -> PlaybackStats {
        self.cancelled.store(true, Ordering::Release);
        let deadline = Instant::now() + self.stop_grace;

        // Producer clones may outlive us, so the worker is told to exit explicitly.
        // While cancelled it discards queued frames, which frees room for the stop marker.
        if let Some(tx) = self.tx.take() {
            loop {
                match tx.try_send(PlaybackMsg::Stop) {
                    Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => break,
                    Err(mpsc::error::TrySendError::Full(_)) if Instant::now() >= deadline => break,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
            }
        }

        if let Some(h) = self.worker_handle.take() {
            while !h.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            if h.is_finished() {
                if h.join().is_err() {
                    log::error!("Playback worker panicked");
                }
            } else {
                log::warn!("Playback device write did not return in time; detaching worker");
            }
        }

        let stats = self.stats.snapshot();
        log::info!(
            "Audio playback stopped (written={}, failed={}, discarded={})",
            stats.frames_written,
            stats.write_failures,
            stats.frames_discarded
        );
        stats
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        if self.worker_handle.is_some() {
            self.shutdown();
        }
    }
}

fn run_writer(
    mut sink: Box<dyn PcmSink>,
    mut rx: mpsc::Receiver<PlaybackMsg>,
    cancelled: Arc<AtomicBool>,
    stats: Arc<SharedStats>,
) {
    while let Some(msg) = rx.blocking_recv() {
        let frame = match msg {
            PlaybackMsg::Frame(f) => f,
            PlaybackMsg::Stop => break,
        };

        if cancelled.load(Ordering::Acquire) {
            // Stale audio after shutdown is worse than silence.
            stats.frames_discarded.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        match sink.write(&frame) {
            Ok(()) => {
                stats.frames_written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                // No retry: a late frame is stale by the time it would play.
                stats.write_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("Playback write failed, frame dropped: {e}");
            }
        }
    }
}
