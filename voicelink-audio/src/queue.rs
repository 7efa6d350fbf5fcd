//! Handoff queue between the hardware capture callback and the async pump.
//!
//! The producer side never blocks: when the queue is full the oldest frame is
//! evicted and counted, since microphone capture cannot be paused.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use tokio::sync::Notify;
use voicelink_core::types::PcmFrame;

pub fn capture_queue(capacity: usize) -> (CaptureProducer, CaptureConsumer) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let notify = Arc::new(Notify::new());
    let dropped = Arc::new(AtomicU64::new(0));

    let producer = CaptureProducer {
        tx,
        evict: rx.clone(),
        notify: notify.clone(),
        dropped: dropped.clone(),
    };
    let consumer = CaptureConsumer {
        rx,
        notify,
        dropped,
    };
    (producer, consumer)
}

pub struct CaptureProducer {
    tx: Sender<PcmFrame>,
    // Second handle on the same queue so the producer can evict the oldest entry.
    evict: Receiver<PcmFrame>,
    notify: Arc<Notify>,
    dropped: Arc<AtomicU64>,
}

impl CaptureProducer {
    /// Enqueue without blocking. Returns `false` if a frame had to be dropped.
    pub fn push(&self, frame: PcmFrame) -> bool {
        let lost = push_evicting(&self.tx, &self.evict, frame);
        self.notify.notify_one();
        if lost > 0 {
            self.dropped.fetch_add(lost, Ordering::Relaxed);
        }
        lost == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Handoff for raw device buffers whose drops count against this queue.
    pub fn raw_handoff(
        &self,
        capacity: usize,
        device_rate_hz: u32,
        channels: usize,
    ) -> (RawHandoff, Receiver<Vec<f32>>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let handoff = RawHandoff {
            tx,
            evict: rx.clone(),
            dropped: self.dropped.clone(),
            samples_per_frame: wire_frame_samples(device_rate_hz, channels),
        };
        (handoff, rx)
    }
}

/// Interleaved device samples covering one 20 ms wire frame.
fn wire_frame_samples(device_rate_hz: u32, channels: usize) -> usize {
    ((device_rate_hz as usize / 50) * channels.max(1)).max(1)
}

/// Try to enqueue; on a full queue evict the oldest entry and retry once.
/// Returns how many entries were lost (evicted or the new one itself).
fn push_evicting<T>(tx: &Sender<T>, evict: &Receiver<T>, item: T) -> u64 {
    let mut lost = 0;
    let mut item = item;

    // Bounded: at most one eviction per retry, and the queue has a single consumer.
    for _ in 0..2 {
        match tx.try_send(item) {
            Ok(()) => return lost,
            Err(TrySendError::Full(i)) => {
                item = i;
                if evict.try_recv().is_ok() {
                    lost += 1;
                }
            }
            Err(TrySendError::Disconnected(_)) => return lost + 1,
        }
    }

    // The consumer refilled faster than we could evict; drop the newest instead.
    lost + 1
}

/// Non-blocking handoff from a device callback to the capture worker.
///
/// Same policy as the frame queue: a full queue evicts the oldest buffer.
/// Drops are counted in wire frames on the shared capture counter.
pub struct RawHandoff {
    tx: Sender<Vec<f32>>,
    evict: Receiver<Vec<f32>>,
    dropped: Arc<AtomicU64>,
    samples_per_frame: usize,
}

impl RawHandoff {
    /// Returns `false` if audio had to be dropped.
    pub fn push(&self, chunk: Vec<f32>) -> bool {
        let frames = chunk.len().div_ceil(self.samples_per_frame).max(1) as u64;
        let lost = push_evicting(&self.tx, &self.evict, chunk);
        if lost > 0 {
            // Device buffers have a fixed size, so the evicted one weighs the same.
            self.dropped.fetch_add(lost * frames, Ordering::Relaxed);
        }
        lost == 0
    }
}

impl Drop for CaptureProducer {
    fn drop(&mut self) {
        // Wake a parked consumer so it can observe the disconnect.
        self.notify.notify_one();
    }
}

pub struct CaptureConsumer {
    rx: Receiver<PcmFrame>,
    notify: Arc<Notify>,
    dropped: Arc<AtomicU64>,
}

impl CaptureConsumer {
    /// Next frame in capture order; `None` once the producer is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<PcmFrame> {
        loop {
            match self.rx.try_recv() {
                Ok(frame) => return Some(frame),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => self.notify.notified().await,
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: i16) -> PcmFrame {
        PcmFrame::new(vec![tag; 4])
    }

    #[tokio::test]
    async fn preserves_fifo_order() {
        let (tx, mut rx) = capture_queue(8);
        for i in 0..5 {
            assert!(tx.push(frame(i)));
        }
        for i in 0..5 {
            assert_eq!(rx.recv().await, Some(frame(i)));
        }
    }

    #[tokio::test]
    async fn full_queue_drops_oldest() {
        let (tx, mut rx) = capture_queue(2);
        assert!(tx.push(frame(1)));
        assert!(tx.push(frame(2)));
        assert!(!tx.push(frame(3)));
        assert_eq!(tx.dropped(), 1);

        assert_eq!(rx.recv().await, Some(frame(2)));
        assert_eq!(rx.recv().await, Some(frame(3)));
        assert_eq!(rx.dropped(), 1);
    }

    #[test]
    fn raw_handoff_evicts_oldest_and_counts_wire_frames() {
        let (tx, rx) = capture_queue(4);
        // 48 kHz stereo: 1920 interleaved samples per 20 ms frame.
        let (raw, raw_rx) = tx.raw_handoff(2, 48_000, 2);

        assert!(raw.push(vec![1.0; 1920]));
        assert!(raw.push(vec![2.0; 1920]));
        assert!(!raw.push(vec![3.0; 1920]));
        assert_eq!(rx.dropped(), 1);

        assert_eq!(raw_rx.try_recv().unwrap()[0], 2.0);
        assert_eq!(raw_rx.try_recv().unwrap()[0], 3.0);

        // A 30 ms buffer spans two wire frames.
        assert!(raw.push(vec![4.0; 2880]));
        assert!(raw.push(vec![5.0; 2880]));
        assert!(!raw.push(vec![6.0; 2880]));
        assert_eq!(rx.dropped(), 3);
        assert_eq!(tx.dropped(), 3);
    }

    #[tokio::test]
    async fn consumer_ends_after_producer_drops() {
        let (tx, mut rx) = capture_queue(4);
        tx.push(frame(7));
        drop(tx);
        assert_eq!(rx.recv().await, Some(frame(7)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn consumer_wakes_for_frames_from_another_thread() {
        let (tx, mut rx) = capture_queue(4);
        let t = std::thread::spawn(move || {
            for i in 0..3 {
                std::thread::sleep(std::time::Duration::from_millis(5));
                tx.push(frame(i));
            }
        });
        for i in 0..3 {
            assert_eq!(rx.recv().await, Some(frame(i)));
        }
        t.join().unwrap();
        assert_eq!(rx.recv().await, None);
    }
}
