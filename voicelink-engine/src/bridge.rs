use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use voicelink_audio::{CaptureConsumer, PlaybackSender};
use voicelink_core::error::SendError;
use voicelink_core::events::OutboundEvent;
use voicelink_core::types::PcmFrame;
use voicelink_providers::AgentSender;

const STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub frames_sent: u64,
    pub send_failures: u64,
    pub capture_dropped: u64,
    pub frames_enqueued: u64,
    pub decode_failures: u64,
    pub deltas_discarded: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct CaptureSide {
    frames_sent: u64,
    send_failures: u64,
    capture_dropped: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct PlaybackSide {
    frames_enqueued: u64,
    decode_failures: u64,
    deltas_discarded: u64,
}

pub(crate) fn should_emit_backpressure_warning(previous: u64, dropped: u64) -> bool {
    // First drop, then every 50th.
    dropped > previous && (previous == 0 || dropped / 50 > previous / 50)
}

/// The two audio pumps between the devices and the agent.
///
/// They share no state; each preserves the order of its own source.
pub struct StreamBridge {
    delta_tx: Option<mpsc::Sender<String>>,
    stop_tx: watch::Sender<bool>,
    capture_task: Option<JoinHandle<CaptureSide>>,
    playback_task: Option<JoinHandle<PlaybackSide>>,
}

impl StreamBridge {
    /// `capture` is `None` for receive-only sessions; `playback` is `None`
    /// when inbound audio should be decoded and discarded.
    pub fn start(
        capture: Option<CaptureConsumer>,
        sender: AgentSender,
        playback: Option<PlaybackSender>,
        delta_queue: usize,
    ) -> Self {
        let (delta_tx, delta_rx) = mpsc::channel::<String>(delta_queue.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);

        let capture_task = capture.map(|c| tokio::spawn(run_capture_pump(c, sender)));
        let playback_task = Some(tokio::spawn(run_playback_pump(delta_rx, playback, stop_rx)));

        Self {
            delta_tx: Some(delta_tx),
            stop_tx,
            capture_task,
            playback_task,
        }
    }

    /// Hand an inbound audio delta to the playback pump.
    ///
    /// Suspends while the pump is behind; inbound audio lags rather than drops.
    pub async fn forward_delta(&self, delta: String) {
        if let Some(tx) = self.delta_tx.as_ref() {
            let _ = tx.send(delta).await;
        }
    }

    /// Ends both pumps. Capture must already be stopped so its pump can drain;
    /// undelivered inbound audio is discarded.
    pub async fn stop(mut self) -> BridgeStats {
        let _ = self.stop_tx.send(true);
        self.delta_tx = None;

        let mut stats = BridgeStats::default();
        if let Some(task) = self.capture_task.take() {
            if let Some(side) = join_or_abort(task, "capture").await {
                stats.frames_sent = side.frames_sent;
                stats.send_failures = side.send_failures;
                stats.capture_dropped = side.capture_dropped;
            }
        }
        if let Some(task) = self.playback_task.take() {
            if let Some(side) = join_or_abort(task, "playback").await {
                stats.frames_enqueued = side.frames_enqueued;
                stats.decode_failures = side.decode_failures;
                stats.deltas_discarded = side.deltas_discarded;
            }
        }
        stats
    }
}

async fn join_or_abort<T>(mut task: JoinHandle<T>, name: &str) -> Option<T> {
    match tokio::time::timeout(STOP_GRACE, &mut task).await {
        Ok(Ok(v)) => Some(v),
        Ok(Err(e)) => {
            log::error!("Audio {name} pump failed: {e}");
            None
        }
        Err(_) => {
            log::warn!("Audio {name} pump did not stop in time; aborting");
            task.abort();
            None
        }
    }
}

async fn run_capture_pump(mut capture: CaptureConsumer, sender: AgentSender) -> CaptureSide {
    let mut side = CaptureSide::default();
    let mut reported_drops = 0u64;

    while let Some(frame) = capture.recv().await {
        let dropped = capture.dropped();
        if should_emit_backpressure_warning(reported_drops, dropped) {
            log::warn!("Capture backpressure: dropped {dropped} frames so far");
            reported_drops = dropped;
        }

        match sender.send(OutboundEvent::audio_append(&frame)).await {
            Ok(()) => side.frames_sent += 1,
            Err(SendError::Closed) => {
                log::info!("Agent channel closed; stopping microphone pump");
                break;
            }
            Err(e) => {
                // Stale audio is not worth a retry.
                side.send_failures += 1;
                log::warn!("Audio frame dropped: {e}");
            }
        }
    }

    side.capture_dropped = capture.dropped();
    side
}

async fn run_playback_pump(
    mut deltas: mpsc::Receiver<String>,
    mut playback: Option<PlaybackSender>,
    mut stop_rx: watch::Receiver<bool>,
) -> PlaybackSide {
    let mut side = PlaybackSide::default();

    loop {
        let delta = tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            d = deltas.recv() => match d {
                Some(d) => d,
                None => break,
            },
        };

        let frame = match PcmFrame::from_base64(&delta) {
            Ok(f) => f,
            Err(e) => {
                side.decode_failures += 1;
                log::warn!("Audio delta dropped: {e}");
                continue;
            }
        };

        let Some(tx) = playback.as_ref() else {
            side.deltas_discarded += 1;
            continue;
        };

        let pushed = tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            r = tx.push(frame) => r,
        };
        match pushed {
            Ok(()) => side.frames_enqueued += 1,
            Err(e) => {
                log::warn!("Playback unavailable, discarding further audio: {e}");
                side.deltas_discarded += 1;
                playback = None;
            }
        }
    }

    side
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicelink_audio::capture_queue;
    use voicelink_providers::AgentChannel;

    #[test]
    fn backpressure_warning_throttles() {
        assert!(!should_emit_backpressure_warning(0, 0));
        assert!(should_emit_backpressure_warning(0, 1));
        assert!(!should_emit_backpressure_warning(1, 2));
        assert!(!should_emit_backpressure_warning(1, 49));
        assert!(should_emit_backpressure_warning(1, 50));
        assert!(should_emit_backpressure_warning(49, 53));
        assert!(!should_emit_backpressure_warning(50, 99));
        assert!(should_emit_backpressure_warning(50, 100));
    }

    #[tokio::test]
    async fn capture_frames_are_sent_in_order() {
        let (channel, mut peer) = AgentChannel::pair(16);
        let (producer, consumer) = capture_queue(8);

        let frames: Vec<PcmFrame> = (0..4).map(|i| PcmFrame::new(vec![i; 3])).collect();
        for f in &frames {
            producer.push(f.clone());
        }
        drop(producer);

        let bridge = StreamBridge::start(Some(consumer), channel.sender(), None, 4);
        for f in &frames {
            let OutboundEvent::AudioAppend { audio } = peer.outbound.recv().await.unwrap() else {
                panic!("expected audio append");
            };
            assert_eq!(&PcmFrame::from_base64(&audio).unwrap(), f);
        }

        let stats = bridge.stop().await;
        assert_eq!(stats.frames_sent, 4);
        assert_eq!(stats.send_failures, 0);
    }

    #[tokio::test]
    async fn malformed_delta_is_skipped_and_counted() {
        let (channel, _peer) = AgentChannel::pair(4);
        let bridge = StreamBridge::start(None, channel.sender(), None, 4);

        bridge.forward_delta(PcmFrame::new(vec![1]).to_base64()).await;
        bridge.forward_delta("%%%".into()).await;
        bridge.forward_delta("AAE=".into()).await;

        // Let the pump drain before stopping.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let stats = bridge.stop().await;
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.deltas_discarded, 2);
    }
}
