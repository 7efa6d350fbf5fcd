use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use voicelink_audio::{AudioCapture, AudioPlayback, DeviceError, PcmSink, PlaybackStats};
use voicelink_core::config::SessionConfig;
use voicelink_core::error::{ConfigError, ConnectionError, SendError};
use voicelink_core::events::{InboundEvent, OutboundEvent};
use voicelink_providers::AgentChannel;

use crate::bridge::StreamBridge;
use crate::coordinator::{DEFAULT_APPROVAL_TIMEOUT, ToolCallCoordinator};
use crate::session::{EndReason, SessionReport};
use crate::traits::{AgentConnector, ApprovalGate};

const APPROVAL_SEND_ATTEMPTS: u32 = 3;
const APPROVAL_RETRY_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("audio device error: {0}")]
    Device(#[from] DeviceError),
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub approval_timeout: Duration,
    pub playback_queue_frames: usize,
    pub delta_queue: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
            playback_queue_frames: 64,
            delta_queue: 64,
        }
    }
}

/// Owns every part of one session and runs the dispatch loop.
pub struct SessionOrchestrator {
    session: SessionConfig,
    settings: OrchestratorSettings,
    connector: Arc<dyn AgentConnector>,
    gate: Arc<dyn ApprovalGate>,
    capture: Option<AudioCapture>,
    playback_sink: Option<Box<dyn PcmSink>>,
}

impl SessionOrchestrator {
    pub fn new(
        session: SessionConfig,
        settings: OrchestratorSettings,
        connector: Arc<dyn AgentConnector>,
        gate: Arc<dyn ApprovalGate>,
    ) -> Self {
        Self {
            session,
            settings,
            connector,
            gate,
            capture: None,
            playback_sink: None,
        }
    }

    /// Stream the microphone to the agent.
    pub fn with_capture(mut self, capture: AudioCapture) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Play the agent's audio. Without a sink, inbound audio is discarded.
    pub fn with_playback(mut self, sink: Box<dyn PcmSink>) -> Self {
        self.playback_sink = Some(sink);
        self
    }

    /// Connects, runs until the agent closes the channel or `shutdown`
    /// resolves, then releases everything.
    ///
    /// Only configuration, connection and device failures are returned as
    /// errors; per-event failures are logged and counted in the report.
    pub async fn run<F>(mut self, shutdown: F) -> Result<SessionReport, SessionError>
    where
        F: Future<Output = ()>,
    {
        self.session.validate()?;
        let started = Instant::now();

        let mut channel = self.connector.connect(&self.session).await?;

        let capture_rx = match self.capture.as_mut().map(|c| c.start()).transpose() {
            Ok(rx) => rx,
            Err(e) => {
                log::error!("Failed to start audio capture: {e}");
                channel.close().await;
                return Err(e.into());
            }
        };

        let playback = match self
            .playback_sink
            .take()
            .map(|sink| AudioPlayback::start(sink, self.settings.playback_queue_frames))
            .transpose()
        {
            Ok(p) => p,
            Err(e) => {
                log::error!("Failed to start audio playback: {e}");
                if let Some(c) = self.capture.as_mut() {
                    c.stop();
                }
                channel.close().await;
                return Err(e.into());
            }
        };

        let bridge = StreamBridge::start(
            capture_rx,
            channel.sender(),
            playback.as_ref().and_then(|p| p.sender()),
            self.settings.delta_queue,
        );
        let (mut coordinator, mut decisions) =
            ToolCallCoordinator::new(self.gate.clone(), self.settings.approval_timeout);

        let mut control_send_failures = 0u64;
        tokio::pin!(shutdown);

        let end_reason = 'dispatch: loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break 'dispatch EndReason::ShutdownRequested,

                Some(decision) = decisions.recv() => {
                    if let Some(event) = coordinator.resolve(decision) {
                        if !send_approval_response(&channel, event).await {
                            control_send_failures += 1;
                        }
                    }
                }

                event = channel.next_event() => {
                    let Some(event) = event else {
                        break 'dispatch EndReason::ChannelClosed;
                    };

                    let event_type = event.event_type();
                    if !event_type.contains("delta") {
                        log::info!("Received a {event_type} event");
                    }

                    match event {
                        InboundEvent::AudioDelta { delta } => {
                            // A stalled speaker backs up the delta queue; shutdown must still win.
                            tokio::select! {
                                biased;
                                _ = &mut shutdown => break 'dispatch EndReason::ShutdownRequested,
                                _ = bridge.forward_delta(delta) => {}
                            }
                        }
                        InboundEvent::TranscriptDone { transcript } => {
                            log::info!("Assistant: {transcript}");
                        }
                        other => {
                            for out in coordinator.handle_event(&other) {
                                if let Err(e) = channel.send(out).await {
                                    control_send_failures += 1;
                                    log::warn!("Control event dropped: {e}");
                                }
                            }
                        }
                    }
                }
            }
        };

        log::info!("Session ending: {}", end_reason.label());
        coordinator.shutdown();

        if let Some(c) = self.capture.as_mut() {
            c.stop();
        }
        let bridge_stats = bridge.stop().await;
        let playback_stats = match playback {
            Some(p) => tokio::task::spawn_blocking(move || p.stop())
                .await
                .unwrap_or_else(|e| {
                    log::error!("Playback shutdown failed: {e}");
                    PlaybackStats::default()
                }),
            None => PlaybackStats::default(),
        };
        channel.close().await;

        let report = SessionReport::from_parts(
            end_reason,
            started.elapsed(),
            bridge_stats,
            playback_stats,
            coordinator.stats(),
            control_send_failures,
        );
        log::info!(
            "Session ended: sent={} played={} tool_calls={} approvals={}/{}",
            report.frames_sent,
            report.frames_played,
            report.tool_calls_acknowledged,
            report.approvals_granted,
            report.approvals_granted + report.approvals_denied
        );
        Ok(report)
    }
}

/// Approval responses are retried on a send timeout; a closed channel is final.
async fn send_approval_response(channel: &AgentChannel, event: OutboundEvent) -> bool {
    for attempt in 1..=APPROVAL_SEND_ATTEMPTS {
        match channel.send(event.clone()).await {
            Ok(()) => return true,
            Err(SendError::Closed) => {
                log::warn!("Approval response dropped: agent channel closed");
                return false;
            }
            Err(e) => {
                log::warn!(
                    "Approval response send failed (attempt {attempt}/{}): {e}",
                    APPROVAL_SEND_ATTEMPTS
                );
                if attempt < APPROVAL_SEND_ATTEMPTS {
                    tokio::time::sleep(APPROVAL_RETRY_BACKOFF * attempt).await;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicelink_core::events::ApprovalDecision;

    fn approval_event() -> OutboundEvent {
        OutboundEvent::approval_response(&ApprovalDecision::from_answer("req_1", "y"))
    }

    #[tokio::test(start_paused = true)]
    async fn approval_response_is_retried_past_a_full_queue() {
        let (channel, mut peer) = AgentChannel::pair(1);
        channel.send(OutboundEvent::ResponseCreate).await.unwrap();
        let event = approval_event();

        let start = tokio::time::Instant::now();
        let late_drain = async {
            tokio::time::sleep(Duration::from_secs(4)).await;
            peer.outbound.recv().await
        };
        let sending = send_approval_response(&channel, event.clone());
        let (sent, first) = tokio::join!(sending, late_drain);

        assert!(sent);
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(first, Some(OutboundEvent::ResponseCreate));
        assert_eq!(peer.outbound.recv().await, Some(event));
    }

    #[tokio::test(start_paused = true)]
    async fn approval_response_gives_up_at_once_on_a_closed_channel() {
        let (channel, peer) = AgentChannel::pair(1);
        drop(peer);

        let start = tokio::time::Instant::now();
        assert!(!send_approval_response(&channel, approval_event()).await);
        assert!(start.elapsed() < Duration::from_millis(1));
    }
}
