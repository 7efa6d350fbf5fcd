use serde::{Deserialize, Serialize};
use std::time::Duration;
use voicelink_audio::PlaybackStats;

use crate::bridge::BridgeStats;
use crate::coordinator::CoordinatorStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// The agent side ended the event stream.
    ChannelClosed,
    ShutdownRequested,
}

impl EndReason {
    pub fn label(&self) -> &'static str {
        match self {
            EndReason::ChannelClosed => "channel closed",
            EndReason::ShutdownRequested => "shutdown requested",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    pub end_reason: EndReason,
    pub duration_ms: u64,

    // Outbound audio
    pub frames_sent: u64,
    pub capture_frames_dropped: u64,
    pub send_failures: u64,

    // Inbound audio
    pub frames_played: u64,
    pub playback_write_failures: u64,
    pub delta_decode_failures: u64,

    // Tools
    pub tool_calls_acknowledged: u64,
    pub approvals_granted: u64,
    pub approvals_denied: u64,
}

impl SessionReport {
    pub fn from_parts(
        end_reason: EndReason,
        duration: Duration,
        bridge: BridgeStats,
        playback: PlaybackStats,
        tools: CoordinatorStats,
        control_send_failures: u64,
    ) -> Self {
        Self {
            end_reason,
            duration_ms: ms(duration),
            frames_sent: bridge.frames_sent,
            capture_frames_dropped: bridge.capture_dropped,
            send_failures: bridge.send_failures + control_send_failures,
            frames_played: playback.frames_written,
            playback_write_failures: playback.write_failures,
            delta_decode_failures: bridge.decode_failures,
            tool_calls_acknowledged: tools.tool_calls_acknowledged,
            approvals_granted: tools.approvals_granted,
            approvals_denied: tools.approvals_denied,
        }
    }
}

pub fn ms(d: Duration) -> u64 {
    d.as_millis().try_into().unwrap_or(u64::MAX)
}
