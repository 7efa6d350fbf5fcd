use serde::{Deserialize, Serialize};

use crate::defaults;

/// On-disk application configuration.
///
/// Secrets never live here: tools name the environment variable that holds
/// their token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSettings,
    pub session: SessionSettings,
    pub audio: AudioSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub ws_url: String,
    pub model: String,
    pub connect_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    pub approval_timeout_secs: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        defaults::default_agent_settings()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub voice: String,
    pub instructions: String,
    pub tools: Vec<ToolSettings>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        defaults::default_session_settings()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSettings {
    pub server_label: String,
    pub server_url: String,
    /// Environment variable holding the bearer token for this server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_env: Option<String>,
    #[serde(default)]
    pub auto_approved: Vec<String>,
    #[serde(default)]
    pub requires_approval: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub capture_enabled: bool,
    pub playback_enabled: bool,
    pub capture_queue_frames: usize,
    pub playback_queue_frames: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            capture_enabled: true,
            playback_enabled: true,
            // 20 ms frames: about two seconds of slack each way.
            capture_queue_frames: 100,
            playback_queue_frames: 100,
        }
    }
}
