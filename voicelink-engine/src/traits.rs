use async_trait::async_trait;
use voicelink_core::config::SessionConfig;
use voicelink_core::error::ConnectionError;
use voicelink_providers::AgentChannel;

/// Establishes a configured session with the remote agent.
///
/// Implementations must not return the channel before the agent has
/// acknowledged `config`.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn connect(&self, config: &SessionConfig) -> Result<AgentChannel, ConnectionError>;
}

/// The human on the other side of a tool approval.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Show `prompt` and return the raw answer.
    ///
    /// May wait indefinitely; the caller bounds it and may drop the future.
    async fn ask(&self, prompt: &str) -> anyhow::Result<String>;
}
