use async_trait::async_trait;
use voicelink_core::config::SessionConfig;
use voicelink_core::error::ConnectionError;
use voicelink_engine::traits::AgentConnector;
use voicelink_providers::{AgentChannel, RealtimeConnectConfig, openai_realtime};

/// Connects sessions over the OpenAI Realtime websocket.
pub struct RealtimeAgentConnector {
    cfg: RealtimeConnectConfig,
}

impl RealtimeAgentConnector {
    pub fn new(cfg: RealtimeConnectConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl AgentConnector for RealtimeAgentConnector {
    async fn connect(&self, config: &SessionConfig) -> Result<AgentChannel, ConnectionError> {
        openai_realtime::connect(&self.cfg, config).await
    }
}
