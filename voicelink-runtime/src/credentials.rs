use anyhow::{Context, anyhow};
use std::time::Duration;
use url::Url;
use voicelink_core::config::{McpToolConfig, SessionConfig};
use voicelink_providers::RealtimeConnectConfig;

use crate::app_config::{AgentSettings, SessionSettings};

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Process environment lookup; empty values count as unset.
pub fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn resolve_api_key(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<String> {
    lookup(API_KEY_ENV).ok_or_else(|| anyhow!("{API_KEY_ENV} is not set"))
}

/// Build the session configuration, pulling tool tokens from the environment.
pub fn resolve_session_config(
    settings: &SessionSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<SessionConfig> {
    let mut cfg = SessionConfig::new(settings.voice.clone(), settings.instructions.clone());

    for tool in &settings.tools {
        let authorization = match tool.authorization_env.as_deref() {
            Some(var) => {
                let token = lookup(var);
                if token.is_none() {
                    log::warn!(
                        "{var} is not set; tool {} will connect without authorization",
                        tool.server_label
                    );
                }
                token
            }
            None => None,
        };

        cfg = cfg.with_tool(McpToolConfig {
            server_label: tool.server_label.clone(),
            server_url: tool.server_url.clone(),
            authorization,
            auto_approved: tool.auto_approved.clone(),
            requires_approval: tool.requires_approval.clone(),
        });
    }

    cfg.validate().context("validate session configuration")?;
    Ok(cfg)
}

pub fn realtime_connect_config(
    agent: &AgentSettings,
    api_key: String,
) -> anyhow::Result<RealtimeConnectConfig> {
    Ok(RealtimeConnectConfig {
        ws_url: Url::parse(&agent.ws_url)
            .with_context(|| format!("parse agent url: {}", agent.ws_url))?,
        api_key,
        model: agent.model.clone(),
        connect_timeout: Duration::from_secs(agent.connect_timeout_secs.max(1)),
        handshake_timeout: Duration::from_secs(agent.handshake_timeout_secs.max(1)),
    })
}
