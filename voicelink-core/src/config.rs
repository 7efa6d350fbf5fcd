use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Everything the agent needs to know before the first audio frame.
///
/// Built once before connecting and never mutated after the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub voice: String,
    pub instructions: String,
    #[serde(default)]
    pub tools: Vec<McpToolConfig>,
}

/// A remote tool server the agent may call on the user's behalf.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpToolConfig {
    pub server_label: String,
    pub server_url: String,
    #[serde(default)]
    pub authorization: Option<String>,
    /// Operations the agent may run without asking.
    #[serde(default)]
    pub auto_approved: Vec<String>,
    /// Operations that must pass the approval gate first.
    #[serde(default)]
    pub requires_approval: Vec<String>,
}

// Authorization tokens must never end up in logs.
impl std::fmt::Debug for McpToolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpToolConfig")
            .field("server_label", &self.server_label)
            .field("server_url", &self.server_url)
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .field("auto_approved", &self.auto_approved)
            .field("requires_approval", &self.requires_approval)
            .finish()
    }
}

impl McpToolConfig {
    /// Union of both approval partitions, in declaration order.
    pub fn allowed_operations(&self) -> Vec<String> {
        let mut out = self.auto_approved.clone();
        for name in &self.requires_approval {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
        out
    }

    pub fn needs_approval(&self, operation: &str) -> bool {
        self.requires_approval.iter().any(|n| n == operation)
    }
}

impl SessionConfig {
    pub fn new(voice: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            voice: voice.into(),
            instructions: instructions.into(),
            tools: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: McpToolConfig) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.voice.trim().is_empty() {
            return Err(ConfigError::EmptyVoice);
        }

        for (index, tool) in self.tools.iter().enumerate() {
            if tool.server_label.trim().is_empty() {
                return Err(ConfigError::EmptyToolLabel { index });
            }
            if tool.server_url.trim().is_empty() {
                return Err(ConfigError::EmptyToolUrl {
                    label: tool.server_label.clone(),
                });
            }
            if let Some(op) = tool
                .auto_approved
                .iter()
                .find(|op| tool.requires_approval.contains(op))
            {
                return Err(ConfigError::OverlappingApproval {
                    label: tool.server_label.clone(),
                    operation: op.clone(),
                });
            }
        }

        Ok(())
    }
}
