use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const APPROVAL_RESPONSE_PREFIX: &str = "mcp_rsp_";
pub const APPROVAL_SUFFIX_LEN: usize = 21;

/// Identifier of an approval-response item: `mcp_rsp_` + 21 alphanumerics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalResponseId(pub String);

impl ApprovalResponseId {
    pub fn generate() -> Self {
        // OsRng is the operating system CSPRNG.
        let suffix: String = OsRng
            .sample_iter(&Alphanumeric)
            .take(APPROVAL_SUFFIX_LEN)
            .map(char::from)
            .collect();
        Self(format!("{APPROVAL_RESPONSE_PREFIX}{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_well_formed(s: &str) -> bool {
        s.strip_prefix(APPROVAL_RESPONSE_PREFIX).is_some_and(|rest| {
            rest.len() == APPROVAL_SUFFIX_LEN && rest.bytes().all(|b| b.is_ascii_alphanumeric())
        })
    }
}

/// Client-side event id; echoed back by the agent in error events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "evt_{}", self.0.simple())
    }
}
