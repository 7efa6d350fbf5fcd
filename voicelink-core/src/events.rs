use serde::{Deserialize, Serialize};

use crate::ids::{ApprovalResponseId, EventId};
use crate::types::PcmFrame;

/// A remote tool invocation that has already run; `output` is what the agent recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: String,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub server_label: Option<String>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

/// The agent asking permission before invoking a gated tool operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: String,
    #[serde(default)]
    pub server_label: Option<String>,
}

impl ApprovalRequest {
    pub fn prompt(&self) -> String {
        format!(
            "Agent requests: {}({}). Approve? [y/N]: ",
            self.name, self.arguments
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationItem {
    ToolCall(ToolCall),
    ApprovalRequest(ApprovalRequest),
    Other { item_type: String },
}

impl ConversationItem {
    pub fn item_type(&self) -> &str {
        match self {
            ConversationItem::ToolCall(_) => "mcp_call",
            ConversationItem::ApprovalRequest(_) => "mcp_approval_request",
            ConversationItem::Other { item_type } => item_type,
        }
    }
}

/// Events received from the agent, already classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    AudioDelta { delta: String },
    TranscriptDone { transcript: String },
    ConversationItemDone { item: ConversationItem },
    ResponseDone { output: Vec<ConversationItem> },
    Error { message: String },
    Other { event_type: String },
}

impl InboundEvent {
    pub fn event_type(&self) -> &str {
        match self {
            InboundEvent::AudioDelta { .. } => "response.output_audio.delta",
            InboundEvent::TranscriptDone { .. } => "response.output_audio_transcript.done",
            InboundEvent::ConversationItemDone { .. } => "conversation.item.done",
            InboundEvent::ResponseDone { .. } => "response.done",
            InboundEvent::Error { .. } => "error",
            InboundEvent::Other { event_type } => event_type,
        }
    }

    pub fn is_audio_delta(&self) -> bool {
        matches!(self, InboundEvent::AudioDelta { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum OutboundItem {
    #[serde(rename = "mcp_approval_response")]
    ApprovalResponse {
        id: ApprovalResponseId,
        approve: bool,
        approval_request_id: String,
    },
}

/// Events sent to the agent. Each is sent at most once.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend { audio: String },

    #[serde(rename = "response.create")]
    ResponseCreate,

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: OutboundItem },
}

// Audio payloads are large; keep them out of debug logs.
impl std::fmt::Debug for OutboundEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboundEvent::AudioAppend { audio } => f
                .debug_struct("AudioAppend")
                .field("audio_len", &audio.len())
                .finish(),
            OutboundEvent::ResponseCreate => f.write_str("ResponseCreate"),
            OutboundEvent::ConversationItemCreate { item } => f
                .debug_struct("ConversationItemCreate")
                .field("item", item)
                .finish(),
        }
    }
}

impl OutboundEvent {
    pub fn audio_append(frame: &PcmFrame) -> Self {
        OutboundEvent::AudioAppend {
            audio: frame.to_base64(),
        }
    }

    pub fn approval_response(decision: &ApprovalDecision) -> Self {
        OutboundEvent::ConversationItemCreate {
            item: OutboundItem::ApprovalResponse {
                id: ApprovalResponseId::generate(),
                approve: decision.approve,
                approval_request_id: decision.request_id.clone(),
            },
        }
    }

    pub const fn event_type(&self) -> &'static str {
        match self {
            OutboundEvent::AudioAppend { .. } => "input_audio_buffer.append",
            OutboundEvent::ResponseCreate => "response.create",
            OutboundEvent::ConversationItemCreate { .. } => "conversation.item.create",
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, OutboundEvent::AudioAppend { .. })
    }

    /// Serialize for the wire, tagging the event with a client event id.
    pub fn to_wire_json(&self, event_id: &EventId) -> serde_json::Result<String> {
        let mut v = serde_json::to_value(self)?;
        if let Some(map) = v.as_object_mut() {
            map.insert(
                "event_id".into(),
                serde_json::Value::String(event_id.to_string()),
            );
        }
        serde_json::to_string(&v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    Human,
    Timeout,
    GateFailed,
}

/// Outcome of one approval wait. Consumed once to build the response event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub request_id: String,
    pub approve: bool,
    pub source: DecisionSource,
}

impl ApprovalDecision {
    /// Only a case-insensitive "y" approves; everything else denies,
    /// including a "y" with surrounding whitespace.
    pub fn from_answer(request_id: impl Into<String>, answer: &str) -> Self {
        Self {
            request_id: request_id.into(),
            approve: answer.eq_ignore_ascii_case("y"),
            source: DecisionSource::Human,
        }
    }

    pub fn denied(request_id: impl Into<String>, source: DecisionSource) -> Self {
        Self {
            request_id: request_id.into(),
            approve: false,
            source,
        }
    }
}
