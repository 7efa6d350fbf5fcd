use anyhow::{Context, anyhow};
use serde::Deserialize;
use serde_json::{Value, json};
use voicelink_core::config::{McpToolConfig, SessionConfig};
use voicelink_core::events::{ApprovalRequest, ConversationItem, InboundEvent, ToolCall};
use voicelink_core::ids::EventId;

/// Server events that only matter during the configuration handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeSignal {
    SessionCreated,
    SessionUpdated,
    Rejected { message: String },
}

pub fn parse_handshake_signal(s: &str) -> Option<HandshakeSignal> {
    let v: Value = serde_json::from_str(s).ok()?;
    match v.get("type").and_then(|t| t.as_str())? {
        "session.created" => Some(HandshakeSignal::SessionCreated),
        "session.updated" => Some(HandshakeSignal::SessionUpdated),
        "error" => Some(HandshakeSignal::Rejected {
            message: error_message(&v),
        }),
        _ => None,
    }
}

fn error_message(v: &Value) -> String {
    v.get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or("unknown error")
        .to_string()
}

#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(rename = "type", default)]
    item_type: String,
}

pub fn parse_conversation_item(v: &Value) -> anyhow::Result<ConversationItem> {
    let raw = RawItem::deserialize(v).context("decode conversation item")?;
    match raw.item_type.as_str() {
        "mcp_call" => Ok(ConversationItem::ToolCall(
            ToolCall::deserialize(v).context("decode mcp_call item")?,
        )),
        "mcp_approval_request" => Ok(ConversationItem::ApprovalRequest(
            ApprovalRequest::deserialize(v).context("decode mcp_approval_request item")?,
        )),
        other => Ok(ConversationItem::Other {
            item_type: other.to_string(),
        }),
    }
}

/// Classify one server event. Unknown types become `InboundEvent::Other`.
pub fn parse_server_event(s: &str) -> anyhow::Result<InboundEvent> {
    let v: Value = serde_json::from_str(s).context("decode realtime json")?;
    let t = v
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("missing type"))?;

    match t {
        // Older servers use the un-prefixed names.
        "response.output_audio.delta" | "response.audio.delta" => {
            let delta = v
                .get("delta")
                .and_then(|d| d.as_str())
                .ok_or_else(|| anyhow!("audio delta without payload"))?;
            Ok(InboundEvent::AudioDelta {
                delta: delta.to_string(),
            })
        }
        "response.output_audio_transcript.done" | "response.audio_transcript.done" => {
            let transcript = v
                .get("transcript")
                .and_then(|t| t.as_str())
                .unwrap_or("")
                .to_string();
            Ok(InboundEvent::TranscriptDone { transcript })
        }
        "conversation.item.done" => {
            let item = v
                .get("item")
                .ok_or_else(|| anyhow!("conversation.item.done without item"))?;
            Ok(InboundEvent::ConversationItemDone {
                item: parse_conversation_item(item)?,
            })
        }
        "response.done" => {
            let mut output = Vec::new();
            let items = v
                .get("response")
                .and_then(|r| r.get("output"))
                .and_then(|o| o.as_array());
            for item in items.into_iter().flatten() {
                output.push(parse_conversation_item(item)?);
            }
            Ok(InboundEvent::ResponseDone { output })
        }
        "error" => Ok(InboundEvent::Error {
            message: error_message(&v),
        }),
        other => Ok(InboundEvent::Other {
            event_type: other.to_string(),
        }),
    }
}

fn tool_json(tool: &McpToolConfig) -> Value {
    let mut obj = json!({
        "type": "mcp",
        "server_label": tool.server_label,
        "server_url": tool.server_url,
        "allowed_tools": { "tool_names": tool.allowed_operations() },
        "require_approval": {
            "never": { "tool_names": tool.auto_approved },
            "always": { "tool_names": tool.requires_approval },
        },
    });
    if let (Some(auth), Some(map)) = (tool.authorization.as_ref(), obj.as_object_mut()) {
        map.insert("authorization".into(), Value::String(auth.clone()));
    }
    obj
}

pub fn build_session_update_message(cfg: &SessionConfig, event_id: &EventId) -> String {
    let mut session = json!({
        "type": "realtime",
        "tracing": null,
        "audio": { "output": { "voice": cfg.voice } },
        "instructions": cfg.instructions,
    });

    if !cfg.tools.is_empty() {
        if let Some(map) = session.as_object_mut() {
            map.insert(
                "tools".into(),
                Value::Array(cfg.tools.iter().map(tool_json).collect()),
            );
        }
    }

    json!({
        "type": "session.update",
        "event_id": event_id.to_string(),
        "session": session,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn github_tool() -> McpToolConfig {
        McpToolConfig {
            server_label: "github_mcp".into(),
            server_url: "https://api.githubcopilot.com/mcp/".into(),
            authorization: Some("pat".into()),
            auto_approved: vec!["get_issue".into()],
            requires_approval: vec!["create_repository".into()],
        }
    }

    #[test]
    fn parses_both_audio_delta_spellings() {
        for t in ["response.output_audio.delta", "response.audio.delta"] {
            let s = format!(r#"{{"type":"{t}","delta":"AAA="}}"#);
            assert_eq!(
                parse_server_event(&s).unwrap(),
                InboundEvent::AudioDelta {
                    delta: "AAA=".into()
                }
            );
        }
    }

    #[test]
    fn parses_transcript_done() {
        let s = r#"{"type":"response.output_audio_transcript.done","transcript":"hello"}"#;
        assert_eq!(
            parse_server_event(s).unwrap(),
            InboundEvent::TranscriptDone {
                transcript: "hello".into()
            }
        );
    }

    #[test]
    fn parses_approval_request_item() {
        let s = r#"{"type":"conversation.item.done","item":{"type":"mcp_approval_request","id":"req_1","name":"create_repository","arguments":"{\"name\":\"x\"}","server_label":"github_mcp"}}"#;
        let InboundEvent::ConversationItemDone {
            item: ConversationItem::ApprovalRequest(req),
        } = parse_server_event(s).unwrap()
        else {
            panic!("expected approval request");
        };
        assert_eq!(req.id, "req_1");
        assert_eq!(req.name, "create_repository");
        assert_eq!(req.arguments, r#"{"name":"x"}"#);
    }

    #[test]
    fn parses_tool_call_item_with_output() {
        let s = r#"{"type":"conversation.item.done","item":{"type":"mcp_call","id":"call_1","name":"get_issue","arguments":"{}","output":"ok"}}"#;
        let InboundEvent::ConversationItemDone {
            item: ConversationItem::ToolCall(call),
        } = parse_server_event(s).unwrap()
        else {
            panic!("expected tool call");
        };
        assert_eq!(call.id, "call_1");
        assert_eq!(call.output.as_deref(), Some("ok"));
    }

    #[test]
    fn unknown_item_type_is_kept_as_other() {
        let s = r#"{"type":"conversation.item.done","item":{"type":"message","id":"m"}}"#;
        assert_eq!(
            parse_server_event(s).unwrap(),
            InboundEvent::ConversationItemDone {
                item: ConversationItem::Other {
                    item_type: "message".into()
                }
            }
        );
    }

    #[test]
    fn parses_response_done_output_list() {
        let s = r#"{"type":"response.done","response":{"output":[{"type":"mcp_call","id":"c","name":"n","arguments":""},{"type":"message"}]}}"#;
        let InboundEvent::ResponseDone { output } = parse_server_event(s).unwrap() else {
            panic!("expected response.done");
        };
        assert_eq!(output.len(), 2);
        assert_eq!(output[0].item_type(), "mcp_call");
        assert_eq!(output[1].item_type(), "message");
    }

    #[test]
    fn parses_error_message() {
        let s = r#"{"type":"error","error":{"message":"bad"}}"#;
        assert_eq!(
            parse_server_event(s).unwrap(),
            InboundEvent::Error {
                message: "bad".into()
            }
        );
    }

    #[test]
    fn unknown_event_is_other_and_garbage_errors() {
        assert_eq!(
            parse_server_event(r#"{"type":"rate_limits.updated"}"#).unwrap(),
            InboundEvent::Other {
                event_type: "rate_limits.updated".into()
            }
        );
        assert!(parse_server_event("not json").is_err());
        assert!(parse_server_event(r#"{"no":"type"}"#).is_err());
    }

    #[test]
    fn handshake_signals() {
        assert_eq!(
            parse_handshake_signal(r#"{"type":"session.updated","session":{}}"#),
            Some(HandshakeSignal::SessionUpdated)
        );
        assert_eq!(
            parse_handshake_signal(r#"{"type":"error","error":{"message":"nope"}}"#),
            Some(HandshakeSignal::Rejected {
                message: "nope".into()
            })
        );
        assert_eq!(parse_handshake_signal(r#"{"type":"response.done"}"#), None);
    }

    #[test]
    fn session_update_carries_tools_and_approval_partition() {
        let cfg = SessionConfig::new("marin", "be nice").with_tool(github_tool());
        let msg = build_session_update_message(&cfg, &EventId::new());
        let v: Value = serde_json::from_str(&msg).unwrap();

        assert_eq!(v["type"], "session.update");
        assert!(v["event_id"].as_str().unwrap().starts_with("evt_"));
        assert_eq!(v["session"]["audio"]["output"]["voice"], "marin");
        assert_eq!(v["session"]["instructions"], "be nice");

        let tool = &v["session"]["tools"][0];
        assert_eq!(tool["type"], "mcp");
        assert_eq!(tool["authorization"], "pat");
        assert_eq!(
            tool["allowed_tools"]["tool_names"],
            json!(["get_issue", "create_repository"])
        );
        assert_eq!(tool["require_approval"]["never"]["tool_names"], json!(["get_issue"]));
        assert_eq!(
            tool["require_approval"]["always"]["tool_names"],
            json!(["create_repository"])
        );
    }

    #[test]
    fn session_update_without_tools_omits_tools_key() {
        let cfg = SessionConfig::new("marin", "hi");
        let msg = build_session_update_message(&cfg, &EventId::new());
        let v: Value = serde_json::from_str(&msg).unwrap();
        assert!(v["session"].get("tools").is_none());
    }
}
