//! Tagged JSON envelope exchanged over the AI WebSocket (§4.5).
//!
//! Audio itself travels either as a JSON field (base64) or as a raw binary
//! WebSocket frame; the envelopes below cover every non-audio message.
//! Unknown `type` values are accepted and logged rather than rejected,
//! since the vocabulary is schema-light by design (§9).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "init")]
    Init {
        call_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        phone: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        resume: bool,
    },
    #[serde(rename = "update_phone")]
    UpdatePhone {
        phone: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    #[serde(rename = "audio")]
    Audio { audio: String },
    #[serde(rename = "cancel_response")]
    CancelResponse {},
    #[serde(rename = "tool_result")]
    ToolResult { call_id: String, result: Value },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    #[serde(rename = "session_ready")]
    SessionReady {},
    #[serde(rename = "session_resumed")]
    SessionResumed {},
    #[serde(rename = "audio_delta")]
    AudioDelta { delta: String },
    #[serde(rename = "address_tts")]
    AddressTts { audio: String },
    #[serde(rename = "transcript")]
    Transcript { role: String, text: String },
    #[serde(rename = "user_speaking")]
    UserSpeaking { speaking: bool },
    #[serde(rename = "tool_call")]
    ToolCall { call_id: String, name: String, arguments: Value },
    #[serde(rename = "session_handoff")]
    SessionHandoff { resume_token: Option<String> },
    #[serde(rename = "call_ended")]
    CallEnded { reason: Option<String> },
    #[serde(rename = "error")]
    Error { message: String, retrying: Option<bool> },
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_serializes_with_tag() {
        let msg = OutboundMessage::Init {
            call_id: "ast-1".to_owned(),
            phone: None,
            name: None,
            resume: false,
        };
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["type"], "init");
        assert_eq!(json["call_id"], "ast-1");
        assert!(json.get("phone").is_none());
    }

    #[test]
    fn unknown_type_falls_back_without_error() {
        let parsed: InboundMessage = serde_json::from_str(r#"{"type":"something_new","foo":1}"#).expect("parse");
        assert!(matches!(parsed, InboundMessage::Unknown));
    }

    #[test]
    fn tool_call_roundtrips_arguments() {
        let json = r#"{"type":"tool_call","call_id":"c1","name":"end_call","arguments":{"reason":"done"}}"#;
        let parsed: InboundMessage = serde_json::from_str(json).expect("parse");
        match parsed {
            InboundMessage::ToolCall { call_id, name, arguments } => {
                assert_eq!(call_id, "c1");
                assert_eq!(name, "end_call");
                assert_eq!(arguments["reason"], "done");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
