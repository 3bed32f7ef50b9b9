//! Types for communication with the Wechaty sidecar.

use serde::{Deserialize, Serialize};

use crate::bot::{Contact, FileBox};

/// A request from Rust to the sidecar, correlated by `requestId`.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(flatten)]
    pub command: BridgeCommand,
}

/// Operations the sidecar performs on its Wechaty instance.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    Start {
        name: String,
        puppet: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    Stop,
    FindContact {
        #[serde(rename = "contactId")]
        contact_id: String,
    },
    SayText {
        #[serde(rename = "contactId")]
        contact_id: String,
        text: String,
    },
    SayFile {
        #[serde(rename = "contactId")]
        contact_id: String,
        file: FileBox,
    },
}

impl BridgeCommand {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Stop => "stop",
            Self::FindContact { .. } => "find_contact",
            Self::SayText { .. } => "say_text",
            Self::SayFile { .. } => "say_file",
        }
    }
}

/// Messages received from the sidecar.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    Message(RawMessage),
    Scan {
        qrcode: String,
        #[serde(default)]
        status: i64,
    },
    Login {
        user: String,
    },
    Logout {
        user: String,
    },
    Error {
        error: String,
    },
    Result {
        #[serde(rename = "requestId")]
        request_id: String,
        success: bool,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        contact: Option<Contact>,
    },
}

/// A raw `message` event as Wechaty reports it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawMessage {
    #[serde(rename = "talkerId")]
    pub talker_id: String,
    #[serde(rename = "talkerName", default)]
    pub talker_name: String,
    #[serde(rename = "roomId", default)]
    pub room_id: Option<String>,
    #[serde(rename = "toId", default)]
    pub to_id: Option<String>,
    #[serde(rename = "toName", default)]
    pub to_name: Option<String>,
    #[serde(default)]
    pub text: String,
    /// Unix milliseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// An inbound direct message that passed the dispatcher's filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WechatMessage {
    pub text: String,
    pub from: String,
    pub from_id: String,
    pub to: String,
    pub to_id: String,
    pub room: Option<String>,
    pub is_group: bool,
    /// Unix milliseconds.
    pub timestamp: i64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn request_wire_format() {
        let request = BridgeRequest {
            request_id: "r1".into(),
            command: BridgeCommand::SayText {
                contact_id: "wxid_a".into(),
                text: "hi".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "requestId": "r1", "type": "say_text", "contactId": "wxid_a", "text": "hi" })
        );

        let stop = BridgeRequest {
            request_id: "r2".into(),
            command: BridgeCommand::Stop,
        };
        assert_eq!(
            serde_json::to_value(&stop).unwrap(),
            json!({ "requestId": "r2", "type": "stop" })
        );
    }

    #[test]
    fn start_omits_missing_token() {
        let request = BridgeRequest {
            request_id: "r".into(),
            command: BridgeCommand::Start {
                name: "bot".into(),
                puppet: "wechat-puppet-wechat4u".into(),
                token: None,
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("token").is_none());
        assert_eq!(value["puppet"], "wechat-puppet-wechat4u");
    }

    #[test]
    fn parses_message_event() {
        let msg: SidecarMessage = serde_json::from_value(json!({
            "type": "message",
            "talkerId": "@abc",
            "talkerName": "Alice",
            "toId": "wxid_bot",
            "text": "hello",
            "timestamp": 1700000000000i64
        }))
        .unwrap();
        let SidecarMessage::Message(raw) = msg else {
            panic!("expected message");
        };
        assert_eq!(raw.talker_id, "@abc");
        assert_eq!(raw.room_id, None);
        assert_eq!(raw.to_name, None);
        assert_eq!(raw.timestamp, Some(1_700_000_000_000));
    }

    #[test]
    fn parses_result_with_contact() {
        let msg: SidecarMessage = serde_json::from_value(json!({
            "type": "result",
            "requestId": "r9",
            "success": true,
            "contact": { "id": "wxid_a", "name": "Alice" }
        }))
        .unwrap();
        match msg {
            SidecarMessage::Result {
                request_id,
                success,
                contact,
                error,
            } => {
                assert_eq!(request_id, "r9");
                assert!(success);
                assert!(error.is_none());
                assert_eq!(contact.unwrap().name, "Alice");
            },
            other => panic!("unexpected: {other:?}"),
        }
    }
}
