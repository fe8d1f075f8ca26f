//! WebSocket frame types for the real-time channel.
//!
//! Inbound: `{ "type": string, "data"?: object, "content"?: string }`.
//! Outbound: `{ "type": string, "data": object }`.

use crate::support::SupportReply;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Inbound frame, discriminated on `type` (auth, speech_practice, chat_message, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub content: Option<String>,
}

/// Payload of an `auth` frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthData {
    #[serde(default)]
    pub token: Option<String>,
}

/// Payload of a `speech_practice` frame.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechPracticeData {
    #[serde(default)]
    pub exercise_type: Option<String>,
}

/// Outbound frame sent as a reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub typ: String,
    pub data: serde_json::Value,
}

impl OutboundFrame {
    pub fn new(typ: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            typ: typ.into(),
            data,
        }
    }

    /// Reply to a successful in-band auth.
    pub fn auth_success(user_id: &str) -> Self {
        Self::new("auth_success", json!({ "userId": user_id }))
    }

    /// Reply to a failed in-band auth; the connection stays open.
    pub fn auth_error(message: &str) -> Self {
        Self::new("auth_error", json!({ "message": message }))
    }

    /// Acknowledgement for a speech_practice frame.
    pub fn speech_feedback() -> Self {
        Self::new("speech_feedback", json!({ "status": "processing" }))
    }

    /// Support reply for a chat_message frame.
    pub fn ai_response(reply: &SupportReply) -> Self {
        Self::new(
            "ai_response",
            json!({
                "response": reply.response,
                "emotion": reply.emotion,
                "supportType": reply.support_type,
            }),
        )
    }

    /// Generic processing error; the connection stays open.
    pub fn error(message: &str) -> Self {
        Self::new("error", json!({ "message": message }))
    }

    /// Wire text for this frame.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","data":{"message":"internal serialization error"}}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_frame_accepts_data_and_content() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"type":"auth","data":{"token":"user-1"}}"#).expect("auth");
        assert_eq!(frame.typ, "auth");
        let auth: AuthData = serde_json::from_value(frame.data).expect("auth data");
        assert_eq!(auth.token.as_deref(), Some("user-1"));

        let frame: InboundFrame =
            serde_json::from_str(r#"{"type":"chat_message","content":"hi"}"#).expect("chat");
        assert_eq!(frame.content.as_deref(), Some("hi"));
    }

    #[test]
    fn outbound_frames_have_expected_shape() {
        let text = OutboundFrame::auth_success("user-9").to_text();
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["type"], "auth_success");
        assert_eq!(value["data"]["userId"], "user-9");

        let text = OutboundFrame::speech_feedback().to_text();
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["data"]["status"], "processing");
    }
}
