//! Wire payloads exchanged with the Portal service.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Clone, Debug)]
pub struct ChatRequest<'a> {
    pub message: &'a str,
}

/// Reply body the chat endpoint returns on success.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatReplyPayload {
    pub reply: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Serialize, Clone, Debug)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Finalized reply handed back to the caller of `send`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatReply {
    pub text: String,
    pub conversation_id: Option<String>,
    /// Portal ID the reply was served under.
    pub portal_id: String,
    /// Total transport attempts the send needed, including retries.
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_payload_tolerates_extra_fields() {
        let payload: ChatReplyPayload =
            serde_json::from_str(r#"{"reply":"hi","tokens":12,"conversation_id":"c-1"}"#)
                .expect("payload should parse");
        assert_eq!(payload.reply, "hi");
        assert_eq!(payload.conversation_id.as_deref(), Some("c-1"));
    }

    #[test]
    fn reply_payload_requires_reply_field() {
        let result = serde_json::from_str::<ChatReplyPayload>(r#"{"status":"ok"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn login_request_serializes_credentials() {
        let body = serde_json::to_value(LoginRequest {
            username: "alice",
            password: "s3cret",
        })
        .expect("serialize");
        assert_eq!(body, serde_json::json!({"username":"alice","password":"s3cret"}));
    }
}
