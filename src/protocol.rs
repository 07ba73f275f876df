use serde::{Deserialize, Serialize};

/// Inbound control message from the dispatcher/button process.
///
/// `{"type":"audio","action":"play","messageId":"..."}`,
/// `{"type":"button","action":"press"}`,
/// `{"type":"chat","action":"link","chatId":"..."}`,
/// `{"type":"system","action":"status"}`
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub action: Option<String>,
    #[serde(rename = "messageId")]
    pub message_id: Option<String>,
    #[serde(rename = "chatId")]
    pub chat_id: Option<String>,
}

/// Outbound activity report.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    #[serde(rename = "type")]
    msg_type: &'static str,
    pub playing: bool,
    pub recording: bool,
}

impl StatusReport {
    pub fn new(playing: bool, recording: bool) -> Self {
        Self {
            msg_type: "status",
            playing,
            recording,
        }
    }
}
