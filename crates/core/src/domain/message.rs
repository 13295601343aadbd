use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote execution status of a message.
///
/// Status transitions are driven exclusively by the remote service; this side
/// only observes them. Any value outside the documented set deserializes into
/// `Other` and is treated as non-terminal, so new transient statuses on the
/// remote side do not break polling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageStatus {
    Submitted,
    ExecutingQuery,
    Completed,
    Failed,
    Other(String),
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_remote_str(&self) -> &str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::ExecutingQuery => "EXECUTING_QUERY",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for MessageStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "SUBMITTED" => Self::Submitted,
            "EXECUTING_QUERY" => Self::ExecutingQuery,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            _ => Self::Other(raw),
        }
    }
}

impl From<MessageStatus> for String {
    fn from(status: MessageStatus) -> Self {
        status.as_remote_str().to_string()
    }
}

/// Error annotation the remote service attaches to a FAILED message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageError {
    #[serde(default, rename = "type")]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One turn (question or generated answer) within a conversation.
///
/// `query_result` and `attachments` stay schemaless (`Value`) because the
/// remote contract is inconsistent: results are sometimes inlined on the
/// message and sometimes only available through the attachment endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(default)]
    pub content: String,
    pub status: MessageStatus,
    #[serde(default)]
    pub query_result: Option<Value>,
    #[serde(default)]
    pub attachments: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MessageError>,
}

impl Message {
    /// The remote-provided explanation for a FAILED message, passed through
    /// verbatim. Falls back to the message content when no error annotation
    /// is present.
    pub fn failure_detail(&self) -> String {
        self.error
            .as_ref()
            .and_then(|error| error.error.clone())
            .filter(|detail| !detail.is_empty())
            .unwrap_or_else(|| self.content.clone())
    }

    /// A completed message with neither a result nor attachments is a
    /// clarification response, not an error.
    pub fn is_empty_interpretation(&self) -> bool {
        self.status == MessageStatus::Completed
            && self.query_result.is_none()
            && self.attachments.is_empty()
    }
}
