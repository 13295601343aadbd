use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpaceId(pub String);

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for SpaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A persistent thread of natural-language exchanges tied to one space.
///
/// Created by the remote service; timestamps and title are owned remotely and
/// never mutated locally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub space_id: SpaceId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_timestamp: i64,
    #[serde(default)]
    pub last_updated_timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::{Conversation, ConversationId, SpaceId};

    #[test]
    fn deserializes_remote_conversation_payload() {
        let conversation: Conversation = serde_json::from_str(
            r#"{
                "id": "conv-1",
                "space_id": "space-9",
                "title": "Top opportunities",
                "created_timestamp": 1718000000000,
                "last_updated_timestamp": 1718000001000
            }"#,
        )
        .expect("conversation payload should deserialize");

        assert_eq!(conversation.id, ConversationId("conv-1".to_string()));
        assert_eq!(conversation.space_id, SpaceId("space-9".to_string()));
        assert_eq!(conversation.title.as_deref(), Some("Top opportunities"));
    }

    #[test]
    fn tolerates_missing_title_and_timestamps() {
        let conversation: Conversation =
            serde_json::from_str(r#"{"id": "conv-2", "space_id": "space-9"}"#)
                .expect("minimal payload should deserialize");

        assert!(conversation.title.is_none());
        assert_eq!(conversation.created_timestamp, 0);
    }
}
