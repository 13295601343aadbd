//! Pure assembly of the final response shape from remote material.

use geniebridge_core::{AttachmentId, AttachmentResult, ConversationId, Message, QueryOutcome};
use serde_json::Value;

/// Map a terminal (or just-submitted) message and an optionally fetched
/// attachment into the single outcome shape handed to callers. Total: every
/// message field carries over, nothing is reformatted.
pub fn assemble_outcome(
    conversation_id: ConversationId,
    message: Message,
    attachment: Option<AttachmentResult>,
) -> QueryOutcome {
    let result_data = attachment.as_ref().and_then(AttachmentResult::to_grid);

    QueryOutcome {
        conversation_id,
        message_id: message.id,
        status: message.status,
        content: message.content,
        query_result: message.query_result,
        attachments: message.attachments,
        result_data,
    }
}

/// Pick the attachment worth fetching results for: the first one carrying a
/// generated query, falling back to the first one with any identifier. The
/// remote contract names the id field inconsistently (`attachment_id` vs
/// `id`).
pub fn first_query_attachment_id(message: &Message) -> Option<AttachmentId> {
    message
        .attachments
        .iter()
        .filter(|attachment| attachment.get("query").is_some())
        .find_map(attachment_id)
        .or_else(|| message.attachments.iter().find_map(attachment_id))
}

fn attachment_id(attachment: &Value) -> Option<AttachmentId> {
    attachment
        .get("attachment_id")
        .or_else(|| attachment.get("id"))
        .and_then(Value::as_str)
        .map(|id| AttachmentId(id.to_string()))
}
