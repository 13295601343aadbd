use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::conversation::ConversationId;
use crate::domain::message::{MessageId, MessageStatus};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentId(pub String);

impl std::fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payload of a fetched query-result attachment.
///
/// The remote service wraps the SQL result in a statement-execution envelope.
/// Every level is optional because partially populated envelopes have been
/// observed for clarification-only messages.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentResult {
    #[serde(default)]
    pub statement_response: Option<StatementResponse>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementResponse {
    #[serde(default)]
    pub manifest: Option<ResultManifest>,
    #[serde(default)]
    pub result: Option<ResultChunk>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultManifest {
    #[serde(default)]
    pub schema: ResultSchema,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSchema {
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(default)]
    pub type_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultChunk {
    #[serde(default)]
    pub data_typed_array: Vec<TypedRow>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedRow {
    #[serde(default)]
    pub values: Vec<TypedCell>,
}

/// One cell of a typed result grid. The remote schema is the source of truth
/// for the value's type; the string representation is never reinterpreted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedCell {
    #[serde(default, rename = "str")]
    pub value: Option<String>,
}

/// Flattened tabular result: column names in remote order, rows of cell
/// strings exactly as received.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultData {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl AttachmentResult {
    /// Flatten the statement envelope into a grid, preserving column order
    /// and cell strings. Returns `None` when the envelope carries no result.
    pub fn to_grid(&self) -> Option<ResultData> {
        let statement = self.statement_response.as_ref()?;
        let columns = statement
            .manifest
            .as_ref()
            .map(|manifest| {
                manifest.schema.columns.iter().map(|column| column.name.clone()).collect()
            })
            .unwrap_or_default();
        let rows = statement
            .result
            .as_ref()?
            .data_typed_array
            .iter()
            .map(|row| row.values.iter().map(|cell| cell.value.clone()).collect())
            .collect();

        Some(ResultData { columns, rows })
    }
}

/// The one response shape handed back to callers: a message plus whatever
/// result material was available, with nothing dropped or reformatted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub status: MessageStatus,
    pub content: String,
    pub query_result: Option<Value>,
    pub attachments: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_data: Option<ResultData>,
}
