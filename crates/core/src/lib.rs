pub mod config;
pub mod domain;
pub mod errors;

pub use domain::conversation::{Conversation, ConversationId, SpaceId};
pub use domain::message::{Message, MessageError, MessageId, MessageStatus};
pub use domain::result::{
    AttachmentId, AttachmentResult, ColumnInfo, QueryOutcome, ResultChunk, ResultData,
    ResultManifest, ResultSchema, StatementResponse, TypedCell, TypedRow,
};
pub use errors::GenieError;
