//! Downstream client for the Genie conversation service: token acquisition,
//! conversation transport, and the polling orchestrator that turns an
//! asynchronous remote exchange into one synchronous answer.

pub mod assembler;
pub mod auth;
pub mod orchestrator;
pub mod transport;

pub use assembler::{assemble_outcome, first_query_attachment_id};
pub use auth::{Credential, DelegatedTokenProvider, GrantKind, ServiceTokenProvider, TokenProvider};
pub use orchestrator::{PollPolicy, QueryOrchestrator};
pub use transport::{ConversationApi, GenieTransport};
