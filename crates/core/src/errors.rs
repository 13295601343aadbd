use thiserror::Error;

/// Failure taxonomy for the orchestration engine.
///
/// Everything a downstream call can do wrong is translated into one of these
/// variants before it crosses the orchestrator boundary; raw transport errors
/// never reach callers.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GenieError {
    /// The identity authority rejected a token request (bad assertion, bad
    /// secret, missing consent). Fatal for the current request; never retried.
    #[error("identity authority rejected the token request: {detail}")]
    AuthExchange { detail: String },

    /// A downstream call returned a non-2xx status.
    #[error("downstream request returned status {status}: {body}")]
    RemoteStatus { status: u16, body: String },

    /// A downstream call failed before producing a status (connect, timeout).
    #[error("downstream connection failed: {0}")]
    Connection(String),

    /// The downstream response body could not be decoded.
    #[error("failed to decode downstream response: {0}")]
    Decode(String),

    /// Conversation creation failed; message submission was never attempted.
    #[error("conversation creation failed: {source}")]
    ConversationCreateFailed {
        #[source]
        source: Box<GenieError>,
    },

    /// Message creation failed. Never auto-retried: resubmission would create
    /// duplicate remote work.
    #[error("message creation failed: {source}")]
    MessageCreateFailed {
        #[source]
        source: Box<GenieError>,
    },

    /// The polling budget ran out before the message reached a terminal
    /// status. Carries the identifiers so the caller can resume later.
    #[error(
        "message `{message_id}` in conversation `{conversation_id}` did not reach a terminal \
         status within {attempts} polls"
    )]
    PollTimeout { conversation_id: String, message_id: String, attempts: u32 },

    /// The message reached FAILED; `detail` is the remote explanation,
    /// verbatim.
    #[error("remote query failed: {detail}")]
    RemoteJobFailed { conversation_id: String, message_id: String, detail: String },
}

impl GenieError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RemoteStatus { status: 404, .. })
    }

    /// Transport-level failures that a read path may treat as transient.
    /// Create calls are excluded by construction: they are wrapped into
    /// `MessageCreateFailed`/`ConversationCreateFailed` before this is asked.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::RemoteStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::GenieError;

    #[test]
    fn not_found_is_distinguished_from_server_errors() {
        let not_found = GenieError::RemoteStatus { status: 404, body: "missing".to_string() };
        let server = GenieError::RemoteStatus { status: 503, body: "busy".to_string() };

        assert!(not_found.is_not_found());
        assert!(!not_found.is_transient());
        assert!(!server.is_not_found());
        assert!(server.is_transient());
    }

    #[test]
    fn auth_exchange_is_never_transient() {
        let error = GenieError::AuthExchange { detail: "AADSTS50013: assertion invalid".into() };
        assert!(!error.is_transient());
    }

    #[test]
    fn create_failures_carry_their_cause() {
        let cause = GenieError::RemoteStatus { status: 403, body: "forbidden".to_string() };
        let wrapped = GenieError::MessageCreateFailed { source: Box::new(cause) };
        assert!(wrapped.to_string().contains("403"));
        assert!(!wrapped.is_transient());
    }

    #[test]
    fn remote_job_failure_preserves_detail_verbatim() {
        let error = GenieError::RemoteJobFailed {
            conversation_id: "conv-1".to_string(),
            message_id: "msg-1".to_string(),
            detail: "Ambiguous column `amount`".to_string(),
        };
        assert!(error.to_string().ends_with("Ambiguous column `amount`"));
    }
}
