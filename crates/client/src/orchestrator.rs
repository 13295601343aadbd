//! Conversation orchestration: create or resume a conversation, post the
//! question, poll to a terminal status with bounded backoff, and fetch the
//! result attachment.

use std::time::Duration;

use geniebridge_core::config::GenieConfig;
use geniebridge_core::{
    AttachmentResult, ConversationId, GenieError, Message, MessageId, MessageStatus, QueryOutcome,
    SpaceId,
};
use tracing::{debug, info, warn};

use crate::assembler::{assemble_outcome, first_query_attachment_id};
use crate::transport::ConversationApi;

/// Polling budget. Delays double from `initial_delay` up to `max_delay`;
/// `max_attempts` is a hard cap, after which the poll is abandoned with the
/// identifiers needed to resume.
#[derive(Clone, Copy, Debug)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl PollPolicy {
    pub fn from_genie_config(config: &GenieConfig) -> Self {
        Self {
            max_attempts: config.poll_max_attempts,
            initial_delay: Duration::from_millis(config.poll_initial_delay_ms),
            max_delay: Duration::from_millis(config.poll_max_delay_ms),
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 0..attempt {
            delay = delay.saturating_mul(2);
            if delay >= self.max_delay {
                return self.max_delay;
            }
        }
        delay.min(self.max_delay)
    }
}

pub struct QueryOrchestrator<T: ConversationApi> {
    api: T,
    policy: PollPolicy,
}

impl<T: ConversationApi> QueryOrchestrator<T> {
    pub fn new(api: T, policy: PollPolicy) -> Self {
        Self { api, policy }
    }

    /// Submit a question without waiting for the answer. Returns the message
    /// as the remote service accepted it, typically still `SUBMITTED`.
    pub async fn submit(
        &self,
        space_id: &SpaceId,
        query: &str,
        conversation_id: Option<ConversationId>,
    ) -> Result<QueryOutcome, GenieError> {
        let conversation_id = self.ensure_conversation(space_id, conversation_id).await?;
        let message = self.create_message(space_id, &conversation_id, query).await?;
        Ok(assemble_outcome(conversation_id, message, None))
    }

    /// Submit a question and block until the remote answer is terminal.
    ///
    /// `fetch_results` additionally pulls the first query-result attachment
    /// once the message completes; a failed attachment fetch degrades to the
    /// inline message payload instead of failing the whole query.
    pub async fn query_and_wait(
        &self,
        space_id: &SpaceId,
        query: &str,
        conversation_id: Option<ConversationId>,
        fetch_results: bool,
    ) -> Result<QueryOutcome, GenieError> {
        let conversation_id = self.ensure_conversation(space_id, conversation_id).await?;
        let message = self.create_message(space_id, &conversation_id, query).await?;
        let message_id = message.id.clone();

        let message = self.poll_until_terminal(space_id, &conversation_id, &message_id).await?;

        if message.status == MessageStatus::Failed {
            return Err(GenieError::RemoteJobFailed {
                conversation_id: conversation_id.to_string(),
                message_id: message_id.to_string(),
                detail: message.failure_detail(),
            });
        }

        let attachment = if fetch_results {
            self.fetch_first_result(space_id, &conversation_id, &message).await
        } else {
            None
        };

        info!(
            event_name = "orchestrator.query_completed",
            conversation_id = %conversation_id,
            message_id = %message_id,
            status = message.status.as_remote_str(),
            "query reached terminal status"
        );
        Ok(assemble_outcome(conversation_id, message, attachment))
    }

    async fn ensure_conversation(
        &self,
        space_id: &SpaceId,
        existing: Option<ConversationId>,
    ) -> Result<ConversationId, GenieError> {
        if let Some(conversation_id) = existing {
            return Ok(conversation_id);
        }

        let conversation = self
            .api
            .create_conversation(space_id)
            .await
            .map_err(|source| GenieError::ConversationCreateFailed { source: Box::new(source) })?;
        debug!(
            event_name = "orchestrator.conversation_created",
            conversation_id = %conversation.id,
            "created remote conversation"
        );
        Ok(conversation.id)
    }

    async fn create_message(
        &self,
        space_id: &SpaceId,
        conversation_id: &ConversationId,
        query: &str,
    ) -> Result<Message, GenieError> {
        // Not retried on failure: resubmitting would queue duplicate remote
        // work under the caller's identity.
        let message = self
            .api
            .create_message(space_id, conversation_id, query)
            .await
            .map_err(|source| GenieError::MessageCreateFailed { source: Box::new(source) })?;
        info!(
            event_name = "orchestrator.message_submitted",
            conversation_id = %conversation_id,
            message_id = %message.id,
            "submitted message"
        );
        Ok(message)
    }

    async fn poll_until_terminal(
        &self,
        space_id: &SpaceId,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<Message, GenieError> {
        for attempt in 0..self.policy.max_attempts {
            tokio::time::sleep(self.policy.delay_for(attempt)).await;

            match self.api.get_message(space_id, conversation_id, message_id).await {
                Ok(message) if message.status.is_terminal() => return Ok(message),
                Ok(message) => {
                    debug!(
                        event_name = "orchestrator.poll_pending",
                        message_id = %message_id,
                        status = message.status.as_remote_str(),
                        attempt,
                        "message not yet terminal"
                    );
                }
                // Transient failures consume the shared budget and keep going.
                Err(error) if error.is_transient() => {
                    warn!(
                        event_name = "orchestrator.poll_transient_failure",
                        message_id = %message_id,
                        error = %error,
                        attempt,
                        "poll attempt failed"
                    );
                }
                Err(error) => return Err(error),
            }
        }

        Err(GenieError::PollTimeout {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
            attempts: self.policy.max_attempts,
        })
    }

    async fn fetch_first_result(
        &self,
        space_id: &SpaceId,
        conversation_id: &ConversationId,
        message: &Message,
    ) -> Option<AttachmentResult> {
        let attachment_id = first_query_attachment_id(message)?;
        match self
            .api
            .get_attachment(space_id, conversation_id, &message.id, &attachment_id)
            .await
        {
            Ok(result) => Some(result),
            Err(error) => {
                warn!(
                    event_name = "orchestrator.attachment_fetch_failed",
                    message_id = %message.id,
                    attachment_id = %attachment_id,
                    error = %error,
                    "falling back to inline message payload"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use geniebridge_core::{
        AttachmentId, AttachmentResult, Conversation, ConversationId, GenieError, Message,
        MessageId, MessageStatus, SpaceId,
    };
    use serde_json::json;

    use super::{PollPolicy, QueryOrchestrator};
    use crate::transport::ConversationApi;

    fn fast_policy(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn space() -> SpaceId {
        SpaceId("space-1".to_string())
    }

    fn conversation() -> Conversation {
        serde_json::from_value(json!({"id": "conv-1", "space_id": "space-1"}))
            .expect("conversation payload should deserialize")
    }

    fn message(status: &str) -> Message {
        serde_json::from_value(json!({
            "id": "msg-1",
            "content": "how many deals",
            "status": status,
        }))
        .expect("message payload should deserialize")
    }

    #[derive(Default)]
    struct FakeApi {
        conversations: Mutex<VecDeque<Result<Conversation, GenieError>>>,
        created: Mutex<VecDeque<Result<Message, GenieError>>>,
        polls: Mutex<VecDeque<Result<Message, GenieError>>>,
        attachments: Mutex<VecDeque<Result<AttachmentResult, GenieError>>>,
        create_message_calls: Mutex<u32>,
    }

    impl FakeApi {
        fn push_conversation(&self, response: Result<Conversation, GenieError>) {
            self.conversations.lock().unwrap().push_back(response);
        }

        fn push_created(&self, response: Result<Message, GenieError>) {
            self.created.lock().unwrap().push_back(response);
        }

        fn push_poll(&self, response: Result<Message, GenieError>) {
            self.polls.lock().unwrap().push_back(response);
        }

        fn push_attachment(&self, response: Result<AttachmentResult, GenieError>) {
            self.attachments.lock().unwrap().push_back(response);
        }

        fn create_message_calls(&self) -> u32 {
            *self.create_message_calls.lock().unwrap()
        }
    }

    fn exhausted() -> GenieError {
        GenieError::Decode("fake queue exhausted".to_string())
    }

    #[async_trait]
    impl ConversationApi for FakeApi {
        async fn create_conversation(&self, _: &SpaceId) -> Result<Conversation, GenieError> {
            self.conversations.lock().unwrap().pop_front().unwrap_or_else(|| Err(exhausted()))
        }

        async fn create_message(
            &self,
            _: &SpaceId,
            _: &ConversationId,
            _: &str,
        ) -> Result<Message, GenieError> {
            *self.create_message_calls.lock().unwrap() += 1;
            self.created.lock().unwrap().pop_front().unwrap_or_else(|| Err(exhausted()))
        }

        async fn get_message(
            &self,
            _: &SpaceId,
            _: &ConversationId,
            _: &MessageId,
        ) -> Result<Message, GenieError> {
            self.polls.lock().unwrap().pop_front().unwrap_or_else(|| Err(exhausted()))
        }

        async fn list_messages(
            &self,
            _: &SpaceId,
            _: &ConversationId,
        ) -> Result<Vec<Message>, GenieError> {
            Ok(Vec::new())
        }

        async fn get_conversation(
            &self,
            _: &SpaceId,
            _: &ConversationId,
        ) -> Result<Conversation, GenieError> {
            Ok(conversation())
        }

        async fn get_attachment(
            &self,
            _: &SpaceId,
            _: &ConversationId,
            _: &MessageId,
            _: &AttachmentId,
        ) -> Result<AttachmentResult, GenieError> {
            self.attachments.lock().unwrap().pop_front().unwrap_or_else(|| Err(exhausted()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn conversation_create_failure_prevents_message_submission() {
        let api = FakeApi::default();
        api.push_conversation(Err(GenieError::RemoteStatus {
            status: 403,
            body: "forbidden".to_string(),
        }));
        let orchestrator = QueryOrchestrator::new(api, fast_policy(3));

        let error = orchestrator
            .submit(&space(), "how many deals", None)
            .await
            .expect_err("conversation failure should propagate");

        assert!(matches!(error, GenieError::ConversationCreateFailed { .. }));
        assert_eq!(orchestrator.api.create_message_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn message_create_failure_is_wrapped_and_not_retried() {
        let api = FakeApi::default();
        api.push_conversation(Ok(conversation()));
        api.push_created(Err(GenieError::Connection("reset".to_string())));
        let orchestrator = QueryOrchestrator::new(api, fast_policy(3));

        let error = orchestrator
            .submit(&space(), "how many deals", None)
            .await
            .expect_err("message failure should propagate");

        assert!(matches!(error, GenieError::MessageCreateFailed { .. }));
        assert_eq!(orchestrator.api.create_message_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn existing_conversation_is_reused() {
        let api = FakeApi::default();
        api.push_created(Ok(message("SUBMITTED")));
        let orchestrator = QueryOrchestrator::new(api, fast_policy(3));

        let outcome = orchestrator
            .submit(&space(), "follow-up", Some(ConversationId("conv-7".to_string())))
            .await
            .expect("submit should succeed without creating a conversation");

        assert_eq!(outcome.conversation_id, ConversationId("conv-7".to_string()));
        assert_eq!(outcome.status, MessageStatus::Submitted);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_through_non_terminal_statuses_to_completion() {
        let api = FakeApi::default();
        api.push_conversation(Ok(conversation()));
        api.push_created(Ok(message("SUBMITTED")));
        api.push_poll(Ok(message("EXECUTING_QUERY")));
        api.push_poll(Ok(message("FETCHING_METADATA")));
        api.push_poll(Ok(message("COMPLETED")));
        let orchestrator = QueryOrchestrator::new(api, fast_policy(5));

        let outcome = orchestrator
            .query_and_wait(&space(), "how many deals", None, false)
            .await
            .expect("query should complete");

        assert_eq!(outcome.status, MessageStatus::Completed);
        assert!(outcome.result_data.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_yields_poll_timeout_with_identifiers() {
        let api = FakeApi::default();
        api.push_conversation(Ok(conversation()));
        api.push_created(Ok(message("SUBMITTED")));
        for _ in 0..3 {
            api.push_poll(Ok(message("EXECUTING_QUERY")));
        }
        let orchestrator = QueryOrchestrator::new(api, fast_policy(3));

        let error = orchestrator
            .query_and_wait(&space(), "how many deals", None, false)
            .await
            .expect_err("budget exhaustion should fail");

        match error {
            GenieError::PollTimeout { conversation_id, message_id, attempts } => {
                assert_eq!(conversation_id, "conv-1");
                assert_eq!(message_id, "msg-1");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected PollTimeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn remote_failure_carries_detail_verbatim() {
        let api = FakeApi::default();
        api.push_conversation(Ok(conversation()));
        api.push_created(Ok(message("SUBMITTED")));
        api.push_poll(Ok(serde_json::from_value(json!({
            "id": "msg-1",
            "content": "how many deals",
            "status": "FAILED",
            "error": {"type": "QUERY_EXECUTION", "error": "Ambiguous column `amount`"},
        }))
        .expect("failed message should deserialize")));
        let orchestrator = QueryOrchestrator::new(api, fast_policy(3));

        let error = orchestrator
            .query_and_wait(&space(), "how many deals", None, false)
            .await
            .expect_err("remote failure should propagate");

        match error {
            GenieError::RemoteJobFailed { detail, .. } => {
                assert_eq!(detail, "Ambiguous column `amount`");
            }
            other => panic!("expected RemoteJobFailed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_poll_failures_consume_budget_but_continue() {
        let api = FakeApi::default();
        api.push_conversation(Ok(conversation()));
        api.push_created(Ok(message("SUBMITTED")));
        api.push_poll(Err(GenieError::Connection("reset".to_string())));
        api.push_poll(Err(GenieError::RemoteStatus { status: 502, body: "bad gateway".into() }));
        api.push_poll(Ok(message("COMPLETED")));
        let orchestrator = QueryOrchestrator::new(api, fast_policy(5));

        let outcome = orchestrator
            .query_and_wait(&space(), "how many deals", None, false)
            .await
            .expect("query should survive transient poll failures");
        assert_eq!(outcome.status, MessageStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_poll_failure_aborts_immediately() {
        let api = FakeApi::default();
        api.push_conversation(Ok(conversation()));
        api.push_created(Ok(message("SUBMITTED")));
        api.push_poll(Err(GenieError::RemoteStatus { status: 404, body: "gone".into() }));
        let orchestrator = QueryOrchestrator::new(api, fast_policy(5));

        let error = orchestrator
            .query_and_wait(&space(), "how many deals", None, false)
            .await
            .expect_err("missing message should abort");
        assert!(error.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn completed_message_with_attachment_gets_result_grid() {
        let api = FakeApi::default();
        api.push_conversation(Ok(conversation()));
        api.push_created(Ok(message("SUBMITTED")));
        api.push_poll(Ok(serde_json::from_value(json!({
            "id": "msg-1",
            "content": "how many deals",
            "status": "COMPLETED",
            "attachments": [{"attachment_id": "att-1", "query": {"query": "SELECT count(*)"}}],
        }))
        .expect("completed message should deserialize")));
        api.push_attachment(Ok(serde_json::from_value(json!({
            "statement_response": {
                "manifest": {"schema": {"columns": [{"name": "count"}]}},
                "result": {"data_typed_array": [{"values": [{"str": "42"}]}]}
            }
        }))
        .expect("attachment payload should deserialize")));
        let orchestrator = QueryOrchestrator::new(api, fast_policy(3));

        let outcome = orchestrator
            .query_and_wait(&space(), "how many deals", None, true)
            .await
            .expect("query should complete with results");

        let grid = outcome.result_data.expect("grid should be attached");
        assert_eq!(grid.columns, vec!["count"]);
        assert_eq!(grid.rows[0][0].as_deref(), Some("42"));
    }

    #[tokio::test(start_paused = true)]
    async fn attachment_fetch_failure_degrades_to_inline_payload() {
        let api = FakeApi::default();
        api.push_conversation(Ok(conversation()));
        api.push_created(Ok(message("SUBMITTED")));
        api.push_poll(Ok(serde_json::from_value(json!({
            "id": "msg-1",
            "content": "how many deals",
            "status": "COMPLETED",
            "query_result": {"row_count": 42},
            "attachments": [{"attachment_id": "att-1", "query": {"query": "SELECT count(*)"}}],
        }))
        .expect("completed message should deserialize")));
        api.push_attachment(Err(GenieError::RemoteStatus { status: 500, body: "boom".into() }));
        let orchestrator = QueryOrchestrator::new(api, fast_policy(3));

        let outcome = orchestrator
            .query_and_wait(&space(), "how many deals", None, true)
            .await
            .expect("attachment failure should not fail the query");

        assert!(outcome.result_data.is_none());
        assert_eq!(outcome.query_result, Some(json!({"row_count": 42})));
    }

    #[test]
    fn backoff_delays_double_and_cap() {
        let policy = PollPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(5000),
        };

        let delays: Vec<u64> =
            (0..8).map(|attempt| policy.delay_for(attempt).as_millis() as u64).collect();
        assert_eq!(delays, vec![250, 500, 1000, 2000, 4000, 5000, 5000, 5000]);
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
    }
}
