//! HTTP surface for natural-language analytics queries.
//!
//! Two submission routes differ only in how the downstream token is acquired:
//! `query-obo` exchanges the caller's own bearer assertion, `query-app` uses
//! the service's application identity. Read routes are OBO only. Every
//! request gets its own transport; the service token cache is the only state
//! shared across requests.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use geniebridge_client::auth::{DelegatedTokenProvider, ServiceTokenProvider, TokenProvider};
use geniebridge_client::orchestrator::{PollPolicy, QueryOrchestrator};
use geniebridge_client::transport::{ConversationApi, GenieTransport};
use geniebridge_core::config::AppConfig;
use geniebridge_core::{
    AttachmentId, AttachmentResult, Conversation, ConversationId, GenieError, Message, MessageId,
    QueryOutcome, SpaceId,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Clone)]
pub struct GenieState {
    config: Arc<AppConfig>,
    http_client: reqwest::Client,
    service_tokens: Arc<ServiceTokenProvider>,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Poll the message to a terminal status before responding. Off by
    /// default; the submission endpoints answer immediately otherwise.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl ApiError {
    fn new(error: impl Into<String>) -> Self {
        Self { error: error.into(), conversation_id: None, message_id: None }
    }
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
}

type HandlerError = (StatusCode, Json<ApiError>);

pub fn router(config: Arc<AppConfig>, http_client: reqwest::Client) -> Router {
    let service_tokens =
        Arc::new(ServiceTokenProvider::new(http_client.clone(), config.identity.clone()));
    let state = GenieState { config, http_client, service_tokens };

    Router::new()
        .route("/api/v1/genie/query-obo", post(query_obo))
        .route("/api/v1/genie/query-app", post(query_app))
        .route("/api/v1/genie/conversation/{conversation_id}", get(get_conversation))
        .route("/api/v1/genie/conversation/{conversation_id}/messages", get(list_messages))
        .route(
            "/api/v1/genie/conversation/{conversation_id}/messages/{message_id}",
            get(get_message),
        )
        .route(
            "/api/v1/genie/conversation/{conversation_id}/messages/{message_id}/attachments/{attachment_id}",
            get(get_attachment),
        )
        .with_state(state)
}

fn bearer_assertion(headers: &HeaderMap) -> Result<&str, HandlerError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| unauthorized("missing bearer assertion"))?;

    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| unauthorized("authorization header must carry a bearer token"))
}

fn unauthorized(detail: &str) -> HandlerError {
    (StatusCode::UNAUTHORIZED, Json(ApiError::new(detail)))
}

fn bad_request(detail: &str) -> HandlerError {
    (StatusCode::BAD_REQUEST, Json(ApiError::new(detail)))
}

fn map_genie_error(error: GenieError) -> HandlerError {
    match error {
        GenieError::AuthExchange { detail } => (
            StatusCode::UNAUTHORIZED,
            Json(ApiError::new(format!("identity exchange failed: {detail}"))),
        ),
        GenieError::RemoteJobFailed { conversation_id, message_id, detail } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiError {
                error: detail,
                conversation_id: Some(conversation_id),
                message_id: Some(message_id),
            }),
        ),
        GenieError::PollTimeout { conversation_id, message_id, attempts } => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(ApiError {
                error: format!("query did not reach a terminal status within {attempts} polls"),
                conversation_id: Some(conversation_id),
                message_id: Some(message_id),
            }),
        ),
        GenieError::RemoteStatus { status: 404, .. } => (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("requested conversation, message, or attachment was not found")),
        ),
        GenieError::ConversationCreateFailed { source }
        | GenieError::MessageCreateFailed { source } => map_genie_error(*source),
        other => {
            warn!(event_name = "api.internal_error", error = %other, "request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new("an internal error occurred while handling the query")),
            )
        }
    }
}

async fn obo_transport(
    state: &GenieState,
    headers: &HeaderMap,
) -> Result<GenieTransport, HandlerError> {
    let assertion = bearer_assertion(headers)?;
    let provider = DelegatedTokenProvider::new(
        state.http_client.clone(),
        state.config.identity.clone(),
        assertion,
    )
    .map_err(map_genie_error)?;
    let credential = provider.downstream_token().await.map_err(map_genie_error)?;

    Ok(GenieTransport::new(
        state.http_client.clone(),
        &state.config.genie.workspace_url,
        credential,
    ))
}

async fn run_query(
    state: &GenieState,
    transport: GenieTransport,
    request: QueryRequest,
) -> Result<Json<QueryOutcome>, HandlerError> {
    let orchestrator =
        QueryOrchestrator::new(transport, PollPolicy::from_genie_config(&state.config.genie));
    let space_id = SpaceId(state.config.genie.space_id.clone());
    let conversation_id = request.conversation_id.map(ConversationId);

    let outcome = if request.wait {
        orchestrator.query_and_wait(&space_id, &request.query, conversation_id, true).await
    } else {
        orchestrator.submit(&space_id, &request.query, conversation_id).await
    }
    .map_err(map_genie_error)?;

    info!(
        event_name = "api.query_answered",
        conversation_id = %outcome.conversation_id,
        message_id = %outcome.message_id,
        status = outcome.status.as_remote_str(),
        "query handled"
    );
    Ok(Json(outcome))
}

fn validate_query(request: &QueryRequest) -> Result<(), HandlerError> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    Ok(())
}

async fn query_obo(
    State(state): State<GenieState>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryOutcome>, HandlerError> {
    validate_query(&request)?;
    let transport = obo_transport(&state, &headers).await?;
    run_query(&state, transport, request).await
}

async fn query_app(
    State(state): State<GenieState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryOutcome>, HandlerError> {
    validate_query(&request)?;
    let credential =
        state.service_tokens.downstream_token().await.map_err(map_genie_error)?;
    let transport = GenieTransport::new(
        state.http_client.clone(),
        &state.config.genie.workspace_url,
        credential,
    );
    run_query(&state, transport, request).await
}

async fn get_conversation(
    State(state): State<GenieState>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
) -> Result<Json<Conversation>, HandlerError> {
    let transport = obo_transport(&state, &headers).await?;
    let space_id = SpaceId(state.config.genie.space_id.clone());
    let conversation = transport
        .get_conversation(&space_id, &ConversationId(conversation_id))
        .await
        .map_err(map_genie_error)?;
    Ok(Json(conversation))
}

async fn list_messages(
    State(state): State<GenieState>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
) -> Result<Json<MessagesResponse>, HandlerError> {
    let transport = obo_transport(&state, &headers).await?;
    let space_id = SpaceId(state.config.genie.space_id.clone());
    let messages = transport
        .list_messages(&space_id, &ConversationId(conversation_id))
        .await
        .map_err(map_genie_error)?;
    Ok(Json(MessagesResponse { messages }))
}

async fn get_message(
    State(state): State<GenieState>,
    headers: HeaderMap,
    Path((conversation_id, message_id)): Path<(String, String)>,
) -> Result<Json<Message>, HandlerError> {
    let transport = obo_transport(&state, &headers).await?;
    let space_id = SpaceId(state.config.genie.space_id.clone());
    let message = transport
        .get_message(&space_id, &ConversationId(conversation_id), &MessageId(message_id))
        .await
        .map_err(map_genie_error)?;
    Ok(Json(message))
}

async fn get_attachment(
    State(state): State<GenieState>,
    headers: HeaderMap,
    Path((conversation_id, message_id, attachment_id)): Path<(String, String, String)>,
) -> Result<Json<AttachmentResult>, HandlerError> {
    let transport = obo_transport(&state, &headers).await?;
    let space_id = SpaceId(state.config.genie.space_id.clone());
    let attachment = transport
        .get_attachment(
            &space_id,
            &ConversationId(conversation_id),
            &MessageId(message_id),
            &AttachmentId(attachment_id),
        )
        .await
        .map_err(map_genie_error)?;
    Ok(Json(attachment))
}
