//! HTTP route handlers for the campus DM API.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::dm::core::conversation::{Conversation, ConversationStatus};
use crate::dm::core::errors::DmError;
use crate::dm::core::ids::{ConversationId, PartyId};
use crate::dm::core::message::Message;
use crate::dm::engine::{Decision, Inbox, Thread};
use crate::dm::identity::Party;

use super::state::AppState;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/conversations",
            post(start_conversation).get(list_conversations),
        )
        .route("/api/conversations/{id}", patch(update_conversation))
        .route("/api/conversations/{id}/messages", get(get_thread))
        .route("/api/messages", post(send_message))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "campus-dm",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Structured API error: machine-readable code plus human message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    conversation_id: Option<ConversationId>,
    conversation_status: Option<ConversationStatus>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            conversation_id: None,
            conversation_status: None,
        }
    }

    fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_argument", message)
    }
}

impl From<DmError> for ApiError {
    fn from(err: DmError) -> Self {
        match err {
            DmError::Unauthenticated(message) => {
                Self::new(StatusCode::UNAUTHORIZED, "unauthenticated", message)
            }
            DmError::NotFound(message) => Self::new(StatusCode::NOT_FOUND, "not_found", message),
            DmError::Forbidden(message) => Self::new(StatusCode::FORBIDDEN, "forbidden", message),
            DmError::InvalidArgument(message) => Self::invalid_argument(message),
            DmError::ConversationAlreadyExists { id, status } => {
                let mut api = Self::new(
                    StatusCode::CONFLICT,
                    "conversation_exists",
                    "a conversation with this party already exists",
                );
                api.conversation_id = Some(id);
                api.conversation_status = Some(status);
                api
            }
            DmError::InvalidStateTransition(message) => {
                Self::new(StatusCode::CONFLICT, "invalid_state", message)
            }
            DmError::RateLimited(message) => {
                Self::new(StatusCode::TOO_MANY_REQUESTS, "rate_limited", message)
            }
            DmError::Sqlite(_) | DmError::TokioSqlite(_) => {
                tracing::error!(error = %err, "storage failure");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "storage_unavailable",
                    "storage temporarily unavailable; please retry",
                )
            }
            DmError::Serialization(_) | DmError::InvalidConfig(_) => {
                tracing::error!(error = %err, "internal failure");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal server error",
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({
            "error": self.code,
            "message": self.message,
        });
        if let Some(id) = self.conversation_id {
            body["conversation_id"] = serde_json::json!(id);
        }
        if let Some(status) = self.conversation_status {
            body["status"] = serde_json::json!(status);
        }
        (self.status, Json(body)).into_response()
    }
}

/// Resolve the calling party from the `Authorization` header.
///
/// Unauthenticated calls fail here with 401 before any engine call;
/// resolvable but unconfirmed accounts are rejected with 403.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Party, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "missing bearer token",
            )
        })?;
    let party = state.identity.resolve_token(token).await?;
    if !party.is_active() {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "forbidden",
            "confirm your campus email before messaging",
        ));
    }
    Ok(party)
}

fn parse_conversation_id(raw: &str) -> Result<ConversationId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::invalid_argument("malformed conversation id"))
}

/// Request body for starting a conversation.
#[derive(Debug, Deserialize)]
pub struct StartConversationRequest {
    /// Party the first message is addressed to.
    pub receiver_id: String,
    /// Content of the first message.
    pub message_content: String,
}

/// Response for a successfully started conversation.
#[derive(Debug, Serialize)]
pub struct StartConversationResponse {
    /// Identifier of the new conversation.
    pub conversation_id: ConversationId,
    /// The stored first message.
    pub message: Message,
}

/// Handle `POST /api/conversations`.
async fn start_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<StartConversationRequest>,
) -> Result<(StatusCode, Json<StartConversationResponse>), ApiError> {
    let party = authenticate(&state, &headers).await?;
    let receiver: PartyId = request
        .receiver_id
        .parse()
        .map_err(|_| ApiError::invalid_argument("malformed receiver id"))?;

    let (conversation, message) = state
        .engine
        .start_conversation(party.id, receiver, &request.message_content)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(StartConversationResponse {
            conversation_id: conversation.id,
            message,
        }),
    ))
}

/// Handle `GET /api/conversations`.
async fn list_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Inbox>, ApiError> {
    let party = authenticate(&state, &headers).await?;
    let inbox = state.engine.list_conversations(party.id).await?;
    Ok(Json(inbox))
}

/// Handle `GET /api/conversations/{id}/messages`.
async fn get_thread(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Thread>, ApiError> {
    let party = authenticate(&state, &headers).await?;
    let id = parse_conversation_id(&id)?;
    let thread = state.engine.get_thread(id, party.id).await?;
    Ok(Json(thread))
}

/// Request body for updating a conversation.
///
/// `status` responds to a pending request; `mark_read` advances the
/// caller's read watermark. The two are independent concerns that may
/// share one request.
#[derive(Debug, Deserialize)]
pub struct UpdateConversationRequest {
    /// Accept (`active`) or decline (`ignored`) a pending request.
    pub status: Option<Decision>,
    /// Zero the caller's unread count.
    pub mark_read: Option<bool>,
}

/// Response carrying the updated conversation.
#[derive(Debug, Serialize)]
pub struct UpdateConversationResponse {
    /// The conversation after the update.
    pub conversation: Conversation,
}

/// Handle `PATCH /api/conversations/{id}`.
async fn update_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<UpdateConversationRequest>,
) -> Result<Json<UpdateConversationResponse>, ApiError> {
    let party = authenticate(&state, &headers).await?;
    let id = parse_conversation_id(&id)?;

    let mut conversation: Option<Conversation> = None;
    if let Some(decision) = request.status {
        conversation = Some(state.engine.respond(id, party.id, decision).await?);
    }
    if request.mark_read.unwrap_or(false) {
        conversation = Some(state.engine.mark_read(id, party.id).await?);
    }
    let conversation = conversation
        .ok_or_else(|| ApiError::invalid_argument("nothing to update: pass status or mark_read"))?;

    Ok(Json(UpdateConversationResponse { conversation }))
}

/// Request body for posting a message.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Conversation to post into.
    pub conversation_id: String,
    /// Message content.
    pub content: String,
}

/// Response carrying the stored message.
#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    /// The stored message.
    pub message: Message,
}

/// Handle `POST /api/messages`.
async fn send_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<SendMessageResponse>), ApiError> {
    let party = authenticate(&state, &headers).await?;
    let id = parse_conversation_id(&request.conversation_id)?;
    let message = state.engine.send_message(id, party.id, &request.content).await?;
    Ok((StatusCode::CREATED, Json(SendMessageResponse { message })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dm::core::config::{DmConfig, StorageConfig};
    use crate::dm::identity::StaticIdentityProvider;
    use crate::dm::rate_limit::NoopRateLimiter;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        alice: PartyId,
        bob: PartyId,
    }

    async fn test_app() -> TestApp {
        let config = DmConfig {
            storage: StorageConfig {
                sqlite_path: ":memory:".into(),
                ..StorageConfig::default()
            },
            ..DmConfig::default()
        };
        let identity = Arc::new(StaticIdentityProvider::new());
        let alice = identity.register_confirmed("alice-token");
        let bob = identity.register_confirmed("bob-token");
        identity.register_confirmed("carol-token");
        identity.register(
            "eve-token",
            Party {
                id: PartyId::new(),
                email_confirmed: false,
            },
        );
        let state = AppState::new(&config, identity, Arc::new(NoopRateLimiter))
            .await
            .expect("build state");
        TestApp {
            router: create_router(state),
            alice,
            bob,
        }
    }

    async fn call(
        app: &TestApp,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body).expect("encode body")))
                .expect("build request"),
            None => builder.body(Body::empty()).expect("build request"),
        };

        let response = app
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("route request");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("decode body")
        };
        (status, value)
    }

    async fn start(
        app: &TestApp,
        token: &str,
        receiver: &str,
        content: &str,
    ) -> (StatusCode, Value) {
        call(
            app,
            "POST",
            "/api/conversations",
            Some(token),
            Some(json!({ "receiver_id": receiver, "message_content": content })),
        )
        .await
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = test_app().await;
        let (status, body) = call(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let app = test_app().await;
        let (status, body) = call(&app, "GET", "/api/conversations", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthenticated");
    }

    #[tokio::test]
    async fn unknown_token_is_unauthorized() {
        let app = test_app().await;
        let (status, _) = call(&app, "GET", "/api/conversations", Some("nope"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unconfirmed_account_is_forbidden() {
        let app = test_app().await;
        let (status, body) = call(&app, "GET", "/api/conversations", Some("eve-token"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");
    }

    #[tokio::test]
    async fn malformed_ids_are_bad_requests() {
        let app = test_app().await;
        let (status, body) = call(
            &app,
            "GET",
            "/api/conversations/not-a-uuid/messages",
            Some("alice-token"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_argument");

        let (status, _) = start(&app, "alice-token", "not-a-uuid", "hello").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn duplicate_start_returns_conflict_with_existing_thread() {
        let app = test_app().await;
        let bob = app.bob.to_string();
        let (status, created) = start(&app, "alice-token", &bob, "hi there").await;
        assert_eq!(status, StatusCode::CREATED);
        let conversation_id = created["conversation_id"].as_str().expect("id").to_string();

        // Same pair, either direction, soft-conflicts with a redirect target.
        let alice = app.alice.to_string();
        let (status, conflict) = start(&app, "bob-token", &alice, "hello yourself").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(conflict["error"], "conversation_exists");
        assert_eq!(conflict["conversation_id"], conversation_id.as_str());
        assert_eq!(conflict["status"], "pending");
    }

    #[tokio::test]
    async fn full_handshake_over_http() {
        let app = test_app().await;
        let (status, inbox) =
            call(&app, "GET", "/api/conversations", Some("alice-token"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(inbox["total_unread_count"], 0);

        // Alice opens the thread.
        let bob = app.bob.to_string();
        let (status, created) = start(&app, "alice-token", &bob, "hi there").await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["conversation_id"].as_str().expect("id").to_string();
        assert_eq!(created["message"]["content"], "hi there");

        // Pending blocks alice's follow-up.
        let (status, blocked) = call(
            &app,
            "POST",
            "/api/messages",
            Some("alice-token"),
            Some(json!({ "conversation_id": id, "content": "are you free?" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(blocked["error"], "invalid_state");

        // Bob sees one unread request in his inbox.
        let (_, inbox) = call(&app, "GET", "/api/conversations", Some("bob-token"), None).await;
        assert_eq!(inbox["total_unread_count"], 1);
        assert_eq!(inbox["conversations"][0]["other_party"], app.alice.to_string());

        // Bob accepts and marks read in one request, as the UI does.
        let (status, updated) = call(
            &app,
            "PATCH",
            &format!("/api/conversations/{id}"),
            Some("bob-token"),
            Some(json!({ "status": "active", "mark_read": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["conversation"]["status"], "active");

        // Both directions flow now.
        let (status, _) = call(
            &app,
            "POST",
            "/api/messages",
            Some("bob-token"),
            Some(json!({ "conversation_id": id, "content": "yes, what's up" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        // Alice's thread view carries the whole exchange in order.
        let (status, thread) = call(
            &app,
            "GET",
            &format!("/api/conversations/{id}/messages"),
            Some("alice-token"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let contents: Vec<&str> = thread["messages"]
            .as_array()
            .expect("messages")
            .iter()
            .map(|m| m["content"].as_str().expect("content"))
            .collect();
        assert_eq!(contents, ["hi there", "yes, what's up"]);

        // And her badge shows bob's reply.
        let (_, inbox) = call(&app, "GET", "/api/conversations", Some("alice-token"), None).await;
        assert_eq!(inbox["total_unread_count"], 1);
    }

    #[tokio::test]
    async fn respond_rules_surface_as_forbidden_and_conflict() {
        let app = test_app().await;
        let bob = app.bob.to_string();
        let (_, created) = start(&app, "alice-token", &bob, "hi there").await;
        let id = created["conversation_id"].as_str().expect("id").to_string();

        // The initiator cannot decide their own request.
        let (status, body) = call(
            &app,
            "PATCH",
            &format!("/api/conversations/{id}"),
            Some("alice-token"),
            Some(json!({ "status": "active" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");

        // Bob ignores; a second decision conflicts.
        let (status, _) = call(
            &app,
            "PATCH",
            &format!("/api/conversations/{id}"),
            Some("bob-token"),
            Some(json!({ "status": "ignored" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(
            &app,
            "PATCH",
            &format!("/api/conversations/{id}"),
            Some("bob-token"),
            Some(json!({ "status": "active" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "invalid_state");
    }

    #[tokio::test]
    async fn empty_patch_is_rejected() {
        let app = test_app().await;
        let bob = app.bob.to_string();
        let (_, created) = start(&app, "alice-token", &bob, "hi there").await;
        let id = created["conversation_id"].as_str().expect("id").to_string();

        let (status, body) = call(
            &app,
            "PATCH",
            &format!("/api/conversations/{id}"),
            Some("bob-token"),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_argument");
    }

    #[tokio::test]
    async fn outsiders_cannot_distinguish_threads_from_nothing() {
        let app = test_app().await;
        let bob = app.bob.to_string();
        let (_, created) = start(&app, "alice-token", &bob, "hi there").await;
        let id = created["conversation_id"].as_str().expect("id").to_string();

        // A non-participant probing a real thread and a participant probing
        // a random id must look identical, so ids cannot be enumerated.
        let (status_real, body_real) = call(
            &app,
            "GET",
            &format!("/api/conversations/{id}/messages"),
            Some("carol-token"),
            None,
        )
        .await;
        let (status_random, body_random) = call(
            &app,
            "GET",
            &format!("/api/conversations/{}/messages", ConversationId::new()),
            Some("alice-token"),
            None,
        )
        .await;
        assert_eq!(status_real, StatusCode::NOT_FOUND);
        assert_eq!(status_random, StatusCode::NOT_FOUND);
        assert_eq!(body_real["error"], body_random["error"]);
    }
}
