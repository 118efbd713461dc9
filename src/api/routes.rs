//! REST endpoints for sessions, conversations, rules, and audit logs.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::TryStreamExt;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{ApiError, ApiState};
use crate::forwarder::model::{NewRule, Session};
use crate::platform::{Conversation, ConversationKind};
use crate::store::RuleFilter;

/// Request body for importing an already-authenticated account.
#[derive(Debug, Deserialize)]
struct ImportSession {
    api_id: i32,
    api_hash: String,
    phone_number: String,
    session_string: String,
}

/// One row of the conversation picker.
#[derive(Debug, Serialize)]
struct ChatInfo {
    id: i64,
    name: String,
    #[serde(rename = "type")]
    kind: ConversationKind,
    username: Option<String>,
}

impl From<Conversation> for ChatInfo {
    fn from(c: Conversation) -> Self {
        Self {
            id: c.id,
            name: c.name,
            kind: c.handle.kind,
            username: c.username,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    #[serde(default = "default_log_limit")]
    limit: usize,
}

fn default_log_limit() -> usize {
    100
}

/// GET /api/
async fn banner() -> Json<Value> {
    Json(json!({ "message": "Telegram Autoforwarder API" }))
}

/// GET /health
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// POST /api/telegram/sessions
async fn import_session(
    State(state): State<ApiState>,
    Json(body): Json<ImportSession>,
) -> Result<Json<Value>, ApiError> {
    let session = Session::new(body.api_id, SecretString::from(body.api_hash), body.phone_number)
        .authenticated(SecretString::from(body.session_string));
    state.store.insert_session(&session).await?;
    tracing::info!(account_id = %session.user_id, "Session imported");
    Ok(Json(json!({ "user_id": session.user_id, "is_authenticated": true })))
}

/// GET /api/telegram/chats/{user_id}
///
/// Opens a short-lived connection, lists every conversation, and disconnects.
async fn list_chats(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = match state.store.get_session(&user_id).await? {
        Some(s) if s.is_authenticated => s,
        _ => return Err(ApiError::NotFound("User not authenticated".into())),
    };

    let client = state.connector.connect(&session).await?;
    let listed: Result<Vec<ChatInfo>, _> = match client.enumerate_conversations().await {
        Ok(stream) => stream.map_ok(ChatInfo::from).try_collect().await,
        Err(e) => Err(e),
    };
    client.disconnect().await;

    Ok(Json(json!({ "chats": listed? })))
}

/// POST /api/forwarding/rules
async fn create_rule(
    State(state): State<ApiState>,
    Json(body): Json<NewRule>,
) -> Result<Json<Value>, ApiError> {
    let rule = body.into_rule();
    state.store.insert_rule(&rule).await?;
    tracing::info!(rule_id = %rule.rule_id, account_id = %rule.user_id, "Rule created");
    Ok(Json(json!(rule)))
}

/// GET /api/forwarding/rules/{user_id}
async fn list_rules(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let rules = state.store.list_rules(&RuleFilter::for_user(user_id)).await?;
    Ok(Json(json!({ "rules": rules })))
}

/// DELETE /api/forwarding/rules/{rule_id}
///
/// Stops the rule's worker before the row goes away.
async fn delete_rule(
    State(state): State<ApiState>,
    Path(rule_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.orchestrator.stop_rule(&rule_id).await;
    if !state.store.delete_rule(&rule_id).await? {
        return Err(ApiError::NotFound("Rule not found".into()));
    }
    Ok(Json(json!({ "success": true })))
}

/// POST /api/forwarding/rules/{rule_id}/toggle
async fn toggle_rule(
    State(state): State<ApiState>,
    Path(rule_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let rule = state
        .store
        .get_rule(&rule_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Rule not found".into()))?;

    let is_active = !rule.is_active;
    state.store.set_rule_active(&rule_id, is_active).await?;

    if is_active {
        state.orchestrator.start_rule(&rule_id).await?;
    } else {
        state.orchestrator.stop_rule(&rule_id).await;
    }

    Ok(Json(json!({ "success": true, "is_active": is_active })))
}

/// GET /api/forwarding/rules/{rule_id}/status
async fn rule_status(
    State(state): State<ApiState>,
    Path(rule_id): Path<String>,
) -> Json<Value> {
    let is_running = state.orchestrator.is_running(&rule_id).await;
    Json(json!({ "rule_id": rule_id, "is_running": is_running }))
}

/// GET /api/forwarding/logs/{user_id}?limit=N
async fn list_logs(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<Json<Value>, ApiError> {
    let logs = state.store.list_audit(&user_id, query.limit).await?;
    Ok(Json(json!({ "logs": logs })))
}

/// Build the REST routes.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/api/", get(banner))
        .route("/health", get(health))
        .route("/api/telegram/sessions", post(import_session))
        .route("/api/telegram/chats/{user_id}", get(list_chats))
        .route("/api/forwarding/rules", post(create_rule))
        // One segment name under /rules: it holds an account id on GET, a rule id elsewhere.
        .route("/api/forwarding/rules/{id}", get(list_rules).delete(delete_rule))
        .route("/api/forwarding/rules/{id}/toggle", post(toggle_rule))
        .route("/api/forwarding/rules/{id}/status", get(rule_status))
        .route("/api/forwarding/logs/{user_id}", get(list_logs))
        .with_state(state)
}
