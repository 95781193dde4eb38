//! HTTP surface of the broker.
//!
//! Thin translation layer: syntactic validation and auth happen here;
//! everything stateful goes through the registry, the broker actor or the
//! store. Every JSON response carries permissive CORS headers so browser
//! clients can talk to the broker directly.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderName, Method};
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::admin;
use crate::auction::broker::Broker;
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::registry::Registry;
use crate::replay;
use crate::store::KvStore;

pub const CLIENT_TOKEN_HEADER: &str = "x-client-token";

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<AppConfig>,
    pub registry: Arc<Registry>,
    pub broker: Broker,
    pub store: Arc<dyn KvStore>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(CLIENT_TOKEN_HEADER),
        ])
        .expose_headers([HeaderName::from_static(CLIENT_TOKEN_HEADER)]);

    Router::new()
        .route("/register", put(register).fallback(method_not_allowed))
        .route(
            "/messages",
            get(get_messages)
                .post(post_message)
                .fallback(method_not_allowed),
        )
        .route("/balance", get(get_balance).fallback(method_not_allowed))
        .route("/clients", get(list_clients).fallback(method_not_allowed))
        .route("/delete", get(delete_all).fallback(method_not_allowed))
        .fallback(not_found)
        .layer(cors)
        .with_state(state)
}

// -----------------------
// Extraction helpers
// -----------------------

fn client_token(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(CLIENT_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request("Missing token"))
}

fn require_admin(cfg: &AppConfig, headers: &HeaderMap) -> Result<(), ApiError> {
    if cfg.admin_token.is_empty() {
        return Err(ApiError::Unauthorized);
    }

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if bearer == Some(cfg.admin_token.as_str()) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

// -----------------------
// Handlers
// -----------------------

#[derive(Debug, Default, Deserialize)]
struct RegisterBody {
    name: Option<String>,
}

async fn register(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let body: RegisterBody = serde_json::from_slice(&body).unwrap_or_default();
    let name = body.name.unwrap_or_default();

    let registration = state.registry.register(&name).await?;
    Ok(Json(registration))
}

#[derive(Debug, Default, Deserialize)]
struct MessageBody {
    message: Option<String>,
    bid: Option<serde_json::Value>,
}

async fn post_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let token = client_token(&headers)?;

    let body: MessageBody = serde_json::from_slice(&body).unwrap_or_default();
    let message = body
        .message
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing message"))?;
    let bid = body
        .bid
        .ok_or_else(|| ApiError::bad_request("Missing bid"))?
        .as_i64()
        .filter(|b| *b > 0)
        .ok_or_else(|| ApiError::bad_request("Bid must be a positive integer"))?;

    let reply = state.broker.submit(token, message, bid).await?;
    Ok(Json(reply))
}

#[derive(Debug, Deserialize)]
struct ReplayQuery {
    end: Option<String>,
    limit: Option<usize>,
}

async fn get_messages(
    State(state): State<AppState>,
    Query(query): Query<ReplayQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let end = query.end.filter(|e| !e.is_empty());
    let page = replay::replay(state.store.as_ref(), end, query.limit).await?;
    Ok(Json(page))
}

async fn get_balance(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = client_token(&headers)?;
    let view = state.registry.balance(&token).await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientsQuery {
    page: Option<usize>,
    page_size: Option<usize>,
}

async fn list_clients(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ClientsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state.cfg, &headers)?;

    let page = admin::list_clients(
        state.store.as_ref(),
        query.page.unwrap_or(0),
        query.page_size.unwrap_or(admin::DEFAULT_PAGE_SIZE),
    )
    .await?;
    Ok(Json(page))
}

async fn delete_all(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state.cfg, &headers)?;

    state.broker.reset().await?;
    Ok(Json(json!({
        "success": true,
        "message": "All data deleted"
    })))
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}
