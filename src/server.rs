use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::aggregator::PreviewAggregator;
use crate::chat::{Message, PreviewEntry};
use crate::entity::{Identity, Peer};
use crate::error::PreviewError;
use crate::log::{FriendGraph, MessageLog};

/// Header carrying the signed-in user's identity.
pub const USER_HEADER: &str = "x-user-id";

// -----------------------------------------------------------------------------
// Response Types
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentChatsResponse {
    pub recent_chats: Vec<RecentChat>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentChat {
    pub peer: Peer,
    pub last_message: Message,
    pub chat_href: String,
    pub from_self: bool,
}

impl RecentChat {
    fn new(me: &Identity, entry: PreviewEntry) -> Self {
        Self {
            from_self: entry.last_message.is_from(me),
            chat_href: entry.conversation.chat_href(),
            peer: entry.peer,
            last_message: entry.last_message,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub enum ApiError {
    NoSession,
    Upstream(PreviewError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NoSession => (StatusCode::NOT_FOUND, "not found".to_string()),
            ApiError::Upstream(e) => {
                let status = match e {
                    PreviewError::NotFound(_) => StatusCode::NOT_FOUND,
                    PreviewError::Unauthorized => StatusCode::UNAUTHORIZED,
                    _ => StatusCode::BAD_GATEWAY,
                };
                if status == StatusCode::BAD_GATEWAY {
                    error!("Friend graph failed: {}", e);
                }
                (status, e.to_string())
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

// -----------------------------------------------------------------------------
// Server State
// -----------------------------------------------------------------------------

pub struct AppState {
    pub aggregator: PreviewAggregator<dyn MessageLog>,
    pub graph: Arc<dyn FriendGraph>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/dashboard/recent-chats", get(recent_chats_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health_handler() -> &'static str {
    "ok"
}

fn session_user(headers: &HeaderMap) -> Option<Identity> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(Identity::new)
}

#[axum::debug_handler]
async fn recent_chats_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<RecentChatsResponse>, ApiError> {
    let me = session_user(&headers).ok_or(ApiError::NoSession)?;

    let previews = state
        .aggregator
        .recent_chats(state.graph.as_ref(), &me)
        .await
        .map_err(ApiError::Upstream)?;

    info!(user = %me, count = previews.len(), "Serving recent chats");

    let recent_chats = previews
        .into_iter()
        .map(|entry| RecentChat::new(&me, entry))
        .collect();

    Ok(Json(RecentChatsResponse { recent_chats }))
}
