// HTTP request handlers
use crate::application::cadence::Visibility;
use crate::application::session::NavigationParams;
use crate::domain::errors::DashboardError;
use crate::domain::window::TimeWindow;
use crate::infrastructure::framed_stream::stream_from_receiver;
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, Query, RawQuery, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct WindowQuery {
    #[serde(rename = "workingMode")]
    pub working_mode: Option<String>,
    pub preset: Option<String>,
}

#[derive(Serialize)]
pub struct WindowSuggestion {
    #[serde(flatten)]
    pub window: TimeWindow,
    pub live: bool,
}

#[derive(Deserialize)]
pub struct VisibilityBody {
    pub visible: bool,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        let status = match &self {
            DashboardError::Precondition(_) | DashboardError::Config(_) => StatusCode::BAD_REQUEST,
            DashboardError::Transport(_) | DashboardError::Payload(_) => StatusCode::BAD_GATEWAY,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn accepts_brotli(headers: &HeaderMap) -> bool {
    headers
        .get("accept-encoding")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').any(|enc| enc.split(';').next().map(str::trim) == Some("br")))
        .unwrap_or(false)
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// List production units, or the placeholder when the backend is down
pub async fn list_units(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.unit_service.list_units().await)
}

pub async fn suggest_window(
    Query(query): Query<WindowQuery>,
    State(state): State<Arc<AppState>>,
) -> Json<WindowSuggestion> {
    let service = &state.streaming_service;
    let window = service.suggest_window(query.working_mode.as_deref(), query.preset.as_deref());
    let live = service.is_live(&window);
    Json(WindowSuggestion { window, live })
}

/// Start a session and stream its snapshots until the client goes away
pub async fn stream_dashboard(
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Response, DashboardError> {
    let params = NavigationParams::from_query(query.as_deref().unwrap_or_default());
    let handle = state.streaming_service.start_session(&params).await.map_err(|e| {
        tracing::warn!("rejected dashboard request: {}", e);
        e
    })?;

    let mut response = stream_from_receiver(handle.snapshots, accepts_brotli(&headers));
    if let Ok(value) = HeaderValue::from_str(&handle.id.to_string()) {
        response.headers_mut().insert("x-session-id", value);
    }
    Ok(response)
}

/// Forward the view's foreground/background state to a live session
pub async fn set_visibility(
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<VisibilityBody>,
) -> StatusCode {
    if state
        .streaming_service
        .set_visibility(id, Visibility::from_visible(body.visible))
    {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{PreconditionError, TransportError};

    #[test]
    fn test_brotli_negotiation() {
        let mut headers = HeaderMap::new();
        assert!(!accepts_brotli(&headers));
        headers.insert("accept-encoding", HeaderValue::from_static("gzip, deflate, br"));
        assert!(accepts_brotli(&headers));
        headers.insert("accept-encoding", HeaderValue::from_static("gzip"));
        assert!(!accepts_brotli(&headers));
    }

    #[test]
    fn test_error_status_mapping() {
        let rejected = DashboardError::from(PreconditionError::NoUnits).into_response();
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

        let upstream = DashboardError::from(TransportError::UncleanClose).into_response();
        assert_eq!(upstream.status(), StatusCode::BAD_GATEWAY);
    }
}
