use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{Stream, StreamExt};

use stratum_core::ids::SessionId;

use crate::dto::{validate_session_id, ChatRequest, HealthResponse, HistoryQuery, StreamPayload};
use crate::error::ApiError;
use crate::server::AppState;

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn models(State(state): State<AppState>) -> Response {
    Json(state.service.models()).into_response()
}

/// POST /api/v1/chat. Non-streaming JSON reply, or SSE when `stream` is set.
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if req.stream {
        let stream = state.service.clone().process_message_stream(req)?;
        let events = stream.map(to_sse_event);
        return Ok(sse_response(events));
    }

    let response = state.service.process_message(req).await?;
    Ok(Json(response).into_response())
}

fn to_sse_event(payload: StreamPayload) -> Result<Event, Infallible> {
    let event = Event::default().event(payload.event_name());
    Ok(match serde_json::to_string(&payload) {
        Ok(data) => event.data(data),
        Err(_) => event.data("{}"),
    })
}

fn sse_response<S>(events: S) -> Response
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    let session_id = parse_session(&id)?;
    let response = state.service.get_history(&session_id, query.effective_limit())?;
    Ok(Json(response).into_response())
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let session_id = parse_session(&id)?;
    Ok(Json(state.service.get_session(&session_id)?).into_response())
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let session_id = parse_session(&id)?;
    state.service.delete_session(&session_id)?;
    Ok(Json(serde_json::json!({"session_id": id, "deleted": true})).into_response())
}

/// POST /api/v1/chat/:id/clear, the semantic alias for delete: start over.
pub async fn clear_session(
    state: State<AppState>,
    path: Path<String>,
) -> Result<Response, ApiError> {
    delete_session(state, path).await
}

pub async fn context_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let session_id = parse_session(&id)?;
    Ok(Json(state.service.context_info(&session_id)?).into_response())
}

pub async fn compress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let session_id = parse_session(&id)?;
    Ok(Json(state.service.trigger_compression(&session_id).await?).into_response())
}

pub async fn get_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let session_id = parse_session(&id)?;
    Ok(Json(state.service.latest_summary(&session_id)?).into_response())
}

pub async fn delete_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let session_id = parse_session(&id)?;
    Ok(Json(state.service.delete_summaries(&session_id)?).into_response())
}

fn parse_session(raw: &str) -> Result<SessionId, ApiError> {
    validate_session_id(raw)?;
    Ok(SessionId::from_raw(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_session_enforces_bounds() {
        assert!(parse_session("user-1").is_ok());
        assert!(parse_session("").is_err());
        assert!(parse_session(&"x".repeat(101)).is_err());
    }

    #[test]
    fn stream_payload_event_serialization() {
        let payload = StreamPayload::Content { content: "hi".into() };
        let event = to_sse_event(payload).unwrap();
        // Event carries the name and serialized data; just ensure it
        // formats without panicking.
        let _ = format!("{event:?}");
    }
}
