//! HTTP surface tests: routing, status codes, and the error envelope.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use stratum_context::{ContextConfig, ContextManager, Summarizer, SummarizerConfig};
use stratum_engine::TurnEngine;
use stratum_llm::{LlmChannels, MockGateway, MockReply};
use stratum_server::{build_router, AppState, ChatService, ChatServiceConfig};
use stratum_store::Database;

fn router_with(main_replies: Vec<MockReply>) -> axum::Router {
    let db = Database::in_memory().unwrap();
    let main = Arc::new(MockGateway::new(main_replies));
    let shrink = Arc::new(MockGateway::new(vec![]));

    let summarizer = Summarizer::new(shrink.clone(), SummarizerConfig::default());
    let context = Arc::new(ContextManager::new(
        db.clone(),
        summarizer,
        ContextConfig::default(),
    ));
    let engine = Arc::new(TurnEngine::plain(main.clone()));
    let channels = LlmChannels::new(main, shrink);
    let service = Arc::new(ChatService::new(
        db,
        context,
        engine,
        channels,
        ChatServiceConfig::default(),
    ));

    build_router(AppState { service })
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let router = router_with(vec![]);
    let response = router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn models_endpoint_lists_channels() {
    let router = router_with(vec![]);
    let response = router.oneshot(get("/api/v1/models")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["models"][0]["channel"], "main");
    assert_eq!(json["models"][1]["channel"], "shrink");
}

#[tokio::test]
async fn chat_round_trip_over_http() {
    let router = router_with(vec![MockReply::text("Hello from HTTP!")]);

    let response = router
        .clone()
        .oneshot(post_json(
            "/api/v1/chat",
            serde_json::json!({"session_id": "h1", "message": "hi"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["response"], "Hello from HTTP!");
    assert_eq!(json["session_id"], "h1");
    assert_eq!(json["context_info"]["compression_triggered"], false);

    // History shows both messages.
    let response = router
        .clone()
        .oneshot(get("/api/v1/chat/h1/history?limit=10"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["count"], 2);

    // Session details include context metrics.
    let response = router.clone().oneshot(get("/api/v1/chat/h1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["message_count"], 2);
    assert_eq!(json["context"]["would_compress"], false);
}

#[tokio::test]
async fn validation_error_envelope() {
    let router = router_with(vec![]);

    let response = router
        .oneshot(post_json(
            "/api/v1/chat",
            serde_json::json!({"session_id": "", "message": "hi"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["code"], "validation_failed");
    assert!(json["error"].as_str().unwrap().contains("session_id"));
}

#[tokio::test]
async fn unknown_session_is_404() {
    let router = router_with(vec![]);

    let response = router.clone().oneshot(get("/api/v1/chat/ghost")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["code"], "not_found");

    let response = router
        .oneshot(get("/api/v1/chat/ghost/context"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upstream_failure_maps_to_502() {
    let router = router_with(vec![MockReply::Error(
        stratum_core::errors::GatewayError::ServerError {
            status: 500,
            body: "provider down".into(),
        },
    )]);

    let response = router
        .oneshot(post_json(
            "/api/v1/chat",
            serde_json::json!({"session_id": "u", "message": "hi"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let json = body_json(response).await;
    assert_eq!(json["code"], "upstream_error");
}

#[tokio::test]
async fn delete_and_clear_both_remove_the_session() {
    let router = router_with(vec![MockReply::text("a"), MockReply::text("b")]);

    for (create_session, remove) in [
        ("d1", "/api/v1/chat/d1"),
        ("d2", "/api/v1/chat/d2/clear"),
    ] {
        let response = router
            .clone()
            .oneshot(post_json(
                "/api/v1/chat",
                serde_json::json!({"session_id": create_session, "message": "hi"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = if remove.ends_with("/clear") {
            post_json(remove, serde_json::json!({}))
        } else {
            Request::builder()
                .method("DELETE")
                .uri(remove)
                .body(Body::empty())
                .unwrap()
        };
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .clone()
            .oneshot(get(&format!("/api/v1/chat/{create_session}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn compress_endpoint_reports_decision() {
    let router = router_with(vec![MockReply::text("ok")]);

    // Fresh session far below every threshold.
    router
        .clone()
        .oneshot(post_json(
            "/api/v1/chat",
            serde_json::json!({"session_id": "c1", "message": "hi"}),
        ))
        .await
        .unwrap();

    let response = router
        .oneshot(post_json("/api/v1/chat/c1/compress", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["triggered"], false);
    assert_eq!(json["session_id"], "c1");
}

#[tokio::test]
async fn summary_404_when_none_exists() {
    let router = router_with(vec![MockReply::text("ok")]);

    router
        .clone()
        .oneshot(post_json(
            "/api/v1/chat",
            serde_json::json!({"session_id": "s", "message": "hi"}),
        ))
        .await
        .unwrap();

    let response = router.oneshot(get("/api/v1/chat/s/summary")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn streaming_chat_returns_event_stream() {
    let router = router_with(vec![MockReply::text("chunked")]);

    let response = router
        .oneshot(post_json(
            "/api/v1/chat",
            serde_json::json!({"session_id": "sse", "message": "hi", "stream": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(content_type.starts_with("text/event-stream"));

    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let body = String::from_utf8_lossy(&bytes);
    assert!(body.contains("event: context"));
    assert!(body.contains("event: content"));
    assert!(body.contains("chunked"));
    assert!(body.contains("event: done"));
}
