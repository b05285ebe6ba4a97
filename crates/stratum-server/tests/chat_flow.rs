//! End-to-end turn scenarios over the mock gateway, a scripted tool
//! transport, and an in-memory store.

use std::sync::Arc;

use stratum_context::{ContextConfig, ContextManager, Summarizer, SummarizerConfig};
use stratum_core::chat::TokenStats;
use stratum_core::errors::GatewayError;
use stratum_core::ids::SessionId;
use stratum_core::messages::{MessageKind, MessageRecord, Role};
use stratum_core::summary::{SummaryLevel, SummaryRecord};
use stratum_engine::{TurnEngine, ITERATION_CAP_MESSAGE};
use stratum_llm::{LlmChannels, MockGateway, MockReply};
use stratum_mcp::{ScriptedToolTransport, ToolDescriptor};
use stratum_server::dto::ChatRequest;
use stratum_server::{ApiError, ChatService, ChatServiceConfig};
use stratum_store::{
    apply_compression, CoveredItems, Database, MessageRepo, SessionRepo, SummaryRepo,
};

struct Harness {
    db: Database,
    main: Arc<MockGateway>,
    shrink: Arc<MockGateway>,
    service: Arc<ChatService>,
}

async fn harness(
    main_replies: Vec<MockReply>,
    shrink_replies: Vec<MockReply>,
    transport: Option<Arc<ScriptedToolTransport>>,
    context_config: ContextConfig,
    max_iterations: u32,
) -> Harness {
    let db = Database::in_memory().unwrap();
    let main = Arc::new(MockGateway::new(main_replies));
    let shrink = Arc::new(MockGateway::new(shrink_replies));

    let summarizer = Summarizer::new(shrink.clone(), SummarizerConfig::default());
    let context = Arc::new(ContextManager::new(db.clone(), summarizer, context_config));

    let engine = Arc::new(
        TurnEngine::initialize(
            main.clone(),
            transport.map(|t| t as Arc<dyn stratum_mcp::ToolTransport>),
            max_iterations,
        )
        .await
        .unwrap(),
    );

    let channels = LlmChannels::new(main.clone(), shrink.clone());
    let service = Arc::new(ChatService::new(
        db.clone(),
        context,
        engine,
        channels,
        ChatServiceConfig::default(),
    ));

    Harness { db, main, shrink, service }
}

fn chat_request(session: &str, message: &str) -> ChatRequest {
    ChatRequest {
        session_id: session.into(),
        message: message.into(),
        stream: false,
        user_id: None,
    }
}

fn shrink_replies() -> Vec<MockReply> {
    vec![
        MockReply::text("- main topic\n- follow-up questions"),
        MockReply::text_with_usage(
            "A compact recap of the discussion.",
            TokenStats { prompt_tokens: 60, completion_tokens: 30, total_tokens: 90 },
        ),
    ]
}

fn tight_window() -> ContextConfig {
    ContextConfig {
        window_size: 10,
        message_compression_ratio: 0.3,
        summary_compression_ratio: 0.8,
        min_messages_in_window: 5,
        max_messages_before_compress: 50,
    }
}

fn seed_messages(db: &Database, session: &SessionId, n: usize) -> Vec<MessageRecord> {
    SessionRepo::new(db.clone()).create(session).unwrap();
    let repo = MessageRepo::new(db.clone());
    (0..n)
        .map(|i| {
            let msg = if i % 2 == 0 {
                MessageRecord::user(session.clone(), format!("user {i}"))
            } else {
                MessageRecord::assistant(session.clone(), format!("assistant {i}"))
            };
            repo.append(&msg).unwrap();
            msg
        })
        .collect()
}

fn seed_level1_summaries(db: &Database, session: &SessionId, n: usize) {
    SessionRepo::new(db.clone()).create(session).unwrap();
    let msg_repo = MessageRepo::new(db.clone());
    for i in 0..n {
        let run: Vec<MessageRecord> = (0..3)
            .map(|j| {
                let msg = MessageRecord::user(session.clone(), format!("old {i}-{j}"));
                msg_repo.append(&msg).unwrap();
                msg
            })
            .collect();

        let summary = SummaryRecord::new(
            session.clone(),
            SummaryLevel::One,
            format!("recap {i}"),
            vec![format!("topic {i}")],
            run[0].id.clone(),
            run[2].id.clone(),
            3,
            10,
        );
        let mirror =
            MessageRecord::summary_mirror(session.clone(), summary.text.clone(), SummaryLevel::One);
        apply_compression(
            db,
            &summary,
            &CoveredItems::Messages(run.iter().map(|m| m.id.clone()).collect()),
            &mirror,
        )
        .unwrap();
    }
}

// ── Scenario 1: simple turn ────────────────────────────────────────────

#[tokio::test]
async fn simple_turn_round_trip() {
    let h = harness(
        vec![MockReply::text("Hello! How can I help?")],
        vec![],
        None,
        ContextConfig::default(),
        10,
    )
    .await;

    let resp = h.service.process_message(chat_request("s1", "hi")).await.unwrap();

    assert_eq!(resp.response, "Hello! How can I help?");
    assert!(!resp.context_info.compression_triggered);
    assert_eq!(resp.tokens_used, 15);
    assert_eq!(resp.model, "mock-model");

    // Exactly one user and one assistant message persisted.
    let session = SessionId::from_raw("s1");
    let all = MessageRepo::new(h.db.clone()).get_messages(&session, 0).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].role, Role::User);
    assert_eq!(all[1].role, Role::Assistant);
    assert_eq!(all[1].metadata.tokens, Some(15));
    assert!(all[1].metadata.cost.unwrap() > 0.0);

    // The prompt contained exactly [system, user "hi"].
    let requests = h.main.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].len(), 2);
    assert_eq!(requests[0][0].role, Role::System);
    assert_eq!(requests[0][1].role, Role::User);
    assert_eq!(requests[0][1].content, "hi");

    assert_eq!(h.shrink.call_count(), 0);
}

#[tokio::test]
async fn session_created_idempotently() {
    let h = harness(
        vec![MockReply::text("a"), MockReply::text("b")],
        vec![],
        None,
        ContextConfig::default(),
        10,
    )
    .await;

    h.service.process_message(chat_request("s1", "one")).await.unwrap();
    h.service.process_message(chat_request("s1", "two")).await.unwrap();

    let session = SessionRepo::new(h.db.clone())
        .get(&SessionId::from_raw("s1"))
        .unwrap();
    assert_eq!(session.message_count, 4);
}

// ── Scenario 2: level-1 trigger ────────────────────────────────────────

#[tokio::test]
async fn level1_compression_on_long_session() {
    // W=10, r_m=0.3, min=5. After the 21st user message there are 21
    // active messages; keep max(5, ⌊10·0.7⌋)=7, fold the oldest 14.
    let h = harness(
        vec![MockReply::text("Understood.")],
        shrink_replies(),
        None,
        tight_window(),
        10,
    )
    .await;

    let session = SessionId::from_raw("long");
    let seeded = seed_messages(&h.db, &session, 20);

    let resp = h
        .service
        .process_message(chat_request("long", "message twenty-one"))
        .await
        .unwrap();

    let info = &resp.context_info;
    assert!(info.compression_triggered);
    assert_eq!(info.compression_level, Some(1));
    assert_eq!(info.messages_compressed, 14);
    assert!(info.has_summary);
    assert!(info.context_window_used <= 10);

    // The summary covers the oldest 14 messages, all marked with its id.
    let summary = SummaryRepo::new(h.db.clone()).get_latest(&session).unwrap();
    assert_eq!(summary.level, SummaryLevel::One);
    assert_eq!(summary.covers_from_msg_id, seeded[0].id);
    assert_eq!(summary.covers_to_msg_id, seeded[13].id);

    let ui = MessageRepo::new(h.db.clone()).get_messages_for_ui(&session).unwrap();
    let covered: Vec<_> = ui.iter().filter(|m| m.compressed).collect();
    assert_eq!(covered.len(), 14);
    assert!(covered.iter().all(|m| m.covered_by.as_ref() == Some(&summary.id)));

    // Prompt stayed within the window and led with the summary.
    let prompt = &h.main.requests()[0];
    assert!(prompt.len() <= 10);
    assert_eq!(prompt[0].role, Role::System);
    assert!(prompt[1].content.contains("A compact recap"));
    assert_eq!(prompt.last().unwrap().content, "message twenty-one");

    assert_eq!(h.shrink.call_count(), 2, "anchors + prose");
}

// ── Scenario 3: level-2 trigger ────────────────────────────────────────

#[tokio::test]
async fn level2_compression_folds_summaries() {
    // W=10, r_s=0.8 and 9 active level-1 summaries: keep 2, fold 7.
    let h = harness(
        vec![MockReply::text("Noted.")],
        shrink_replies(),
        None,
        tight_window(),
        10,
    )
    .await;

    let session = SessionId::from_raw("older");
    seed_level1_summaries(&h.db, &session, 9);

    let resp = h
        .service
        .process_message(chat_request("older", "still here?"))
        .await
        .unwrap();

    let info = &resp.context_info;
    assert!(info.compression_triggered);
    assert_eq!(info.compression_level, Some(2));
    assert_eq!(info.summaries_compressed, 7);
    assert_eq!(info.messages_compressed, 0, "level-1 did not also fire");

    let summary_repo = SummaryRepo::new(h.db.clone());
    let active_l1 = summary_repo.get_active(&session, SummaryLevel::One).unwrap();
    assert_eq!(active_l1.len(), 2);

    let bulks = summary_repo.get_active(&session, SummaryLevel::Two).unwrap();
    assert_eq!(bulks.len(), 1);
    assert_eq!(bulks[0].message_count, 21);

    // Transcript gained a bulk-summary mirror.
    let all = MessageRepo::new(h.db.clone()).get_messages(&session, 0).unwrap();
    assert!(all.iter().any(|m| m.kind == MessageKind::BulkSummary));
}

// ── Scenarios 4 & 5: tool loop ─────────────────────────────────────────

fn weather_tool() -> ToolDescriptor {
    ToolDescriptor {
        name: "weather".into(),
        title: None,
        description: Some("current weather for a city".into()),
        input_schema: Some(serde_json::json!({
            "type": "object",
            "properties": {"city": {"type": "string"}},
            "required": ["city"]
        })),
    }
}

#[tokio::test]
async fn tool_loop_converges_and_persists_transcript() {
    let transport = Arc::new(ScriptedToolTransport::new(vec![weather_tool()]));
    transport.push_outcome(Ok(stratum_mcp::CallOutcome {
        is_error: false,
        structured: Some(serde_json::json!({"temp_c": 21, "sky": "clear"})),
        text_parts: vec![],
    }));

    let h = harness(
        vec![
            MockReply::tool_call("call_1", "weather", serde_json::json!({"city": "Lisbon"})),
            MockReply::text("It's 21°C and clear in Lisbon."),
        ],
        vec![],
        Some(transport.clone()),
        ContextConfig::default(),
        5,
    )
    .await;

    let resp = h
        .service
        .process_message(chat_request("w1", "weather in Lisbon?"))
        .await
        .unwrap();

    assert_eq!(resp.response, "It's 21°C and clear in Lisbon.");
    assert!(!resp.iteration_limit_hit);
    assert_eq!(h.main.call_count(), 2);
    assert_eq!(transport.call_count(), 1);

    // Transcript order: user, tool result, assistant.
    let session = SessionId::from_raw("w1");
    let all = MessageRepo::new(h.db.clone()).get_messages(&session, 0).unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].role, Role::User);
    assert_eq!(all[1].role, Role::Tool);
    assert_eq!(all[1].tool_name.as_deref(), Some("weather"));
    assert!(all[1].content.contains("temp_c"));
    assert_eq!(all[2].role, Role::Assistant);

    // The tool's schema was translated and offered to the model.
    let calls = transport.calls();
    assert_eq!(calls[0].1["city"], "Lisbon");
}

#[tokio::test]
async fn tool_loop_hits_iteration_cap() {
    let transport = Arc::new(ScriptedToolTransport::new(vec![weather_tool()]));
    for _ in 0..5 {
        transport.push_text("partial");
    }

    let replies: Vec<MockReply> = (0..5)
        .map(|i| {
            MockReply::tool_call(&format!("call_{i}"), "weather", serde_json::json!({"city": "x"}))
        })
        .collect();

    let h = harness(replies, vec![], Some(transport.clone()), ContextConfig::default(), 5).await;

    let resp = h
        .service
        .process_message(chat_request("w2", "keep checking"))
        .await
        .unwrap();

    assert!(resp.iteration_limit_hit);
    assert_eq!(resp.response, ITERATION_CAP_MESSAGE);
    assert_eq!(h.main.call_count(), 5);
    assert_eq!(transport.call_count(), 5);

    // Stock message persisted as the assistant reply, after 5 tool messages.
    let session = SessionId::from_raw("w2");
    let all = MessageRepo::new(h.db.clone()).get_messages(&session, 0).unwrap();
    assert_eq!(all.len(), 7); // user + 5 tool + assistant
    assert_eq!(all[6].content, ITERATION_CAP_MESSAGE);
}

// ── Scenario 6: compression failure is non-fatal ───────────────────────

#[tokio::test]
async fn shrink_failure_degrades_to_uncompressed_turn() {
    let h = harness(
        vec![MockReply::text("Still responsive.")],
        vec![MockReply::Error(GatewayError::ServerError {
            status: 500,
            body: "shrink offline".into(),
        })],
        None,
        tight_window(),
        10,
    )
    .await;

    let session = SessionId::from_raw("deg");
    seed_messages(&h.db, &session, 20);

    let resp = h
        .service
        .process_message(chat_request("deg", "are you there?"))
        .await
        .unwrap();

    assert_eq!(resp.response, "Still responsive.");
    assert!(!resp.context_info.compression_triggered);
    assert!(!resp.context_info.has_summary);

    // No summary created, nothing marked.
    assert!(SummaryRepo::new(h.db.clone()).get_latest(&session).unwrap_err().to_string().contains("not found"));
    let active = MessageRepo::new(h.db.clone()).get_active_messages(&session).unwrap();
    assert_eq!(active.len(), 21);

    // Prompt still bounded by the window-trim rule.
    assert!(h.main.requests()[0].len() <= 10);
}

// ── Upstream failure disposition ───────────────────────────────────────

#[tokio::test]
async fn upstream_error_keeps_user_message() {
    let h = harness(
        vec![MockReply::Error(GatewayError::AuthenticationFailed("bad key".into()))],
        vec![],
        None,
        ContextConfig::default(),
        10,
    )
    .await;

    let err = h
        .service
        .process_message(chat_request("u1", "hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Upstream(_)));

    // The user message stays; no assistant message was persisted.
    let all = MessageRepo::new(h.db.clone())
        .get_messages(&SessionId::from_raw("u1"), 0)
        .unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].role, Role::User);
}

// ── Validation and session operations ──────────────────────────────────

#[tokio::test]
async fn validation_rejects_before_persisting() {
    let h = harness(vec![], vec![], None, ContextConfig::default(), 10).await;

    let err = h.service.process_message(chat_request("", "hi")).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    let err = h.service.process_message(chat_request("s", "")).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    let long = "x".repeat(10_001);
    let err = h.service.process_message(chat_request("s", &long)).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    assert_eq!(h.main.call_count(), 0);
}

#[tokio::test]
async fn history_session_and_delete_lifecycle() {
    let h = harness(
        vec![MockReply::text("reply")],
        vec![],
        None,
        ContextConfig::default(),
        10,
    )
    .await;

    h.service.process_message(chat_request("life", "hello")).await.unwrap();
    let session = SessionId::from_raw("life");

    let history = h.service.get_history(&session, 50).unwrap();
    assert_eq!(history.count, 2);
    assert_eq!(history.messages[0].role, "user");

    let details = h.service.get_session(&session).unwrap();
    assert_eq!(details.message_count, 2);
    assert!(!details.context.would_compress);

    h.service.delete_session(&session).unwrap();
    let err = h.service.get_session(&session).unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));

    // Deleting again is still fine.
    h.service.delete_session(&session).unwrap();
}

#[tokio::test]
async fn trigger_compression_is_idempotent() {
    let h = harness(vec![], shrink_replies(), None, tight_window(), 10).await;

    let session = SessionId::from_raw("manual");
    seed_messages(&h.db, &session, 21);

    let first = h.service.trigger_compression(&session).await.unwrap();
    assert!(first.compression.triggered);
    assert_eq!(first.compression.messages_compressed, 14);

    let second = h.service.trigger_compression(&session).await.unwrap();
    assert!(!second.compression.triggered, "no intervening turn, nothing left to fold");
    assert_eq!(h.shrink.call_count(), 2);
}

#[tokio::test]
async fn summary_endpoints_round_trip() {
    let h = harness(
        vec![MockReply::text("ok")],
        shrink_replies(),
        None,
        tight_window(),
        10,
    )
    .await;

    let session = SessionId::from_raw("sum");
    seed_messages(&h.db, &session, 20);
    h.service.process_message(chat_request("sum", "trigger it")).await.unwrap();

    let summary = h.service.latest_summary(&session).unwrap();
    assert_eq!(summary.level, 1);
    assert!(!summary.anchors.is_empty());
    assert!(summary.text.chars().count() <= 500);

    let deleted = h.service.delete_summaries(&session).unwrap();
    assert_eq!(deleted.deleted, 1);

    let err = h.service.latest_summary(&session).unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));

    // Covered messages are active again after summary deletion: the 20
    // seeded, the trigger turn's user message, and the assistant reply.
    let active = MessageRepo::new(h.db.clone()).get_active_messages(&session).unwrap();
    assert_eq!(active.len(), 22);
}

#[tokio::test]
async fn models_lists_both_channels() {
    let h = harness(vec![], vec![], None, ContextConfig::default(), 10).await;
    let models = h.service.models();
    assert_eq!(models.models.len(), 2);
    assert_eq!(models.models[0].channel, "main");
    assert_eq!(models.models[1].channel, "shrink");
}

// ── Streaming ──────────────────────────────────────────────────────────

#[tokio::test]
async fn streaming_turn_emits_context_content_done() {
    use futures::StreamExt;
    use stratum_server::dto::StreamPayload;

    let h = harness(
        vec![MockReply::text("streamed answer")],
        vec![],
        None,
        ContextConfig::default(),
        10,
    )
    .await;

    let mut req = chat_request("stream-1", "hello");
    req.stream = true;
    let mut stream = h.service.clone().process_message_stream(req).unwrap();

    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }

    assert!(matches!(events[0], StreamPayload::Context { .. }));
    assert!(matches!(&events[1], StreamPayload::Content { content } if content == "streamed answer"));
    assert!(matches!(events.last().unwrap(), StreamPayload::Done { .. }));

    // The concatenated text was persisted once the stream closed.
    let all = MessageRepo::new(h.db.clone())
        .get_messages(&SessionId::from_raw("stream-1"), 0)
        .unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[1].content, "streamed answer");
    assert_eq!(all[1].role, Role::Assistant);
}

#[tokio::test]
async fn streaming_upstream_error_reported_as_event() {
    use futures::StreamExt;
    use stratum_server::dto::StreamPayload;

    let h = harness(
        vec![MockReply::Error(GatewayError::ServerError {
            status: 503,
            body: "overloaded".into(),
        })],
        vec![],
        None,
        ContextConfig::default(),
        10,
    )
    .await;

    let mut req = chat_request("stream-2", "hello");
    req.stream = true;
    let mut stream = h.service.clone().process_message_stream(req).unwrap();

    let mut saw_error = false;
    while let Some(event) = stream.next().await {
        if let StreamPayload::Error { code, .. } = event {
            assert_eq!(code, "upstream_error");
            saw_error = true;
        }
    }
    assert!(saw_error);

    // No assistant message persisted for the failed stream.
    let all = MessageRepo::new(h.db.clone())
        .get_messages(&SessionId::from_raw("stream-2"), 0)
        .unwrap();
    assert_eq!(all.len(), 1);
}

// ── Concurrency: per-session serialization ─────────────────────────────

#[tokio::test]
async fn concurrent_turns_on_one_session_serialize() {
    let h = harness(
        vec![
            MockReply::delayed(std::time::Duration::from_millis(30), MockReply::text("first")),
            MockReply::text("second"),
        ],
        vec![],
        None,
        ContextConfig::default(),
        10,
    )
    .await;

    let s1 = h.service.clone();
    let s2 = h.service.clone();
    let (a, b) = tokio::join!(
        s1.process_message(chat_request("same", "one")),
        s2.process_message(chat_request("same", "two")),
    );
    a.unwrap();
    b.unwrap();

    // Four messages in a strict order: each turn's user message is
    // followed by its assistant reply, never interleaved.
    let all = MessageRepo::new(h.db.clone())
        .get_messages(&SessionId::from_raw("same"), 0)
        .unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].role, Role::User);
    assert_eq!(all[1].role, Role::Assistant);
    assert_eq!(all[2].role, Role::User);
    assert_eq!(all[3].role, Role::Assistant);
}
