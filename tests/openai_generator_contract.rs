#![allow(clippy::unwrap_used, clippy::expect_used)]

//! OpenAI-compatible generator contract tests.
//!
//! Verify the HTTP request shape, response extraction, error mapping and
//! the broker's retry/fallback behaviour against a mock server.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use ecos::config::FlowConfig;
use ecos::content::{
    ContentBroker, ContentGenerator, ContentOrigin, ContentRequest, GenerationPrompt,
    GeneratorError, OpenAiGenerator, OpenAiGeneratorConfig, StructuredContent,
};
use ecos::engine::Event;
use ecos::test_utils::TestHarness;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

fn generator(server: &MockServer) -> OpenAiGenerator {
    OpenAiGenerator::new(
        OpenAiGeneratorConfig::new("sk-test-123", "gpt-4o-mini").with_base_url(server.uri()),
    )
}

fn prompt() -> GenerationPrompt {
    GenerationPrompt {
        system: "只输出JSON".to_owned(),
        user: "主线：读书".to_owned(),
    }
}

const VALID_MICRO: &str = r#"{"type":"micro_step","micro_step":{"duration_min":2,"instruction":"翻开第12页","acceptance_criteria":"书翻开了"}}"#;

// ────────────────────────────────────────────────────────────────────────────
// Request format
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn request_carries_model_messages_and_json_mode() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test-123"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "messages": [
                {"role": "system", "content": "只输出JSON"},
                {"role": "user", "content": "主线：读书"}
            ],
            "response_format": {"type": "json_object"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("{}")))
        .expect(1)
        .mount(&server)
        .await;

    let result = generator(&server).generate(&prompt()).await;
    assert_eq!(result.unwrap(), "{}");
}

#[tokio::test]
async fn message_content_is_trimmed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("\n  {\"a\":1}  \n")))
        .mount(&server)
        .await;

    let result = generator(&server).generate(&prompt()).await.unwrap();
    assert_eq!(result, "{\"a\":1}");
}

// ────────────────────────────────────────────────────────────────────────────
// Error mapping
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unauthorized_maps_to_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
        })))
        .mount(&server)
        .await;

    let err = generator(&server).generate(&prompt()).await.unwrap_err();
    assert_eq!(err.code(), "AUTH_FAILED");
    assert!(err.to_string().contains("Incorrect API key"));
}

#[tokio::test]
async fn server_error_maps_to_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let err = generator(&server).generate(&prompt()).await.unwrap_err();
    assert!(matches!(err, GeneratorError::ProviderError(ref m) if m.contains("500")));
}

#[tokio::test]
async fn empty_choices_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let err = generator(&server).generate(&prompt()).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_RESPONSE");
}

#[tokio::test]
async fn empty_api_key_never_calls_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("{}")))
        .expect(0)
        .mount(&server)
        .await;

    let generator = OpenAiGenerator::new(
        OpenAiGeneratorConfig::new("  ", "gpt-4o-mini").with_base_url(server.uri()),
    );
    let err = generator.generate(&prompt()).await.unwrap_err();
    assert_eq!(err.code(), "CONFIG_INVALID");
}

// ────────────────────────────────────────────────────────────────────────────
// Broker retry and fallback over HTTP
// ────────────────────────────────────────────────────────────────────────────

fn broker(server: &MockServer, timeout: Duration) -> ContentBroker {
    ContentBroker::new(
        Some(Arc::new(generator(server)) as Arc<dyn ContentGenerator>),
        timeout,
        1,
        FlowConfig::default(),
    )
}

#[tokio::test]
async fn schema_invalid_response_is_retried_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("抱歉，我不能输出JSON")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(VALID_MICRO)))
        .mount(&server)
        .await;

    let (content, origin) = broker(&server, Duration::from_secs(5))
        .request_traced(&ContentRequest::micro_step("读书"))
        .await;
    assert_eq!(origin, ContentOrigin::Generated);
    let StructuredContent::Step(step) = content else {
        panic!("expected step");
    };
    assert_eq!(step.instruction, "翻开第12页");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let retry: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    let system = retry["messages"][0]["content"].as_str().unwrap();
    assert!(system.contains("上一次你的回复不是合法JSON"));
}

#[tokio::test]
async fn two_invalid_responses_fall_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"micro_step":{"duration_min":2,"instruction":"翻书"}}"#,
        )))
        .expect(2)
        .mount(&server)
        .await;

    let (content, origin) = broker(&server, Duration::from_secs(5))
        .request_traced(&ContentRequest::micro_step("读书"))
        .await;
    assert_eq!(origin, ContentOrigin::Fallback);
    let StructuredContent::Step(step) = content else {
        panic!("expected step");
    };
    assert!(step.instruction.contains("「读书」"));
}

#[tokio::test]
async fn transport_failure_falls_back_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(1)
        .mount(&server)
        .await;

    let (content, origin) = broker(&server, Duration::from_secs(5))
        .request_traced(&ContentRequest::if_then_plan("读书"))
        .await;
    assert_eq!(origin, ContentOrigin::Fallback);
    assert!(matches!(content, StructuredContent::Plan(_)));
}

#[tokio::test]
async fn slow_generator_times_out_to_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion(VALID_MICRO))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let (_, origin) = broker(&server, Duration::from_millis(200))
        .request_traced(&ContentRequest::micro_step("读书"))
        .await;
    assert_eq!(origin, ContentOrigin::Fallback);
}

#[tokio::test]
async fn engine_uses_generated_micro_step() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(VALID_MICRO)))
        .mount(&server)
        .await;

    let h = TestHarness::with_broker(
        NaiveDate::from_ymd_opt(2025, 6, 1).expect("date"),
        broker(&server, Duration::from_secs(5)),
    )
    .unwrap();
    let reply = h.engine.handle(1, Event::Today).await.unwrap();
    let step = reply.step().expect("step");
    assert_eq!(step.instruction, "翻开第12页");
    assert_eq!(step.duration_min, 2);

    // The if-then plan answer was schema-invalid for its kind, so the
    // fallback plan was stored instead.
    let plans = h
        .store
        .list_if_then(1, NaiveDate::from_ymd_opt(2025, 6, 1).expect("date"))
        .unwrap();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].then_action, "我先做2分钟起步动作");
}
