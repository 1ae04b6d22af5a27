//! Integration tests for escrow admission on metered (PTB) attempts.
//!
//! Verifies that:
//! - The reservation amount is context*input + max_completion*output from
//!   the first pricing tier only
//! - Unsupported cost (zero pricing/limits) never reaches the ledger
//! - Reservations are canceled exactly when the owning attempt fails
//! - Insufficient credit aggregates to 429

mod common;

use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{build_app, chat_request, openai_endpoint, parse_body, RecordingLedger};

fn success_body() -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1700000000,
        "model": "gpt-4o",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"},
                     "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 2, "completion_tokens": 1, "total_tokens": 3}
    })
}

#[tokio::test]
async fn reservation_amount_follows_first_tier_pricing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        // PTB attempts authenticate with the platform key.
        .and(header("authorization", "Bearer sk-platform"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
        .expect(1)
        .mount(&server)
        .await;

    // context 128000 * 0.000002 + 4096 * 0.00001 = 0.29696
    let app = build_app(
        vec![openai_endpoint("openai", "gpt-4o", &server.uri(), true)],
        vec![],
        vec!["openai"],
        RecordingLedger::default(),
    );
    let ledger = app.ledger.clone();

    let response = app
        .router
        .oneshot(chat_request(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();

    let (status, _) = parse_body(response).await;
    assert_eq!(status, http::StatusCode::OK);

    let reserves = ledger.reserves.lock().unwrap();
    assert_eq!(reserves.len(), 1);
    assert!((reserves[0] - 0.29696).abs() < 1e-12, "amount {}", reserves[0]);

    // Success never cancels.
    assert!(ledger.cancels.lock().unwrap().is_empty());
}

#[tokio::test]
async fn zero_pricing_fails_without_touching_the_ledger() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
        .expect(0)
        .mount(&server)
        .await;

    let mut endpoint = openai_endpoint("openai", "gpt-4o", &server.uri(), true);
    endpoint.pricing[0].input = 0.0;

    let app = build_app(
        vec![endpoint],
        vec![],
        vec!["openai"],
        RecordingLedger::default(),
    );
    let ledger = app.ledger.clone();

    let response = app
        .router
        .oneshot(chat_request(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();

    let (status, body) = parse_body(response).await;
    assert_eq!(status, http::StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["details"][0]["message"]
        .as_str()
        .unwrap()
        .contains("Cost not supported"));
    assert!(ledger.reserves.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_attempt_cancels_its_reservation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(1)
        .mount(&server)
        .await;

    let app = build_app(
        vec![openai_endpoint("openai", "gpt-4o", &server.uri(), true)],
        vec![],
        vec!["openai"],
        RecordingLedger::default(),
    );
    let ledger = app.ledger.clone();

    let response = app
        .router
        .oneshot(chat_request(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();

    let (status, _) = parse_body(response).await;
    assert_eq!(status, http::StatusCode::INTERNAL_SERVER_ERROR);

    assert_eq!(ledger.reserves.lock().unwrap().len(), 1);
    // Cancellation is dispatched off the critical path.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let cancels = ledger.cancels.lock().unwrap();
    assert_eq!(cancels.len(), 1);
    assert!(cancels[0].starts_with("escrow-"));
}

#[tokio::test]
async fn insufficient_credit_aggregates_to_429() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
        .expect(0)
        .mount(&server)
        .await;

    let app = build_app(
        vec![openai_endpoint("openai", "gpt-4o", &server.uri(), true)],
        vec![],
        vec!["openai"],
        RecordingLedger {
            reject_reserves: true,
            ..Default::default()
        },
    );

    let response = app
        .router
        .oneshot(chat_request(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();

    let (status, body) = parse_body(response).await;
    assert_eq!(status, http::StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["details"][0]["type"], "insufficient_credit_limit");
}

#[tokio::test]
async fn byok_attempts_never_reserve() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-org"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
        .expect(1)
        .mount(&server)
        .await;

    let app = build_app(
        vec![openai_endpoint("openai", "gpt-4o", &server.uri(), false)],
        vec![("openai", "org-test", "sk-org")],
        vec![],
        RecordingLedger::default(),
    );
    let ledger = app.ledger.clone();

    let response = app
        .router
        .oneshot(chat_request(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();

    let (status, _) = parse_body(response).await;
    assert_eq!(status, http::StatusCode::OK);
    assert!(ledger.reserves.lock().unwrap().is_empty());
    assert!(ledger.cancels.lock().unwrap().is_empty());
}
