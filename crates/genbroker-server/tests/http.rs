use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use core::time::Duration;
use genbroker_core::GenerationParameters;
use genbroker_server::server::{
    broker::{Broker, BrokerOptions},
    bus::{Bus, memory::MemoryBus},
    service::router::{HttpLimits, build_router},
    worker::{EchoGenerator, Generate, spawn_worker},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const TOPIC: &str = "query";

fn broker(bus: &MemoryBus, capacity: usize) -> Broker {
    Broker::new(
        Arc::new(bus.clone()),
        BrokerOptions {
            capacity,
            job_topic: TOPIC.into(),
            reply_timeout: Duration::from_secs(5),
        },
    )
}

async fn app_with(generator: impl Generate) -> Router {
    let bus = MemoryBus::new();
    let shared: Arc<dyn Bus> = Arc::new(bus.clone());
    spawn_worker(shared, TOPIC, Arc::new(generator), CancellationToken::new())
        .await
        .unwrap();
    build_router(broker(&bus, 32), HttpLimits::default())
}

fn post_generate(body: impl Into<Body>) -> Request<Body> {
    Request::post("/generate")
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn generate_returns_worker_output() {
    let app = app_with(EchoGenerator).await;
    let body = json!({
        "inputs": "Once upon a time there was",
        "parameters": { "max_new_tokens": 4, "temperature": 0.7 }
    });

    let (status, json) = send(app, post_generate(body.to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!([{ "generated_text": "Once upon a time" }]));
}

#[tokio::test]
async fn worker_error_is_bad_request() {
    let app = app_with(|_: &str, _: &GenerationParameters| Err::<String, _>("oom".to_owned())).await;

    let (status, json) = send(app, post_generate(json!({ "inputs": "hi" }).to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json, json!({ "error": "oom" }));
}

#[tokio::test]
async fn token_limit_is_rejected_with_message() {
    let app = app_with(EchoGenerator).await;
    let body = json!({ "inputs": "hi", "parameters": { "max_new_tokens": 1000 } });

    let (status, json) = send(app, post_generate(body.to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        json,
        json!({ "error": "You cannot generate more than 512 new tokens" })
    );
}

#[tokio::test]
async fn token_limit_is_reported_even_without_inputs() {
    let app = app_with(EchoGenerator).await;
    let body = json!({ "parameters": { "max_new_tokens": 1000 } });

    let (status, json) = send(app, post_generate(body.to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        json,
        json!({ "error": "You cannot generate more than 512 new tokens" })
    );
}

#[tokio::test]
async fn invalid_parameters_are_rejected() {
    let cases = [
        (json!({ "temperature": 0 }), "Temperature needs to be >0"),
        (json!({ "top_k": 0 }), "top_k is an integer > 0"),
        (json!({ "top_p": 1.5 }), "top_p is a float > 0 and <=1"),
        (json!({ "do_sample": "yes" }), "do_sample is a boolean"),
    ];
    let app = app_with(EchoGenerator).await;

    for (parameters, message) in cases {
        let body = json!({ "inputs": "hi", "parameters": parameters });
        let (status, json) = send(app.clone(), post_generate(body.to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{parameters}");
        assert_eq!(json, json!({ "error": message }));
    }
}

#[tokio::test]
async fn missing_inputs_is_bad_request() {
    let app = app_with(EchoGenerator).await;
    let (status, json) = send(app, post_generate(json!({ "parameters": {} }).to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("inputs"));
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let app = app_with(EchoGenerator).await;
    let (status, json) = send(app, post_generate("{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn full_broker_returns_service_unavailable() {
    // No worker: admitted jobs stay in flight until the test ends.
    let bus = MemoryBus::new();
    let broker = broker(&bus, 1);
    let app = build_router(broker.clone(), HttpLimits::default());

    let waiting = tokio::spawn(
        app.clone()
            .oneshot(post_generate(json!({ "inputs": "first" }).to_string())),
    );
    while broker.admission().in_flight() < 1 {
        tokio::task::yield_now().await;
    }

    let (status, json) = send(app, post_generate(json!({ "inputs": "second" }).to_string())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json, json!({ "error": "Queue full, try again later" }));

    waiting.abort();
    let _ = waiting.await;
    assert_eq!(broker.admission().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_reply_is_gateway_timeout() {
    let bus = MemoryBus::new();
    let app = build_router(broker(&bus, 4), HttpLimits::default());

    let (status, json) = send(app, post_generate(json!({ "inputs": "hi" }).to_string())).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert!(json["error"].as_str().unwrap().starts_with("No reply received"));
}

#[tokio::test]
async fn health_reports_admission_state() {
    let bus = MemoryBus::new();
    let app = build_router(broker(&bus, 32), HttpLimits::default());

    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (status, json) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({ "status": "ok", "in_flight": 0, "capacity": 32 }));
}
