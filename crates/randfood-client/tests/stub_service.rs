use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use randfood_client::{
    AddError, BackoffPolicy, FetchError, HttpClientConfig, RestaurantClient, RestaurantSource,
    DEFAULT_REJECTION_MESSAGE,
};
use randfood_core::{AddForm, District, FoodStyle, NewRestaurant, QueryParameters};
use serde_json::{json, Value};
use tokio::net::TcpListener;

async fn spawn_stub(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    format!("http://{addr}")
}

/// Echoes the raw query string back as the name of a single restaurant.
async fn echo_listing(RawQuery(query): RawQuery) -> Json<Value> {
    Json(json!([{
        "_id": "echo",
        "restaurant": query.unwrap_or_default(),
        "district": "Central",
        "price": 100,
        "rating": 3,
        "foodStyles": ["Chinese"],
        "createdAt": "2025-01-01"
    }]))
}

async fn add_handler(Json(body): Json<Value>) -> impl IntoResponse {
    if body["restaurant"] == "Duplicate" {
        (
            StatusCode::CONFLICT,
            Json(json!({ "error": "Restaurant already exists" })),
        )
    } else {
        (StatusCode::CREATED, Json(json!({ "ok": true })))
    }
}

fn client(base: &str) -> RestaurantClient {
    RestaurantClient::new(base, HttpClientConfig::default()).expect("client")
}

fn payload(name: &str) -> NewRestaurant {
    let mut form = AddForm::new();
    form.set_restaurant(name);
    form.set_district(Some(District::Shatin));
    form.set_price(150);
    form.set_rating(4);
    form.toggle_style(FoodStyle::Japanese);
    form.validate().expect("valid form")
}

#[tokio::test]
async fn listing_sends_encoded_query_and_ignores_unknown_fields() {
    let base = spawn_stub(Router::new().route("/api/restaurants", get(echo_listing))).await;
    let c = client(&base);

    let mut query = QueryParameters::new();
    query.insert("district", "Central%2CWan%20Chai");
    query.insert("foodStyles", "Chinese");
    let rows = c.fetch_results(&query).await.expect("fetch");

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "district=Central%2CWan%20Chai&foodStyles=Chinese");
    assert_eq!(rows[0].id.as_deref(), Some("echo"));

    let unfiltered = c.fetch_results(&QueryParameters::new()).await.expect("fetch");
    assert_eq!(unfiltered[0].name, "");
}

#[tokio::test]
async fn non_array_payload_is_malformed() {
    let router = Router::new().route(
        "/api/restaurants",
        get(|| async { Json(json!({ "message": "not a list" })) }),
    );
    let base = spawn_stub(router).await;

    let err = client(&base)
        .fetch_results(&QueryParameters::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Malformed(_)));
}

#[tokio::test]
async fn non_success_status_is_reported() {
    let router = Router::new().route(
        "/api/restaurants",
        get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
    );
    let base = spawn_stub(router).await;

    let err = client(&base)
        .fetch_results(&QueryParameters::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::HttpStatus { status: 503, .. }));
}

/// Fails the first listing read with 503, then serves one restaurant.
async fn flaky_listing(State(hits): State<Arc<AtomicUsize>>) -> impl IntoResponse {
    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    } else {
        Json(json!([{ "restaurant": "Second Try Noodles", "district": "Central" }])).into_response()
    }
}

#[tokio::test]
async fn listing_recovers_from_a_transient_failure_when_retries_are_enabled() {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route("/api/restaurants", get(flaky_listing))
        .with_state(hits.clone());
    let base = spawn_stub(router).await;

    let config = HttpClientConfig {
        backoff: BackoffPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
        },
        ..HttpClientConfig::default()
    };
    let rows = RestaurantClient::new(base.as_str(), config)
        .expect("client")
        .fetch_results(&QueryParameters::new())
        .await
        .expect("fetch after retry");

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "Second Try Noodles");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unreachable_service_is_a_request_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let err = client(&format!("http://{addr}"))
        .fetch_results(&QueryParameters::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Request(_)));
}

#[tokio::test]
async fn add_posts_payload_and_surfaces_server_error() {
    let base = spawn_stub(Router::new().route("/api/add", post(add_handler))).await;
    let c = client(&base);

    c.add_restaurant(&payload("Ramen Lab")).await.expect("added");

    match c.add_restaurant(&payload("Duplicate")).await {
        Err(AddError::Rejected { status, message }) => {
            assert_eq!(status, 409);
            assert_eq!(message, "Restaurant already exists");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn add_rejection_without_body_uses_default_message() {
    let router = Router::new().route(
        "/api/add",
        post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    let base = spawn_stub(router).await;

    match client(&base).add_restaurant(&payload("Ramen Lab")).await {
        Err(AddError::Rejected { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, DEFAULT_REJECTION_MESSAGE);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}
