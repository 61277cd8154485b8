mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use sea_orm::EntityTrait;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use common::{seed_basket, seed_product, succeeded_intent, TestApp};
use storefront_api::entities::order;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, bearer: Option<&str>, extra: &[(&str, &str)], body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, token);
    }
    for (name, value) in extra {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, bearer: Option<&str>, extra: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, token);
    }
    for (name, value) in extra {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> axum::response::Response {
    router.clone().oneshot(request).await.unwrap()
}

#[tokio::test]
async fn full_checkout_flow() {
    let app = TestApp::spawn().await;
    let router = app.router();
    let skis = seed_product(&app.db, "skis", 30_000, 5).await;
    let bearer = app.bearer_for("cust-1");

    // Build the basket.
    let response = send(
        &router,
        post_json(
            "/api/v1/basket/items",
            Some(&bearer),
            &[],
            json!({ "product_id": skis.id, "quantity": 2 }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    // Set up payment; the intent sticks to the basket.
    let response = send(&router, post_json("/api/v1/payments", Some(&bearer), &[], json!({}))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let basket = body_json(response).await;
    let intent_id = basket["payment_intent_id"].as_str().unwrap().to_string();
    assert!(basket["client_secret"].as_str().is_some());

    // A second setup call keeps the same intent, updating the amount.
    let response = send(&router, post_json("/api/v1/payments", Some(&bearer), &[], json!({}))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let basket = body_json(response).await;
    assert_eq!(basket["payment_intent_id"].as_str().unwrap(), intent_id);
    assert_eq!(app.gateway.intent(&intent_id).unwrap().amount, 60_000);

    // The buyer completes payment on the gateway side.
    app.gateway.script_intent(succeeded_intent(&intent_id, 60_000));

    let order_body = json!({
        "shipping_address": {
            "name": "Riley Carter",
            "line1": "12 Harbour Way",
            "city": "Bristol",
            "state": "Bristol",
            "postal_code": "BS1 4ST",
            "country": "GB"
        },
        "save_address": true
    });
    let response = send(
        &router,
        post_json("/api/v1/orders", Some(&bearer), &[], order_body),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["status"], "created");
    let order_id = created["order_id"].as_i64().unwrap();

    // The order shows up in the buyer's history.
    let response = send(&router, get("/api/v1/orders", Some(&bearer), &[])).await;
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["subtotal"].as_i64().unwrap(), 60_000);
    assert_eq!(listed[0]["delivery_fee"].as_i64().unwrap(), 0);
    assert_eq!(listed[0]["total"].as_i64().unwrap(), 60_000);

    let response = send(
        &router,
        get(&format!("/api/v1/orders/{}", order_id), Some(&bearer), &[]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["items"].as_array().unwrap().len(), 1);
    assert_eq!(fetched["items"][0]["name"], "skis");

    // The basket was consumed by checkout.
    let response = send(&router, get("/api/v1/basket", Some(&bearer), &[])).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn confirming_an_order_the_webhook_already_created() {
    let app = TestApp::spawn().await;
    let router = app.router();
    let boots = seed_product(&app.db, "boots", 20_000, 10).await;
    let bearer = app.bearer_for("cust-2");

    // The webhook won: an order for this intent exists already.
    seed_basket(&app.db, "cust-2", Some("pi_race"), &[(boots.id, 1)]).await;
    app.gateway.script_intent(succeeded_intent("pi_race", 25_000));
    let outcome = app
        .state
        .orders
        .create_order_from_payment_intent(storefront_api::services::orders::CreateOrderCommand {
            payment_intent_id: "pi_race".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let winner = match outcome {
        storefront_api::services::orders::OrderOutcome::Created(model) => model,
        other => panic!("expected created order, got {:?}", other),
    };

    // The buyer's client still holds a basket keyed to the same intent.
    seed_basket(&app.db, "cust-2", Some("pi_race"), &[(boots.id, 1)]).await;

    let response = send(&router, post_json("/api/v1/orders", Some(&bearer), &[], json!({}))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "already_exists");
    assert_eq!(body["order_id"].as_i64().unwrap(), i64::from(winner.id));

    assert_eq!(order::Entity::find().all(&*app.db).await.unwrap().len(), 1);
}

#[tokio::test]
async fn create_order_requires_authentication() {
    let app = TestApp::spawn().await;
    let response = send(&app.router(), post_json("/api/v1/orders", None, &[], json!({}))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_order_without_payment_setup_is_rejected() {
    let app = TestApp::spawn().await;
    let router = app.router();
    let boots = seed_product(&app.db, "boots", 20_000, 10).await;
    let bearer = app.bearer_for("cust-3");
    seed_basket(&app.db, "cust-3", None, &[(boots.id, 1)]).await;

    let response = send(&router, post_json("/api/v1/orders", Some(&bearer), &[], json!({}))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Bad request: No payment intent found");
}

#[tokio::test]
async fn anonymous_add_mints_a_buyer_header() {
    let app = TestApp::spawn().await;
    let router = app.router();
    let hat = seed_product(&app.db, "hat", 9_000, 3).await;

    let response = send(
        &router,
        post_json(
            "/api/v1/basket/items",
            None,
            &[],
            json!({ "product_id": hat.id, "quantity": 1 }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let minted = response
        .headers()
        .get("x-buyer-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(!minted.is_empty());

    // The minted token names the basket on later calls.
    let response = send(
        &router,
        get("/api/v1/basket", None, &[("x-buyer-id", &minted)]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let basket = body_json(response).await;
    assert_eq!(basket["items"].as_array().unwrap().len(), 1);
    assert_eq!(basket["items"][0]["quantity"].as_i64().unwrap(), 1);
}

#[tokio::test]
async fn login_merge_folds_the_anonymous_basket_in() {
    let app = TestApp::spawn().await;
    let router = app.router();
    let hat = seed_product(&app.db, "hat", 9_000, 10).await;
    let skis = seed_product(&app.db, "skis", 30_000, 10).await;
    let bearer = app.bearer_for("cust-4");

    // Anonymous browsing.
    let response = send(
        &router,
        post_json(
            "/api/v1/basket/items",
            None,
            &[],
            json!({ "product_id": hat.id, "quantity": 2 }),
        ),
    )
    .await;
    let anon = response
        .headers()
        .get("x-buyer-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    // The account already has its own basket.
    let response = send(
        &router,
        post_json(
            "/api/v1/basket/items",
            Some(&bearer),
            &[],
            json!({ "product_id": skis.id, "quantity": 1 }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = send(
        &router,
        post_json(
            "/api/v1/basket/merge",
            Some(&bearer),
            &[("x-buyer-id", &anon)],
            json!({}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(&router, get("/api/v1/basket", Some(&bearer), &[])).await;
    let basket = body_json(response).await;
    assert_eq!(basket["items"].as_array().unwrap().len(), 2);

    // The anonymous basket no longer resolves.
    let response = send(
        &router,
        get("/api/v1/basket", None, &[("x-buyer-id", &anon)]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
