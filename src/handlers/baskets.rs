use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{AppendHeaders, IntoResponse},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{AuthenticatedBuyer, BuyerKey, ANONYMOUS_BUYER_HEADER},
    errors::ServiceError,
    services::baskets::BasketContents,
    AppState,
};

pub fn basket_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_basket))
        .route("/items", post(add_item).delete(remove_item))
        .route("/merge", post(merge_basket))
}

#[derive(Debug, Serialize)]
pub struct BasketDto {
    pub basket_id: i32,
    pub buyer_id: String,
    pub items: Vec<BasketItemDto>,
    pub payment_intent_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BasketItemDto {
    pub product_id: i32,
    pub name: String,
    pub unit_price: i64,
    pub picture_url: String,
    pub brand: String,
    pub category: String,
    pub quantity: i32,
}

pub fn map_basket(contents: BasketContents) -> BasketDto {
    let (basket, items) = contents;
    BasketDto {
        basket_id: basket.id,
        buyer_id: basket.buyer_id,
        payment_intent_id: basket.payment_intent_id,
        client_secret: basket.client_secret,
        items: items
            .into_iter()
            .filter_map(|(item, joined)| {
                joined.map(|product| BasketItemDto {
                    product_id: product.id,
                    name: product.name,
                    unit_price: product.unit_price,
                    picture_url: product.picture_url,
                    brand: product.brand,
                    category: product.category,
                    quantity: item.quantity,
                })
            })
            .collect(),
    }
}

async fn get_basket(
    State(state): State<AppState>,
    buyer: BuyerKey,
) -> Result<Json<BasketDto>, ServiceError> {
    let buyer_id = buyer
        .buyer_id
        .ok_or_else(|| ServiceError::NotFound("Basket not found".to_string()))?;

    let contents = state
        .baskets
        .get_with_items(&buyer_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Basket not found".to_string()))?;

    Ok(Json(map_basket(contents)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct BasketItemRequest {
    pub product_id: i32,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

/// Add to the caller's basket. First-time anonymous callers get a buyer
/// token minted here and echoed in the `x-buyer-id` response header; they
/// present it on every later basket call.
async fn add_item(
    State(state): State<AppState>,
    buyer: BuyerKey,
    Json(payload): Json<BasketItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    payload.validate()?;

    let buyer_id = buyer
        .buyer_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let contents = state
        .baskets
        .add_item(&buyer_id, payload.product_id, payload.quantity)
        .await?;

    Ok((
        StatusCode::CREATED,
        AppendHeaders([(ANONYMOUS_BUYER_HEADER, buyer_id)]),
        Json(map_basket(contents)),
    ))
}

async fn remove_item(
    State(state): State<AppState>,
    buyer: BuyerKey,
    Json(payload): Json<BasketItemRequest>,
) -> Result<StatusCode, ServiceError> {
    payload.validate()?;

    let buyer_id = buyer
        .buyer_id
        .ok_or_else(|| ServiceError::NotFound("Basket not found".to_string()))?;

    state
        .baskets
        .remove_item(&buyer_id, payload.product_id, payload.quantity)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Fold the anonymous basket named by `x-buyer-id` into the authenticated
/// caller's basket. Invoked by the client right after login.
async fn merge_basket(
    State(state): State<AppState>,
    AuthenticatedBuyer(buyer_id): AuthenticatedBuyer,
    headers: axum::http::HeaderMap,
) -> Result<StatusCode, ServiceError> {
    let anonymous = headers
        .get(ANONYMOUS_BUYER_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ServiceError::BadRequest("No anonymous basket identified".to_string())
        })?;

    state.baskets.merge_baskets(anonymous, &buyer_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
