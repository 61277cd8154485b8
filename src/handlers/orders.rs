use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::{
    auth::AuthenticatedBuyer,
    entities::{order, order_item, order::OrderStatus, order::PaymentSummary, order::ShippingAddress},
    errors::ServiceError,
    services::orders::{CreateOrderCommand, NotCreatedReason, OrderOutcome},
    AppState,
};

pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders).post(create_order))
        .route("/:id", get(get_order))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub shipping_address: Option<ShippingAddressDto>,
    #[serde(default)]
    pub save_address: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ShippingAddressDto {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub line1: String,
    pub line2: Option<String>,
    #[validate(length(min = 1))]
    pub city: String,
    pub state: String,
    #[validate(length(min = 1))]
    pub postal_code: String,
    #[validate(length(min = 1))]
    pub country: String,
}

impl From<ShippingAddressDto> for ShippingAddress {
    fn from(dto: ShippingAddressDto) -> Self {
        ShippingAddress {
            name: dto.name,
            line1: dto.line1,
            line2: dto.line2,
            city: dto.city,
            state: dto.state,
            postal_code: dto.postal_code,
            country: dto.country,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub order_id: i32,
    pub status: &'static str,
}

/// Client-side checkout confirmation. The idempotent pre-check means a
/// retried confirmation (or one racing the webhook) answers with the
/// existing order instead of an error.
async fn create_order(
    State(state): State<AppState>,
    AuthenticatedBuyer(buyer_id): AuthenticatedBuyer,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Response, ServiceError> {
    payload.validate()?;
    if let Some(address) = &payload.shipping_address {
        address.validate()?;
    }

    let Some((basket, _items)) = state.baskets.get_with_items(&buyer_id).await? else {
        return Err(ServiceError::BadRequest("Could not locate basket".to_string()));
    };

    let Some(payment_intent_id) = basket.payment_intent_id.clone() else {
        return Err(ServiceError::BadRequest("No payment intent found".to_string()));
    };

    // Fast fail before any work when the gateway has not confirmed payment.
    let intent = state.gateway.get_payment_intent(&payment_intent_id).await?;
    if !intent.status.is_succeeded() {
        return Err(ServiceError::BadRequest("Payment not successful".to_string()));
    }

    // Duplicate pre-check: the webhook may have created the order already.
    if let Some(existing) = state.orders.find_by_payment_intent(&payment_intent_id).await? {
        info!(order_id = existing.id, "checkout confirmed an already-created order");
        return Ok((
            StatusCode::OK,
            Json(CreateOrderResponse {
                order_id: existing.id,
                status: "already_exists",
            }),
        )
            .into_response());
    }

    let command = CreateOrderCommand {
        payment_intent_id: payment_intent_id.clone(),
        shipping_address: payload.shipping_address.map(Into::into),
        save_address: payload.save_address,
        buyer_override: Some(buyer_id),
    };

    match state.orders.create_order_from_payment_intent(command).await? {
        OrderOutcome::Created(created) => Ok((
            StatusCode::CREATED,
            Json(CreateOrderResponse {
                order_id: created.id,
                status: "created",
            }),
        )
            .into_response()),
        // Lost the race after the pre-check; resolve to the winner's order.
        OrderOutcome::NotCreated(NotCreatedReason::AlreadyExists) => {
            match state.orders.find_by_payment_intent(&payment_intent_id).await? {
                Some(existing) => Ok((
                    StatusCode::OK,
                    Json(CreateOrderResponse {
                        order_id: existing.id,
                        status: "already_exists",
                    }),
                )
                    .into_response()),
                None => Err(ServiceError::BadRequest(
                    NotCreatedReason::AlreadyExists.message(),
                )),
            }
        }
        OrderOutcome::NotCreated(reason) => Err(ServiceError::BadRequest(reason.message())),
    }
}

#[derive(Debug, Serialize)]
pub struct OrderDto {
    pub id: i32,
    pub buyer_id: String,
    pub order_date: DateTime<Utc>,
    pub shipping_address: ShippingAddress,
    pub items: Vec<OrderItemDto>,
    pub subtotal: i64,
    pub delivery_fee: i64,
    pub total: i64,
    pub status: OrderStatus,
    pub payment_summary: Option<PaymentSummary>,
}

#[derive(Debug, Serialize)]
pub struct OrderItemDto {
    pub product_id: i32,
    pub name: String,
    pub picture_url: String,
    pub unit_price: i64,
    pub quantity: i32,
}

fn map_order(model: order::Model, items: Vec<order_item::Model>) -> OrderDto {
    OrderDto {
        id: model.id,
        buyer_id: model.buyer_id.clone(),
        order_date: model.order_date,
        total: model.total(),
        shipping_address: model.shipping_address,
        subtotal: model.subtotal,
        delivery_fee: model.delivery_fee,
        status: model.status,
        payment_summary: model.payment_summary,
        items: items
            .into_iter()
            .map(|item| OrderItemDto {
                product_id: item.product_id,
                name: item.name,
                picture_url: item.picture_url,
                unit_price: item.unit_price,
                quantity: item.quantity,
            })
            .collect(),
    }
}

async fn list_orders(
    State(state): State<AppState>,
    AuthenticatedBuyer(buyer_id): AuthenticatedBuyer,
) -> Result<Json<Vec<OrderDto>>, ServiceError> {
    let orders = state.orders.orders_for_buyer(&buyer_id).await?;
    Ok(Json(
        orders
            .into_iter()
            .map(|(model, items)| map_order(model, items))
            .collect(),
    ))
}

async fn get_order(
    State(state): State<AppState>,
    AuthenticatedBuyer(buyer_id): AuthenticatedBuyer,
    Path(id): Path<i32>,
) -> Result<Json<OrderDto>, ServiceError> {
    let (model, items) = state
        .orders
        .order_for_buyer(id, &buyer_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;

    Ok(Json(map_order(model, items)))
}
