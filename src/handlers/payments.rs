use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};
use tracing::info;

use crate::{
    auth::AuthenticatedBuyer,
    errors::ServiceError,
    handlers::baskets::{map_basket, BasketDto},
    services::baskets::BasketService,
    AppState,
};

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_or_update_payment_intent))
        .route("/webhook", post(super::payment_webhooks::payment_webhook))
}

/// Create the payment intent for the caller's basket, or bring the existing
/// one up to date with the current amount due. The intent id and client
/// secret stick to the basket on first creation.
async fn create_or_update_payment_intent(
    State(state): State<AppState>,
    AuthenticatedBuyer(buyer_id): AuthenticatedBuyer,
) -> Result<Json<BasketDto>, ServiceError> {
    let (basket, items) = state
        .baskets
        .get_with_items(&buyer_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Basket not found".to_string()))?;

    let amount = BasketService::amount_due(&items);
    if amount == 0 {
        return Err(ServiceError::BadRequest(
            "Basket has no purchasable items".to_string(),
        ));
    }

    let basket = match basket.payment_intent_id.clone() {
        None => {
            let intent = state.gateway.create_payment_intent(amount).await?;
            info!(intent_id = %intent.id, amount, "payment intent created");
            state
                .baskets
                .attach_payment_intent(basket, &intent.id, intent.client_secret.as_deref())
                .await?
        }
        Some(intent_id) => {
            state.gateway.update_payment_intent(&intent_id, amount).await?;
            info!(intent_id = %intent_id, amount, "payment intent updated");
            basket
        }
    };

    let contents = state
        .baskets
        .get_with_items(&basket.buyer_id)
        .await?
        .ok_or_else(|| ServiceError::InternalError("basket vanished after update".to_string()))?;

    Ok(Json(map_basket(contents)))
}
