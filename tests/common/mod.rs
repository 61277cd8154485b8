#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex,
};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::Router;
use jsonwebtoken::{encode, EncodingKey, Header};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, NotSet, Set};
use sea_orm_migration::MigratorTrait;

use storefront_api::{
    auth::Claims,
    config::AppConfig,
    entities::{basket, basket_item, product},
    errors::ServiceError,
    migrator::Migrator,
    payments::{CardSummary, GatewayShipping, IntentStatus, PaymentGateway, PaymentIntent},
    AppState,
};

pub const TEST_JWT_SECRET: &str = "test-secret-test-secret-test-secret!";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test";

/// Scriptable in-memory gateway. Tests insert the intents and payment
/// methods the code under test should observe.
#[derive(Default)]
pub struct MockGateway {
    intents: Mutex<HashMap<String, PaymentIntent>>,
    methods: Mutex<HashMap<String, CardSummary>>,
    counter: AtomicU32,
}

impl MockGateway {
    pub fn script_intent(&self, intent: PaymentIntent) {
        self.intents.lock().unwrap().insert(intent.id.clone(), intent);
    }

    pub fn script_method(&self, id: &str, card: CardSummary) {
        self.methods.lock().unwrap().insert(id.to_string(), card);
    }

    pub fn intent(&self, id: &str) -> Option<PaymentIntent> {
        self.intents.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn get_payment_intent(&self, id: &str) -> Result<PaymentIntent, ServiceError> {
        self.intent(id)
            .ok_or_else(|| ServiceError::ExternalApiError(format!("no such intent {}", id)))
    }

    async fn get_payment_method(&self, id: &str) -> Result<Option<CardSummary>, ServiceError> {
        Ok(self.methods.lock().unwrap().get(id).cloned())
    }

    async fn create_payment_intent(&self, amount: i64) -> Result<PaymentIntent, ServiceError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let intent = PaymentIntent {
            id: format!("pi_mock_{}", n),
            status: IntentStatus::RequiresPaymentMethod,
            amount,
            client_secret: Some(format!("pi_mock_{}_secret", n)),
            payment_method: None,
            shipping: None,
        };
        self.script_intent(intent.clone());
        Ok(intent)
    }

    async fn update_payment_intent(
        &self,
        id: &str,
        amount: i64,
    ) -> Result<PaymentIntent, ServiceError> {
        let mut intents = self.intents.lock().unwrap();
        let intent = intents
            .get_mut(id)
            .ok_or_else(|| ServiceError::ExternalApiError(format!("no such intent {}", id)))?;
        intent.amount = amount;
        Ok(intent.clone())
    }
}

pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub gateway: Arc<MockGateway>,
    pub state: AppState,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let mut opts = ConnectOptions::new("sqlite::memory:");
        opts.max_connections(1).sqlx_logging(false);
        let db = Arc::new(Database::connect(opts).await.unwrap());
        Migrator::up(&*db, None).await.unwrap();

        let mut config = test_config();
        tweak(&mut config);

        let gateway = Arc::new(MockGateway::default());
        let state = AppState::new(db.clone(), config, gateway.clone());
        Self { db, gateway, state }
    }

    pub fn router(&self) -> Router {
        storefront_api::app_router(self.state.clone())
    }

    /// Mint a bearer token for the given buyer, signed with the test secret.
    pub fn bearer_for(&self, buyer_id: &str) -> String {
        let exp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as usize
            + 3600;
        let claims = Claims {
            sub: buyer_id.to_string(),
            exp,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
        )
        .unwrap();
        format!("Bearer {}", token)
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        jwt_secret: TEST_JWT_SECRET.to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        environment: "test".to_string(),
        log_level: "warn".to_string(),
        log_json: false,
        auto_migrate: false,
        cors_allowed_origins: None,
        stripe_secret_key: "sk_test_unused".to_string(),
        payment_webhook_secret: Some(TEST_WEBHOOK_SECRET.to_string()),
        payment_webhook_tolerance_secs: 300,
        gateway_timeout_secs: 5,
        db_max_connections: 1,
        db_min_connections: 1,
        db_connect_timeout_secs: 5,
        db_acquire_timeout_secs: 5,
        db_idle_timeout_secs: 60,
    }
}

pub async fn seed_product(
    db: &DatabaseConnection,
    name: &str,
    unit_price: i64,
    quantity_in_stock: i32,
) -> product::Model {
    product::ActiveModel {
        id: NotSet,
        name: Set(name.to_string()),
        description: Set(format!("{} description", name)),
        unit_price: Set(unit_price),
        picture_url: Set(format!("/images/{}.png", name)),
        brand: Set("TestBrand".to_string()),
        category: Set("TestCategory".to_string()),
        quantity_in_stock: Set(quantity_in_stock),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn seed_basket(
    db: &DatabaseConnection,
    buyer_id: &str,
    payment_intent_id: Option<&str>,
    lines: &[(i32, i32)],
) -> basket::Model {
    let created = basket::ActiveModel {
        id: NotSet,
        buyer_id: Set(buyer_id.to_string()),
        payment_intent_id: Set(payment_intent_id.map(str::to_string)),
        client_secret: Set(payment_intent_id.map(|id| format!("{}_secret", id))),
    }
    .insert(db)
    .await
    .unwrap();

    for (product_id, quantity) in lines {
        basket_item::ActiveModel {
            id: NotSet,
            basket_id: Set(created.id),
            product_id: Set(*product_id),
            quantity: Set(*quantity),
        }
        .insert(db)
        .await
        .unwrap();
    }

    created
}

pub fn succeeded_intent(id: &str, amount: i64) -> PaymentIntent {
    PaymentIntent {
        id: id.to_string(),
        status: IntentStatus::Succeeded,
        amount,
        client_secret: Some(format!("{}_secret", id)),
        payment_method: None,
        shipping: Some(GatewayShipping {
            name: Some("Riley Carter".to_string()),
            line1: Some("12 Harbour Way".to_string()),
            line2: None,
            city: Some("Bristol".to_string()),
            state: Some("Bristol".to_string()),
            postal_code: Some("BS1 4ST".to_string()),
            country: Some("GB".to_string()),
        }),
    }
}
