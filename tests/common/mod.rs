#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{header, Method, Request, Response},
    Router,
};
use chrono::{Duration, NaiveDate, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use salon_booking_api::{
    auth::{AuthUser, JwtVerifier, Role},
    build_router,
    config::AppConfig,
    db,
    entities::{booking, payment, salon, salon_service, vendor_request, VendorRequestStatus},
    errors::ServiceError,
    handlers::AppServices,
    services::{
        bookings::{BookingItemRequest, CreateBookingRequest},
        gateway::{
            GatewayOrder, GatewayPayment, GatewayPaymentStatus, GatewayRefund, GatewaySignatures,
            OrderRequest, PaymentGateway, RefundRequest,
        },
        notifications::{BookingNotice, NoticeKind, NotificationError, Notifier},
        BookingOrchestrator,
    },
    AppState,
};

pub const JWT_SECRET: &str = "integration-test-jwt-secret-0123456789";
pub const KEY_ID: &str = "key_test_public";
pub const KEY_SECRET: &str = "gateway-key-secret-for-tests";
pub const WEBHOOK_SECRET: &str = "gateway-webhook-secret-for-tests";

/// In-process gateway. Orders and payments live in memory; refunds are recorded.
#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<FakeState>,
    fail_refunds: AtomicBool,
}

#[derive(Default)]
struct FakeState {
    sequence: u32,
    orders: HashMap<String, GatewayOrder>,
    payments: HashMap<String, GatewayPayment>,
    refunds: Vec<(String, RefundRequest)>,
}

impl FakeState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.sequence += 1;
        format!("{}_{:06}", prefix, self.sequence)
    }
}

impl FakeGateway {
    pub fn orders_created(&self) -> usize {
        self.state.lock().unwrap().orders.len()
    }

    /// Simulates the customer completing checkout for an existing order
    pub fn pay(&self, order_id: &str, status: GatewayPaymentStatus) -> String {
        let amount = self.state.lock().unwrap().orders[order_id].amount;
        self.record_payment(order_id, amount, status)
    }

    /// Registers a payment against any order id, known or not
    pub fn record_payment(&self, order_id: &str, amount: i64, status: GatewayPaymentStatus) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("pay");
        state.payments.insert(
            id.clone(),
            GatewayPayment {
                id: id.clone(),
                order_id: Some(order_id.to_string()),
                amount,
                currency: "INR".into(),
                status,
                method: Some("upi".into()),
            },
        );
        id
    }

    pub fn refunds(&self) -> Vec<(String, RefundRequest)> {
        self.state.lock().unwrap().refunds.clone()
    }

    pub fn set_refunds_failing(&self, failing: bool) {
        self.fail_refunds.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_order(&self, request: OrderRequest) -> Result<GatewayOrder, ServiceError> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("order");
        let order = GatewayOrder {
            id: id.clone(),
            amount: request.amount,
            currency: request.currency,
            receipt: Some(request.receipt),
            status: Some("created".into()),
        };
        state.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, ServiceError> {
        self.state
            .lock()
            .unwrap()
            .payments
            .get(payment_id)
            .cloned()
            .ok_or_else(|| ServiceError::InvalidRequest(format!("unknown payment {}", payment_id)))
    }

    async fn capture_payment(
        &self,
        payment_id: &str,
        _amount: i64,
        _currency: &str,
    ) -> Result<GatewayPayment, ServiceError> {
        let mut state = self.state.lock().unwrap();
        let payment = state
            .payments
            .get_mut(payment_id)
            .ok_or_else(|| ServiceError::InvalidRequest(format!("unknown payment {}", payment_id)))?;
        payment.status = GatewayPaymentStatus::Captured;
        Ok(payment.clone())
    }

    async fn refund_payment(
        &self,
        payment_id: &str,
        request: RefundRequest,
    ) -> Result<GatewayRefund, ServiceError> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayUnavailable(
                "refund_payment returned 503".into(),
            ));
        }
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("rfnd");
        state
            .refunds
            .push((payment_id.to_string(), request.clone()));
        Ok(GatewayRefund {
            id,
            payment_id: payment_id.to_string(),
            amount: request.amount,
            status: Some("processed".into()),
        })
    }
}

/// Keeps every notice it is handed
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<BookingNotice>>,
}

impl RecordingNotifier {
    pub fn count(&self, kind: NoticeKind) -> usize {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .filter(|notice| notice.kind == kind)
            .count()
    }

    pub fn all(&self) -> Vec<BookingNotice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notice: &BookingNotice) -> Result<(), NotificationError> {
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

/// A seeded salon with two active services (500.00 and 300.00) and one priced at 1000.00
pub struct SeededSalon {
    pub salon: salon::Model,
    pub vendor: AuthUser,
    pub haircut: salon_service::Model,
    pub colour: salon_service::Model,
    pub facial: salon_service::Model,
}

pub struct Harness {
    pub db: Arc<DatabaseConnection>,
    pub config: AppConfig,
    pub services: AppServices,
    pub orchestrator: Arc<BookingOrchestrator>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub signatures: GatewaySignatures,
    pub verifier: JwtVerifier,
}

impl Harness {
    /// Fresh in-memory database with migrations applied.
    ///
    /// One pooled connection keeps every query on the same in-memory database
    /// and serializes concurrent units of work the way row locks would.
    pub async fn new() -> Self {
        let mut config = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
            "http://gateway.invalid".to_string(),
            KEY_ID.to_string(),
            KEY_SECRET.to_string(),
            WEBHOOK_SECRET.to_string(),
        );
        config.db_max_connections = 1;
        config.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&config)
            .await
            .expect("in-memory database");
        db::run_migrations(&pool).await.expect("migrations");
        let db = Arc::new(pool);

        let gateway = Arc::new(FakeGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let services = AppServices::new(
            db.clone(),
            &config,
            gateway.clone(),
            notifier.clone(),
            None,
        );

        Self {
            orchestrator: services.orchestrator.clone(),
            signatures: GatewaySignatures::new(KEY_SECRET, WEBHOOK_SECRET),
            verifier: JwtVerifier::new(JWT_SECRET),
            db,
            config,
            services,
            gateway,
            notifier,
        }
    }

    pub fn router(&self) -> Router {
        build_router(AppState::new(
            self.db.clone(),
            self.config.clone(),
            self.services.clone(),
        ))
    }

    pub fn token(&self, user: &AuthUser) -> String {
        self.verifier
            .issue(user, Duration::minutes(10))
            .expect("token")
    }

    pub async fn seed_salon(&self) -> SeededSalon {
        let vendor = AuthUser::new(Uuid::new_v4(), Role::Vendor);
        let salon = salon::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Glow Studio".into()),
            vendor_id: Set(vendor.user_id),
            is_active: Set(true),
            registration_paid: Set(true),
            activated_at: Set(Some(Utc::now())),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("salon");

        let haircut = self.seed_service(salon.id, "Haircut", 50_000).await;
        let colour = self.seed_service(salon.id, "Hair colour", 30_000).await;
        let facial = self.seed_service(salon.id, "Facial", 100_000).await;
        SeededSalon {
            salon,
            vendor,
            haircut,
            colour,
            facial,
        }
    }

    pub async fn seed_service(&self, salon_id: Uuid, name: &str, price_minor: i64) -> salon_service::Model {
        salon_service::ActiveModel {
            id: Set(Uuid::new_v4()),
            salon_id: Set(salon_id),
            name: Set(name.into()),
            price_minor: Set(price_minor),
            duration_minutes: Set(45),
            is_active: Set(true),
        }
        .insert(&*self.db)
        .await
        .expect("salon service")
    }

    /// An inactive salon awaiting its registration fee, with an approved request
    pub async fn seed_vendor_request(&self, fee_minor: i64) -> (AuthUser, salon::Model, vendor_request::Model) {
        let vendor = AuthUser::new(Uuid::new_v4(), Role::Vendor);
        let salon = salon::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("New Salon".into()),
            vendor_id: Set(vendor.user_id),
            is_active: Set(false),
            registration_paid: Set(false),
            activated_at: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("salon");
        let request = vendor_request::ActiveModel {
            id: Set(Uuid::new_v4()),
            vendor_id: Set(vendor.user_id),
            salon_id: Set(salon.id),
            registration_fee_minor: Set(fee_minor),
            status: Set(VendorRequestStatus::Approved),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("vendor request");
        (vendor, salon, request)
    }

    pub async fn booking(&self, id: Uuid) -> booking::Model {
        booking::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .unwrap()
            .expect("booking")
    }

    pub async fn legs(&self, booking_id: Uuid) -> Vec<payment::Model> {
        use sea_orm::{ColumnTrait, QueryFilter};
        payment::Entity::find()
            .filter(payment::Column::BookingId.eq(booking_id))
            .all(&*self.db)
            .await
            .unwrap()
    }

    pub fn sign_payment(&self, order_id: &str, payment_id: &str) -> String {
        self.signatures.sign_payment(order_id, payment_id)
    }

    pub fn sign_webhook(&self, body: &[u8]) -> String {
        self.signatures.sign_webhook(body)
    }
}

pub fn customer() -> AuthUser {
    AuthUser::new(Uuid::new_v4(), Role::Customer)
}

pub fn booking_date() -> NaiveDate {
    Utc::now().date_naive() + Duration::days(3)
}

pub fn booking_request(salon_id: Uuid, items: &[(Uuid, u32)]) -> CreateBookingRequest {
    CreateBookingRequest {
        salon_id,
        services: items
            .iter()
            .map(|&(service_id, quantity)| BookingItemRequest {
                service_id,
                quantity,
            })
            .collect(),
        booking_date: booking_date(),
        booking_time: "10:30".into(),
        alternate_slots: vec!["14:00".into()],
        pricing_mode: Default::default(),
        notes: None,
        payment_proof: None,
    }
}

pub fn webhook_body(event: &str, payment_id: &str, order_id: &str, amount: i64) -> Vec<u8> {
    serde_json::json!({
        "event": event,
        "payload": {
            "payment": {
                "entity": {
                    "id": payment_id,
                    "order_id": order_id,
                    "amount": amount,
                    "currency": "INR",
                    "status": if event == "payment.failed" { "failed" } else { "captured" },
                    "method": "upi",
                    "error_description": if event == "payment.failed" { Some("card declined") } else { None },
                }
            }
        }
    })
    .to_string()
    .into_bytes()
}

pub async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();
    router.clone().oneshot(request).await.unwrap()
}

pub async fn response_json(response: Response<Body>) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
