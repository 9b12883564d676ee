//! Booking and payment orchestration.
//!
//! This is the only component that mutates bookings and payment legs. Every
//! mutating operation runs its database writes inside one
//! [`UnitOfWork`]; gateway calls, notifications and events happen outside it.
//!
//! Lock order is always payment leg(s) first, then the booking row.

use crate::{
    auth::{AuthUser, Role},
    config::AppConfig,
    db::unit_of_work::UnitOfWork,
    entities::{
        booking::{self, BookingStatus},
        payment, refund, salon, vendor_request, PaymentStatus, PaymentType, RefundStatus,
        VendorRequestStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        bookings::{
            BookingDetails, BookingFilters, BookingListResponse, BookingResponse, BookingStore,
            CreateBookingRequest, ListScope, NewBooking, PaymentLegResponse, PaymentProof,
            QuoteRequest,
        },
        catalog::{priced_items, ServiceCatalog},
        fee_settings::FeeSettingsStore,
        fees::{self, from_minor, to_minor, FeeQuote},
        gateway::{
            bounded, GatewayPaymentStatus, GatewaySignatures, OrderRequest, PaymentGateway,
            RefundRequest,
        },
        ledger::{GatewaySettlement, LegSettlement, PaymentLedger, RevenueTotals},
        notifications::{deliver, BookingNotice, NoticeKind, Notifier},
        refunds::{RefundLedger, RefundResponse},
        webhooks::{PaymentEntity, WebhookEvent, WebhookOutcome},
    },
};
use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct VerifyPaymentRequest {
    #[validate(length(min = 1, message = "Order id is required"))]
    pub order_id: String,
    #[validate(length(min = 1, message = "Payment id is required"))]
    pub payment_id: String,
    #[validate(length(min = 1, message = "Signature is required"))]
    pub signature: String,
}

impl From<PaymentProof> for VerifyPaymentRequest {
    fn from(proof: PaymentProof) -> Self {
        Self {
            order_id: proof.order_id,
            payment_id: proof.payment_id,
            signature: proof.signature,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreatePaymentOrderRequest {
    pub booking_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateRegistrationOrderRequest {
    pub vendor_request_id: Uuid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct CancelBookingRequest {
    #[validate(length(max = 500, message = "Reason cannot exceed 500 characters"))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct CompleteBookingRequest {
    /// Settles the pay-at-salon leg on the way if it is still open
    #[validate(length(min = 1, max = 32, message = "Payment method must be 1-32 characters"))]
    pub payment_method: Option<String>,
    /// Collected amount, defaults to the quoted service price
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ManualPaymentRequest {
    pub amount: Decimal,
    #[validate(length(min = 1, max = 32, message = "Payment method must be 1-32 characters"))]
    pub method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentBreakdown {
    pub service_price: Decimal,
    pub convenience_fee: Decimal,
    pub total_to_pay_now: Decimal,
    pub pay_at_salon: Decimal,
}

/// Everything the client needs to open the gateway's checkout
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentOrderResponse {
    pub order_id: String,
    pub amount: Decimal,
    pub amount_minor_units: i64,
    pub currency: String,
    pub gateway_public_key: String,
    pub booking_id: Option<Uuid>,
    pub vendor_request_id: Option<Uuid>,
    pub breakdown: Option<PaymentBreakdown>,
}

/// Result of a verified payment. `already_processed` marks the idempotent replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentConfirmation {
    pub success: bool,
    pub message: String,
    pub payment_id: String,
    pub payment_type: PaymentType,
    pub booking_id: Option<Uuid>,
    pub vendor_request_id: Option<Uuid>,
    pub booking_date: Option<NaiveDate>,
    pub booking_time: Option<String>,
    pub amount_paid: Decimal,
    pub already_processed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BookingCreatedResponse {
    #[serde(flatten)]
    pub booking: BookingDetails,
    pub quote: FeeQuote,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CancellationResponse {
    pub success: bool,
    pub message: String,
    pub booking: BookingResponse,
    pub refund: Option<RefundResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefundRetrySummary {
    pub attempted: usize,
    pub processed: usize,
    pub failed: usize,
    pub refunds: Vec<RefundResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PendingPaymentResponse {
    #[serde(flatten)]
    pub payment: PaymentLegResponse,
    pub booking_id: Uuid,
    pub booking_number: String,
    pub booking_date: NaiveDate,
    pub booking_status: BookingStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct RevenueQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Admins only: report on this vendor
    pub vendor_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RevenueResponse {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub payment_type: PaymentType,
    pub currency: String,
    pub amount: Decimal,
    pub amount_minor: i64,
    pub payments: u64,
}

/// What applying a gateway payment did to its leg
enum LegOutcome {
    Applied(PaymentConfirmation),
    /// Captured for a cancelled booking: the leg is recorded and the money refunded
    Refunded {
        refund: refund::Model,
        already_processed: bool,
    },
    /// Verified by the gateway but not applied; left for an operator
    Held { reason: String },
}

/// Who is asking for a payment to be confirmed
#[derive(Debug, Clone, Copy)]
pub enum Caller<'a> {
    /// An authenticated user, who must own the booking or vendor request
    User(&'a AuthUser),
    /// The gateway, authenticated by the webhook body signature
    Webhook,
}

impl Caller<'_> {
    fn source(&self) -> &'static str {
        match self {
            Caller::User(_) => "client",
            Caller::Webhook => "webhook",
        }
    }
}

/// Tunables taken from configuration
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub currency: String,
    /// Public key id handed to the checkout UI
    pub gateway_key_id: String,
    pub gateway_timeout: Duration,
    pub refund_max_attempts: u32,
    /// A `pending` refund younger than this may still have its first call in flight
    pub refund_retry_grace: Duration,
}

impl OrchestratorOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            currency: config.currency.clone(),
            gateway_key_id: config.gateway_key_id.clone(),
            gateway_timeout: config.gateway_timeout(),
            refund_max_attempts: config.refund_max_attempts,
            refund_retry_grace: Duration::from_secs(300),
        }
    }
}

pub struct BookingOrchestrator {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    signatures: GatewaySignatures,
    fee_settings: Arc<FeeSettingsStore>,
    notifier: Arc<dyn Notifier>,
    events: Option<EventSender>,
    options: OrchestratorOptions,
    bookings: BookingStore,
    ledger: PaymentLedger,
    refunds: RefundLedger,
    catalog: ServiceCatalog,
}

impl BookingOrchestrator {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        signatures: GatewaySignatures,
        fee_settings: Arc<FeeSettingsStore>,
        notifier: Arc<dyn Notifier>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            db,
            gateway,
            signatures,
            fee_settings,
            notifier,
            events: None,
            options,
            bookings: BookingStore,
            ledger: PaymentLedger,
            refunds: RefundLedger,
            catalog: ServiceCatalog,
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn fee_settings(&self) -> &Arc<FeeSettingsStore> {
        &self.fee_settings
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    async fn notify(&self, notice: BookingNotice) {
        deliver(self.notifier.as_ref(), notice).await;
    }

    fn booking_notice(&self, kind: NoticeKind, booking: &booking::Model) -> BookingNotice {
        BookingNotice {
            kind,
            recipient_id: booking.customer_id,
            salon_id: booking.salon_id,
            booking_id: Some(booking.id),
            booking_number: Some(booking.booking_number.clone()),
            booking_date: Some(booking.booking_date),
            booking_time: Some(booking.booking_time.clone()),
            amount: None,
            reason: None,
            currency: booking.currency.clone(),
        }
    }

    /// Prices a cart without persisting anything
    #[instrument(skip(self, request), fields(salon_id = %request.salon_id))]
    pub async fn quote(&self, request: QuoteRequest) -> Result<FeeQuote, ServiceError> {
        request.validate()?;
        for item in &request.services {
            item.validate()?;
        }
        let settings = self.fee_settings.snapshot().await?;

        let salon = self.catalog.find_salon(&*self.db, request.salon_id).await?;
        if !salon.is_active {
            return Err(ServiceError::InvalidRequest(
                "salon is not accepting bookings".to_string(),
            ));
        }
        let lines: Vec<(Uuid, u32)> = request
            .services
            .iter()
            .map(|item| (item.service_id, item.quantity))
            .collect();
        let items = self.catalog.resolve(&*self.db, salon.id, &lines).await?;
        let breakdown = fees::quote(&priced_items(&items), request.pricing_mode, &settings)?;
        Ok(breakdown.to_quote(request.pricing_mode, &self.options.currency))
    }

    /// Creates a booking with its two payment legs.
    ///
    /// With a `payment_proof` the booking starts `confirmed`, but only after
    /// the signature verifies and the gateway reports a captured payment of
    /// exactly the convenience fee on that order.
    #[instrument(skip(self, user, request), fields(customer_id = %user.user_id, salon_id = %request.salon_id))]
    pub async fn create_booking(
        &self,
        user: &AuthUser,
        request: CreateBookingRequest,
    ) -> Result<BookingCreatedResponse, ServiceError> {
        user.require_role(&[Role::Customer])?;
        request.validate()?;
        for item in &request.services {
            item.validate()?;
        }
        let requested_slots = request.requested_slots()?;
        if request.booking_date < Utc::now().date_naive() {
            return Err(ServiceError::InvalidRequest(
                "booking date is in the past".to_string(),
            ));
        }

        let settings = self.fee_settings.snapshot().await?;
        let salon = self.catalog.find_salon(&*self.db, request.salon_id).await?;
        if !salon.is_active {
            return Err(ServiceError::InvalidRequest(
                "salon is not accepting bookings".to_string(),
            ));
        }
        let items = self
            .catalog
            .resolve(&*self.db, salon.id, &request.line_items())
            .await?;
        let breakdown = fees::quote(&priced_items(&items), request.pricing_mode, &settings)?;

        let prepaid = match request.payment_proof.clone() {
            Some(proof) => Some(
                self.verify_prepayment(proof, breakdown.convenience_fee_minor)
                    .await?,
            ),
            None => None,
        };

        let uow = UnitOfWork::begin(&self.db, "create_booking").await?;
        let created = self
            .bookings
            .insert(
                uow.conn(),
                NewBooking {
                    customer_id: user.user_id,
                    salon_id: salon.id,
                    booking_date: request.booking_date,
                    requested_slots,
                    pricing_mode: request.pricing_mode,
                    fees: breakdown,
                    currency: &self.options.currency,
                    status: if prepaid.is_some() {
                        BookingStatus::Confirmed
                    } else {
                        BookingStatus::Pending
                    },
                    notes: request.notes.clone(),
                    items: &items,
                },
            )
            .await?;
        let convenience_leg = self
            .ledger
            .create_booking_leg(
                uow.conn(),
                created.id,
                PaymentType::ConvenienceFee,
                breakdown.convenience_fee_minor,
                &self.options.currency,
            )
            .await?;
        self.ledger
            .create_booking_leg(
                uow.conn(),
                created.id,
                PaymentType::ServicePayment,
                breakdown.service_price_minor,
                &self.options.currency,
            )
            .await?;

        if let Some((order_id, settlement)) = &prepaid {
            if !self
                .ledger
                .attach_order(uow.conn(), convenience_leg.id, order_id)
                .await?
            {
                return Err(ServiceError::Conflict(
                    "payment order already used".to_string(),
                ));
            }
            self.ledger
                .mark_leg_successful(uow.conn(), convenience_leg.id, settlement)
                .await?;
        }

        let details = self.load_details(uow.conn(), created.clone()).await?;
        uow.commit().await?;

        counter!("salon_bookings.created", 1, "prepaid" => prepaid.is_some().to_string());
        self.emit(Event::BookingCreated {
            booking_id: created.id,
            salon_id: created.salon_id,
            total_amount_minor: created.total_amount_minor,
        });
        let mut notice = self.booking_notice(NoticeKind::BookingCreated, &created);
        notice.amount = Some(from_minor(created.total_amount_minor));
        self.notify(notice).await;

        if prepaid.is_some() {
            self.emit(Event::PaymentCaptured {
                payment_id: convenience_leg.id,
                payment_type: PaymentType::ConvenienceFee,
                amount_minor: convenience_leg.amount_minor,
            });
            self.emit(Event::BookingConfirmed {
                booking_id: created.id,
                confirmed_at: created.confirmed_at.unwrap_or(created.created_at),
            });
            let mut receipt = self.booking_notice(NoticeKind::PaymentReceipt, &created);
            receipt.amount = Some(from_minor(convenience_leg.amount_minor));
            self.notify(receipt).await;
        }

        Ok(BookingCreatedResponse {
            booking: details,
            quote: breakdown.to_quote(request.pricing_mode, &self.options.currency),
        })
    }

    /// Checks a client-supplied payment reference against the gateway before
    /// it may confirm a new booking. Captures an authorized payment.
    async fn verify_prepayment(
        &self,
        proof: PaymentProof,
        expected_minor: i64,
    ) -> Result<(String, GatewaySettlement), ServiceError> {
        proof.validate()?;
        if let Err(e) = self.signatures.verify_payment_signature(
            &proof.order_id,
            &proof.payment_id,
            &proof.signature,
        ) {
            counter!("salon_payments.verifications", 1, "outcome" => "signature_invalid", "source" => "prepaid");
            return Err(e);
        }

        let timeout = self.options.gateway_timeout;
        let mut payment = bounded(
            timeout,
            "fetch_payment",
            self.gateway.fetch_payment(&proof.payment_id),
        )
        .await?;
        if payment.order_id.as_deref() != Some(proof.order_id.as_str()) {
            warn!(target: "security", order_id = %proof.order_id, payment_id = %proof.payment_id, "payment does not belong to the order");
            return Err(ServiceError::SignatureInvalid);
        }
        if payment.amount != expected_minor {
            warn!(
                order_id = %proof.order_id,
                paid = payment.amount,
                expected = expected_minor,
                "prepaid amount does not match the convenience fee"
            );
            return Err(ServiceError::InvalidRequest(
                "paid amount does not match the booking fee".to_string(),
            ));
        }
        if payment.status == GatewayPaymentStatus::Authorized {
            payment = bounded(
                timeout,
                "capture_payment",
                self.gateway
                    .capture_payment(&payment.id, expected_minor, &self.options.currency),
            )
            .await?;
        }
        if payment.status != GatewayPaymentStatus::Captured {
            return Err(ServiceError::InvalidRequest(format!(
                "payment is {:?}, not captured",
                payment.status
            )));
        }

        Ok((
            proof.order_id,
            GatewaySettlement {
                gateway_payment_id: payment.id,
                gateway_signature: proof.signature,
                method: payment.method,
            },
        ))
    }

    /// Opens (or reuses) the gateway order for a booking's convenience fee
    #[instrument(skip(self, user), fields(caller = %user.user_id))]
    pub async fn create_payment_order(
        &self,
        user: &AuthUser,
        booking_id: Uuid,
    ) -> Result<PaymentOrderResponse, ServiceError> {
        let booking = self.bookings.find(&*self.db, booking_id).await?;
        if booking.customer_id != user.user_id && !user.is_admin() {
            return Err(ServiceError::Forbidden(
                "only the booking's customer can pay for it".to_string(),
            ));
        }
        match booking.status {
            BookingStatus::Pending | BookingStatus::PaymentFailed => {}
            BookingStatus::Confirmed | BookingStatus::Completed => {
                return Err(ServiceError::Conflict("booking is already paid".to_string()))
            }
            BookingStatus::Cancelled => {
                return Err(ServiceError::InvalidRequest(
                    "booking is cancelled".to_string(),
                ))
            }
        }

        let leg = self
            .ledger
            .find_leg(&*self.db, booking.id, PaymentType::ConvenienceFee)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("convenience fee for booking {}", booking.id)))?;
        if leg.is_settled() {
            return Err(ServiceError::Conflict("booking is already paid".to_string()));
        }
        if leg.amount_minor <= 0 {
            return Err(ServiceError::InvalidRequest(
                "nothing to pay online for this booking".to_string(),
            ));
        }

        let order_id = match leg.gateway_order_id.clone() {
            Some(existing) => {
                info!(order_id = %existing, "reusing gateway order");
                existing
            }
            None => {
                let mut notes = BTreeMap::new();
                notes.insert("booking_id".to_string(), booking.id.to_string());
                notes.insert("payment_type".to_string(), leg.payment_type.to_string());
                self.open_order(&leg, booking.booking_number.clone(), notes)
                    .await?
            }
        };

        Ok(PaymentOrderResponse {
            order_id,
            amount: from_minor(leg.amount_minor),
            amount_minor_units: leg.amount_minor,
            currency: leg.currency.clone(),
            gateway_public_key: self.options.gateway_key_id.clone(),
            booking_id: Some(booking.id),
            vendor_request_id: None,
            breakdown: Some(PaymentBreakdown {
                service_price: from_minor(booking.service_price_minor),
                convenience_fee: from_minor(booking.convenience_fee_minor),
                total_to_pay_now: from_minor(leg.amount_minor),
                pay_at_salon: from_minor(booking.service_price_minor),
            }),
        })
    }

    /// Creates a gateway order for `leg` and stores its id. When a concurrent
    /// request attached an order first, that order wins.
    async fn open_order(
        &self,
        leg: &payment::Model,
        receipt: String,
        notes: BTreeMap<String, String>,
    ) -> Result<String, ServiceError> {
        let order = bounded(
            self.options.gateway_timeout,
            "create_order",
            self.gateway.create_order(OrderRequest {
                amount: leg.amount_minor,
                currency: leg.currency.clone(),
                receipt,
                notes,
            }),
        )
        .await?;
        if order.amount != leg.amount_minor {
            error!(order_id = %order.id, ordered = leg.amount_minor, returned = order.amount, "gateway order amount mismatch");
            return Err(ServiceError::InternalError(
                "gateway order amount mismatch".to_string(),
            ));
        }

        if self.ledger.attach_order(&*self.db, leg.id, &order.id).await? {
            info!(order_id = %order.id, leg_id = %leg.id, "gateway order created");
            return Ok(order.id);
        }

        let current = payment::Entity::find_by_id(leg.id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("payment", leg.id))?;
        if current.is_settled() {
            return Err(ServiceError::Conflict("already paid".to_string()));
        }
        current.gateway_order_id.ok_or_else(|| {
            ServiceError::InternalError("gateway order could not be attached".to_string())
        })
    }

    /// Client-side confirmation after checkout
    #[instrument(skip(self, caller, request), fields(order_id = %request.order_id, source = caller.source()))]
    pub async fn verify_payment(
        &self,
        caller: Caller<'_>,
        request: VerifyPaymentRequest,
    ) -> Result<PaymentConfirmation, ServiceError> {
        request.validate()?;
        if let Err(e) = self.signatures.verify_payment_signature(
            &request.order_id,
            &request.payment_id,
            &request.signature,
        ) {
            counter!("salon_payments.verifications", 1, "outcome" => "signature_invalid", "source" => caller.source());
            return Err(e);
        }

        let outcome = self
            .confirm_leg(
                caller,
                &request.order_id,
                GatewaySettlement {
                    gateway_payment_id: request.payment_id,
                    gateway_signature: request.signature,
                    method: None,
                },
                None,
            )
            .await?;
        match outcome {
            LegOutcome::Applied(confirmation) => Ok(confirmation),
            LegOutcome::Refunded { .. } => Err(ServiceError::InvalidRequest(
                "booking has been cancelled".to_string(),
            )),
            LegOutcome::Held { reason } => Err(ServiceError::InvalidRequest(reason)),
        }
    }

    /// The confirmation step shared by client verification and webhooks.
    ///
    /// Locks the leg by order id and re-checks its status under the lock. A
    /// leg that is already `success` yields the stored confirmation with
    /// `already_processed` set and no side effects.
    async fn confirm_leg(
        &self,
        caller: Caller<'_>,
        order_id: &str,
        settlement: GatewaySettlement,
        gateway_amount: Option<i64>,
    ) -> Result<LegOutcome, ServiceError> {
        let source = caller.source();
        let from_gateway = matches!(caller, Caller::Webhook);
        let uow = UnitOfWork::begin(&self.db, "confirm_payment").await?;
        let leg = self
            .ledger
            .lock_by_order_id(uow.conn(), order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("payment order {}", order_id)))?;

        if leg.is_settled() {
            let refund = self.refunds.for_payment(uow.conn(), leg.id).await?;
            uow.rollback().await?;
            counter!("salon_payments.verifications", 1, "outcome" => "duplicate", "source" => source);
            info!(order_id, leg_id = %leg.id, refunded = refund.is_some(), "payment already confirmed");
            return match refund {
                Some(refund) => Ok(LegOutcome::Refunded {
                    refund,
                    already_processed: true,
                }),
                None => self.confirmation_for(&leg, true).await.map(LegOutcome::Applied),
            };
        }

        if let Caller::User(user) = caller {
            self.authorize_payer(uow.conn(), user, &leg).await?;
        }
        if let Some(amount) = gateway_amount {
            if amount != leg.amount_minor {
                error!(order_id, paid = amount, expected = leg.amount_minor, "gateway amount differs from leg");
                uow.rollback().await?;
                let reason = "paid amount does not match the order".to_string();
                return if from_gateway {
                    counter!("salon_payments.verifications", 1, "outcome" => "held", "source" => source);
                    Ok(LegOutcome::Held { reason })
                } else {
                    Err(ServiceError::InvalidRequest(reason))
                };
            }
        }

        let mut confirmed_booking = None;
        let mut activated_salon = None;
        match leg.payment_type {
            PaymentType::ConvenienceFee => {
                let booking_id = leg_booking_id(&leg)?;
                let booking = self.bookings.lock(uow.conn(), booking_id).await?;
                match booking.status {
                    BookingStatus::Pending | BookingStatus::PaymentFailed => {}
                    BookingStatus::Cancelled if from_gateway => {
                        return self
                            .refund_late_capture(uow, leg, settlement, booking.id)
                            .await;
                    }
                    BookingStatus::Cancelled => {
                        error!(
                            order_id,
                            booking_id = %booking.id,
                            payment_id = %settlement.gateway_payment_id,
                            "payment captured for a cancelled booking, refunded when the gateway reports it"
                        );
                        return Err(ServiceError::InvalidRequest(
                            "booking has been cancelled".to_string(),
                        ));
                    }
                    BookingStatus::Confirmed | BookingStatus::Completed => {
                        error!(order_id, booking_id = %booking.id, "second convenience payment for a confirmed booking");
                        uow.rollback().await?;
                        let reason = "booking is already confirmed".to_string();
                        return if from_gateway {
                            counter!("salon_payments.verifications", 1, "outcome" => "held", "source" => source);
                            Ok(LegOutcome::Held { reason })
                        } else {
                            Err(ServiceError::Conflict(reason))
                        };
                    }
                }
                if self.settle(&uow, &leg, &settlement).await? == LegSettlement::AlreadySuccessful {
                    uow.rollback().await?;
                    return self.confirmation_for(&leg, true).await.map(LegOutcome::Applied);
                }
                confirmed_booking = Some(
                    self.bookings
                        .transition(uow.conn(), &booking, BookingStatus::Confirmed, None)
                        .await?,
                );
            }
            PaymentType::ServicePayment => {
                let booking_id = leg_booking_id(&leg)?;
                if self.settle(&uow, &leg, &settlement).await? == LegSettlement::AlreadySuccessful {
                    uow.rollback().await?;
                    return self.confirmation_for(&leg, true).await.map(LegOutcome::Applied);
                }
                self.bookings.mark_service_paid(uow.conn(), booking_id).await?;
            }
            PaymentType::VendorRegistration => {
                let request_id = leg.vendor_request_id.ok_or_else(|| {
                    ServiceError::InternalError(format!("registration leg {} has no request", leg.id))
                })?;
                if self.settle(&uow, &leg, &settlement).await? == LegSettlement::AlreadySuccessful {
                    uow.rollback().await?;
                    return self.confirmation_for(&leg, true).await.map(LegOutcome::Applied);
                }
                activated_salon = Some(activate_salon(uow.conn(), request_id).await?);
            }
        }
        uow.commit().await?;

        counter!("salon_payments.verifications", 1, "outcome" => "confirmed", "source" => source);
        info!(order_id, leg_id = %leg.id, payment_type = %leg.payment_type, "payment confirmed");
        self.emit(Event::PaymentCaptured {
            payment_id: leg.id,
            payment_type: leg.payment_type,
            amount_minor: leg.amount_minor,
        });

        if let Some(booking) = &confirmed_booking {
            self.emit(Event::BookingConfirmed {
                booking_id: booking.id,
                confirmed_at: booking.confirmed_at.unwrap_or(booking.updated_at),
            });
            let mut receipt = self.booking_notice(NoticeKind::PaymentReceipt, booking);
            receipt.amount = Some(from_minor(leg.amount_minor));
            self.notify(receipt).await;
            self.notify(self.booking_notice(NoticeKind::BookingConfirmed, booking))
                .await;
        }
        if let Some((salon, request)) = &activated_salon {
            self.emit(Event::SalonActivated {
                salon_id: salon.id,
                vendor_request_id: request.id,
            });
            self.notify(BookingNotice {
                kind: NoticeKind::SalonActivated,
                recipient_id: request.vendor_id,
                salon_id: salon.id,
                booking_id: None,
                booking_number: None,
                booking_date: None,
                booking_time: None,
                amount: Some(from_minor(leg.amount_minor)),
                reason: None,
                currency: leg.currency.clone(),
            })
            .await;
        }

        let settled = payment::Model {
            status: PaymentStatus::Success,
            gateway_payment_id: Some(settlement.gateway_payment_id),
            ..leg
        };
        self.confirmation_for(&settled, false)
            .await
            .map(LegOutcome::Applied)
    }

    /// Money the gateway captured after the booking was cancelled. The leg
    /// records the capture and a refund row is opened with it, so the
    /// refund survives a failed gateway call and is picked up by retries.
    async fn refund_late_capture(
        &self,
        uow: UnitOfWork,
        leg: payment::Model,
        settlement: GatewaySettlement,
        booking_id: Uuid,
    ) -> Result<LegOutcome, ServiceError> {
        if self.settle(&uow, &leg, &settlement).await? == LegSettlement::AlreadySuccessful {
            let refund = self.refunds.for_payment(uow.conn(), leg.id).await?;
            uow.rollback().await?;
            return match refund {
                Some(refund) => Ok(LegOutcome::Refunded {
                    refund,
                    already_processed: true,
                }),
                None => self.confirmation_for(&leg, true).await.map(LegOutcome::Applied),
            };
        }
        let settled = payment::Model {
            status: PaymentStatus::Success,
            gateway_payment_id: Some(settlement.gateway_payment_id),
            gateway_signature: Some(settlement.gateway_signature),
            ..leg
        };
        let opened = self.refunds.open(uow.conn(), booking_id, &settled).await?;
        uow.commit().await?;

        counter!("salon_payments.verifications", 1, "outcome" => "refunded", "source" => "webhook");
        error!(
            order_id = settled.gateway_order_id.as_deref().unwrap_or_default(),
            %booking_id,
            refund_id = %opened.id,
            "payment captured for a cancelled booking, refunding"
        );
        self.emit(Event::PaymentCaptured {
            payment_id: settled.id,
            payment_type: settled.payment_type,
            amount_minor: settled.amount_minor,
        });
        let refund = self.issue_refund(opened, &settled).await;
        Ok(LegOutcome::Refunded {
            refund,
            already_processed: false,
        })
    }

    async fn settle(
        &self,
        uow: &UnitOfWork,
        leg: &payment::Model,
        settlement: &GatewaySettlement,
    ) -> Result<LegSettlement, ServiceError> {
        self.ledger
            .mark_leg_successful(uow.conn(), leg.id, settlement)
            .await
    }

    async fn authorize_payer<C: sea_orm::ConnectionTrait>(
        &self,
        conn: &C,
        user: &AuthUser,
        leg: &payment::Model,
    ) -> Result<(), ServiceError> {
        if user.is_admin() {
            return Ok(());
        }
        let owner = match leg.payment_type {
            PaymentType::ConvenienceFee | PaymentType::ServicePayment => {
                self.bookings
                    .find(conn, leg_booking_id(leg)?)
                    .await?
                    .customer_id
            }
            PaymentType::VendorRegistration => {
                let request_id = leg.vendor_request_id.ok_or_else(|| {
                    ServiceError::InternalError(format!("registration leg {} has no request", leg.id))
                })?;
                find_vendor_request(conn, request_id).await?.vendor_id
            }
        };
        if owner == user.user_id {
            Ok(())
        } else {
            warn!(target: "security", caller = %user.user_id, leg_id = %leg.id, "payment verification by non-owner");
            Err(ServiceError::Forbidden(
                "payment belongs to another account".to_string(),
            ))
        }
    }

    async fn confirmation_for(
        &self,
        leg: &payment::Model,
        already_processed: bool,
    ) -> Result<PaymentConfirmation, ServiceError> {
        let booking = match leg.booking_id {
            Some(booking_id) => Some(self.bookings.find(&*self.db, booking_id).await?),
            None => None,
        };
        Ok(PaymentConfirmation {
            success: true,
            message: if already_processed {
                "Payment already verified".to_string()
            } else {
                "Payment verified".to_string()
            },
            payment_id: leg.gateway_payment_id.clone().unwrap_or_default(),
            payment_type: leg.payment_type,
            booking_id: leg.booking_id,
            vendor_request_id: leg.vendor_request_id,
            booking_date: booking.as_ref().map(|b| b.booking_date),
            booking_time: booking.map(|b| b.booking_time),
            amount_paid: from_minor(leg.amount_minor),
            already_processed,
        })
    }

    /// Gateway webhook. The signature is checked against the raw bytes before parsing.
    #[instrument(skip(self, raw_body, signature), fields(body_len = raw_body.len()))]
    pub async fn handle_webhook(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, ServiceError> {
        let Some(signature) = signature else {
            counter!("salon_payments.verifications", 1, "outcome" => "signature_invalid", "source" => "webhook");
            warn!(target: "security", "webhook without signature header");
            return Err(ServiceError::SignatureInvalid);
        };
        if let Err(e) = self.signatures.verify_webhook_signature(raw_body, signature) {
            counter!("salon_payments.verifications", 1, "outcome" => "signature_invalid", "source" => "webhook");
            return Err(e);
        }

        let event = WebhookEvent::parse(raw_body)?;
        counter!("salon_webhooks.received", 1, "event" => event.kind().to_string());

        match event {
            WebhookEvent::PaymentCaptured(entity) => {
                let Some(order_id) = entity.order_id.clone() else {
                    return Ok(ignored("payment.captured", "payment has no order"));
                };
                let settlement = GatewaySettlement {
                    gateway_payment_id: entity.id.clone(),
                    gateway_signature: signature.to_string(),
                    method: entity.method.clone(),
                };
                match self
                    .confirm_leg(Caller::Webhook, &order_id, settlement, Some(entity.amount))
                    .await
                {
                    Ok(LegOutcome::Applied(confirmation)) => Ok(WebhookOutcome::Confirmed {
                        order_id,
                        already_processed: confirmation.already_processed,
                    }),
                    Ok(LegOutcome::Refunded {
                        refund,
                        already_processed,
                    }) => Ok(WebhookOutcome::Refunded {
                        order_id,
                        refund_id: refund.id,
                        refund_status: refund.status,
                        already_processed,
                    }),
                    Ok(LegOutcome::Held { reason }) => {
                        warn!(%order_id, %reason, "captured payment held for review");
                        Ok(WebhookOutcome::Held { order_id, reason })
                    }
                    Err(ServiceError::NotFound(_)) => {
                        warn!(%order_id, "webhook for unknown order");
                        Ok(ignored("payment.captured", "unknown order"))
                    }
                    Err(e) => Err(e),
                }
            }
            WebhookEvent::PaymentFailed(entity) => self.fail_leg(entity).await,
            WebhookEvent::Unrecognized(kind) => {
                info!(event = %kind, "ignoring webhook event");
                Ok(ignored(&kind, "event not handled"))
            }
        }
    }

    /// `payment.failed`: a `pending` leg becomes `failed`; a pending booking
    /// behind a convenience leg becomes `payment_failed`. Settled legs are left alone.
    async fn fail_leg(&self, entity: PaymentEntity) -> Result<WebhookOutcome, ServiceError> {
        let Some(order_id) = entity.order_id else {
            return Ok(ignored("payment.failed", "payment has no order"));
        };
        let uow = UnitOfWork::begin(&self.db, "payment_failed").await?;
        let Some(leg) = self.ledger.lock_by_order_id(uow.conn(), &order_id).await? else {
            uow.rollback().await?;
            warn!(%order_id, "failure webhook for unknown order");
            return Ok(ignored("payment.failed", "unknown order"));
        };
        if leg.status != PaymentStatus::Pending {
            uow.rollback().await?;
            return Ok(ignored(
                "payment.failed",
                &format!("leg is already {}", leg.status),
            ));
        }

        let reason = entity.error_description.as_deref();
        self.ledger.mark_leg_failed(uow.conn(), leg.id, reason).await?;
        if leg.payment_type == PaymentType::ConvenienceFee {
            let booking = self.bookings.lock(uow.conn(), leg_booking_id(&leg)?).await?;
            if booking.status == BookingStatus::Pending {
                self.bookings
                    .transition(uow.conn(), &booking, BookingStatus::PaymentFailed, None)
                    .await?;
            }
        }
        uow.commit().await?;

        warn!(%order_id, leg_id = %leg.id, reason = ?reason, "payment failed");
        self.emit(Event::PaymentFailed {
            payment_id: leg.id,
            payment_type: leg.payment_type,
            reason: reason.map(str::to_string),
        });
        Ok(WebhookOutcome::PaymentFailed { order_id })
    }

    /// Cancels a booking and refunds the convenience fee if it was paid.
    ///
    /// The refund row is written with the status change; the gateway call
    /// comes after commit and its failure never fails the cancellation.
    #[instrument(skip(self, user, request), fields(caller = %user.user_id))]
    pub async fn cancel_booking(
        &self,
        user: &AuthUser,
        booking_id: Uuid,
        request: CancelBookingRequest,
    ) -> Result<CancellationResponse, ServiceError> {
        request.validate()?;
        let uow = UnitOfWork::begin(&self.db, "cancel_booking").await?;
        let legs = self.ledger.lock_legs_for_booking(uow.conn(), booking_id).await?;
        let booking = self.bookings.lock(uow.conn(), booking_id).await?;
        let salon = self.catalog.find_salon(uow.conn(), booking.salon_id).await?;
        if booking.customer_id != user.user_id && !user.can_operate_salon(&salon) {
            return Err(ServiceError::Forbidden(
                "cannot cancel another customer's booking".to_string(),
            ));
        }

        let cancelled = self
            .bookings
            .transition(
                uow.conn(),
                &booking,
                BookingStatus::Cancelled,
                request.reason.as_deref(),
            )
            .await?;
        self.ledger.void_pending_legs(uow.conn(), booking.id).await?;

        let paid_fee = legs
            .into_iter()
            .find(|leg| leg.payment_type == PaymentType::ConvenienceFee && leg.is_settled());
        let opened = match &paid_fee {
            Some(leg) => Some(self.refunds.open(uow.conn(), booking.id, leg).await?),
            None => None,
        };
        uow.commit().await?;

        info!(booking_id = %booking.id, refund = opened.is_some(), "booking cancelled");
        let refund = match (opened, paid_fee) {
            (Some(refund), Some(leg)) => Some(self.issue_refund(refund, &leg).await),
            _ => None,
        };

        self.emit(Event::BookingCancelled {
            booking_id: cancelled.id,
            reason: cancelled.cancellation_reason.clone(),
        });
        let mut notice = self.booking_notice(NoticeKind::BookingCancelled, &cancelled);
        notice.reason = cancelled.cancellation_reason.clone();
        notice.amount = refund.as_ref().map(|r| from_minor(r.amount_minor));
        self.notify(notice).await;

        Ok(CancellationResponse {
            success: true,
            message: match &refund {
                Some(r) if r.status == RefundStatus::Processed => {
                    "Booking cancelled, convenience fee refunded".to_string()
                }
                Some(_) => "Booking cancelled, refund is being processed".to_string(),
                None => "Booking cancelled".to_string(),
            },
            booking: cancelled.into(),
            refund: refund.map(RefundResponse::from),
        })
    }

    /// Calls the gateway for one refund row and records the outcome. Never fails.
    async fn issue_refund(&self, refund: refund::Model, leg: &payment::Model) -> refund::Model {
        let outcome = match leg.gateway_payment_id.as_deref() {
            Some(gateway_payment_id) => {
                bounded(
                    self.options.gateway_timeout,
                    "refund_payment",
                    self.gateway.refund_payment(
                        gateway_payment_id,
                        RefundRequest {
                            amount: refund.amount_minor,
                            receipt: refund.id.to_string(),
                        },
                    ),
                )
                .await
            }
            None => Err(ServiceError::InternalError(
                "leg has no gateway payment to refund".to_string(),
            )),
        };

        let recorded = match &outcome {
            Ok(gateway_refund) => {
                counter!("salon_refunds", 1, "outcome" => "issued");
                info!(refund_id = %refund.id, gateway_refund_id = %gateway_refund.id, amount_minor = refund.amount_minor, "refund issued");
                self.emit(Event::RefundIssued {
                    refund_id: refund.id,
                    booking_id: refund.booking_id,
                    amount_minor: refund.amount_minor,
                });
                self.refunds
                    .mark_processed(&*self.db, refund.id, &gateway_refund.id)
                    .await
                    .map(|_| ())
            }
            Err(e) => {
                counter!("salon_refunds", 1, "outcome" => "failed");
                warn!(refund_id = %refund.id, booking_id = %refund.booking_id, error = %e, "refund failed, left for retry");
                self.emit(Event::RefundFailed {
                    refund_id: refund.id,
                    booking_id: refund.booking_id,
                    error: e.to_string(),
                });
                self.refunds
                    .mark_failed(&*self.db, refund.id, &e.to_string())
                    .await
            }
        };
        if let Err(e) = recorded {
            error!(refund_id = %refund.id, error = %e, "could not record refund outcome");
        }

        match self.refunds.for_payment(&*self.db, leg.id).await {
            Ok(Some(current)) => current,
            _ => refund,
        }
    }

    /// Re-issues refunds that failed (or were left pending by a crash)
    #[instrument(skip(self))]
    pub async fn retry_failed_refunds(&self) -> Result<RefundRetrySummary, ServiceError> {
        let grace = chrono::Duration::from_std(self.options.refund_retry_grace)
            .map_err(|e| ServiceError::InternalError(e.to_string()))?;
        let max_attempts = i32::try_from(self.options.refund_max_attempts).unwrap_or(i32::MAX);
        let candidates = self
            .refunds
            .retryable(&*self.db, max_attempts, Utc::now() - grace)
            .await?;

        let mut summary = RefundRetrySummary {
            attempted: 0,
            processed: 0,
            failed: 0,
            refunds: Vec::with_capacity(candidates.len()),
        };
        for candidate in candidates {
            let Some(leg) = payment::Entity::find_by_id(candidate.payment_id)
                .one(&*self.db)
                .await?
            else {
                error!(refund_id = %candidate.id, "refund points at a missing payment");
                continue;
            };
            let Some(claimed) = self.refunds.claim(&*self.db, &candidate).await? else {
                continue;
            };
            summary.attempted += 1;
            let result = self.issue_refund(claimed, &leg).await;
            if result.status == RefundStatus::Processed {
                summary.processed += 1;
            } else {
                summary.failed += 1;
            }
            summary.refunds.push(result.into());
        }
        info!(
            attempted = summary.attempted,
            processed = summary.processed,
            failed = summary.failed,
            "refund retry finished"
        );
        Ok(summary)
    }

    /// Marks a confirmed booking completed. The service leg must be settled,
    /// or settled here when a payment method is supplied.
    #[instrument(skip(self, user, request), fields(caller = %user.user_id))]
    pub async fn complete_booking(
        &self,
        user: &AuthUser,
        booking_id: Uuid,
        request: CompleteBookingRequest,
    ) -> Result<BookingResponse, ServiceError> {
        request.validate()?;
        let amount_minor = request.amount.map(to_minor).transpose()?;

        let uow = UnitOfWork::begin(&self.db, "complete_booking").await?;
        let legs = self.ledger.lock_legs_for_booking(uow.conn(), booking_id).await?;
        let booking = self.bookings.lock(uow.conn(), booking_id).await?;
        let salon = self.catalog.find_salon(uow.conn(), booking.salon_id).await?;
        if !user.can_operate_salon(&salon) {
            return Err(ServiceError::Forbidden(
                "only the salon can complete a booking".to_string(),
            ));
        }
        if booking.status != BookingStatus::Confirmed {
            return Err(ServiceError::InvalidRequest(format!(
                "booking is {} and cannot be completed",
                booking.status
            )));
        }

        let service_leg = legs
            .iter()
            .find(|leg| leg.payment_type == PaymentType::ServicePayment)
            .ok_or_else(|| ServiceError::NotFound(format!("service payment for booking {}", booking.id)))?;
        let mut settled_now = None;
        if !service_leg.is_settled() {
            let Some(method) = request.payment_method.as_deref() else {
                return Err(ServiceError::InvalidRequest(
                    "service payment has not been recorded".to_string(),
                ));
            };
            settled_now = Some(
                self.ledger
                    .settle_manual(
                        uow.conn(),
                        service_leg,
                        amount_minor.unwrap_or(service_leg.amount_minor),
                        method,
                        user.user_id,
                    )
                    .await?,
            );
        }

        let completed = self
            .bookings
            .transition(uow.conn(), &booking, BookingStatus::Completed, None)
            .await?;
        uow.commit().await?;

        if let Some(leg) = settled_now {
            self.emit(Event::PaymentCaptured {
                payment_id: leg.id,
                payment_type: leg.payment_type,
                amount_minor: leg.amount_minor,
            });
        }
        self.emit(Event::BookingCompleted(completed.id));
        self.notify(self.booking_notice(NoticeKind::BookingCompleted, &completed))
            .await;
        info!(booking_id = %completed.id, "booking completed");
        Ok(completed.into())
    }

    /// Records the pay-at-salon leg as collected in person
    #[instrument(skip(self, user, request), fields(caller = %user.user_id))]
    pub async fn record_manual_payment(
        &self,
        user: &AuthUser,
        booking_id: Uuid,
        request: ManualPaymentRequest,
    ) -> Result<PaymentLegResponse, ServiceError> {
        request.validate()?;
        let amount_minor = to_minor(request.amount)?;

        let uow = UnitOfWork::begin(&self.db, "manual_payment").await?;
        let legs = self.ledger.lock_legs_for_booking(uow.conn(), booking_id).await?;
        let booking = self.bookings.lock(uow.conn(), booking_id).await?;
        let salon = self.catalog.find_salon(uow.conn(), booking.salon_id).await?;
        if !user.can_operate_salon(&salon) {
            return Err(ServiceError::Forbidden(
                "only the salon can record in-person payments".to_string(),
            ));
        }
        if matches!(
            booking.status,
            BookingStatus::Cancelled | BookingStatus::PaymentFailed
        ) {
            return Err(ServiceError::InvalidRequest(format!(
                "cannot take payment for a {} booking",
                booking.status
            )));
        }

        let leg = legs
            .iter()
            .find(|leg| leg.payment_type == PaymentType::ServicePayment)
            .ok_or_else(|| ServiceError::NotFound(format!("service payment for booking {}", booking.id)))?;
        let settled = self
            .ledger
            .settle_manual(uow.conn(), leg, amount_minor, &request.method, user.user_id)
            .await?;
        self.bookings.mark_service_paid(uow.conn(), booking.id).await?;
        uow.commit().await?;

        info!(booking_id = %booking.id, amount_minor, method = %request.method, "in-person payment recorded");
        self.emit(Event::PaymentCaptured {
            payment_id: settled.id,
            payment_type: settled.payment_type,
            amount_minor: settled.amount_minor,
        });
        let mut receipt = self.booking_notice(NoticeKind::PaymentReceipt, &booking);
        receipt.amount = Some(from_minor(settled.amount_minor));
        self.notify(receipt).await;
        Ok(settled.into())
    }

    /// Opens (or reuses) the gateway order for an approved vendor's registration fee
    #[instrument(skip(self, user), fields(caller = %user.user_id))]
    pub async fn create_registration_order(
        &self,
        user: &AuthUser,
        vendor_request_id: Uuid,
    ) -> Result<PaymentOrderResponse, ServiceError> {
        let request = find_vendor_request(&*self.db, vendor_request_id).await?;
        if request.vendor_id != user.user_id && !user.is_admin() {
            return Err(ServiceError::Forbidden(
                "registration belongs to another vendor".to_string(),
            ));
        }
        match request.status {
            VendorRequestStatus::Approved => {}
            VendorRequestStatus::Paid => {
                return Err(ServiceError::Conflict(
                    "registration fee already paid".to_string(),
                ))
            }
            VendorRequestStatus::Pending | VendorRequestStatus::Rejected => {
                return Err(ServiceError::InvalidRequest(format!(
                    "vendor request is {}",
                    request.status
                )))
            }
        }
        if request.registration_fee_minor <= 0 {
            return Err(ServiceError::InvalidRequest(
                "registration fee must be positive".to_string(),
            ));
        }

        let uow = UnitOfWork::begin(&self.db, "registration_order").await?;
        let leg = match self
            .ledger
            .lock_registration_leg(uow.conn(), request.id)
            .await?
        {
            Some(leg) => leg,
            None => {
                self.ledger
                    .create_registration_leg(
                        uow.conn(),
                        request.id,
                        request.registration_fee_minor,
                        &self.options.currency,
                    )
                    .await?
            }
        };
        uow.commit().await?;

        if leg.is_settled() {
            return Err(ServiceError::Conflict(
                "registration fee already paid".to_string(),
            ));
        }
        let order_id = match leg.gateway_order_id.clone() {
            Some(existing) => existing,
            None => {
                let mut notes = BTreeMap::new();
                notes.insert("vendor_request_id".to_string(), request.id.to_string());
                notes.insert("payment_type".to_string(), leg.payment_type.to_string());
                self.open_order(&leg, format!("REG-{}", request.id.simple()), notes)
                    .await?
            }
        };

        Ok(PaymentOrderResponse {
            order_id,
            amount: from_minor(leg.amount_minor),
            amount_minor_units: leg.amount_minor,
            currency: leg.currency.clone(),
            gateway_public_key: self.options.gateway_key_id.clone(),
            booking_id: None,
            vendor_request_id: Some(request.id),
            breakdown: None,
        })
    }

    pub async fn get_booking(
        &self,
        user: &AuthUser,
        booking_id: Uuid,
    ) -> Result<BookingDetails, ServiceError> {
        let booking = self.bookings.find(&*self.db, booking_id).await?;
        let salon = self.catalog.find_salon(&*self.db, booking.salon_id).await?;
        if !user.can_view_booking(&booking, &salon) {
            return Err(ServiceError::Forbidden(
                "booking belongs to another account".to_string(),
            ));
        }
        self.load_details(&*self.db, booking).await
    }

    async fn load_details<C: sea_orm::ConnectionTrait>(
        &self,
        conn: &C,
        booking: booking::Model,
    ) -> Result<BookingDetails, ServiceError> {
        let items = self.bookings.items(conn, booking.id).await?;
        let legs = self.ledger.legs_for_booking(conn, booking.id).await?;
        Ok(BookingDetails {
            booking: booking.into(),
            items: items.into_iter().map(Into::into).collect(),
            payments: legs.into_iter().map(Into::into).collect(),
        })
    }

    pub async fn list_bookings(
        &self,
        user: &AuthUser,
        filters: BookingFilters,
    ) -> Result<BookingListResponse, ServiceError> {
        let scope = match user.role {
            Role::Admin | Role::RelationshipManager => ListScope::All,
            Role::Customer => ListScope::Customer(user.user_id),
            Role::Staff => ListScope::Salons(user.salon_id.into_iter().collect()),
            Role::Vendor => ListScope::Salons(
                salon::Entity::find()
                    .select_only()
                    .column(salon::Column::Id)
                    .filter(salon::Column::VendorId.eq(user.user_id))
                    .into_tuple()
                    .all(&*self.db)
                    .await?,
            ),
        };
        self.bookings.list(&*self.db, scope, &filters).await
    }

    pub async fn pending_payments(
        &self,
        user: &AuthUser,
        salon_id: Uuid,
    ) -> Result<Vec<PendingPaymentResponse>, ServiceError> {
        let salon = self.catalog.find_salon(&*self.db, salon_id).await?;
        if !user.can_view_salon(&salon) {
            return Err(ServiceError::Forbidden(
                "salon belongs to another vendor".to_string(),
            ));
        }
        Ok(self
            .ledger
            .pending_for_salon(&*self.db, salon.id)
            .await?
            .into_iter()
            .map(|(leg, booking)| PendingPaymentResponse {
                payment: leg.into(),
                booking_id: booking.id,
                booking_number: booking.booking_number,
                booking_date: booking.booking_date,
                booking_status: booking.status,
            })
            .collect())
    }

    /// Convenience fees collected by the platform
    pub async fn platform_revenue(
        &self,
        user: &AuthUser,
        query: RevenueQuery,
    ) -> Result<RevenueResponse, ServiceError> {
        user.require_role(&[Role::Admin])?;
        check_range(&query)?;
        let totals = self
            .ledger
            .platform_revenue(&*self.db, PaymentType::ConvenienceFee, query.from, query.to)
            .await?;
        Ok(self.revenue(query, PaymentType::ConvenienceFee, totals))
    }

    /// Service payments collected on a vendor's salons
    pub async fn vendor_revenue(
        &self,
        user: &AuthUser,
        query: RevenueQuery,
    ) -> Result<RevenueResponse, ServiceError> {
        let vendor_id = match (user.role, query.vendor_id) {
            (Role::Vendor, None) => user.user_id,
            (Role::Vendor, Some(id)) if id == user.user_id => id,
            (Role::Admin, Some(id)) => id,
            (Role::Admin, None) => {
                return Err(ServiceError::InvalidRequest(
                    "vendor_id is required".to_string(),
                ))
            }
            _ => {
                return Err(ServiceError::Forbidden(
                    "vendor revenue is visible to the vendor only".to_string(),
                ))
            }
        };
        check_range(&query)?;
        let totals = self
            .ledger
            .vendor_revenue(&*self.db, vendor_id, query.from, query.to)
            .await?;
        Ok(self.revenue(query, PaymentType::ServicePayment, totals))
    }

    fn revenue(
        &self,
        query: RevenueQuery,
        payment_type: PaymentType,
        totals: RevenueTotals,
    ) -> RevenueResponse {
        RevenueResponse {
            from: query.from,
            to: query.to,
            payment_type,
            currency: self.options.currency.clone(),
            amount: from_minor(totals.amount_minor),
            amount_minor: totals.amount_minor,
            payments: totals.payments,
        }
    }
}

fn check_range(query: &RevenueQuery) -> Result<(), ServiceError> {
    if query.from >= query.to {
        return Err(ServiceError::InvalidRequest(
            "`from` must be before `to`".to_string(),
        ));
    }
    Ok(())
}

fn ignored(event: &str, reason: &str) -> WebhookOutcome {
    WebhookOutcome::Ignored {
        event: event.to_string(),
        reason: reason.to_string(),
    }
}

fn leg_booking_id(leg: &payment::Model) -> Result<Uuid, ServiceError> {
    leg.booking_id.ok_or_else(|| {
        ServiceError::InternalError(format!("{} leg {} has no booking", leg.payment_type, leg.id))
    })
}

async fn find_vendor_request<C: sea_orm::ConnectionTrait>(
    conn: &C,
    vendor_request_id: Uuid,
) -> Result<vendor_request::Model, ServiceError> {
    vendor_request::Entity::find_by_id(vendor_request_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("vendor request", vendor_request_id))
}

/// Marks the request paid and switches its salon on
async fn activate_salon<C: sea_orm::ConnectionTrait>(
    conn: &C,
    vendor_request_id: Uuid,
) -> Result<(salon::Model, vendor_request::Model), ServiceError> {
    let now = Utc::now();
    let updated = vendor_request::Entity::update_many()
        .col_expr(
            vendor_request::Column::Status,
            Expr::value(VendorRequestStatus::Paid),
        )
        .col_expr(vendor_request::Column::UpdatedAt, Expr::value(now))
        .filter(vendor_request::Column::Id.eq(vendor_request_id))
        .filter(vendor_request::Column::Status.eq(VendorRequestStatus::Approved))
        .exec(conn)
        .await?;
    if updated.rows_affected == 0 {
        let current = find_vendor_request(conn, vendor_request_id).await?;
        return Err(ServiceError::InvalidRequest(format!(
            "vendor request is {}",
            current.status
        )));
    }

    let request = find_vendor_request(conn, vendor_request_id).await?;
    salon::Entity::update_many()
        .col_expr(salon::Column::IsActive, Expr::value(true))
        .col_expr(salon::Column::RegistrationPaid, Expr::value(true))
        .col_expr(salon::Column::ActivatedAt, Expr::value(now))
        .filter(salon::Column::Id.eq(request.salon_id))
        .exec(conn)
        .await?;
    let salon = salon::Entity::find_by_id(request.salon_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("salon", request.salon_id))?;
    info!(salon_id = %salon.id, vendor_request_id = %request.id, "salon activated");
    Ok((salon, request))
}
