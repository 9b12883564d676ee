use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Salon Booking API",
        version = "1.0.0",
        description = r#"
# Salon Booking API

Bookings for the salon marketplace and the payments behind them.

## Payment flow

1. `POST /bookings` creates a booking in `pending` with two payment legs:
   the platform convenience fee (paid online) and the service price (paid at the salon).
2. `POST /payments/create-order` opens a gateway order for the convenience fee.
3. After checkout the client calls `POST /payments/verify`. The gateway may
   deliver the same confirmation to `POST /payments/webhook`; whichever
   arrives second gets `already_processed: true`.

## Authentication

Send a bearer token issued by the marketplace auth service:

```
Authorization: Bearer <jwt>
```

The webhook is authenticated by the `X-Signature` header instead.

## Amounts

Amounts are decimals with two places. The ledger stores minor units.
        "#,
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Bookings", description = "Booking lifecycle"),
        (name = "Payments", description = "Gateway orders, verification and webhooks"),
        (name = "Salons", description = "Salon dashboards"),
        (name = "Admin", description = "Fee settings, refunds and platform revenue"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::bookings::quote_booking,
        crate::handlers::bookings::create_booking,
        crate::handlers::bookings::list_bookings,
        crate::handlers::bookings::get_booking,
        crate::handlers::bookings::cancel_booking,
        crate::handlers::bookings::complete_booking,
        crate::handlers::bookings::record_manual_payment,

        crate::handlers::payments::create_payment_order,
        crate::handlers::payments::verify_payment,
        crate::handlers::payments::create_registration_order,
        crate::handlers::payment_webhooks::payment_webhook,

        crate::handlers::salons::pending_payments,
        crate::handlers::salons::vendor_revenue,

        crate::handlers::admin::update_fee_setting,
        crate::handlers::admin::clear_fee_cache,
        crate::handlers::admin::retry_refunds,
        crate::handlers::admin::platform_revenue,

        crate::handlers::health::api_status,
        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::errors::ErrorResponse,
            crate::auth::Role,
            crate::entities::BookingStatus,
            crate::entities::PricingMode,
            crate::entities::PaymentStatus,
            crate::entities::PaymentType,
            crate::entities::RefundStatus,
            crate::services::webhooks::WebhookOutcome,
            crate::handlers::admin::FeeSettingKey,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDocV1::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_payment_routes_and_security() {
        let json = serde_json::to_string(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("Salon Booking API"));
        assert!(json.contains("/api/v1/payments/verify"));
        assert!(json.contains("/api/v1/payments/webhook"));
        assert!(json.contains("/api/v1/bookings/{id}/cancel"));
        assert!(json.contains("bearer_auth"));
    }
}
