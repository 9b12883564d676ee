//! Property-based tests for fee arithmetic and payment signatures.

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use salon_booking_api::entities::PricingMode;
use salon_booking_api::services::fee_settings::FeeSettings;
use salon_booking_api::services::fees::{
    compute, compute_cart_checkout, from_minor, percent_of, quote, to_minor, PricedItem,
};
use salon_booking_api::services::gateway::GatewaySignatures;

fn items_strategy() -> impl Strategy<Value = Vec<PricedItem>> {
    prop::collection::vec(
        (1i64..5_000_000, 1u32..=20).prop_map(|(unit_price_minor, quantity)| PricedItem {
            unit_price_minor,
            quantity,
        }),
        1..6,
    )
}

/// Integer reference for rounding `base * percent / 100` half up, for whole percents
fn reference_fee(base: i64, whole_percent: i64) -> i64 {
    (base * whole_percent + 50) / 100
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(10_000))]

    #[test]
    fn total_is_service_price_plus_fee(items in items_strategy()) {
        let fees = compute(&items, dec!(6)).unwrap();
        let service: i64 = items
            .iter()
            .map(|item| item.unit_price_minor * i64::from(item.quantity))
            .sum();
        prop_assert_eq!(fees.service_price_minor, service);
        prop_assert_eq!(fees.convenience_fee_minor, reference_fee(service, 6));
        prop_assert_eq!(fees.total_minor, fees.service_price_minor + fees.convenience_fee_minor);
        prop_assert_eq!(fees.gst_minor, 0);
    }

    #[test]
    fn cart_checkout_fee_is_booking_fee_plus_gst(items in items_strategy()) {
        let fees = compute_cart_checkout(&items, dec!(6), dec!(18)).unwrap();
        let booking_fee = reference_fee(fees.service_price_minor, 6);
        prop_assert_eq!(fees.booking_fee_minor, booking_fee);
        prop_assert_eq!(fees.gst_minor, reference_fee(booking_fee, 18));
        prop_assert_eq!(fees.convenience_fee_minor, fees.booking_fee_minor + fees.gst_minor);
        prop_assert_eq!(fees.total_minor, fees.service_price_minor + fees.convenience_fee_minor);
    }

    #[test]
    fn minor_unit_conversion_is_exact(minor in -10_000_000_000i64..10_000_000_000) {
        let major = from_minor(minor);
        prop_assert_eq!(to_minor(major).unwrap(), minor);
        prop_assert!(major.scale() <= 2);
    }

    #[test]
    fn percent_never_exceeds_base(base in 0i64..1_000_000_000, percent in 0u32..=100) {
        let fee = percent_of(base, Decimal::from(percent)).unwrap();
        prop_assert!(fee >= 0);
        prop_assert!(fee <= base);
    }

    #[test]
    fn quote_matches_the_pricing_mode(items in items_strategy()) {
        let settings = FeeSettings {
            convenience_fee_percent: dec!(6),
            booking_fee_percent: dec!(6),
            gst_percent: dec!(18),
            loaded_at: chrono::Utc::now(),
        };
        prop_assert_eq!(
            quote(&items, PricingMode::Standard, &settings).unwrap(),
            compute(&items, dec!(6)).unwrap()
        );
        prop_assert_eq!(
            quote(&items, PricingMode::CartCheckout, &settings).unwrap(),
            compute_cart_checkout(&items, dec!(6), dec!(18)).unwrap()
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn only_the_signed_pair_verifies(
        order_id in "order_[A-Za-z0-9]{6,14}",
        payment_id in "pay_[A-Za-z0-9]{6,14}",
        other in "pay_[A-Za-z0-9]{6,14}",
    ) {
        let signatures = GatewaySignatures::new("key-secret", "webhook-secret");
        let signature = signatures.sign_payment(&order_id, &payment_id);
        prop_assert!(signatures
            .verify_payment_signature(&order_id, &payment_id, &signature)
            .is_ok());
        if other != payment_id {
            prop_assert!(signatures
                .verify_payment_signature(&order_id, &other, &signature)
                .is_err());
        }
        prop_assert!(signatures
            .verify_webhook_signature(order_id.as_bytes(), &signature)
            .is_err());
    }
}

#[test]
fn more_than_two_decimals_is_rejected() {
    assert!(to_minor(dec!(10.005)).is_err());
    assert_eq!(to_minor(dec!(10.50)).unwrap(), 1_050);
    assert_eq!(to_minor(dec!(1166)).unwrap(), 116_600);
}
