//! Fee arithmetic for bookings.
//!
//! All amounts are integer minor units (paise). Percent-derived fees are
//! rounded half away from zero to the nearest minor unit, which is the same
//! as rounding the major amount to two decimals.

use crate::entities::PricingMode;
use crate::errors::ServiceError;
use crate::services::fee_settings::FeeSettings;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Decimal places of the platform currency
pub const CURRENCY_SCALE: u32 = 2;

/// Converts a major-unit amount to minor units. More than two decimals is rejected.
pub fn to_minor(amount: Decimal) -> Result<i64, ServiceError> {
    let normalized = amount.normalize();
    if normalized.scale() > CURRENCY_SCALE {
        return Err(ServiceError::InvalidRequest(format!(
            "amount {} has more than {} decimal places",
            amount, CURRENCY_SCALE
        )));
    }
    (normalized * Decimal::ONE_HUNDRED)
        .to_i64()
        .ok_or_else(|| ServiceError::InvalidRequest(format!("amount {} is out of range", amount)))
}

pub fn from_minor(minor: i64) -> Decimal {
    Decimal::new(minor, CURRENCY_SCALE)
}

/// Unit price and quantity of one booked service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricedItem {
    pub unit_price_minor: i64,
    pub quantity: u32,
}

/// Result of pricing a booking, in minor units.
///
/// `convenience_fee_minor` is what the customer pays online now
/// (`booking_fee_minor + gst_minor`); the service price is paid at the salon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub service_price_minor: i64,
    pub booking_fee_minor: i64,
    pub gst_minor: i64,
    pub convenience_fee_minor: i64,
    pub total_minor: i64,
}

/// Sum of `unit_price * quantity` over every item
pub fn service_price(items: &[PricedItem]) -> Result<i64, ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::InvalidRequest(
            "at least one service is required".to_string(),
        ));
    }

    items.iter().try_fold(0i64, |acc, item| {
        if item.quantity == 0 {
            return Err(ServiceError::InvalidRequest(
                "service quantity must be at least 1".to_string(),
            ));
        }
        if item.unit_price_minor < 0 {
            return Err(ServiceError::InvalidRequest(
                "service price cannot be negative".to_string(),
            ));
        }
        item.unit_price_minor
            .checked_mul(i64::from(item.quantity))
            .and_then(|line| acc.checked_add(line))
            .ok_or_else(|| ServiceError::InvalidRequest("service total overflows".to_string()))
    })
}

/// `base * percent / 100`, rounded half away from zero to a whole minor unit
pub fn percent_of(base_minor: i64, percent: Decimal) -> Result<i64, ServiceError> {
    if percent.is_sign_negative() || percent > Decimal::ONE_HUNDRED {
        return Err(ServiceError::InvalidRequest(format!(
            "fee percent {} must be between 0 and 100",
            percent
        )));
    }
    (Decimal::from(base_minor) * percent / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| ServiceError::InvalidRequest("fee amount overflows".to_string()))
}

/// Standard pricing: a flat convenience fee percent of the service price
pub fn compute(items: &[PricedItem], fee_percent: Decimal) -> Result<FeeBreakdown, ServiceError> {
    let service_price_minor = service_price(items)?;
    let fee_minor = percent_of(service_price_minor, fee_percent)?;
    breakdown(service_price_minor, fee_minor, 0)
}

/// Cart checkout pricing: a booking fee percent plus GST charged on that fee
pub fn compute_cart_checkout(
    items: &[PricedItem],
    booking_fee_percent: Decimal,
    gst_percent: Decimal,
) -> Result<FeeBreakdown, ServiceError> {
    let service_price_minor = service_price(items)?;
    let booking_fee_minor = percent_of(service_price_minor, booking_fee_percent)?;
    let gst_minor = percent_of(booking_fee_minor, gst_percent)?;
    breakdown(service_price_minor, booking_fee_minor, gst_minor)
}

/// Prices items with the percentages of one settings snapshot
pub fn quote(
    items: &[PricedItem],
    mode: PricingMode,
    settings: &FeeSettings,
) -> Result<FeeBreakdown, ServiceError> {
    match mode {
        PricingMode::Standard => compute(items, settings.convenience_fee_percent),
        PricingMode::CartCheckout => compute_cart_checkout(
            items,
            settings.booking_fee_percent,
            settings.gst_percent,
        ),
    }
}

fn breakdown(
    service_price_minor: i64,
    booking_fee_minor: i64,
    gst_minor: i64,
) -> Result<FeeBreakdown, ServiceError> {
    let overflow = || ServiceError::InvalidRequest("booking total overflows".to_string());
    let convenience_fee_minor = booking_fee_minor.checked_add(gst_minor).ok_or_else(overflow)?;
    let total_minor = service_price_minor
        .checked_add(convenience_fee_minor)
        .ok_or_else(overflow)?;
    Ok(FeeBreakdown {
        service_price_minor,
        booking_fee_minor,
        gst_minor,
        convenience_fee_minor,
        total_minor,
    })
}

/// Price breakdown as shown to clients
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FeeQuote {
    pub pricing_mode: PricingMode,
    pub currency: String,
    pub service_price: Decimal,
    pub booking_fee: Decimal,
    pub gst: Decimal,
    pub convenience_fee: Decimal,
    pub total_amount: Decimal,
    /// Charged online to confirm the booking
    pub pay_now: Decimal,
    /// Settled at the salon
    pub pay_at_salon: Decimal,
}

impl FeeBreakdown {
    pub fn to_quote(&self, mode: PricingMode, currency: &str) -> FeeQuote {
        FeeQuote {
            pricing_mode: mode,
            currency: currency.to_string(),
            service_price: from_minor(self.service_price_minor),
            booking_fee: from_minor(self.booking_fee_minor),
            gst: from_minor(self.gst_minor),
            convenience_fee: from_minor(self.convenience_fee_minor),
            total_amount: from_minor(self.total_minor),
            pay_now: from_minor(self.convenience_fee_minor),
            pay_at_salon: from_minor(self.service_price_minor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn item(unit_price_minor: i64, quantity: u32) -> PricedItem {
        PricedItem {
            unit_price_minor,
            quantity,
        }
    }

    #[test]
    fn standard_fee_on_mixed_cart() {
        let items = [item(50_000, 1), item(30_000, 2)];
        let fees = compute(&items, dec!(6)).unwrap();
        assert_eq!(fees.service_price_minor, 110_000);
        assert_eq!(fees.convenience_fee_minor, 6_600);
        assert_eq!(fees.total_minor, 116_600);
        assert_eq!(from_minor(fees.total_minor), dec!(1166.00));
    }

    #[test]
    fn fee_rounds_half_away_from_zero() {
        // 0.25 * 6% = 0.015 -> 0.02
        let fees = compute(&[item(25, 1)], dec!(6)).unwrap();
        assert_eq!(fees.convenience_fee_minor, 2);
        // 0.24 * 6% = 0.0144 -> 0.01
        let fees = compute(&[item(24, 1)], dec!(6)).unwrap();
        assert_eq!(fees.convenience_fee_minor, 1);
    }

    #[test]
    fn cart_checkout_adds_gst_on_booking_fee() {
        let fees = compute_cart_checkout(&[item(100_000, 1)], dec!(6), dec!(18)).unwrap();
        assert_eq!(fees.booking_fee_minor, 6_000);
        assert_eq!(fees.gst_minor, 1_080);
        assert_eq!(fees.convenience_fee_minor, 7_080);
        assert_eq!(fees.total_minor, 107_080);
    }

    #[test]
    fn empty_cart_is_rejected() {
        assert_matches!(compute(&[], dec!(6)), Err(ServiceError::InvalidRequest(_)));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        assert_matches!(
            compute(&[item(10_000, 0)], dec!(6)),
            Err(ServiceError::InvalidRequest(_))
        );
    }

    #[test]
    fn negative_percent_is_rejected() {
        assert_matches!(
            compute(&[item(10_000, 1)], dec!(-1)),
            Err(ServiceError::InvalidRequest(_))
        );
    }

    #[test]
    fn minor_conversion_rejects_sub_paise_amounts() {
        assert_eq!(to_minor(dec!(60.00)).unwrap(), 6_000);
        assert_eq!(to_minor(dec!(1166.5)).unwrap(), 116_650);
        assert_matches!(to_minor(dec!(1.005)), Err(ServiceError::InvalidRequest(_)));
    }

    #[test]
    fn quote_splits_pay_now_and_pay_at_salon() {
        let fees = compute(&[item(50_000, 1), item(30_000, 2)], dec!(6)).unwrap();
        let quote = fees.to_quote(PricingMode::Standard, "INR");
        assert_eq!(quote.pay_now, dec!(66.00));
        assert_eq!(quote.pay_at_salon, dec!(1100.00));
        assert_eq!(quote.total_amount, quote.pay_now + quote.pay_at_salon);
    }
}
