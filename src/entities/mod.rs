//! Database entities for the marketplace: salons and their catalogs, vendor
//! onboarding requests, bookings with their line items, payment legs, refunds
//! and platform settings.
//!
//! Money columns hold minor currency units (paise) as BIGINT.

pub mod booking;
pub mod booking_service;
pub mod payment;
pub mod platform_setting;
pub mod refund;
pub mod salon;
pub mod salon_service;
pub mod vendor_request;

pub use booking::{BookingStatus, PricingMode};
pub use payment::{PaymentStatus, PaymentType};
pub use refund::RefundStatus;
pub use vendor_request::VendorRequestStatus;
