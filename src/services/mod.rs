//! Business logic for bookings and their payments.
//!
//! [`orchestrator::BookingOrchestrator`] is the entry point for every state
//! change; the other modules are its building blocks.

pub mod bookings;
pub mod catalog;
pub mod fee_settings;
pub mod fees;
pub mod gateway;
pub mod ledger;
pub mod notifications;
pub mod orchestrator;
pub mod refunds;
pub mod webhooks;

pub use orchestrator::{BookingOrchestrator, Caller, OrchestratorOptions};
