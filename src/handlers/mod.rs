pub mod admin;
pub mod bookings;
pub mod common;
pub mod health;
pub mod payment_webhooks;
pub mod payments;
pub mod salons;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::services::{
    fee_settings::{FeeSettings, FeeSettingsStore},
    gateway::{GatewaySignatures, PaymentGateway},
    notifications::Notifier,
    BookingOrchestrator, OrchestratorOptions,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer used by the HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orchestrator: Arc<BookingOrchestrator>,
    pub fee_settings: Arc<FeeSettingsStore>,
}

impl AppServices {
    /// Wires the orchestrator from configuration and the given collaborators.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        events: Option<EventSender>,
    ) -> Self {
        let fee_settings = Arc::new(FeeSettingsStore::new(
            db.clone(),
            FeeSettings::from_config(config),
            config.fee_settings_ttl(),
        ));
        Self::with_fee_settings(db, config, gateway, notifier, events, fee_settings)
    }

    /// Same as [`AppServices::new`] with a caller-provided settings store.
    pub fn with_fee_settings(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        events: Option<EventSender>,
        fee_settings: Arc<FeeSettingsStore>,
    ) -> Self {
        let signatures = GatewaySignatures::new(
            config.gateway_key_secret.clone(),
            config.gateway_webhook_secret.clone(),
        );
        let mut orchestrator = BookingOrchestrator::new(
            db,
            gateway,
            signatures,
            fee_settings.clone(),
            notifier,
            OrchestratorOptions::from_config(config),
        );
        if let Some(events) = events {
            orchestrator = orchestrator.with_events(events);
        }

        Self {
            orchestrator: Arc::new(orchestrator),
            fee_settings,
        }
    }
}
