use crate::config::AppConfig;
use crate::entities::platform_setting::{
    self, BOOKING_FEE_PERCENT, CONVENIENCE_FEE_PERCENT, GST_PERCENT,
};
use crate::errors::ServiceError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

/// Percentages used to price one operation. Callers take a snapshot once and
/// pass it down, so a concurrent settings change never mixes two versions.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct FeeSettings {
    pub convenience_fee_percent: Decimal,
    pub booking_fee_percent: Decimal,
    pub gst_percent: Decimal,
    pub loaded_at: DateTime<Utc>,
}

impl FeeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            convenience_fee_percent: config.default_convenience_fee_percent,
            booking_fee_percent: config.default_booking_fee_percent,
            gst_percent: config.gst_percent,
            loaded_at: Utc::now(),
        }
    }
}

struct CachedSettings {
    settings: Arc<FeeSettings>,
    fetched_at: Instant,
}

/// Read-through cache over the `platform_settings` table
pub struct FeeSettingsStore {
    db: Arc<DatabaseConnection>,
    defaults: FeeSettings,
    ttl: Duration,
    cached: RwLock<Option<CachedSettings>>,
}

impl FeeSettingsStore {
    pub fn new(db: Arc<DatabaseConnection>, defaults: FeeSettings, ttl: Duration) -> Self {
        Self {
            db,
            defaults,
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Returns the current snapshot, reloading when the cached one is older than the TTL
    pub async fn snapshot(&self) -> Result<Arc<FeeSettings>, ServiceError> {
        {
            let guard = self.cached.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.settings.clone());
                }
            }
        }
        self.reload().await
    }

    /// Drops the cached snapshot; the next `snapshot` call reads the table
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
        info!("fee settings cache cleared");
    }

    #[instrument(skip(self))]
    pub async fn reload(&self) -> Result<Arc<FeeSettings>, ServiceError> {
        let rows = platform_setting::Entity::find()
            .filter(platform_setting::Column::Key.is_in([
                CONVENIENCE_FEE_PERCENT,
                BOOKING_FEE_PERCENT,
                GST_PERCENT,
            ]))
            .all(&*self.db)
            .await?;

        let mut settings = FeeSettings {
            loaded_at: Utc::now(),
            ..self.defaults.clone()
        };
        for row in rows {
            let Ok(value) = Decimal::from_str(row.value.trim()) else {
                warn!(key = %row.key, value = %row.value, "ignoring unparsable fee setting");
                continue;
            };
            if value.is_sign_negative() || value > Decimal::ONE_HUNDRED {
                warn!(key = %row.key, %value, "ignoring out-of-range fee setting");
                continue;
            }
            match row.key.as_str() {
                CONVENIENCE_FEE_PERCENT => settings.convenience_fee_percent = value,
                BOOKING_FEE_PERCENT => settings.booking_fee_percent = value,
                GST_PERCENT => settings.gst_percent = value,
                _ => {}
            }
        }

        let settings = Arc::new(settings);
        *self.cached.write().await = Some(CachedSettings {
            settings: settings.clone(),
            fetched_at: Instant::now(),
        });
        debug!(
            convenience_fee_percent = %settings.convenience_fee_percent,
            "fee settings loaded"
        );
        Ok(settings)
    }

    /// Writes one setting and drops the cache
    #[instrument(skip(self))]
    pub async fn set(&self, key: &str, value: Decimal) -> Result<(), ServiceError> {
        if ![CONVENIENCE_FEE_PERCENT, BOOKING_FEE_PERCENT, GST_PERCENT].contains(&key) {
            return Err(ServiceError::InvalidRequest(format!(
                "unknown fee setting {}",
                key
            )));
        }
        if value.is_sign_negative() || value > Decimal::ONE_HUNDRED {
            return Err(ServiceError::InvalidRequest(
                "fee percentages must be between 0 and 100".to_string(),
            ));
        }

        let row = platform_setting::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value.normalize().to_string()),
            updated_at: Set(Utc::now()),
        };
        platform_setting::Entity::insert(row)
            .on_conflict(
                OnConflict::column(platform_setting::Column::Key)
                    .update_columns([
                        platform_setting::Column::Value,
                        platform_setting::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&*self.db)
            .await?;

        info!(key, %value, "fee setting updated");
        self.invalidate().await;
        Ok(())
    }

    /// Keeps the snapshot warm so request paths rarely pay for a reload
    pub fn spawn_refresh(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.reload().await {
                    warn!(error = %e, "background fee settings refresh failed");
                }
            }
        })
    }
}
