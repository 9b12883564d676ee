use crate::errors::ServiceError;
use metrics::{counter, histogram};
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use std::time::Instant;
use tracing::{debug, warn};

/// A single database transaction spanning one business operation.
///
/// Reads taken with `lock_exclusive` inside the unit hold their row locks
/// until `commit`. Dropping the unit without committing rolls it back, so an
/// early `?` return never leaves partial writes behind.
pub struct UnitOfWork {
    txn: DatabaseTransaction,
    label: &'static str,
    started: Instant,
}

impl UnitOfWork {
    pub async fn begin(db: &DatabaseConnection, label: &'static str) -> Result<Self, ServiceError> {
        let txn = db.begin().await.map_err(|e| {
            warn!(unit = label, error = %e, "failed to open transaction");
            ServiceError::DatabaseError(e)
        })?;
        debug!(unit = label, "transaction opened");
        Ok(Self {
            txn,
            label,
            started: Instant::now(),
        })
    }

    /// Connection to run statements on. Everything executed here commits or rolls back together.
    pub fn conn(&self) -> &DatabaseTransaction {
        &self.txn
    }

    pub async fn commit(self) -> Result<(), ServiceError> {
        let label = self.label;
        let elapsed = self.started.elapsed();
        self.txn.commit().await.map_err(|e| {
            counter!("salon_db.transaction.commit_failures", 1, "unit" => label);
            ServiceError::DatabaseError(e)
        })?;
        histogram!("salon_db.transaction.duration", elapsed.as_secs_f64(), "unit" => label);
        debug!(unit = label, ?elapsed, "transaction committed");
        Ok(())
    }

    /// Ends a unit that turned out to have nothing to write.
    pub async fn rollback(self) -> Result<(), ServiceError> {
        let label = self.label;
        self.txn.rollback().await.map_err(ServiceError::DatabaseError)?;
        debug!(unit = label, "transaction rolled back");
        Ok(())
    }
}
