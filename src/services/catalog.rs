use crate::{
    entities::{salon, salon_service},
    errors::ServiceError,
    services::fees::PricedItem,
};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument};
use uuid::Uuid;

/// A requested service resolved against the salon's menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedItem {
    pub service: salon_service::Model,
    pub quantity: u32,
}

impl ResolvedItem {
    pub fn priced(&self) -> PricedItem {
        PricedItem {
            unit_price_minor: self.service.price_minor,
            quantity: self.quantity,
        }
    }
}

pub fn priced_items(items: &[ResolvedItem]) -> Vec<PricedItem> {
    items.iter().map(ResolvedItem::priced).collect()
}

/// Read access to salons and their service menus
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceCatalog;

impl ServiceCatalog {
    pub async fn find_salon<C: ConnectionTrait>(
        &self,
        conn: &C,
        salon_id: Uuid,
    ) -> Result<salon::Model, ServiceError> {
        salon::Entity::find_by_id(salon_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::not_found("salon", salon_id))
    }

    /// Resolves `(service_id, quantity)` pairs with a single `IN (...)` query.
    ///
    /// Services that are unknown, inactive or belong to another salon are
    /// rejected. Output order follows the request.
    #[instrument(skip(self, conn, requested), fields(items = requested.len()))]
    pub async fn resolve<C: ConnectionTrait>(
        &self,
        conn: &C,
        salon_id: Uuid,
        requested: &[(Uuid, u32)],
    ) -> Result<Vec<ResolvedItem>, ServiceError> {
        if requested.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "at least one service is required".to_string(),
            ));
        }
        if requested.iter().any(|(_, quantity)| *quantity == 0) {
            return Err(ServiceError::InvalidRequest(
                "service quantity must be at least 1".to_string(),
            ));
        }

        let ids: HashSet<Uuid> = requested.iter().map(|(id, _)| *id).collect();
        let services: HashMap<Uuid, salon_service::Model> = salon_service::Entity::find()
            .filter(salon_service::Column::Id.is_in(ids.iter().copied()))
            .all(conn)
            .await?
            .into_iter()
            .map(|service| (service.id, service))
            .collect();
        debug!(requested = ids.len(), found = services.len(), "catalog lookup");

        requested
            .iter()
            .map(|(service_id, quantity)| match services.get(service_id) {
                Some(service) if service.salon_id == salon_id && service.is_active => {
                    Ok(ResolvedItem {
                        service: service.clone(),
                        quantity: *quantity,
                    })
                }
                Some(service) if service.salon_id != salon_id => Err(ServiceError::InvalidRequest(
                    format!("service {} is not offered by this salon", service_id),
                )),
                Some(_) => Err(ServiceError::InvalidRequest(format!(
                    "service {} is not currently available",
                    service_id
                ))),
                None => Err(ServiceError::InvalidRequest(format!(
                    "unknown service {}",
                    service_id
                ))),
            })
            .collect()
    }
}
