//! Bearer-token authentication.
//!
//! Tokens are issued by the platform's auth service and signed with a shared
//! HS256 secret. This service only verifies them and maps the claims to an
//! [`AuthUser`] with one [`Role`].

use crate::entities::{booking, salon};
use crate::errors::ServiceError;
use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Admin,
    RelationshipManager,
    Vendor,
    Staff,
    Customer,
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    /// Salon a staff member works at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salon_id: Option<Uuid>,
    pub iat: i64,
    pub exp: i64,
}

/// Authenticated caller extracted from the bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
    pub salon_id: Option<Uuid>,
}

impl AuthUser {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self {
            user_id,
            role,
            salon_id: None,
        }
    }

    pub fn staff_of(user_id: Uuid, salon_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Staff,
            salon_id: Some(salon_id),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_role(&self, allowed: &[Role]) -> Result<(), ServiceError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "role {} may not perform this action",
                self.role
            )))
        }
    }

    /// Admins, the owning vendor, and staff assigned to the salon
    pub fn can_operate_salon(&self, salon: &salon::Model) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Vendor => salon.vendor_id == self.user_id,
            Role::Staff => self.salon_id == Some(salon.id),
            Role::RelationshipManager | Role::Customer => false,
        }
    }

    /// Operators plus relationship managers, who oversee salons read-only
    pub fn can_view_salon(&self, salon: &salon::Model) -> bool {
        self.role == Role::RelationshipManager || self.can_operate_salon(salon)
    }

    pub fn can_view_booking(&self, booking: &booking::Model, salon: &salon::Model) -> bool {
        booking.customer_id == self.user_id || self.can_view_salon(salon)
    }
}

/// Verifies (and, for tooling, issues) HS256 bearer tokens
pub struct JwtVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, ServiceError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            debug!(error = %e, "rejected bearer token");
            ServiceError::Unauthorized("invalid or expired token".to_string())
        })?;
        let claims = data.claims;
        if claims.role == Role::Staff && claims.salon_id.is_none() {
            return Err(ServiceError::Unauthorized(
                "staff token carries no salon".to_string(),
            ));
        }
        Ok(AuthUser {
            user_id: claims.sub,
            role: claims.role,
            salon_id: claims.salon_id,
        })
    }

    pub fn issue(&self, user: &AuthUser, ttl: Duration) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.user_id,
            role: user.role,
            salon_id: user.salon_id,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ServiceError::InternalError(format!("token encoding: {}", e)))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<JwtVerifier>: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = Arc::<JwtVerifier>::from_ref(state);
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".to_string()))?;

        verifier.verify(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const SECRET: &str = "unit-test-secret-for-bearer-tokens";

    fn salon(vendor_id: Uuid) -> salon::Model {
        salon::Model {
            id: Uuid::new_v4(),
            name: "Glow Studio".into(),
            vendor_id,
            is_active: true,
            registration_paid: true,
            activated_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn issued_token_round_trips() {
        let verifier = JwtVerifier::new(SECRET);
        let user = AuthUser::staff_of(Uuid::new_v4(), Uuid::new_v4());
        let token = verifier.issue(&user, Duration::minutes(5)).unwrap();
        assert_eq!(verifier.verify(&token).unwrap(), user);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = JwtVerifier::new("another-secret")
            .issue(&AuthUser::new(Uuid::new_v4(), Role::Admin), Duration::minutes(5))
            .unwrap();
        assert_matches!(
            JwtVerifier::new(SECRET).verify(&token),
            Err(ServiceError::Unauthorized(_))
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        let token = verifier
            .issue(&AuthUser::new(Uuid::new_v4(), Role::Customer), Duration::minutes(-10))
            .unwrap();
        assert_matches!(verifier.verify(&token), Err(ServiceError::Unauthorized(_)));
    }

    #[test]
    fn salon_operators() {
        let vendor_id = Uuid::new_v4();
        let salon = salon(vendor_id);

        assert!(AuthUser::new(vendor_id, Role::Vendor).can_operate_salon(&salon));
        assert!(!AuthUser::new(Uuid::new_v4(), Role::Vendor).can_operate_salon(&salon));
        assert!(AuthUser::staff_of(Uuid::new_v4(), salon.id).can_operate_salon(&salon));
        assert!(!AuthUser::staff_of(Uuid::new_v4(), Uuid::new_v4()).can_operate_salon(&salon));
        assert!(AuthUser::new(Uuid::new_v4(), Role::Admin).can_operate_salon(&salon));

        let rm = AuthUser::new(Uuid::new_v4(), Role::RelationshipManager);
        assert!(!rm.can_operate_salon(&salon));
        assert!(rm.can_view_salon(&salon));
    }
}
