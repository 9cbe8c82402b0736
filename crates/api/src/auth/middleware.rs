//! Authentication middleware
//!
//! `require_auth` validates the bearer JWT and inserts an `AuthUser` into the
//! request extensions. `require_build_token` guards the build result callback
//! with a shared secret.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use eduhub_shared::TenantId;
use subtle::ConstantTimeEq;

use super::jwt::{JwtError, JwtManager};
use crate::error::ApiError;

/// Header carrying the build callback secret
pub const BUILD_TOKEN_HEADER: &str = "x-build-token";

/// State needed by the auth middleware
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: JwtManager,
    pub build_callback_token: Option<String>,
}

/// Platform-level role carried in the token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformRole {
    SuperAdmin,
    Admin,
    /// Any tenant-scoped role (owner, staff, ...)
    TenantUser,
}

impl PlatformRole {
    pub fn from_claim(role: &str) -> Self {
        match role.to_ascii_lowercase().as_str() {
            "superadmin" => PlatformRole::SuperAdmin,
            "admin" => PlatformRole::Admin,
            _ => PlatformRole::TenantUser,
        }
    }
}

/// Authenticated caller
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub tenant_id: Option<TenantId>,
    pub role: PlatformRole,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, PlatformRole::Admin | PlatformRole::SuperAdmin)
    }

    /// Admins may address any tenant; everyone else only their own
    pub fn can_access_tenant(&self, tenant_id: &TenantId) -> bool {
        self.is_admin() || self.tenant_id.as_ref() == Some(tenant_id)
    }

    pub fn ensure_tenant_access(&self, tenant_id: &TenantId) -> Result<(), ApiError> {
        if self.can_access_tenant(tenant_id) {
            Ok(())
        } else {
            tracing::warn!(
                user_id = %self.user_id,
                tenant_id = %tenant_id,
                "Rejected cross-tenant access"
            );
            Err(ApiError::Forbidden(
                "You do not have access to this tenant".to_string(),
            ))
        }
    }

    pub fn ensure_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("Admin access required".to_string()))
        }
    }
}

/// Require a valid bearer token
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let claims = auth_state
        .jwt_manager
        .validate_token(token)
        .map_err(|e| {
            match &e {
                JwtError::Expired => tracing::debug!("Rejected expired token"),
                other => tracing::debug!(error = %other, "JWT validation failed"),
            }
            ApiError::InvalidToken
        })?;

    // A malformed tenant claim grants no tenant access
    let tenant_id = claims
        .tenant_id
        .as_deref()
        .and_then(|raw| TenantId::parse(raw).ok());

    let user = AuthUser {
        user_id: claims.sub,
        tenant_id,
        role: PlatformRole::from_claim(&claims.role),
    };
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

/// Require the shared build callback token
pub async fn require_build_token(
    State(auth_state): State<AuthState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = auth_state.build_callback_token.as_deref() else {
        return Err(ApiError::NotFound("Build callbacks are not enabled".to_string()));
    };

    let provided = request
        .headers()
        .get(BUILD_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    if !bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        tracing::warn!("Rejected build callback with invalid token");
        return Err(ApiError::InvalidToken);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(tenant: Option<&str>, role: &str) -> AuthUser {
        AuthUser {
            user_id: "user-1".to_string(),
            tenant_id: tenant.map(|t| TenantId::parse(t).unwrap()),
            role: PlatformRole::from_claim(role),
        }
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!(PlatformRole::from_claim("SuperAdmin"), PlatformRole::SuperAdmin);
        assert_eq!(PlatformRole::from_claim("admin"), PlatformRole::Admin);
        assert_eq!(PlatformRole::from_claim("owner"), PlatformRole::TenantUser);
        assert_eq!(PlatformRole::from_claim(""), PlatformRole::TenantUser);
    }

    #[test]
    fn test_tenant_user_limited_to_own_tenant() {
        let acme = TenantId::parse("acme").unwrap();
        let beta = TenantId::parse("beta").unwrap();
        let owner = user(Some("acme"), "owner");

        assert!(owner.can_access_tenant(&acme));
        assert!(!owner.can_access_tenant(&beta));
        assert!(owner.ensure_admin().is_err());
    }

    #[test]
    fn test_admin_reaches_every_tenant() {
        let admin = user(None, "admin");
        assert!(admin.can_access_tenant(&TenantId::parse("beta").unwrap()));
        assert!(admin.ensure_admin().is_ok());
    }

    #[test]
    fn test_user_without_tenant_claim_has_no_tenant_access() {
        let orphan = user(None, "owner");
        assert!(!orphan.can_access_tenant(&TenantId::parse("acme").unwrap()));
    }
}
