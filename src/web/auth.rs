//! Bearer-token authentication for admin routes
//!
//! Admins are configured as `name:token` pairs. A request carrying a known
//! token resolves to an [`AdminIdentity`] that handlers pass explicitly into
//! the workflow.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::server::AppState;
use crate::error::VerifyError;
use crate::managers::AdminIdentity;

/// Known admin tokens
pub struct AdminRegistry {
    tokens: DashMap<String, AdminIdentity>,
}

impl AdminRegistry {
    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
        }
    }

    /// Parse `name:token,name:token`. Malformed entries are skipped.
    pub fn from_token_list(list: &str) -> Self {
        let registry = Self::new();

        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.split_once(':') {
                Some((name, token)) if !name.trim().is_empty() && !token.trim().is_empty() => {
                    registry.add(name.trim(), token.trim());
                }
                _ => warn!("Ignoring malformed ADMIN_TOKENS entry (expected name:token)"),
            }
        }

        if registry.is_empty() {
            warn!("No admin tokens configured, admin routes will reject every request");
        } else {
            info!("Loaded {} admin token(s)", registry.len());
        }

        registry
    }

    pub fn add(&self, name: &str, token: &str) {
        self.tokens
            .insert(token.to_string(), AdminIdentity::new(name));
    }

    pub fn identify(&self, token: &str) -> Option<AdminIdentity> {
        self.tokens.get(token).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

pub type SharedAdminRegistry = Arc<AdminRegistry>;

pub fn create_admin_registry(list: &str) -> SharedAdminRegistry {
    Arc::new(AdminRegistry::from_token_list(list))
}

/// Extract the token from `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Extractor for admin-only handlers
pub struct RequireAdmin(pub AdminIdentity);

#[async_trait]
impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = VerifyError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(|| VerifyError::Unauthorized {
            message: "missing bearer token".to_string(),
        })?;

        match state.admins.identify(token) {
            Some(admin) => Ok(RequireAdmin(admin)),
            None => {
                warn!("Rejected admin request to {} with unknown token", parts.uri.path());
                Err(VerifyError::Unauthorized {
                    message: "unknown admin token".to_string(),
                })
            }
        }
    }
}
