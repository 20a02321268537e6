//! Bearer key authentication and role based authorization

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use polyquery_core::{error::Result, Authorizer, Decision, PolyqueryError, UserConfig};
use polyquery_types::{runtime::ErrorResponse, runtime::UserSummary, Capability, Principal};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::state::AppState;

/// Grants a capability when the principal's role includes it
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleAuthorizer;

impl Authorizer for RoleAuthorizer {
    fn authorize(&self, capability: Capability, principal: &Principal) -> Decision {
        if principal.role.permissions().allows(capability) {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}

/// API users indexed by bearer key
pub struct UserDirectory {
    by_key: RwLock<HashMap<String, UserConfig>>,
}

impl UserDirectory {
    pub fn new(users: &[UserConfig]) -> Self {
        let by_key = users
            .iter()
            .map(|u| (u.api_key.clone(), u.clone()))
            .collect();
        Self {
            by_key: RwLock::new(by_key),
        }
    }

    /// Principal owning `api_key`, if any
    pub async fn authenticate(&self, api_key: &str) -> Option<Principal> {
        self.by_key.read().await.get(api_key).map(|u| u.principal())
    }

    pub async fn add(&self, user: UserConfig) -> Result<()> {
        if user.api_key.is_empty() {
            return Err(PolyqueryError::Validation(format!(
                "User '{}' has an empty api_key",
                user.name
            )));
        }
        let mut by_key = self.by_key.write().await;
        if by_key.values().any(|u| u.name == user.name) {
            return Err(PolyqueryError::Validation(format!(
                "Duplicate user name: '{}'",
                user.name
            )));
        }
        if by_key.contains_key(&user.api_key) {
            return Err(PolyqueryError::Validation(format!(
                "User '{}' reuses an existing api_key",
                user.name
            )));
        }
        by_key.insert(user.api_key.clone(), user);
        Ok(())
    }

    /// Users sorted by name, keys omitted
    pub async fn list(&self) -> Vec<UserSummary> {
        let mut users: Vec<UserSummary> =
            self.by_key.read().await.values().map(|u| u.summary()).collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        users
    }

    pub async fn len(&self) -> usize {
        self.by_key.read().await.len()
    }
}

fn bearer_key(request: &Request) -> Option<&str> {
    let value = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, key) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !key.trim().is_empty() {
        Some(key.trim())
    } else {
        None
    }
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(ErrorResponse::new(message))).into_response()
}

/// Resolves the bearer key to a [`Principal`] stored in request extensions
pub async fn require_bearer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    state.stats.lock().await.record_request();

    let Some(key) = bearer_key(&request) else {
        debug!("Rejected {} {}: no bearer key", request.method(), request.uri().path());
        return unauthorized("missing bearer token");
    };

    match state.users.authenticate(key).await {
        Some(principal) => {
            debug!("Authenticated '{}' ({})", principal.name, principal.role);
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        None => {
            warn!("Rejected {} {}: unknown api key", request.method(), request.uri().path());
            unauthorized("invalid api key")
        }
    }
}
