// =====================================================================================
// ADMIN TOKEN MIDDLEWARE
// =====================================================================================

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};

use crate::models::MonitoringError;

/// Shared secret for operator-only routes. With no token every request is refused.
#[derive(Clone, Default)]
pub struct AdminToken(Option<Arc<str>>);

impl AdminToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.map(Arc::from))
    }

    pub fn is_configured(&self) -> bool {
        self.0.is_some()
    }
}

impl std::fmt::Debug for AdminToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AdminToken")
            .field(&self.0.as_ref().map(|_| "***"))
            .finish()
    }
}

pub async fn require_admin_token(
    State(admin): State<AdminToken>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, MonitoringError> {
    let expected = admin.0.as_deref().ok_or(MonitoringError::AdminDisabled)?;

    let auth_value = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| MonitoringError::Unauthorized("Missing authorization header".to_string()))?
        .to_str()
        .map_err(|_| MonitoringError::Unauthorized("Invalid authorization header format".to_string()))?;

    let token = auth_value
        .strip_prefix("Bearer ")
        .ok_or_else(|| MonitoringError::Unauthorized("Invalid authorization header format".to_string()))?;

    if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
        return Err(MonitoringError::Unauthorized("Invalid admin token".to_string()));
    }

    Ok(next.run(request).await)
}

/// Compares without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}
