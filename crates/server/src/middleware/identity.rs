//! Caller identity
//!
//! Authentication happens upstream. By the time a request reaches this
//! service it carries the authenticated tenant and user as headers; every
//! query below the HTTP layer is scoped to that tenant.

use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use uuid::Uuid;

use crate::error::ApiError;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub tenant_id: Uuid,
    pub user_id: String,
    pub role: Option<String>,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl Identity {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let tenant_id = header(headers, TENANT_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("Missing {TENANT_HEADER} header")))?;
        let tenant_id = Uuid::parse_str(tenant_id)
            .map_err(|_| ApiError::Unauthorized(format!("Invalid {TENANT_HEADER} header")))?;
        let user_id = header(headers, USER_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("Missing {USER_HEADER} header")))?;

        Ok(Self {
            tenant_id,
            user_id: user_id.to_string(),
            role: header(headers, USER_ROLE_HEADER).map(str::to_string),
        })
    }
}

/// Rejects requests without a tenant and user, otherwise stores the
/// [`Identity`] in the request extensions.
pub async fn require_identity(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let identity = Identity::from_headers(req.headers())?;
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
