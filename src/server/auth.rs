//! Bearer-token guard for administrative routes.
//!
//! Cache clearing is the only mutating operation the service exposes. When an
//! admin token is configured, those routes require
//!
//! ```text
//! Authorization: Bearer <token>
//! ```
//!
//! The token comparison is constant-time.
//!
//! # Example
//!
//! ```rust
//! use dicom_imaging::server::auth::AdminAuth;
//!
//! let auth = AdminAuth::new("s3cret");
//! assert!(auth.verify(Some("Bearer s3cret")).is_ok());
//! assert!(auth.verify(Some("Bearer wrong")).is_err());
//! assert!(auth.verify(None).is_err());
//! ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::handlers::ErrorResponse;

// =============================================================================
// Types
// =============================================================================

/// Authentication error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No Authorization header
    MissingToken,

    /// Authorization header is not a bearer token
    InvalidScheme,

    /// Token does not match
    InvalidToken,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "Missing Authorization header"),
            AuthError::InvalidScheme => write!(f, "Authorization must use the Bearer scheme"),
            AuthError::InvalidToken => write!(f, "Invalid admin token"),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "missing_token"),
            AuthError::InvalidScheme => (StatusCode::UNAUTHORIZED, "invalid_scheme"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token"),
        };
        let message = self.to_string();

        // A wrong token could indicate probing, so log at warn level
        if self == AuthError::InvalidToken {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Authentication failed: {}",
                message
            );
        } else {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Authentication failed: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Admin Auth
// =============================================================================

/// Verifies bearer tokens against the configured admin token.
#[derive(Clone)]
pub struct AdminAuth {
    token: Arc<[u8]>,
}

impl AdminAuth {
    pub fn new(token: impl AsRef<[u8]>) -> Self {
        Self {
            token: Arc::from(token.as_ref()),
        }
    }

    /// Check an `Authorization` header value.
    pub fn verify(&self, header: Option<&str>) -> Result<(), AuthError> {
        let header = header.ok_or(AuthError::MissingToken)?;

        let (scheme, token) = header.split_once(' ').ok_or(AuthError::InvalidScheme)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(AuthError::InvalidScheme);
        }

        let token = token.trim().as_bytes();
        if bool::from(token.ct_eq(&self.token)) {
            Ok(())
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}

impl std::fmt::Debug for AdminAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAuth").finish_non_exhaustive()
    }
}

/// Axum middleware rejecting requests without a valid admin token.
///
/// # Usage
///
/// ```ignore
/// let admin_routes = Router::new()
///     .route("/cache/clear", post(clear_cache_handler::<S>))
///     .layer(middleware::from_fn_with_state(auth, admin_auth_middleware));
/// ```
pub async fn admin_auth_middleware(
    State(auth): State<AdminAuth>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    auth.verify(header)?;

    Ok(next.run(request).await)
}

// =============================================================================
// Tests
// =============================================================================
