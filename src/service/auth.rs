//! Optional bearer-token guard.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use secrecy::{ExposeSecret, SecretString};

/// Secret every protected request must present. `None` lets everyone in.
#[derive(Clone, Default)]
pub struct AuthState {
    secret: Option<Arc<SecretString>>,
}

impl AuthState {
    pub fn new(secret: Option<SecretString>) -> Self {
        Self {
            secret: secret.map(Arc::new),
        }
    }

    fn accepts(&self, header_value: Option<&str>) -> bool {
        let Some(secret) = &self.secret else {
            return true;
        };
        header_value
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| constant_time_eq(token.trim().as_bytes(), secret.expose_secret().as_bytes()))
    }
}

/// Middleware rejecting requests without the right `Authorization: Bearer`.
pub async fn require_bearer(State(auth): State<AuthState>, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if auth.accepts(presented) {
        return next.run(request).await;
    }

    tracing::warn!(path = %request.uri().path(), "Rejected unauthenticated request");
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "detail": "Unauthorized" })),
    )
        .into_response()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_guard_accepts_anything() {
        let auth = AuthState::default();
        assert!(auth.accepts(None));
    }

    #[test]
    fn token_must_match() {
        let auth = AuthState::new(Some(SecretString::from("hunter2")));
        assert!(auth.accepts(Some("Bearer hunter2")));
        assert!(!auth.accepts(Some("Bearer hunter3")));
        assert!(!auth.accepts(Some("hunter2")));
        assert!(!auth.accepts(None));
    }
}
