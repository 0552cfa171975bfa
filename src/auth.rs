// Admin authentication: a bearer-token gate for tournament management routes.

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

/// Decides whether a presented bearer token grants admin access.
///
/// Injected into request extensions at startup, the same way the database
/// handle is, so the extractor does not depend on the router state type.
#[derive(Debug, Clone)]
pub struct AdminGate {
    token: Option<String>,
    local_mode: bool,
}

impl AdminGate {
    pub fn new(token: Option<String>, local_mode: bool) -> Self {
        let token = token.filter(|t| !t.trim().is_empty());
        Self { token, local_mode }
    }

    pub fn local_mode(&self) -> bool {
        self.local_mode
    }

    /// Local mode admits everyone. Otherwise the token must match; with no
    /// token configured nobody is admin.
    pub fn permits(&self, presented: Option<&str>) -> bool {
        if self.local_mode {
            return true;
        }
        match (&self.token, presented) {
            (Some(expected), Some(given)) => constant_time_eq(expected.as_bytes(), given.as_bytes()),
            _ => false,
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

type Rejection = (StatusCode, Json<serde_json::Value>);

fn reject(status: StatusCode, msg: &str) -> Rejection {
    (status, Json(serde_json::json!({ "error": msg })))
}

// ── Axum extractor: AdminUser ────────────────────────────────────────

/// Marker extractor for admin-only handlers.
/// Usage: `_admin: AdminUser` in handler parameters.
#[derive(Debug, Clone, Copy)]
pub struct AdminUser;

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let gate = parts
            .extensions
            .get::<Arc<AdminGate>>()
            .cloned()
            .ok_or_else(|| reject(StatusCode::INTERNAL_SERVER_ERROR, "Admin gate not configured"))?;

        if gate.local_mode() {
            return Ok(AdminUser);
        }

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| reject(StatusCode::UNAUTHORIZED, "Missing Authorization header"))?;

        if gate.permits(Some(bearer.token())) {
            Ok(AdminUser)
        } else {
            tracing::warn!("Rejected admin request with invalid token");
            Err(reject(StatusCode::FORBIDDEN, "Admin token required"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn test_gate_requires_matching_token() {
        let gate = AdminGate::new(Some("s3cret".into()), false);
        assert!(gate.permits(Some("s3cret")));
        assert!(!gate.permits(Some("s3cre")));
        assert!(!gate.permits(Some("wrong!")));
        assert!(!gate.permits(None));
    }

    #[test]
    fn test_gate_without_token_denies() {
        let gate = AdminGate::new(Some("  ".into()), false);
        assert!(!gate.permits(Some("  ")));
        assert!(!AdminGate::new(None, false).permits(Some("anything")));
    }

    #[test]
    fn test_local_mode_admits_everyone() {
        let gate = AdminGate::new(None, true);
        assert!(gate.permits(None));
    }

    async fn extract(gate: AdminGate, auth: Option<&str>) -> Result<AdminUser, StatusCode> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = auth {
            builder = builder.header("Authorization", value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        parts.extensions.insert(Arc::new(gate));
        AdminUser::from_request_parts(&mut parts, &())
            .await
            .map_err(|(status, _)| status)
    }

    #[tokio::test]
    async fn test_extractor_statuses() {
        let gate = AdminGate::new(Some("tok".into()), false);
        assert!(extract(gate.clone(), Some("Bearer tok")).await.is_ok());
        assert_eq!(
            extract(gate.clone(), Some("Bearer nope")).await.unwrap_err(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            extract(gate.clone(), None).await.unwrap_err(),
            StatusCode::UNAUTHORIZED
        );
        assert!(extract(AdminGate::new(None, true), None).await.is_ok());
    }
}
