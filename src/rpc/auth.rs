//! Bearer-token gate for the submission routes (SPEC_FULL.md §6). Read-only
//! routes (`/status`, `/metrics`, `/health`, `/readiness`, `/liveness`)
//! never pass through this middleware.
//!
//! Grounded on the donor's `rpc/auth.rs` (constant-time comparison,
//! open-access-when-unset default) with the token sourced from `Config`
//! rather than read directly from the environment on every request.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

pub async fn require_bearer_token(
    State(expected): State<Arc<Option<String>>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = expected.as_ref() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => Ok(next.run(request).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_tokens_compare_equal() {
        assert!(constant_time_eq(b"secret", b"secret"));
    }

    #[test]
    fn different_length_tokens_are_unequal() {
        assert!(!constant_time_eq(b"secret", b"secre"));
    }

    #[test]
    fn different_tokens_are_unequal() {
        assert!(!constant_time_eq(b"secret1", b"secret2"));
    }
}
