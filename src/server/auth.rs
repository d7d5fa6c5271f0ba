//! Bearer token check for `/session`, `/send` and `/logout`.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use super::AppState;
use crate::config::SecretString;
use crate::error::{GatewayError, Result};

pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    check_bearer(&state.auth_token, request.headers())?;
    Ok(next.run(request).await)
}

/// An unset token locks the protected routes (500) rather than opening them.
pub fn check_bearer(expected: &SecretString, headers: &HeaderMap) -> Result<()> {
    if expected.is_empty() {
        return Err(GatewayError::AuthNotConfigured);
    }

    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();

    if constant_time_eq(presented.as_bytes(), expected.expose_secret().as_bytes()) {
        Ok(())
    } else {
        Err(GatewayError::Unauthorized)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_matching_token() {
        let token = SecretString::new("s3cret");
        assert!(check_bearer(&token, &headers("Bearer s3cret")).is_ok());
    }

    #[test]
    fn test_rejections() {
        let token = SecretString::new("s3cret");
        for value in ["Bearer wrong", "s3cret", "Basic s3cret", "Bearer s3cret2", "Bearer "] {
            assert!(
                matches!(check_bearer(&token, &headers(value)), Err(GatewayError::Unauthorized)),
                "{value} should be rejected"
            );
        }
        assert!(matches!(
            check_bearer(&token, &HeaderMap::new()),
            Err(GatewayError::Unauthorized)
        ));
    }

    #[test]
    fn test_unconfigured_token() {
        assert!(matches!(
            check_bearer(&SecretString::default(), &headers("Bearer ")),
            Err(GatewayError::AuthNotConfigured)
        ));
    }
}
