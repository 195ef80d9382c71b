use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use ferrobank_auth::{Principal, TokenMaker};

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

#[derive(Clone)]
pub struct AuthState {
    pub tokens: Arc<dyn TokenMaker>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let token = match extract_bearer(req.headers()) {
        Ok(t) => t,
        Err(msg) => return json_error(StatusCode::UNAUTHORIZED, "unauthorized", msg),
    };

    let claims = match state.tokens.verify_token(token, Utc::now()) {
        Ok(c) => c,
        Err(e) => return json_error(StatusCode::UNAUTHORIZED, "unauthorized", e.to_string()),
    };

    req.extensions_mut()
        .insert(PrincipalContext::new(Principal::from(&claims)));

    next.run(req).await
}

/// One line per request: method, path, status, latency.
pub async fn log_requests(req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    tracing::info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, &'static str> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or("authorization header is not provided")?;

    let header = header.to_str().map_err(|_| "invalid authorization header format")?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or("unsupported authorization type")?;

    let token = header.trim();
    if token.is_empty() {
        return Err("invalid authorization header format");
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer(&headers("Bearer abc.def")), Ok("abc.def"));
        assert!(extract_bearer(&HeaderMap::new()).is_err());
        assert!(extract_bearer(&headers("Basic dXNlcjpwYXNz")).is_err());
        assert!(extract_bearer(&headers("Bearer   ")).is_err());
    }
}
