use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request identifier scoped to one call, available to handlers as an extension
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

fn is_usable(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Reuses a caller-supplied `x-request-id` when it is safe to embed in an
/// object key, otherwise mints a fresh one.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| is_usable(v))
        .map(|v| v.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_usable() {
        assert!(is_usable("3f1c2d4e-0000-4000-8000-000000000000"));
        assert!(is_usable("req_1"));
        assert!(!is_usable(""));
        assert!(!is_usable("../etc"));
        assert!(!is_usable("a/b"));
        assert!(!is_usable(&"x".repeat(129)));
    }
}
