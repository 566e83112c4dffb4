//! JSON envelope helpers for REST responses.
//!
//! Success bodies carry `{"success": true, ...}`. Failures are produced by
//! `AirwaveError::into_response`, so clients parse one error format
//! everywhere.

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

/// A bare success acknowledgment.
pub fn api_ok() -> Response {
    api_success(json!({})).into_response()
}

/// A success envelope wrapping `data`.
pub fn api_success(data: Value) -> impl IntoResponse {
    let mut body = json!({ "success": true });
    if let (Some(obj), Value::Object(data)) = (body.as_object_mut(), data) {
        for (key, value) in data {
            obj.insert(key, value);
        }
    }
    Json(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn success_envelope_merges_data() {
        let response = api_success(json!({ "count": 3 })).into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn api_ok_is_a_success_response() {
        assert_eq!(api_ok().status(), StatusCode::OK);
    }
}
