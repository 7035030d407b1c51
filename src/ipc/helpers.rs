use crate::auth::AuthError;
use crate::ipc::error::err;
use crate::ipc::types::Request;

/// Trimmed non-empty string param, or a ready-to-return bad_params response.
pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn auth_err(id: &str, e: &AuthError) -> serde_json::Value {
    err(id, e.code(), e.to_string(), None)
}
