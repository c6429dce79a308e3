use serde_json::json;

use crate::error::EngineError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn engine_err(id: &str, e: EngineError) -> serde_json::Value {
    let code = e.code();
    match &e {
        EngineError::Db(_) | EngineError::Internal(_) | EngineError::Corrupt(_) => {
            tracing::error!(code, error = %e, "request failed");
        }
        _ => tracing::debug!(code, error = %e, "request rejected"),
    }
    err(id, code, e.to_string(), e.details())
}
