use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// Project a sensor's current state into its published document.
///
/// The domain structs never serialize themselves; this pure mapping is the
/// only place the wire shape is decided.
pub fn state_document(key: &str, value: f64, unit: Option<&str>, at: DateTime<Utc>) -> Value {
    json!({
        "key": key,
        "value": value,
        "unit": unit,
        "timestamp": at.to_rfc3339(),
    })
}
