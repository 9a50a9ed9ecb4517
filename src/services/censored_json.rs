// Censored JSON
// Renders request/response bodies for logging with credentials masked

use serde_json::Value;

pub const CENSORED: &str = "CENSORED";

const SENSITIVE_KEY: &str = "authentication";

/// Replace every string-valued `authentication` field, at any depth, with the sentinel
pub fn censor_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == SENSITIVE_KEY && child.is_string() {
                    *child = Value::String(CENSORED.to_string());
                } else {
                    censor_value(child);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(censor_value),
        _ => {}
    }
}

/// Pretty-printed copy of `value` safe for the log
pub fn censored_json(value: &Value) -> String {
    let mut copy = value.clone();
    censor_value(&mut copy);
    serde_json::to_string_pretty(&copy).unwrap_or_else(|_| copy.to_string())
}
