//! Response envelopes and transport line rendering.
//!
//! Every result is one stdout line `"[RESULT] {\"type\":…,\"payload\":…}"`;
//! diagnostics meant for the host are `"[LOG] …"` lines.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: &str, payload: Value) -> Self {
        Self {
            kind: kind.to_string(),
            payload,
        }
    }
}

#[derive(Debug, Clone)]
pub enum OutputLine {
    Result(Envelope),
    Log(String),
}

impl OutputLine {
    pub fn result(kind: &str, payload: Value) -> Self {
        Self::Result(Envelope::new(kind, payload))
    }

    pub fn log(message: impl Into<String>) -> Self {
        Self::Log(message.into())
    }

    pub fn render(&self) -> String {
        match self {
            Self::Result(envelope) => {
                let body = serde_json::to_string(envelope)
                    .unwrap_or_else(|_| r#"{"type":"SERIALIZE_ERROR","payload":{}}"#.to_string());
                format!("[RESULT] {body}")
            }
            Self::Log(message) => format!("[LOG] {message}"),
        }
    }
}

/// JSON object from already-ordered pairs; insertion order is preserved on
/// the wire.
pub fn ordered_object(pairs: &[(String, f64)]) -> Value {
    let mut map = serde_json::Map::new();
    for (key, value) in pairs {
        map.insert(key.clone(), Value::from(*value));
    }
    Value::Object(map)
}

/// Serialize a payload struct, falling back to null on failure.
pub fn to_payload<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn result_line_carries_type_and_payload() {
        let line = OutputLine::result("PONG", json!({"timestamp": 1}));
        let rendered = line.render();
        assert!(rendered.starts_with("[RESULT] "));
        let body: Value = serde_json::from_str(&rendered["[RESULT] ".len()..]).unwrap();
        assert_eq!(body["type"], "PONG");
        assert_eq!(body["payload"]["timestamp"], 1);
    }

    #[test]
    fn log_line_is_prefixed() {
        assert_eq!(OutputLine::log("hello").render(), "[LOG] hello");
    }

    #[test]
    fn ordered_object_preserves_insertion_order() {
        let pairs = vec![("zulu".to_string(), 0.9), ("alpha".to_string(), 0.1)];
        let value = ordered_object(&pairs);
        let rendered = serde_json::to_string(&value).unwrap();
        assert!(rendered.find("zulu").unwrap() < rendered.find("alpha").unwrap());
    }
}
