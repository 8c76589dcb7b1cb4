//! Logical push message and payload coercion

use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Android delivery priority hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AndroidPriority {
    High,
}

/// Provider-neutral delivery hints applied to every message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryHints {
    pub android_priority: AndroidPriority,
    pub android_channel_id: String,
    pub sound: String,
    pub apns_badge: u32,
}

impl Default for DeliveryHints {
    fn default() -> Self {
        Self {
            android_priority: AndroidPriority::High,
            android_channel_id: "default".to_string(),
            sound: "default".to_string(),
            apns_badge: 1,
        }
    }
}

/// One logical message, ready to be rendered into a provider envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    /// Text-only data channel; `None` when the request carried no payload
    pub data: Option<BTreeMap<String, String>>,
    pub hints: DeliveryHints,
}

impl PushMessage {
    pub fn new(title: &str, body: &str, payload: Option<&Map<String, Value>>) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
            data: payload.map(stringify_data),
            hints: DeliveryHints::default(),
        }
    }
}

/// Flatten a structured payload into the string-keyed, string-valued map the
/// provider's data channel accepts.
///
/// The conversion is lossy and follows JavaScript `String(value)` semantics so
/// clients can predict what they receive: strings pass through, numbers print
/// in shortest form (`1.0` becomes `"1"`), booleans and null print their
/// literal, arrays join their elements with `,` and objects collapse to
/// `"[object Object]"`.
pub fn stringify_data(payload: &Map<String, Value>) -> BTreeMap<String, String> {
    payload
        .iter()
        .map(|(key, value)| (key.clone(), js_string(value)))
        .collect()
}

fn js_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Number(n) => js_number(n),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => js_string(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

fn js_number(n: &Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }

    let Some(f) = n.as_f64() else {
        return n.to_string();
    };

    if f == 0.0 {
        // covers -0.0, which JavaScript prints as "0"
        return "0".to_string();
    }

    let magnitude = f.abs();
    if magnitude >= 1e21 || magnitude < 1e-6 {
        // JavaScript switches to exponent notation and always signs the exponent
        let formatted = format!("{:e}", f);
        match formatted.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{}e+{}", mantissa, exponent)
            }
            _ => formatted,
        }
    } else {
        // Display for f64 is shortest round-trip without exponent, like JavaScript here
        format!("{}", f)
    }
}
