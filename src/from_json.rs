use crate::error::BindingsError;
use crate::tree::{Bindings, Value};
use std::collections::BTreeMap;

/// Deserialize a JSON string into a Value. `null` becomes `Value::Unit`.
pub fn from_json(input: &str) -> Result<Value, BindingsError> {
    let json: serde_json::Value = serde_json::from_str(input)?;
    Ok(convert(json))
}

/// Deserialize a JSON object into initial evaluation bindings.
pub fn bindings_from_json(input: &str) -> Result<Bindings, BindingsError> {
    match from_json(input)? {
        Value::Struct(fields) => Ok(fields),
        other => Err(BindingsError::NotAnObject {
            found: other.kind_name(),
        }),
    }
}

fn convert(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Unit,
        serde_json::Value::Bool(b) => Value::Boolean(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => Value::Array(items.into_iter().map(convert).collect()),
        serde_json::Value::Object(map) => {
            let fields: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, convert(v))).collect();
            Value::Struct(fields)
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        convert(json)
    }
}
