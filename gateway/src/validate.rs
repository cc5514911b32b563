use crate::errors::{Error, Result};
use crate::gate::ValidationMode;
use crate::model::Payload;
use serde_json::Value;

/// Fields a strict deployment insists on.
pub const REQUIRED_FIELDS: [&str; 2] = ["temperature", "humidity"];

/// Fields only the server may set.
const SERVER_FIELDS: [&str; 2] = ["item_id", "timestamp"];

/// Envelope key used by the dashboard's POST helper.
const ENVELOPE_KEY: &str = "data";

/// Parses a request body into a payload object.
pub fn parse_payload(raw: &[u8]) -> Result<Payload> {
    let mut object = match serde_json::from_slice::<Value>(raw)? {
        Value::Object(object) => object,
        other => {
            return Err(Error::MalformedPayload(format!(
                "expected a JSON object, got {}",
                type_name(&other)
            )))
        }
    };

    // {"data": {...}} is unwrapped; any other shape is taken as-is
    if object.len() == 1 && object.get(ENVELOPE_KEY).is_some_and(Value::is_object) {
        if let Some(Value::Object(inner)) = object.remove(ENVELOPE_KEY) {
            return Ok(inner);
        }
    }

    Ok(object)
}

/// Validates a payload against the deployment's validation mode
pub fn validate(payload: &Payload, mode: ValidationMode) -> Result<()> {
    if mode == ValidationMode::Permissive {
        return Ok(());
    }

    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|field| !payload.get(**field).is_some_and(is_truthy))
        .map(|field| field.to_string())
        .collect();

    if !missing.is_empty() {
        return Err(Error::MissingFields(missing));
    }

    Ok(())
}

/// Drops client-supplied values for server-assigned fields.
pub fn strip_server_fields(payload: &mut Payload) {
    for field in SERVER_FIELDS {
        payload.remove(field);
    }
}

/// Null, false, zero and empty values count as absent.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
