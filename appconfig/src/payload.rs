//! Turns a raw configuration body into the flat key/value map held by a snapshot.

use crate::types::ConfigValues;
use serde_json::value::RawValue;
use std::collections::HashMap;

#[derive(thiserror::Error, Debug)]
pub enum PayloadError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("unsupported {kind} value for key {key:?}")]
    UnsupportedValue { key: String, kind: &'static str },
    #[error("required key {0:?} is missing")]
    MissingKey(String),
}

/// Parses a flat JSON object. Strings are kept verbatim, numbers and booleans
/// keep their JSON text exactly as written (`0.10` stays `"0.10"`). Anything
/// nested is rejected so that a snapshot is never built from a partially
/// understood payload.
pub fn parse_payload(body: &[u8], required_keys: &[String]) -> Result<ConfigValues, PayloadError> {
    let raw: &RawValue = serde_json::from_slice(body)?;
    if !raw.get().starts_with('{') {
        return Err(PayloadError::NotAnObject);
    }
    let object: HashMap<String, &RawValue> = serde_json::from_str(raw.get())?;

    let mut values = ConfigValues::with_capacity(object.len());
    for (key, value) in object {
        let text = value.get();
        let rendered = match text.as_bytes().first() {
            Some(b'"') => serde_json::from_str::<String>(text)?,
            Some(b'n') => return Err(unsupported(key, "null")),
            Some(b'[') => return Err(unsupported(key, "array")),
            Some(b'{') => return Err(unsupported(key, "object")),
            // Numbers, true and false
            _ => text.to_string(),
        };
        values.insert(key, rendered);
    }

    if let Some(missing) = required_keys.iter().find(|key| !values.contains_key(*key)) {
        return Err(PayloadError::MissingKey(missing.clone()));
    }

    Ok(values)
}

fn unsupported(key: String, kind: &'static str) -> PayloadError {
    PayloadError::UnsupportedValue { key, kind }
}
