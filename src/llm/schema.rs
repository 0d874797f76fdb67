//! Minimal structural JSON-schema validation.
//!
//! Extract takes a JSON-schema document plus an optional validator callback;
//! this module is the built-in fallback covering the structural subset the
//! handlers rely on: `type`, `properties`, `required`, `items`, `enum`.

use serde_json::Value;

/// Check `value` against the structural subset of `schema`.
pub fn validate(schema: &Value, value: &Value) -> Result<(), String> {
    validate_at(schema, value, "$")
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!("{path}: value not in enum"));
        }
    }

    let expected = match schema.get("type").and_then(Value::as_str) {
        Some(expected) => expected,
        None => return Ok(()),
    };

    match expected {
        "object" => {
            let object = value
                .as_object()
                .ok_or_else(|| format!("{path}: expected object"))?;
            if let Some(required) = schema.get("required").and_then(Value::as_array) {
                for key in required.iter().filter_map(Value::as_str) {
                    if !object.contains_key(key) {
                        return Err(format!("{path}: missing required property '{key}'"));
                    }
                }
            }
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                for (key, subschema) in properties {
                    if let Some(subvalue) = object.get(key) {
                        if subvalue.is_null() {
                            // Absent-or-null is how models report unknown fields.
                            continue;
                        }
                        validate_at(subschema, subvalue, &format!("{path}.{key}"))?;
                    }
                }
            }
            Ok(())
        }
        "array" => {
            let items = value
                .as_array()
                .ok_or_else(|| format!("{path}: expected array"))?;
            if let Some(item_schema) = schema.get("items") {
                for (index, item) in items.iter().enumerate() {
                    validate_at(item_schema, item, &format!("{path}[{index}]"))?;
                }
            }
            Ok(())
        }
        "string" => value
            .is_string()
            .then_some(())
            .ok_or_else(|| format!("{path}: expected string")),
        "integer" => value
            .as_i64()
            .map(|_| ())
            .ok_or_else(|| format!("{path}: expected integer")),
        "number" => value
            .is_number()
            .then_some(())
            .ok_or_else(|| format!("{path}: expected number")),
        "boolean" => value
            .is_boolean()
            .then_some(())
            .ok_or_else(|| format!("{path}: expected boolean")),
        "null" => value
            .is_null()
            .then_some(())
            .ok_or_else(|| format!("{path}: expected null")),
        _ => Ok(()),
    }
}
