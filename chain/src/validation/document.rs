//! Schema validation of submitted documents.
//!
//! The schema is open: fields absent from the mapping always pass. For
//! declared fields the observed JSON variant must agree with the declared
//! type; mismatches accumulate into a per-field error map that is returned
//! to the caller for resubmission. Arrays are checked by their first
//! element. Datetime values must parse as RFC3339 (array elements may
//! carry fractional seconds).

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::types::{DocumentMapping, FieldType};

/// Failure to inspect a document at all (as opposed to per-field errors).
#[derive(Debug)]
pub enum DocumentError {
    /// The payload is not a JSON object.
    MalformedJson(String),
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentError::MalformedJson(msg) => write!(f, "malformed document: {msg}"),
        }
    }
}

impl std::error::Error for DocumentError {}

/// Validates `raw` against `mapping`.
///
/// Returns the per-field error map; an empty map means the document is
/// acceptable.
pub fn validate_document(
    mapping: &DocumentMapping,
    raw: &[u8],
) -> Result<BTreeMap<String, String>, DocumentError> {
    let doc: Value = serde_json::from_slice(raw)
        .map_err(|e| DocumentError::MalformedJson(e.to_string()))?;
    let Value::Object(fields) = doc else {
        return Err(DocumentError::MalformedJson(
            "document root must be a JSON object".to_string(),
        ));
    };

    let mut errors = BTreeMap::new();

    for (field, value) in &fields {
        let Some(def) = mapping.fields.get(field) else {
            continue; // open schema
        };
        let declared = def.field_type;

        match value {
            Value::String(s) => match declared {
                FieldType::Text => {}
                FieldType::Datetime => {
                    if chrono::DateTime::parse_from_rfc3339(s).is_err() {
                        errors.insert(
                            field.clone(),
                            "cannot parse as RFC3339 time format".to_string(),
                        );
                    }
                }
                other => {
                    errors.insert(field.clone(), type_mismatch(other));
                }
            },
            Value::Number(_) => {
                if declared != FieldType::Number {
                    errors.insert(field.clone(), type_mismatch(declared));
                }
            }
            Value::Bool(_) => {
                if declared != FieldType::Boolean {
                    errors.insert(field.clone(), type_mismatch(declared));
                }
            }
            Value::Array(elements) => {
                let Some(first) = elements.first() else {
                    continue; // nothing to judge an empty array by
                };
                match first {
                    Value::String(s) => match declared {
                        FieldType::Text => {}
                        FieldType::Datetime => {
                            if chrono::DateTime::parse_from_rfc3339(s).is_err() {
                                errors.insert(
                                    field.clone(),
                                    "cannot parse as RFC3339 time format".to_string(),
                                );
                            }
                        }
                        other => {
                            errors.insert(field.clone(), type_mismatch(other));
                        }
                    },
                    Value::Number(_) => {
                        if declared != FieldType::Number {
                            errors.insert(field.clone(), type_mismatch(declared));
                        }
                    }
                    Value::Bool(_) => {
                        if declared != FieldType::Boolean {
                            errors.insert(field.clone(), type_mismatch(declared));
                        }
                    }
                    _ => {
                        check_geopoint_or_mismatch(field, value, declared, &mut errors);
                    }
                }
            }
            _ => {
                check_geopoint_or_mismatch(field, value, declared, &mut errors);
            }
        }
    }

    Ok(errors)
}

fn type_mismatch(declared: FieldType) -> String {
    format!("field type should be {declared}")
}

fn check_geopoint_or_mismatch(
    field: &str,
    value: &Value,
    declared: FieldType,
    errors: &mut BTreeMap<String, String>,
) {
    if declared == FieldType::Geopoint {
        if extract_geo_point(value).is_none() {
            errors.insert(field.to_string(), "field type should be geopoint".to_string());
        }
    } else {
        errors.insert(field.to_string(), type_mismatch(declared));
    }
}

/// Interprets a JSON value as a `(lat, lon)` pair.
///
/// Accepted shapes: an object with `lat`/`latitude` and `lon`/`lng`/
/// `longitude` number members, or a two-element `[lon, lat]` array.
pub fn extract_geo_point(value: &Value) -> Option<(f64, f64)> {
    match value {
        Value::Object(map) => {
            let lat = map
                .get("lat")
                .or_else(|| map.get("latitude"))
                .and_then(Value::as_f64)?;
            let lon = map
                .get("lon")
                .or_else(|| map.get("lng"))
                .or_else(|| map.get("longitude"))
                .and_then(Value::as_f64)?;
            Some((lat, lon))
        }
        Value::Array(elements) => {
            if elements.len() != 2 {
                return None;
            }
            let lon = elements[0].as_f64()?;
            let lat = elements[1].as_f64()?;
            Some((lat, lon))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldDef;

    fn mapping(fields: &[(&str, FieldType)]) -> DocumentMapping {
        DocumentMapping {
            collection: "notes".to_string(),
            fields: fields
                .iter()
                .map(|(name, ty)| (name.to_string(), FieldDef { field_type: *ty }))
                .collect(),
        }
    }

    #[test]
    fn string_in_number_field_is_rejected() {
        let m = mapping(&[("age", FieldType::Number)]);
        let errors = validate_document(&m, br#"{"age":"thirty"}"#).unwrap();
        assert_eq!(errors["age"], "field type should be number");
    }

    #[test]
    fn valid_datetime_passes() {
        let m = mapping(&[("ts", FieldType::Datetime)]);
        let errors = validate_document(&m, br#"{"ts":"2020-01-02T03:04:05Z"}"#).unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn invalid_datetime_reports_parse_error() {
        let m = mapping(&[("ts", FieldType::Datetime)]);
        let errors = validate_document(&m, br#"{"ts":"yesterday"}"#).unwrap();
        assert_eq!(errors["ts"], "cannot parse as RFC3339 time format");
    }

    #[test]
    fn datetime_array_accepts_nanosecond_precision() {
        let m = mapping(&[("ts", FieldType::Datetime)]);
        let errors =
            validate_document(&m, br#"{"ts":["2020-01-02T03:04:05.123456789Z"]}"#).unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn undeclared_fields_pass_open_schema() {
        let m = mapping(&[("age", FieldType::Number)]);
        let errors = validate_document(&m, br#"{"age":30,"note":"free-form","x":[1,2]}"#).unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn boolean_and_number_variants() {
        let m = mapping(&[("done", FieldType::Boolean), ("n", FieldType::Number)]);
        let errors = validate_document(&m, br#"{"done":true,"n":4.5}"#).unwrap();
        assert!(errors.is_empty());

        let errors = validate_document(&m, br#"{"done":1,"n":false}"#).unwrap();
        assert_eq!(errors["done"], "field type should be boolean");
        assert_eq!(errors["n"], "field type should be number");
    }

    #[test]
    fn string_arrays_count_as_text() {
        let m = mapping(&[("tags", FieldType::Text)]);
        let errors = validate_document(&m, br#"{"tags":["a","b"]}"#).unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn geopoint_shapes() {
        let m = mapping(&[("loc", FieldType::Geopoint)]);

        let ok_obj = validate_document(&m, br#"{"loc":{"lat":44.2,"lon":-72.5}}"#).unwrap();
        assert!(ok_obj.is_empty());

        let bad = validate_document(&m, br#"{"loc":{"x":1}}"#).unwrap();
        assert_eq!(bad["loc"], "field type should be geopoint");
    }

    #[test]
    fn object_in_scalar_field_is_rejected() {
        let m = mapping(&[("age", FieldType::Number)]);
        let errors = validate_document(&m, br#"{"age":{"nested":1}}"#).unwrap();
        assert_eq!(errors["age"], "field type should be number");
    }

    #[test]
    fn malformed_payloads_error_out() {
        let m = mapping(&[]);
        assert!(validate_document(&m, b"not json").is_err());
        assert!(validate_document(&m, b"[1,2,3]").is_err());
    }

    #[test]
    fn empty_arrays_are_accepted() {
        let m = mapping(&[("tags", FieldType::Text)]);
        let errors = validate_document(&m, br#"{"tags":[]}"#).unwrap();
        assert!(errors.is_empty());
    }
}
