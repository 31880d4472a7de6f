//! Collection schema: the document mapping of a named collection.
//!
//! A mapping declares the typed fields of a collection. Documents may
//! carry additional fields (the schema is open); declared fields are
//! validated at admission time and drive the search index's typed field
//! handling. Field names starting with `_` are reserved for the system
//! fields injected at index time.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The collection every node creates on first boot.
pub const COLLECTION_DEFAULT: &str = "default";

/// System fields injected into every indexed document.
pub const RESERVED_FIELDS: [&str; 7] = [
    "_id",
    "_blockId",
    "_peerId",
    "_type",
    "_timestamp",
    "_publicKey",
    "_permittedAddresses",
];

/// Declared type of a document field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Datetime,
    Boolean,
    Geopoint,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Datetime => "datetime",
            FieldType::Boolean => "boolean",
            FieldType::Geopoint => "geopoint",
        };
        write!(f, "{name}")
    }
}

/// One field declaration: `{"type": "text"}` in the JSON schema payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

/// The schema of a collection.
///
/// JSON shape, as accepted on the collection-creation endpoint:
///
/// ```json
/// {
///     "collection": "articles",
///     "fields": {
///         "title": {"type": "text"},
///         "age": {"type": "number"},
///         "created": {"type": "datetime"},
///         "draft": {"type": "boolean"},
///         "location": {"type": "geopoint"}
///     }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMapping {
    pub collection: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldDef>,
}

impl DocumentMapping {
    /// The built-in mapping of the default collection.
    pub fn default_collection() -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(
            "id".to_string(),
            FieldDef {
                field_type: FieldType::Number,
            },
        );
        fields.insert(
            "message".to_string(),
            FieldDef {
                field_type: FieldType::Text,
            },
        );
        DocumentMapping {
            collection: COLLECTION_DEFAULT.to_string(),
            fields,
        }
    }

    /// Canonical bincode-2 encoding for storage and the wire.
    ///
    /// # Panics
    ///
    /// Panics if encoding fails, which would be a programming error: all
    /// fields are plain data.
    pub fn encode(&self) -> Vec<u8> {
        let cfg = bincode::config::standard();
        bincode::serde::encode_to_vec(self, cfg)
            .expect("DocumentMapping should always be serializable with bincode 2 + serde")
    }

    /// Decodes a mapping from its canonical encoding.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let cfg = bincode::config::standard();
        let (mapping, _): (DocumentMapping, usize) =
            bincode::serde::decode_from_slice(bytes, cfg).ok()?;
        Some(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_schema_json() {
        let json = r#"
        {
            "collection": "articles",
            "fields": {
                "title": {"type": "text"},
                "age": {"type": "number"},
                "created": {"type": "datetime"},
                "draft": {"type": "boolean"},
                "location": {"type": "geopoint"}
            }
        }
        "#;
        let mapping: DocumentMapping = serde_json::from_str(json).unwrap();
        assert_eq!(mapping.collection, "articles");
        assert_eq!(
            mapping.fields["age"].field_type,
            FieldType::Number
        );
        assert_eq!(mapping.fields["location"].field_type, FieldType::Geopoint);
    }

    #[test]
    fn rejects_unknown_field_type() {
        let json = r#"{"collection": "x", "fields": {"a": {"type": "decimal"}}}"#;
        assert!(serde_json::from_str::<DocumentMapping>(json).is_err());
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mapping = DocumentMapping::default_collection();
        assert_eq!(DocumentMapping::decode(&mapping.encode()), Some(mapping));
    }

    #[test]
    fn field_types_render_lowercase() {
        assert_eq!(FieldType::Datetime.to_string(), "datetime");
        assert_eq!(FieldType::Geopoint.to_string(), "geopoint");
    }
}
