//! Copyright © 2025-2026 Dunimd Team. All Rights Reserved.
//!
//! This file is part of Vista.
//! The Vista project belongs to the Dunimd Team.
//!
//! Licensed under the Apache License, Version 2.0 (the "License");
//! You may not use this file except in compliance with the License.
//! You may obtain a copy of the License at
//!
//!     http://www.apache.org/licenses/LICENSE-2.0
//!
//! Unless required by applicable law or agreed to in writing, software
//! distributed under the License is distributed on an "AS IS" BASIS,
//! WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//! See the License for the specific language governing permissions and
//! limitations under the License.

//! # Vista Field Module
//!
//! This module provides the typed field descriptors that back dataset
//! schemas, together with the explicit value-to-descriptor inference
//! function used both at ingestion time and at merge-time validation.
//!
//! A descriptor is the `(ftype, subfield, embedded_doc_type)` triple that is
//! persisted per field in the dataset document. Once declared, a field's
//! descriptor is fixed; inference never widens an existing declaration.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Result, VistaError};

/// Embedded document types whose element lists merge at the element level.
///
/// Each entry maps the embedded document type to the name of its element
/// list field, e.g. a `Detections` document stores its labeled elements
/// under `detections`.
pub const LABEL_LIST_TYPES: &[(&str, &str)] = &[
    ("Classifications", "classifications"),
    ("Detections", "detections"),
    ("Keypoints", "keypoints"),
    ("Polylines", "polylines"),
];

/// Marker key identifying embedded documents in wire representation.
pub const CLS_KEY: &str = "_cls";

/// Primitive and container field types supported by dataset schemas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VistaFieldType {
    Boolean,
    Integer,
    Float,
    String,
    ObjectId,
    Date,
    Dict,
    List,
    EmbeddedDocument,
    GeoPoint,
}

impl std::fmt::Display for VistaFieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VistaFieldType::Boolean => "Boolean",
            VistaFieldType::Integer => "Integer",
            VistaFieldType::Float => "Float",
            VistaFieldType::String => "String",
            VistaFieldType::ObjectId => "ObjectId",
            VistaFieldType::Date => "Date",
            VistaFieldType::Dict => "Dict",
            VistaFieldType::List => "List",
            VistaFieldType::EmbeddedDocument => "EmbeddedDocument",
            VistaFieldType::GeoPoint => "GeoPoint",
        };
        write!(f, "{name}")
    }
}

/// Persisted type descriptor for a single schema field.
///
/// Compatibility is judged on the `(ftype, subfield, embedded_doc_type)`
/// triple; `nullable` is bookkeeping and never part of the comparison since
/// absence and null are treated as equivalent throughout Vista.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VistaFieldDescriptor {
    /// Top-level field type.
    pub ftype: VistaFieldType,

    /// Element type for `List` fields, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subfield: Option<VistaFieldType>,

    /// Document type name for `EmbeddedDocument` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_doc_type: Option<String>,

    /// Whether null values are accepted. Informational only.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl VistaFieldDescriptor {
    /// Creates a scalar descriptor with no container/embedded refinement.
    pub fn scalar(ftype: VistaFieldType) -> Self {
        VistaFieldDescriptor {
            ftype,
            subfield: None,
            embedded_doc_type: None,
            nullable: true,
        }
    }

    /// Creates a list descriptor with an optional element type.
    pub fn list(subfield: Option<VistaFieldType>) -> Self {
        VistaFieldDescriptor {
            ftype: VistaFieldType::List,
            subfield,
            embedded_doc_type: None,
            nullable: true,
        }
    }

    /// Creates an embedded document descriptor.
    pub fn embedded(doc_type: impl Into<String>) -> Self {
        VistaFieldDescriptor {
            ftype: VistaFieldType::EmbeddedDocument,
            subfield: None,
            embedded_doc_type: Some(doc_type.into()),
            nullable: true,
        }
    }

    /// Whether this descriptor matches another.
    ///
    /// An unset `subfield` or `embedded_doc_type` on either side acts as a
    /// wildcard, mirroring how partially specified declarations behave.
    pub fn matches(&self, other: &VistaFieldDescriptor) -> bool {
        fn opt_matches<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
            match (a, b) {
                (Some(x), Some(y)) => x == y,
                _ => true,
            }
        }

        self.ftype == other.ftype
            && opt_matches(&self.subfield, &other.subfield)
            && opt_matches(&self.embedded_doc_type, &other.embedded_doc_type)
    }

    /// If this field is a label-list field, returns the element list field.
    pub fn label_list_field(&self) -> Option<&'static str> {
        if self.ftype != VistaFieldType::EmbeddedDocument {
            return None;
        }

        let doc_type = self.embedded_doc_type.as_deref()?;
        LABEL_LIST_TYPES
            .iter()
            .find(|(name, _)| *name == doc_type)
            .map(|(_, elements)| *elements)
    }

    /// Human-readable rendering used in schema error messages.
    pub fn type_string(&self) -> String {
        match self.ftype {
            VistaFieldType::List => match &self.subfield {
                Some(sub) => format!("List({sub})"),
                None => "List".to_string(),
            },
            VistaFieldType::EmbeddedDocument => match &self.embedded_doc_type {
                Some(doc) => format!("EmbeddedDocument({doc})"),
                None => "EmbeddedDocument".to_string(),
            },
            ftype => ftype.to_string(),
        }
    }

    /// Validates a stored value against this descriptor.
    ///
    /// Null is always accepted; absence and null are equivalent.
    pub fn validate_value(&self, name: &str, value: &Value) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }

        let ok = match self.ftype {
            VistaFieldType::Boolean => value.is_boolean(),
            VistaFieldType::Integer => value.is_i64() || value.is_u64(),
            VistaFieldType::Float => value.is_number(),
            VistaFieldType::String | VistaFieldType::ObjectId | VistaFieldType::Date => {
                value.is_string()
            }
            VistaFieldType::Dict => value.is_object(),
            VistaFieldType::GeoPoint => value.is_array(),
            VistaFieldType::List => match value.as_array() {
                Some(items) => match self.subfield {
                    Some(sub) => items.iter().all(|item| {
                        item.is_null()
                            || VistaFieldDescriptor::scalar(sub)
                                .validate_value(name, item)
                                .is_ok()
                    }),
                    None => true,
                },
                None => false,
            },
            VistaFieldType::EmbeddedDocument => match value.as_object() {
                Some(map) => match (&self.embedded_doc_type, map.get(CLS_KEY)) {
                    (Some(expected), Some(Value::String(actual))) => expected == actual,
                    _ => true,
                },
                None => false,
            },
        };

        if ok {
            Ok(())
        } else {
            Err(VistaError::schema(format!(
                "invalid value for field '{name}' of type {}",
                self.type_string()
            )))
        }
    }
}

/// A named schema field as persisted in the dataset document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VistaField {
    pub name: String,
    #[serde(flatten)]
    pub descriptor: VistaFieldDescriptor,
}

impl VistaField {
    pub fn new(name: impl Into<String>, descriptor: VistaFieldDescriptor) -> Self {
        VistaField {
            name: name.into(),
            descriptor,
        }
    }
}

/// Infers a field descriptor from a runtime value.
///
/// This is the single explicit inference function used by both
/// ingestion-time schema expansion and merge-time validation. Null values
/// are uninferable and rejected; callers must skip null fields.
pub fn infer_descriptor(value: &Value) -> Result<VistaFieldDescriptor> {
    match value {
        Value::Null => Err(VistaError::schema(
            "cannot infer a field type from a null value",
        )),
        Value::Bool(_) => Ok(VistaFieldDescriptor::scalar(VistaFieldType::Boolean)),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                Ok(VistaFieldDescriptor::scalar(VistaFieldType::Integer))
            } else {
                Ok(VistaFieldDescriptor::scalar(VistaFieldType::Float))
            }
        }
        Value::String(_) => Ok(VistaFieldDescriptor::scalar(VistaFieldType::String)),
        Value::Array(items) => {
            let mut subfield = None;
            for item in items {
                if item.is_null() {
                    continue;
                }

                let elem = infer_descriptor(item)?;
                match subfield {
                    None => subfield = Some(elem.ftype),
                    Some(existing) if existing == elem.ftype => {}
                    // Heterogeneous elements; fall back to an untyped list
                    Some(_) => return Ok(VistaFieldDescriptor::list(None)),
                }
            }
            Ok(VistaFieldDescriptor::list(subfield))
        }
        Value::Object(map) => match map.get(CLS_KEY).and_then(Value::as_str) {
            Some(doc_type) => Ok(VistaFieldDescriptor::embedded(doc_type)),
            None => Ok(VistaFieldDescriptor::scalar(VistaFieldType::Dict)),
        },
    }
}
