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

//! # Vista Document Module
//!
//! Codec between in-memory records and their storage representation.
//!
//! The storage side keys identity as `_id`; the in-memory side exposes it as
//! the record's optional `id`. Decoding validates every non-null stored
//! value against the schema's descriptors, so a stale in-process schema
//! surfaces as a `Serde` error the dataset layer can recover from with a
//! single schema reload.

use serde_json::{Map, Value};

use crate::errors::{Result, VistaError};
use crate::sample::{VistaFrame, VistaSample};
use crate::schema::{VistaSchema, FRAME_NUMBER_FIELD, SAMPLE_ID_FIELD};

/// Encodes a sample for storage.
///
/// The caller is responsible for having expanded the schema first; encoding
/// itself never mutates schemas.
pub fn sample_to_document(sample: &VistaSample) -> Value {
    let mut doc = Map::new();
    if let Some(id) = &sample.id {
        doc.insert("_id".to_string(), Value::String(id.clone()));
    }
    for (name, value) in sample.iter_fields() {
        doc.insert(name.clone(), value.clone());
    }
    Value::Object(doc)
}

/// Encodes one frame for storage under its parent sample.
pub fn frame_to_document(frame: &VistaFrame, frame_number: u32, sample_id: &str) -> Value {
    let mut doc = Map::new();
    if let Some(id) = &frame.id {
        doc.insert("_id".to_string(), Value::String(id.clone()));
    }
    doc.insert(
        FRAME_NUMBER_FIELD.to_string(),
        Value::Number(frame_number.into()),
    );
    doc.insert(
        SAMPLE_ID_FIELD.to_string(),
        Value::String(sample_id.to_string()),
    );
    for (name, value) in frame.iter_fields() {
        if name == FRAME_NUMBER_FIELD || name == SAMPLE_ID_FIELD {
            continue;
        }
        doc.insert(name.clone(), value.clone());
    }
    Value::Object(doc)
}

fn validate_against_schema(schema: &VistaSchema, fields: &Map<String, Value>) -> Result<()> {
    for (name, value) in fields {
        if value.is_null() {
            continue;
        }
        match schema.get_field(name) {
            Some(field) => field
                .descriptor
                .validate_value(name, value)
                .map_err(|err| VistaError::serde(err.to_string()))?,
            None => {
                return Err(VistaError::serde(format!(
                    "document contains undeclared field '{name}'"
                )))
            }
        }
    }
    Ok(())
}

/// Decodes a stored sample document, validating against the sample schema.
pub fn document_to_sample(schema: &VistaSchema, doc: Value) -> Result<VistaSample> {
    let mut map = match doc {
        Value::Object(map) => map,
        _ => return Err(VistaError::serde("sample documents must be objects")),
    };

    let id = match map.remove("_id") {
        Some(Value::String(id)) => Some(id),
        Some(_) => return Err(VistaError::serde("sample '_id' must be a string")),
        None => None,
    };

    validate_against_schema(schema, &map)?;

    if !map.contains_key("filepath") {
        return Err(VistaError::serde("sample document is missing 'filepath'"));
    }

    let mut sample = VistaSample::new("");
    sample.id = id;
    sample.fields = map;
    Ok(sample)
}

/// Decodes a stored frame document into its frame number and record.
pub fn document_to_frame(schema: &VistaSchema, doc: Value) -> Result<(u32, VistaFrame)> {
    let mut map = match doc {
        Value::Object(map) => map,
        _ => return Err(VistaError::serde("frame documents must be objects")),
    };

    let id = match map.remove("_id") {
        Some(Value::String(id)) => Some(id),
        Some(_) => return Err(VistaError::serde("frame '_id' must be a string")),
        None => None,
    };

    let frame_number = map
        .get(FRAME_NUMBER_FIELD)
        .and_then(Value::as_u64)
        .ok_or_else(|| VistaError::serde("frame document is missing 'frame_number'"))?
        as u32;

    validate_against_schema(schema, &map)?;

    let mut frame = VistaFrame::new();
    frame.id = id;
    frame.fields = map;
    Ok((frame_number, frame))
}
