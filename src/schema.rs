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

//! # Vista Schema Module
//!
//! This module implements the per-collection schema registry: an ordered
//! field-name to descriptor mapping with declare, infer, rename, clone, and
//! delete operations.
//!
//! Two registries exist per dataset, one for the sample collection and one
//! for the frame collection. Fields whose names start with `_` are private
//! and excluded from default listings. Schema growth is type-widening-free:
//! once a field is declared its descriptor is fixed, and conflicting
//! declarations fail rather than re-typing the field.

use serde_json::Value;

use crate::errors::{Result, VistaError, VistaErrorLevel};
use crate::fields::{infer_descriptor, VistaField, VistaFieldDescriptor, VistaFieldType};

/// Prefix marking fields excluded from default schema listings.
pub const PRIVATE_PREFIX: &str = "_";

/// Required sample path field; always retained when inserting new samples.
pub const FILEPATH_FIELD: &str = "filepath";

/// Frame ordering field; part of the frame uniqueness invariant.
pub const FRAME_NUMBER_FIELD: &str = "frame_number";

/// Frame back-reference to its owning sample.
pub const SAMPLE_ID_FIELD: &str = "_sample_id";

/// Name of the attached frames array materialized by view compilation.
pub const FRAMES_FIELD: &str = "frames";

/// Which collection a schema describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VistaSchemaRole {
    Sample,
    Frame,
}

/// Ordered field-name to descriptor registry for one collection role.
#[derive(Clone, Debug)]
pub struct VistaSchema {
    role: VistaSchemaRole,
    fields: Vec<VistaField>,
}

impl VistaSchema {
    /// Creates a schema from persisted fields.
    pub fn from_fields(role: VistaSchemaRole, fields: Vec<VistaField>) -> Self {
        VistaSchema { role, fields }
    }

    /// Creates the default sample schema.
    pub fn default_sample() -> Self {
        let fields = vec![
            VistaField::new(
                FILEPATH_FIELD,
                VistaFieldDescriptor::scalar(VistaFieldType::String),
            ),
            VistaField::new(
                "tags",
                VistaFieldDescriptor::list(Some(VistaFieldType::String)),
            ),
            VistaField::new(
                "metadata",
                VistaFieldDescriptor::scalar(VistaFieldType::Dict),
            ),
            VistaField::new(
                "_media_type",
                VistaFieldDescriptor::scalar(VistaFieldType::String),
            ),
            VistaField::new("_rand", VistaFieldDescriptor::scalar(VistaFieldType::Float)),
        ];
        VistaSchema::from_fields(VistaSchemaRole::Sample, fields)
    }

    /// Creates the default frame schema.
    pub fn default_frame() -> Self {
        let fields = vec![
            VistaField::new(
                FRAME_NUMBER_FIELD,
                VistaFieldDescriptor::scalar(VistaFieldType::Integer),
            ),
            VistaField::new(
                SAMPLE_ID_FIELD,
                VistaFieldDescriptor::scalar(VistaFieldType::ObjectId),
            ),
        ];
        VistaSchema::from_fields(VistaSchemaRole::Frame, fields)
    }

    pub fn role(&self) -> VistaSchemaRole {
        self.role
    }

    /// All fields in declaration order, including private ones.
    pub fn fields(&self) -> &[VistaField] {
        &self.fields
    }

    /// Whether the given field name is private.
    pub fn is_private(name: &str) -> bool {
        name.starts_with(PRIVATE_PREFIX)
    }

    /// Field names that may never be deleted or renamed away.
    pub fn protected_fields(&self) -> &'static [&'static str] {
        match self.role {
            VistaSchemaRole::Sample => &["id", FILEPATH_FIELD, "_media_type", "_rand"],
            VistaSchemaRole::Frame => &["id", FRAME_NUMBER_FIELD, SAMPLE_ID_FIELD],
        }
    }

    /// Looks up a field by name.
    pub fn get_field(&self, name: &str) -> Option<&VistaField> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Whether the schema declares the given field.
    pub fn has_field(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }

    /// Ordered listing of fields, optionally filtered by type.
    pub fn get_schema(
        &self,
        filter_by_type: Option<VistaFieldType>,
        include_private: bool,
    ) -> Vec<&VistaField> {
        self.fields
            .iter()
            .filter(|field| include_private || !Self::is_private(&field.name))
            .filter(|field| match filter_by_type {
                Some(ftype) => field.descriptor.ftype == ftype,
                None => true,
            })
            .collect()
    }

    /// Ordered field names, optionally including private fields.
    pub fn field_names(&self, include_private: bool) -> Vec<String> {
        self.get_schema(None, include_private)
            .into_iter()
            .map(|field| field.name.clone())
            .collect()
    }

    /// Fails with a schema error if a proposed descriptor conflicts with an
    /// existing declaration.
    pub fn validate_compatible(
        name: &str,
        proposed: &VistaFieldDescriptor,
        existing: &VistaFieldDescriptor,
    ) -> Result<()> {
        if existing.matches(proposed) {
            return Ok(());
        }

        Err(VistaError::schema(format!(
            "existing field {name}={} does not match new field type {}",
            existing.type_string(),
            proposed.type_string()
        )))
    }

    /// Declares a field with an explicit descriptor.
    ///
    /// Re-declaring with an identical descriptor is a no-op; a conflicting
    /// descriptor fails. Returns whether the schema changed.
    pub fn declare_field(
        &mut self,
        name: &str,
        descriptor: VistaFieldDescriptor,
    ) -> Result<bool> {
        if name.contains('.') {
            return Err(VistaError::validation(format!(
                "cannot declare embedded field path '{name}' directly"
            )));
        }

        if let Some(existing) = self.get_field(name) {
            Self::validate_compatible(name, &descriptor, &existing.descriptor)?;
            return Ok(false);
        }

        self.fields.push(VistaField::new(name, descriptor));
        Ok(true)
    }

    /// Infers a descriptor from a runtime value and declares the field.
    pub fn infer_and_declare(&mut self, name: &str, value: &Value) -> Result<bool> {
        let descriptor = infer_descriptor(value)?;
        self.declare_field(name, descriptor)
    }

    /// Declares every undeclared non-null field of a document.
    ///
    /// Returns whether the schema changed. Null-valued fields are skipped
    /// since their type cannot be inferred.
    pub fn expand<'a>(
        &mut self,
        fields: impl IntoIterator<Item = (&'a String, &'a Value)>,
    ) -> Result<bool> {
        let mut expanded = false;
        for (name, value) in fields {
            if name == "id" || name == "_id" || value.is_null() {
                continue;
            }

            if self.has_field(name) {
                // Fixed declarations: a mismatched shape is a validation
                // failure downstream, never a silent re-typing here
                continue;
            }

            expanded |= self.infer_and_declare(name, value)?;
        }
        Ok(expanded)
    }

    /// Renames top-level fields in place, preserving declaration order.
    pub fn rename_fields(&mut self, mapping: &[(String, String)]) -> Result<()> {
        for (old_name, new_name) in mapping {
            if self.protected_fields().contains(&old_name.as_str()) {
                return Err(VistaError::validation(format!(
                    "cannot rename protected field '{old_name}'"
                )));
            }

            if old_name != new_name && self.has_field(new_name) {
                return Err(VistaError::validation(format!(
                    "cannot rename '{old_name}' to existing field '{new_name}'"
                )));
            }

            let field = self
                .fields
                .iter_mut()
                .find(|field| &field.name == old_name)
                .ok_or_else(|| VistaError::field_not_found(old_name.clone()))?;

            field.name = new_name.clone();
        }
        Ok(())
    }

    /// Clones top-level fields into new declarations with the same types.
    pub fn clone_fields(&mut self, mapping: &[(String, String)]) -> Result<()> {
        for (name, new_name) in mapping {
            let descriptor = self
                .get_field(name)
                .map(|field| field.descriptor.clone())
                .ok_or_else(|| VistaError::field_not_found(name.clone()))?;

            self.declare_field(new_name, descriptor)?;
        }
        Ok(())
    }

    /// Deletes top-level fields, applying `level` per field that cannot be
    /// deleted. Returns the names actually removed.
    pub fn delete_fields(
        &mut self,
        names: &[String],
        level: VistaErrorLevel,
    ) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for name in names {
            let failure = if self.protected_fields().contains(&name.as_str()) {
                Some(VistaError::validation(format!(
                    "cannot delete protected field '{name}'"
                )))
            } else if !self.has_field(name) {
                Some(VistaError::field_not_found(name.clone()))
            } else {
                None
            };

            if let Some(err) = failure {
                match level {
                    VistaErrorLevel::Raise => return Err(err),
                    VistaErrorLevel::Warn => {
                        log::warn!("skipping field deletion: {err}");
                        continue;
                    }
                    VistaErrorLevel::Ignore => continue,
                }
            }

            self.fields.retain(|field| &field.name != name);
            deleted.push(name.clone());
        }

        Ok(deleted)
    }

    /// Merges another schema's fields into this one.
    ///
    /// When `expand` is false, undeclared incoming fields fail instead of
    /// being added; declared fields are always checked for compatibility.
    pub fn merge_schema(&mut self, other: &[VistaField], expand: bool) -> Result<bool> {
        let mut changed = false;
        for field in other {
            if let Some(existing) = self.get_field(&field.name) {
                Self::validate_compatible(&field.name, &field.descriptor, &existing.descriptor)?;
            } else if expand {
                changed |= self.declare_field(&field.name, field.descriptor.clone())?;
            } else {
                return Err(VistaError::schema(format!(
                    "field '{}' does not exist and schema expansion is disabled",
                    field.name
                )));
            }
        }
        Ok(changed)
    }
}
