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

//! # Vista Sample Module
//!
//! This module provides the core data structures for individual dataset
//! records. A [`VistaSample`] is the fundamental unit of a dataset, one per
//! raw media item; video samples additionally own an ordered collection of
//! [`VistaFrame`] sub-records keyed by frame number.
//!
//! ## Design Principles
//!
//! - **Flexibility**: Field values use JSON (`serde_json::Value`), so one
//!   generic sample type serves every dataset schema; there is no generated
//!   per-collection record type
//! - **Explicit binding**: A sample is either detached or bound to exactly
//!   one dataset. Bound samples record the schema epoch they observed so
//!   the owning dataset can refresh them instead of leaving them stale
//! - **Identity on persistence**: `id` is `None` until the sample is first
//!   written to a dataset

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Media kind of a sample, fixed per dataset on first insert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VistaMediaType {
    Image,
    Video,
}

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "mkv", "webm", "wmv", "mpg", "mpeg", "m4v",
];

impl VistaMediaType {
    /// Derives the media type from a filepath extension.
    ///
    /// Anything that is not a recognized video container is treated as an
    /// image, matching how raw media items enter datasets.
    pub fn from_filepath(filepath: &str) -> VistaMediaType {
        let ext = filepath
            .rsplit('.')
            .next()
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();

        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            VistaMediaType::Video
        } else {
            VistaMediaType::Image
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VistaMediaType::Image => "image",
            VistaMediaType::Video => "video",
        }
    }

    pub fn parse(value: &str) -> Option<VistaMediaType> {
        match value {
            "image" => Some(VistaMediaType::Image),
            "video" => Some(VistaMediaType::Video),
            _ => None,
        }
    }
}

/// Binding of an in-memory record to its dataset.
///
/// `schema_epoch` is the dataset schema revision the record last observed;
/// the dataset bumps its epoch on every schema mutation so bound records
/// can be refreshed rather than silently kept stale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VistaSampleBinding {
    pub dataset_name: String,
    pub collection_name: String,
    pub schema_epoch: u64,
}

/// Top-level record of a dataset, one per raw media item.
#[derive(Clone, Debug)]
pub struct VistaSample {
    /// Stable identifier, assigned on first persistence.
    pub id: Option<String>,

    /// Ordered field values keyed by field name.
    pub fields: Map<String, Value>,

    /// Per-frame sub-records; populated only for video samples.
    pub frames: VistaFrames,

    binding: Option<VistaSampleBinding>,
}

impl VistaSample {
    /// Constructs a detached sample for the given media path.
    pub fn new(filepath: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("filepath".to_string(), Value::String(filepath.into()));
        fields.insert("tags".to_string(), Value::Array(Vec::new()));

        VistaSample {
            id: None,
            fields,
            frames: VistaFrames::new(),
            binding: None,
        }
    }

    /// The sample's media path.
    pub fn filepath(&self) -> &str {
        self.fields
            .get("filepath")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Media kind derived from the sample's filepath.
    pub fn media_type(&self) -> VistaMediaType {
        VistaMediaType::from_filepath(self.filepath())
    }

    /// Returns a field value, treating absence and null as equivalent.
    pub fn get_field(&self, name: &str) -> Option<&Value> {
        match self.fields.get(name) {
            Some(Value::Null) | None => None,
            Some(value) => Some(value),
        }
    }

    /// Sets a field value.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Removes a field value.
    pub fn clear_field(&mut self, name: &str) {
        self.fields.remove(name);
    }

    /// Iterates over all field name/value pairs, including private fields.
    pub fn iter_fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Whether this sample is bound to a dataset.
    pub fn in_dataset(&self) -> bool {
        self.binding.is_some()
    }

    pub fn binding(&self) -> Option<&VistaSampleBinding> {
        self.binding.as_ref()
    }

    /// Binds this sample to a dataset collection at a schema epoch.
    pub fn bind(&mut self, binding: VistaSampleBinding) {
        self.binding = Some(binding);
    }

    /// Detaches this sample from its dataset.
    ///
    /// Called when the owning dataset is deleted; the sample keeps its
    /// field values but loses its membership and its id.
    pub fn detach(&mut self) {
        self.binding = None;
        self.id = None;
        for frame in self.frames.iter_mut() {
            frame.id = None;
        }
    }

    /// Returns a detached copy restricted to a field selection.
    ///
    /// `fields` is an allow-list with optional renames; `omit_fields` is a
    /// deny-list. `filepath` survives filtering only if the caller keeps it.
    pub fn copy_with_fields(
        &self,
        fields: Option<&[(String, String)]>,
        omit_fields: Option<&[String]>,
    ) -> VistaSample {
        let mut copied = Map::new();
        match fields {
            Some(selection) => {
                for (src, dst) in selection {
                    if let Some(value) = self.fields.get(src) {
                        copied.insert(dst.clone(), value.clone());
                    }
                }
            }
            None => {
                copied = self.fields.clone();
            }
        }

        if let Some(omit) = omit_fields {
            for name in omit {
                copied.remove(name);
            }
        }

        VistaSample {
            id: None,
            fields: copied,
            frames: self.frames.clone(),
            binding: None,
        }
    }
}

/// Per-timestamp sub-record of a video sample.
#[derive(Clone, Debug, Default)]
pub struct VistaFrame {
    /// Stable identifier, assigned on first persistence.
    pub id: Option<String>,

    /// Ordered field values keyed by field name.
    pub fields: Map<String, Value>,
}

impl VistaFrame {
    pub fn new() -> Self {
        VistaFrame::default()
    }

    pub fn get_field(&self, name: &str) -> Option<&Value> {
        match self.fields.get(name) {
            Some(Value::Null) | None => None,
            Some(value) => Some(value),
        }
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    pub fn iter_fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}

/// Ordered frame collection keyed by frame number.
#[derive(Clone, Debug, Default)]
pub struct VistaFrames {
    frames: BTreeMap<u32, VistaFrame>,
}

impl VistaFrames {
    pub fn new() -> Self {
        VistaFrames::default()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, frame_number: u32) -> Option<&VistaFrame> {
        self.frames.get(&frame_number)
    }

    /// Inserts or replaces the frame at the given frame number.
    pub fn set(&mut self, frame_number: u32, frame: VistaFrame) {
        self.frames.insert(frame_number, frame);
    }

    /// Returns the frame at the given number, creating it if necessary.
    pub fn entry(&mut self, frame_number: u32) -> &mut VistaFrame {
        self.frames.entry(frame_number).or_default()
    }

    /// Iterates frames in ascending frame-number order.
    pub fn iter(&self) -> impl Iterator<Item = (&u32, &VistaFrame)> {
        self.frames.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut VistaFrame> {
        self.frames.values_mut()
    }
}
