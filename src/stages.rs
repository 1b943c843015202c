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

//! # Vista Stage Module
//!
//! Composable view stages. Each stage renders itself into zero or more
//! typed pipeline steps and declares whether it depends on the frames array
//! being attached; the view compiler owns attachment itself, so a stage's
//! pipeline never emits the lookup.

use serde_json::{Map, Value};

use crate::sample::VistaMediaType;
use crate::schema::{FILEPATH_FIELD, FRAMES_FIELD};
use crate::store::{VistaPipelineStep, VistaProjection, VistaSortOrder};

/// One composable transformation step within a view.
pub trait VistaStage: Send + Sync {
    /// Stage name used in summaries and errors.
    fn name(&self) -> &'static str;

    /// Renders this stage into pipeline steps.
    fn pipeline(&self, media_type: VistaMediaType) -> Vec<VistaPipelineStep>;

    /// Whether this stage reads per-frame data and therefore requires the
    /// frames array to be attached.
    fn needs_frames(&self) -> bool {
        false
    }

    /// Field allow-list this stage applies, if it is field-selecting.
    ///
    /// Used when cloning through a view so the cloned schema matches the
    /// fields that actually survive the pipeline.
    fn selected_fields(&self) -> Option<&[String]> {
        None
    }

    /// Field deny-list this stage applies, if it is field-excluding.
    fn excluded_fields(&self) -> Option<&[String]> {
        None
    }
}

/// Filters samples by a Mongo-flavored filter document.
pub struct VistaMatchStage {
    pub filter: Value,
}

impl VistaStage for VistaMatchStage {
    fn name(&self) -> &'static str {
        "match"
    }

    fn pipeline(&self, _media_type: VistaMediaType) -> Vec<VistaPipelineStep> {
        vec![VistaPipelineStep::Match(self.filter.clone())]
    }
}

/// Restricts samples to a field selection.
///
/// Identity-critical fields always survive the selection: `_id` and
/// `filepath`, plus the attached frames array on video datasets.
pub struct VistaSelectFieldsStage {
    pub fields: Vec<String>,
}

impl VistaStage for VistaSelectFieldsStage {
    fn name(&self) -> &'static str {
        "select_fields"
    }

    fn pipeline(&self, media_type: VistaMediaType) -> Vec<VistaPipelineStep> {
        let mut projections = vec![VistaProjection::keep(FILEPATH_FIELD)];
        if media_type == VistaMediaType::Video {
            projections.push(VistaProjection::keep(FRAMES_FIELD));
        }
        for field in &self.fields {
            if projections.iter().any(|p| &p.field == field) {
                continue;
            }
            projections.push(VistaProjection::keep(field.clone()));
        }
        vec![VistaPipelineStep::Project(projections)]
    }

    fn selected_fields(&self) -> Option<&[String]> {
        Some(&self.fields)
    }
}

/// Removes a set of fields from every sample.
pub struct VistaExcludeFieldsStage {
    pub fields: Vec<String>,
}

impl VistaStage for VistaExcludeFieldsStage {
    fn name(&self) -> &'static str {
        "exclude_fields"
    }

    fn pipeline(&self, _media_type: VistaMediaType) -> Vec<VistaPipelineStep> {
        vec![VistaPipelineStep::Unset(self.fields.clone())]
    }

    fn excluded_fields(&self) -> Option<&[String]> {
        Some(&self.fields)
    }
}

/// Skips the first `n` samples.
pub struct VistaSkipStage {
    pub skip: u64,
}

impl VistaStage for VistaSkipStage {
    fn name(&self) -> &'static str {
        "skip"
    }

    fn pipeline(&self, _media_type: VistaMediaType) -> Vec<VistaPipelineStep> {
        vec![VistaPipelineStep::Skip(self.skip)]
    }
}

/// Passes through at most `n` samples.
pub struct VistaLimitStage {
    pub limit: u64,
}

impl VistaStage for VistaLimitStage {
    fn name(&self) -> &'static str {
        "limit"
    }

    fn pipeline(&self, _media_type: VistaMediaType) -> Vec<VistaPipelineStep> {
        vec![VistaPipelineStep::Limit(self.limit)]
    }
}

/// Sorts samples by one field.
pub struct VistaSortStage {
    pub field: String,
    pub order: VistaSortOrder,
}

impl VistaStage for VistaSortStage {
    fn name(&self) -> &'static str {
        "sort"
    }

    fn pipeline(&self, _media_type: VistaMediaType) -> Vec<VistaPipelineStep> {
        vec![VistaPipelineStep::Sort(vec![(
            self.field.clone(),
            self.order,
        )])]
    }
}

/// Keeps samples having at least one frame matching a filter over frame
/// fields. Frame-touching: forces frame attachment.
pub struct VistaMatchFramesStage {
    pub filter: Value,
}

impl VistaStage for VistaMatchFramesStage {
    fn name(&self) -> &'static str {
        "match_frames"
    }

    fn pipeline(&self, _media_type: VistaMediaType) -> Vec<VistaPipelineStep> {
        vec![VistaPipelineStep::Match(prefix_frame_filter(&self.filter))]
    }

    fn needs_frames(&self) -> bool {
        true
    }
}

/// Rewrites a frame-field filter to address the attached frames array.
///
/// Logical operators recurse; every other top-level key is a frame field
/// path and gets the `frames.` prefix, relying on the store's dotted-path
/// array broadcast for per-element matching.
fn prefix_frame_filter(filter: &Value) -> Value {
    let Some(clauses) = filter.as_object() else {
        return filter.clone();
    };

    let mut prefixed = Map::new();
    for (key, condition) in clauses {
        match key.as_str() {
            "$and" | "$or" => {
                let subs = condition
                    .as_array()
                    .map(|subs| subs.iter().map(prefix_frame_filter).collect())
                    .unwrap_or_default();
                prefixed.insert(key.clone(), Value::Array(subs));
            }
            path => {
                prefixed.insert(format!("{FRAMES_FIELD}.{path}"), condition.clone());
            }
        }
    }
    Value::Object(prefixed)
}
