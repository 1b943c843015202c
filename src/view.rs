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

//! # Vista View Module
//!
//! This module implements lazily compiled, read-oriented transformation
//! chains over datasets. A [`VistaView`] owns no data: it is an immutable
//! stage list plus a dataset handle, recompiled from scratch into a typed
//! aggregation pipeline on every execution.
//!
//! ## Compilation Rules
//!
//! Frame attachment is centralized here so every consumer shares one
//! correct translation from a logical video-aware view to the two physical
//! collections:
//!
//! - Non-video datasets force all frame-attachment flags off
//! - `frames_only` forces attachment on
//! - Any frame-touching stage implies attachment; regardless of how many
//!   stages request it, exactly one frames join is emitted, prepended to
//!   the pipeline and sorted ascending by frame number
//! - `detach_frames` appends removal of the frames array
//! - `frames_only` appends project-frames / unwind / replace-root, turning
//!   the stream of samples into a flat stream of frames
//!
//! ## Iteration
//!
//! Long-running cursors may expire mid-stream. The sample iterator detects
//! `CursorExpired` and transparently resumes by re-issuing its pipeline
//! with an added skip of the consumed count; this is the library's only
//! built-in retry.

use std::sync::Arc;

use serde_json::Value;

use crate::dataset::VistaDataset;
use crate::document::document_to_frame;
use crate::errors::{Result, VistaError};
use crate::sample::{VistaMediaType, VistaSample, VistaSampleBinding};
use crate::schema::{FRAMES_FIELD, FRAME_NUMBER_FIELD};
use crate::stages::{
    VistaExcludeFieldsStage, VistaLimitStage, VistaMatchFramesStage, VistaMatchStage,
    VistaSelectFieldsStage, VistaSkipStage, VistaSortStage, VistaStage,
};
use crate::store::{
    VistaCursor, VistaPipelineStep, VistaProjection, VistaSortOrder, VistaStore,
};

/// An immutable, lazily compiled stage chain over a dataset.
#[derive(Clone)]
pub struct VistaView {
    dataset: VistaDataset,
    stages: Vec<Arc<dyn VistaStage>>,
}

impl VistaView {
    pub(crate) fn new(dataset: VistaDataset) -> Self {
        VistaView {
            dataset,
            stages: Vec::new(),
        }
    }

    /// The dataset this view reads from.
    pub fn dataset(&self) -> &VistaDataset {
        &self.dataset
    }

    /// Number of stages in the chain.
    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    pub(crate) fn stages(&self) -> &[Arc<dyn VistaStage>] {
        &self.stages
    }

    /// Returns a new view with one more stage appended.
    pub fn add_stage(&self, stage: Arc<dyn VistaStage>) -> VistaView {
        let mut stages = self.stages.clone();
        stages.push(stage);
        VistaView {
            dataset: self.dataset.clone(),
            stages,
        }
    }

    /// Appends a sample filter.
    pub fn match_samples(&self, filter: Value) -> VistaView {
        self.add_stage(Arc::new(VistaMatchStage { filter }))
    }

    /// Appends a field selection.
    pub fn select_fields(&self, fields: Vec<String>) -> VistaView {
        self.add_stage(Arc::new(VistaSelectFieldsStage { fields }))
    }

    /// Appends a field exclusion.
    pub fn exclude_fields(&self, fields: Vec<String>) -> VistaView {
        self.add_stage(Arc::new(VistaExcludeFieldsStage { fields }))
    }

    /// Appends a skip.
    pub fn skip(&self, skip: u64) -> VistaView {
        self.add_stage(Arc::new(VistaSkipStage { skip }))
    }

    /// Appends a limit.
    pub fn limit(&self, limit: u64) -> VistaView {
        self.add_stage(Arc::new(VistaLimitStage { limit }))
    }

    /// Appends a single-field sort.
    pub fn sort_by(&self, field: impl Into<String>, order: VistaSortOrder) -> VistaView {
        self.add_stage(Arc::new(VistaSortStage {
            field: field.into(),
            order,
        }))
    }

    /// Appends a frame filter; forces frame attachment at compile time.
    pub fn match_frames(&self, filter: Value) -> VistaView {
        self.add_stage(Arc::new(VistaMatchFramesStage { filter }))
    }

    /// Compiles the stage chain into a typed aggregation pipeline.
    pub fn compile(
        &self,
        attach_frames: bool,
        detach_frames: bool,
        frames_only: bool,
    ) -> Result<Vec<VistaPipelineStep>> {
        self.dataset.ensure_active()?;

        let media_type = self.dataset.media_type()?;
        let is_video = media_type == Some(VistaMediaType::Video);

        let (mut attach, detach, frames_only) = if is_video {
            (attach_frames, detach_frames, frames_only)
        } else {
            (false, false, false)
        };
        if frames_only || self.stages.iter().any(|stage| stage.needs_frames()) {
            attach = is_video;
        }

        let mut steps = Vec::new();
        if attach {
            steps.push(VistaPipelineStep::Lookup {
                from: self.dataset.frame_collection_name()?,
                local_field: "_id".to_string(),
                foreign_field: crate::schema::SAMPLE_ID_FIELD.to_string(),
                as_field: FRAMES_FIELD.to_string(),
                sort: Some((FRAME_NUMBER_FIELD.to_string(), VistaSortOrder::Ascending)),
            });
        }

        let render_media_type = media_type.unwrap_or(VistaMediaType::Image);
        for stage in &self.stages {
            steps.extend(stage.pipeline(render_media_type));
        }

        if frames_only {
            steps.push(VistaPipelineStep::Project(vec![
                VistaProjection::keep(FRAMES_FIELD),
            ]));
            steps.push(VistaPipelineStep::Unwind(FRAMES_FIELD.to_string()));
            steps.push(VistaPipelineStep::ReplaceRoot(FRAMES_FIELD.to_string()));
        } else if detach {
            steps.push(VistaPipelineStep::Unset(vec![FRAMES_FIELD.to_string()]));
        }

        Ok(steps)
    }

    /// Materializes the view's contents as a new dataset.
    ///
    /// Field-selecting and field-excluding stages are reflected in the
    /// cloned schema.
    pub fn clone_as(&self, name: &str) -> Result<VistaDataset> {
        self.dataset.clone_with_view(self, name)
    }

    /// Iterates the view's samples, with frames attached on video datasets.
    pub fn iter_samples(&self) -> Result<VistaSampleIter> {
        let pipeline = self.compile(true, false, false)?;
        let store = self.dataset.store();
        let cursor = store.aggregate(&self.dataset.sample_collection_name()?, &pipeline)?;

        Ok(VistaSampleIter {
            dataset: self.dataset.clone(),
            store,
            pipeline,
            cursor,
            consumed: 0,
        })
    }

    /// Returns the first sample of the view, if any.
    pub fn first(&self) -> Result<Option<VistaSample>> {
        self.limit(1).iter_samples()?.next().transpose()
    }

    /// Number of samples in the view.
    pub fn count(&self) -> Result<u64> {
        let pipeline = self.compile(false, true, false)?;
        let mut cursor = self
            .dataset
            .store()
            .aggregate(&self.dataset.sample_collection_name()?, &pipeline)?;

        let mut count = 0;
        while cursor.next_document()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Extracts one field's value from every sample, null where absent.
    pub fn values(&self, field: &str) -> Result<Vec<Value>> {
        let mut pipeline = self.compile(false, true, false)?;
        pipeline.push(VistaPipelineStep::Project(vec![VistaProjection::keep(
            field,
        )]));

        let mut cursor = self
            .dataset
            .store()
            .aggregate(&self.dataset.sample_collection_name()?, &pipeline)?;

        let mut values = Vec::new();
        while let Some(doc) = cursor.next_document()? {
            let value = crate::store::pipeline::get_path(&doc, field)
                .cloned()
                .unwrap_or(Value::Null);
            values.push(value);
        }
        Ok(values)
    }
}

/// Streaming sample iterator with transparent cursor-expiry recovery.
pub struct VistaSampleIter {
    dataset: VistaDataset,
    store: Arc<dyn VistaStore>,
    pipeline: Vec<VistaPipelineStep>,
    cursor: Box<dyn VistaCursor>,
    consumed: u64,
}

impl VistaSampleIter {
    fn next_doc(&mut self) -> Result<Option<Value>> {
        loop {
            match self.cursor.next_document() {
                Ok(doc) => return Ok(doc),
                Err(VistaError::CursorExpired) => {
                    log::debug!(
                        "cursor expired after {} samples; resuming",
                        self.consumed
                    );
                    let mut resumed = self.pipeline.clone();
                    resumed.push(VistaPipelineStep::Skip(self.consumed));
                    self.cursor = self
                        .store
                        .aggregate(&self.dataset.sample_collection_name()?, &resumed)?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn decode(&self, mut doc: Value) -> Result<VistaSample> {
        let frame_docs = doc
            .as_object_mut()
            .and_then(|map| map.remove(FRAMES_FIELD))
            .and_then(|frames| match frames {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .unwrap_or_default();

        let mut sample = match self.dataset.decode_sample(doc.clone()) {
            Ok(sample) => sample,
            Err(VistaError::Serde { .. }) => {
                // Another process may have grown the schema; reload once
                self.dataset.reload()?;
                self.dataset.decode_sample(doc)?
            }
            Err(err) => return Err(err),
        };

        let frame_schema = self.dataset.frame_schema()?;
        for frame_doc in frame_docs {
            let (frame_number, frame) = document_to_frame(&frame_schema, frame_doc)?;
            sample.frames.set(frame_number, frame);
        }

        sample.bind(VistaSampleBinding {
            dataset_name: self.dataset.name(),
            collection_name: self.dataset.sample_collection_name()?,
            schema_epoch: self.dataset.schema_epoch()?,
        });
        Ok(sample)
    }
}

impl Iterator for VistaSampleIter {
    type Item = Result<VistaSample>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_doc() {
            Ok(Some(doc)) => {
                self.consumed += 1;
                Some(self.decode(doc))
            }
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}
