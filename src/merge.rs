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

//! # Vista Merge Module
//!
//! This module implements the merge engine: reconciling one collection of
//! samples (and their frames) into another under configurable key-matching,
//! conflict, and list-merge semantics.
//!
//! ## Strategies
//!
//! Three strategies, selected by the shape of the input:
//!
//! 1. **Pipeline merge** — dataset source, field key: compiles entirely to
//!    store-side pipeline execution; no samples are pulled into memory
//! 2. **Keyed in-memory merge** — caller-supplied key function: indexes the
//!    destination by key in one pass, streams the source, and flushes
//!    writes in adaptively sized batches
//! 3. **Staging merge** — raw samples with a field key: stages the samples
//!    into a temporary dataset, re-dispatches to strategy 1, then discards
//!    the staging dataset
//!
//! ## Frame Two-Phase Protocol
//!
//! A frame's back-reference must end up pointing at the *post-merge* sample
//! id, which is unknown until the sample merge completes. Sample keys, not
//! ids, are the only merge-stable identifier, so frames are stamped with
//! their parent's key into a temporary `_merge_key` field on both sides,
//! merged keyed on `(_merge_key, frame_number)`, and re-linked from a
//! key→id map rebuilt off the destination afterwards. The window between
//! the frame merge and the re-link is best-effort: concurrent external
//! writes during it are not defended against.

use std::collections::HashMap;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::dataset::VistaDataset;
use crate::errors::{Result, VistaError};
use crate::sample::{VistaMediaType, VistaSample};
use crate::schema::{VistaSchema, FILEPATH_FIELD, FRAME_NUMBER_FIELD, SAMPLE_ID_FIELD};
use crate::store::{
    pipeline::{get_path, merge_documents},
    VistaDocumentMerge, VistaPipelineStep, VistaProjection, VistaUpdate, VistaWhenMatched,
    VistaWhenNotMatched,
};
use crate::fields::VistaFieldType;
use crate::indexes::{ensure_compound_unique_index, ensure_unique_index, restore_index};

/// Temporary frame field carrying the parent's merge key.
const MERGE_KEY_FIELD: &str = "_merge_key";

/// Configuration of a merge operation.
#[derive(Clone, Debug)]
pub struct VistaMergeOptions {
    /// Sample field used to decide whether two samples are the same.
    pub key_field: String,
    /// Leave matched destination samples untouched.
    pub skip_existing: bool,
    /// Insert source samples with no destination match.
    pub insert_new: bool,
    /// Allow-list of fields to merge, with optional renames (src, dst).
    /// Entries prefixed `frames.` select frame fields.
    pub fields: Option<Vec<(String, String)>>,
    /// Deny-list of fields excluded from the merge.
    pub omit_fields: Option<Vec<String>>,
    /// Merge list fields by union instead of wholesale replacement.
    pub merge_lists: bool,
    /// Incoming non-null values replace existing ones.
    pub overwrite: bool,
    /// Declare source fields unknown to the destination schema.
    pub expand_schema: bool,
    /// Merge dataset-level info/classes/mask targets.
    pub include_info: bool,
    /// Replace rather than fill destination info keys.
    pub overwrite_info: bool,
}

impl Default for VistaMergeOptions {
    fn default() -> Self {
        VistaMergeOptions {
            key_field: FILEPATH_FIELD.to_string(),
            skip_existing: false,
            insert_new: true,
            fields: None,
            omit_fields: None,
            merge_lists: true,
            overwrite: true,
            expand_schema: true,
            include_info: true,
            overwrite_info: false,
        }
    }
}

impl VistaMergeOptions {
    /// Splits the field selection into sample-level and frame-level parts.
    fn split_frame_fields(&self) -> (Option<Vec<(String, String)>>, Option<Vec<(String, String)>>) {
        let Some(fields) = &self.fields else {
            return (None, None);
        };

        let mut sample_fields = Vec::new();
        let mut frame_fields = Vec::new();
        for (src, dst) in fields {
            match (src.strip_prefix("frames."), dst.strip_prefix("frames.")) {
                (Some(src), Some(dst)) => frame_fields.push((src.to_string(), dst.to_string())),
                _ => sample_fields.push((src.clone(), dst.clone())),
            }
        }

        let frame_fields = (!frame_fields.is_empty()).then_some(frame_fields);
        (Some(sample_fields), frame_fields)
    }

    fn split_frame_omit(&self) -> (Vec<String>, Vec<String>) {
        let mut sample_omit = Vec::new();
        let mut frame_omit = Vec::new();
        for name in self.omit_fields.iter().flatten() {
            match name.strip_prefix("frames.") {
                Some(frame_name) => frame_omit.push(frame_name.to_string()),
                None => sample_omit.push(name.clone()),
            }
        }
        (sample_omit, frame_omit)
    }
}

/// Builds the per-document merge spec from the destination schema.
fn build_document_merge(
    schema: &VistaSchema,
    options: &VistaMergeOptions,
    delete_fields: Vec<String>,
) -> VistaDocumentMerge {
    let mut list_fields = Vec::new();
    let mut label_list_fields = Vec::new();
    if options.merge_lists {
        for field in schema.fields() {
            if let Some(elements) = field.descriptor.label_list_field() {
                label_list_fields.push(format!("{}.{elements}", field.name));
            } else if field.descriptor.ftype == VistaFieldType::List {
                list_fields.push(field.name.clone());
            }
        }
    }

    VistaDocumentMerge {
        overwrite: options.overwrite,
        delete_fields,
        list_fields,
        label_list_fields,
    }
}

/// Default sample fields stripped from the incoming side when the caller's
/// selection excludes them.
fn default_delete_fields(
    schema: &VistaSchema,
    selection: Option<&[(String, String)]>,
) -> Vec<String> {
    let Some(selection) = selection else {
        return Vec::new();
    };

    VistaSchema::default_sample()
        .fields()
        .iter()
        .map(|field| field.name.clone())
        .filter(|name| !selection.iter().any(|(_, dst)| dst == name))
        .filter(|name| schema.has_field(name))
        .collect()
}

impl VistaDataset {
    /// Merges another dataset into this one (strategy 1).
    pub fn merge_dataset(&self, source: &VistaDataset, options: &VistaMergeOptions) -> Result<()> {
        self.ensure_active()?;
        source.ensure_active()?;

        self.merge_dataset_doc(source, options)?;

        let dst_doc = self.doc_snapshot()?;
        let src_doc = source.doc_snapshot()?;
        let store = self.store();
        let key = options.key_field.as_str();

        let dst_samples = dst_doc.sample_collection_name.clone();
        let src_samples = src_doc.sample_collection_name.clone();
        let is_video = dst_doc.media_type.as_deref() == Some("video");

        let (sample_selection, frame_selection) = options.split_frame_fields();
        let (sample_omit, frame_omit) = options.split_frame_omit();

        // Key uniqueness on both sides; torn down afterwards if transient
        let dst_change = ensure_unique_index(&*store, &dst_samples, key)?;
        let src_change = ensure_unique_index(&*store, &src_samples, key)?;

        let merge_outcome = (|| {
            if is_video {
                self.merge_frames_pipeline(
                    source,
                    options,
                    frame_selection.as_deref(),
                    &frame_omit,
                )?;
            }

            let dst_schema = self.sample_schema()?;
            let mut pipeline = vec![VistaPipelineStep::Unset(vec!["_id".to_string()])];

            if let Some(selection) = &sample_selection {
                let mut projections = vec![VistaProjection::keep(key)];
                if options.insert_new
                    && key != FILEPATH_FIELD
                    && !selection.iter().any(|(_, dst)| dst == FILEPATH_FIELD)
                {
                    // Path is structurally required for inserted samples
                    projections.push(VistaProjection::keep(FILEPATH_FIELD));
                }
                for (src, dst) in selection {
                    if projections.iter().any(|p| &p.field == dst) {
                        continue;
                    }
                    projections.push(VistaProjection::renamed(dst.clone(), src.clone()));
                }
                pipeline.push(VistaPipelineStep::Project(projections));
            } else if !sample_omit.is_empty() {
                pipeline.push(VistaPipelineStep::Unset(sample_omit.clone()));
            }

            let when_matched = if options.skip_existing {
                VistaWhenMatched::KeepExisting
            } else {
                let delete_fields =
                    default_delete_fields(&dst_schema, sample_selection.as_deref());
                VistaWhenMatched::Merge(build_document_merge(&dst_schema, options, delete_fields))
            };
            let when_not_matched = if options.insert_new {
                VistaWhenNotMatched::Insert
            } else {
                VistaWhenNotMatched::Discard
            };

            pipeline.push(VistaPipelineStep::Merge {
                into: dst_samples.clone(),
                on: vec![key.to_string()],
                when_matched,
                when_not_matched,
            });
            store.aggregate(&src_samples, &pipeline)?;

            if is_video {
                self.finalize_frames(source, key)?;
            }
            Ok(())
        })();

        if is_video && merge_outcome.is_err() {
            // Never mask the merge error with a cleanup failure
            if let Err(err) = self.strip_frame_stamps(source) {
                log::warn!("failed to strip merge stamps after aborted merge: {err}");
            }
        }

        restore_index(&*store, &dst_samples, key, dst_change)?;
        restore_index(&*store, &src_samples, key, src_change)?;
        merge_outcome
    }

    /// Phase A of the frame protocol: stamp merge keys on both sides and
    /// run the frame collection merge keyed on `(_merge_key, frame_number)`.
    fn merge_frames_pipeline(
        &self,
        source: &VistaDataset,
        options: &VistaMergeOptions,
        frame_selection: Option<&[(String, String)]>,
        frame_omit: &[String],
    ) -> Result<()> {
        let store = self.store();
        let key = options.key_field.as_str();

        let dst_doc = self.doc_snapshot()?;
        let src_doc = source.doc_snapshot()?;
        let dst_frames = dst_doc.frame_collection_name();
        let src_frames = src_doc.frame_collection_name();

        stamp_merge_keys(&*store, &dst_doc.sample_collection_name, &dst_frames, key)?;
        stamp_merge_keys(&*store, &src_doc.sample_collection_name, &src_frames, key)?;

        ensure_compound_unique_index(&*store, &dst_frames, &[MERGE_KEY_FIELD, FRAME_NUMBER_FIELD])?;
        ensure_compound_unique_index(&*store, &src_frames, &[MERGE_KEY_FIELD, FRAME_NUMBER_FIELD])?;

        // Source frame ids never survive; source back-references do, keeping
        // the unique (_sample_id, frame_number) slot collision-free until
        // phase B rewrites them from the key→id map
        let mut pipeline = vec![VistaPipelineStep::Unset(vec!["_id".to_string()])];

        if let Some(selection) = frame_selection {
            let mut projections = vec![
                VistaProjection::keep(MERGE_KEY_FIELD),
                VistaProjection::keep(FRAME_NUMBER_FIELD),
                VistaProjection::keep(SAMPLE_ID_FIELD),
            ];
            for (src, dst) in selection {
                if projections.iter().any(|p| &p.field == dst) {
                    continue;
                }
                projections.push(VistaProjection::renamed(dst.clone(), src.clone()));
            }
            pipeline.push(VistaPipelineStep::Project(projections));
        } else if !frame_omit.is_empty() {
            pipeline.push(VistaPipelineStep::Unset(frame_omit.to_vec()));
        }

        let when_matched = if options.skip_existing {
            VistaWhenMatched::KeepExisting
        } else {
            let frame_schema = self.frame_schema()?;
            VistaWhenMatched::Merge(build_document_merge(&frame_schema, options, Vec::new()))
        };
        let when_not_matched = if options.insert_new {
            VistaWhenNotMatched::Insert
        } else {
            VistaWhenNotMatched::Discard
        };

        pipeline.push(VistaPipelineStep::Merge {
            into: dst_frames,
            on: vec![MERGE_KEY_FIELD.to_string(), FRAME_NUMBER_FIELD.to_string()],
            when_matched,
            when_not_matched,
        });
        store.aggregate(&src_frames, &pipeline)?;
        Ok(())
    }

    /// Phase B of the frame protocol: rebuild the key→id map from the
    /// merged destination samples, rewrite every frame's back-reference,
    /// and strip the temporary merge key from both sides.
    fn finalize_frames(&self, source: &VistaDataset, key: &str) -> Result<()> {
        let store = self.store();
        let dst_doc = self.doc_snapshot()?;
        let dst_samples = dst_doc.sample_collection_name.clone();
        let dst_frames = dst_doc.frame_collection_name();

        let mut key_to_id: HashMap<String, String> = HashMap::new();
        for doc in store.find(&dst_samples, &json!({}))? {
            let (Some(key_value), Some(id)) = (
                get_path(&doc, key),
                doc.get("_id").and_then(Value::as_str),
            ) else {
                continue;
            };
            key_to_id.insert(serde_json::to_string(key_value)?, id.to_string());
        }

        for key_value in store.distinct(&dst_frames, MERGE_KEY_FIELD)? {
            let filter = json!({ MERGE_KEY_FIELD: key_value });
            match key_to_id.get(&serde_json::to_string(&key_value)?) {
                Some(id) => {
                    store.update_many(
                        &dst_frames,
                        &filter,
                        &VistaUpdate::set_field(SAMPLE_ID_FIELD, json!(id)),
                    )?;
                }
                None => {
                    // Parent was discarded; orphaned frames go with it
                    store.delete_many(&dst_frames, &filter)?;
                }
            }
        }

        self.strip_frame_stamps(source)
    }

    /// Strips the temporary merge key and its compound index from both
    /// frame collections. Idempotent, so it also runs when the merge bails
    /// out between the two frame phases.
    fn strip_frame_stamps(&self, source: &VistaDataset) -> Result<()> {
        let store = self.store();
        let dst_frames = self.doc_snapshot()?.frame_collection_name();
        let src_frames = source.doc_snapshot()?.frame_collection_name();

        for collection in [&dst_frames, &src_frames] {
            store.update_many(
                collection,
                &json!({}),
                &VistaUpdate::unset_field(MERGE_KEY_FIELD),
            )?;
            store.drop_index(
                collection,
                &format!("{MERGE_KEY_FIELD}_{FRAME_NUMBER_FIELD}"),
            )?;
        }
        Ok(())
    }

    /// Merges raw samples into this dataset via a key function (strategy 2).
    pub fn merge_samples_by_key<F>(
        &self,
        samples: Vec<VistaSample>,
        key_fcn: F,
        options: &VistaMergeOptions,
    ) -> Result<()>
    where
        F: Fn(&VistaSample) -> String,
    {
        self.ensure_active()?;
        let store = self.store();
        let collection = self.sample_collection_name()?;

        // Single pass over the destination builds the key index. The key
        // function sees decoded samples on both sides, so a normalizing key
        // matches the same way for existing and incoming samples.
        let mut id_map: HashMap<String, String> = HashMap::new();
        for doc in store.find(&collection, &json!({}))? {
            let existing = self.decode_sample(doc)?;
            let Some(id) = existing.id.clone() else {
                continue;
            };
            id_map.insert(key_fcn(&existing), id);
        }

        let (sample_selection, _) = options.split_frame_fields();
        let (sample_omit, _) = options.split_frame_omit();
        let dst_schema = self.sample_schema()?;
        let frame_schema = self.frame_schema()?;
        let delete_fields = default_delete_fields(&dst_schema, sample_selection.as_deref());
        let merge_spec = build_document_merge(&dst_schema, options, delete_fields);
        let frame_spec = build_document_merge(&frame_schema, options, Vec::new());
        let is_video = self.media_type()? == Some(VistaMediaType::Video);

        let mut inserts: Vec<VistaSample> = Vec::new();
        for sample in samples {
            let sample_key = key_fcn(&sample);
            match id_map.get(&sample_key) {
                Some(_) if options.skip_existing => {}
                Some(id) => {
                    let mut existing = self.get_sample(id)?;
                    let incoming = filter_sample(&sample, sample_selection.as_deref(), &sample_omit);
                    if !options.expand_schema {
                        ensure_declared_fields(&dst_schema, &frame_schema, &incoming)?;
                    }

                    let merged = merge_documents(
                        &Value::Object(existing.fields.clone()),
                        &Value::Object(incoming.fields.clone()),
                        &merge_spec,
                    );
                    if let Value::Object(fields) = merged {
                        existing.fields = fields;
                    }

                    if is_video {
                        for (number, frame) in incoming.frames.iter() {
                            match existing.frames.get(*number).cloned() {
                                Some(current) => {
                                    let merged = merge_documents(
                                        &Value::Object(current.fields),
                                        &Value::Object(frame.fields.clone()),
                                        &frame_spec,
                                    );
                                    if let Value::Object(fields) = merged {
                                        existing.frames.entry(*number).fields = fields;
                                    }
                                }
                                None => {
                                    existing.frames.set(*number, frame.clone());
                                }
                            }
                        }
                    }

                    self.save_sample(&mut existing)?;
                }
                None if options.insert_new => {
                    // Path is structurally required even if filtered out
                    let mut prepared =
                        filter_sample(&sample, sample_selection.as_deref(), &sample_omit);
                    if prepared.get_field(FILEPATH_FIELD).is_none() {
                        prepared.set_field(FILEPATH_FIELD, json!(sample.filepath()));
                    }
                    if !options.expand_schema {
                        ensure_declared_fields(&dst_schema, &frame_schema, &prepared)?;
                    }
                    inserts.push(prepared);
                }
                None => {}
            }
        }

        if !inserts.is_empty() {
            self.add_samples(&mut inserts)?;
        }
        Ok(())
    }

    /// Merges raw samples into this dataset via a field key (strategy 3).
    ///
    /// Stages the samples into a throwaway dataset so the pipeline merge
    /// can run against something queryable, then discards it.
    pub fn merge_samples(
        &self,
        samples: Vec<VistaSample>,
        options: &VistaMergeOptions,
    ) -> Result<()> {
        self.ensure_active()?;

        let client = self.make_client();
        let staging_name = format!("_merge-staging-{}", Uuid::new_v4().simple());
        let staging = client.create_dataset(&staging_name, false)?;

        let mut samples = samples;
        let outcome = staging
            .add_samples(&mut samples)
            .and_then(|_| self.merge_dataset(&staging, options));

        staging.delete()?;
        outcome
    }

    /// Merges dataset-level metadata: media type, schemas, info, classes,
    /// and mask targets.
    pub fn merge_dataset_doc(
        &self,
        source: &VistaDataset,
        options: &VistaMergeOptions,
    ) -> Result<()> {
        let src_doc = source.doc_snapshot()?;
        let dst_doc = self.doc_snapshot()?;

        // Media type reconcile
        match (&dst_doc.media_type, &src_doc.media_type) {
            (Some(dst), Some(src)) if dst != src => {
                return Err(VistaError::media_type(format!(
                    "cannot merge '{}' dataset into '{}' dataset",
                    src, dst
                )));
            }
            _ => {}
        }

        let (sample_selection, frame_selection) = options.split_frame_fields();
        let (sample_omit, frame_omit) = options.split_frame_omit();

        let mut dst_sample_schema = dst_doc.sample_schema();
        let mut dst_frame_schema = dst_doc.frame_schema();
        let incoming_sample_fields = filter_schema_fields(
            &src_doc.sample_schema(),
            sample_selection.as_deref(),
            &sample_omit,
        );
        let incoming_frame_fields = filter_schema_fields(
            &src_doc.frame_schema(),
            frame_selection.as_deref(),
            &frame_omit,
        );
        dst_sample_schema.merge_schema(&incoming_sample_fields, options.expand_schema)?;
        dst_frame_schema.merge_schema(&incoming_frame_fields, options.expand_schema)?;

        self.update_doc(|doc| {
            if doc.media_type.is_none() {
                doc.media_type = src_doc.media_type.clone();
            }
            doc.sample_fields = dst_sample_schema.fields().to_vec();
            doc.frame_fields = dst_frame_schema.fields().to_vec();

            if options.include_info {
                for (key, value) in &src_doc.info {
                    if options.overwrite_info || !doc.info.contains_key(key) {
                        doc.info.insert(key.clone(), value.clone());
                    }
                }
                for (field, classes) in &src_doc.classes {
                    if options.overwrite_info || !doc.classes.contains_key(field) {
                        doc.classes.insert(field.clone(), classes.clone());
                    }
                }
                for (field, targets) in &src_doc.mask_targets {
                    if options.overwrite_info || !doc.mask_targets.contains_key(field) {
                        doc.mask_targets.insert(field.clone(), targets.clone());
                    }
                }
                if doc.default_classes.is_empty() {
                    doc.default_classes = src_doc.default_classes.clone();
                }
                if doc.default_mask_targets.is_empty() {
                    doc.default_mask_targets = src_doc.default_mask_targets.clone();
                }
            }
        })
    }
}

/// Rejects incoming fields the destination schemas do not declare.
///
/// Only consulted when schema expansion is disabled; null values count as
/// absent, matching the document merge semantics.
fn ensure_declared_fields(
    sample_schema: &VistaSchema,
    frame_schema: &VistaSchema,
    sample: &VistaSample,
) -> Result<()> {
    for (name, value) in &sample.fields {
        if !value.is_null() && !sample_schema.has_field(name) {
            return Err(VistaError::schema(format!(
                "sample field '{name}' is not declared on the dataset \
                 and schema expansion is disabled"
            )));
        }
    }
    for (_, frame) in sample.frames.iter() {
        for (name, value) in &frame.fields {
            if !value.is_null() && !frame_schema.has_field(name) {
                return Err(VistaError::schema(format!(
                    "frame field '{name}' is not declared on the dataset \
                     and schema expansion is disabled"
                )));
            }
        }
    }
    Ok(())
}

/// Restricts a sample to the caller's field selection, detached.
fn filter_sample(
    sample: &VistaSample,
    selection: Option<&[(String, String)]>,
    omit: &[String],
) -> VistaSample {
    let omit = (!omit.is_empty()).then_some(omit);
    sample.copy_with_fields(selection, omit)
}

/// Maps a source schema through the caller's selection and omit lists.
fn filter_schema_fields(
    schema: &VistaSchema,
    selection: Option<&[(String, String)]>,
    omit: &[String],
) -> Vec<crate::fields::VistaField> {
    schema
        .fields()
        .iter()
        .filter_map(|field| match selection {
            Some(selection) => selection
                .iter()
                .find(|(src, _)| src == &field.name)
                .map(|(_, dst)| {
                    let mut renamed = field.clone();
                    renamed.name = dst.clone();
                    renamed
                }),
            None => Some(field.clone()),
        })
        .filter(|field| !omit.contains(&field.name))
        .collect()
}

/// Stamps every frame with its parent sample's key field value.
fn stamp_merge_keys(
    store: &dyn crate::store::VistaStore,
    sample_collection: &str,
    frame_collection: &str,
    key: &str,
) -> Result<()> {
    for doc in store.find(sample_collection, &json!({}))? {
        let (Some(id), Some(key_value)) = (
            doc.get("_id").and_then(Value::as_str),
            get_path(&doc, key),
        ) else {
            continue;
        };
        store.update_many(
            frame_collection,
            &json!({ SAMPLE_ID_FIELD: id }),
            &VistaUpdate::set_field(MERGE_KEY_FIELD, key_value.clone()),
        )?;
    }
    Ok(())
}
