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

//! # Vista Dataset Module
//!
//! This module implements the dataset lifecycle manager and the client it
//! hangs off: named, schema-described containers over two backing
//! collections (samples and frames), with creation, loading, cloning,
//! deletion, ingestion, and field schema mutation.
//!
//! ## Identity Model
//!
//! There is no process-global state. A [`VistaClient`] owns an explicit
//! name → shared-state registry; repeated `load_dataset` calls through the
//! same client return handles over the identical state, so every holder
//! observes schema mutations and deletion immediately. Once a dataset is
//! deleted its state is terminal: every operation except reading
//! `name`/`deleted` fails with `DatasetDeleted`.
//!
//! ## Schema Epochs
//!
//! Every schema mutation bumps the dataset's schema epoch. Bound samples
//! record the epoch they observed; `refresh_sample` brings a stale sample
//! back in sync, or detaches it when its dataset is gone.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::batcher::VistaDynamicBatcher;
use crate::document::{document_to_frame, document_to_sample, frame_to_document, sample_to_document};
use crate::errors::{Result, VistaError, VistaErrorLevel};
use crate::fields::{VistaField, VistaFieldDescriptor};
use crate::indexes;
use crate::runs::{self, VistaRunDocument};
use crate::sample::{VistaMediaType, VistaSample, VistaSampleBinding};
use crate::schema::{VistaSchema, VistaSchemaRole, SAMPLE_ID_FIELD};
use crate::store::{
    pipeline::{get_path, set_nested},
    VistaIndexSpec, VistaPipelineStep, VistaStore, VistaUpdate, VistaWriteOp,
};
use crate::view::VistaView;

/// Meta-collection holding one document per dataset.
const DATASET_COLLECTION: &str = "datasets";

const SAMPLE_COLLECTION_PREFIX: &str = "samples.";
const FRAME_COLLECTION_PREFIX: &str = "frames.";

/// Persisted dataset document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VistaDatasetDocument {
    pub name: String,
    pub media_type: Option<String>,
    pub sample_collection_name: String,
    pub persistent: bool,
    pub sample_fields: Vec<VistaField>,
    pub frame_fields: Vec<VistaField>,
    #[serde(default)]
    pub info: Map<String, Value>,
    #[serde(default)]
    pub classes: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub default_classes: Vec<String>,
    #[serde(default)]
    pub mask_targets: BTreeMap<String, Value>,
    #[serde(default)]
    pub default_mask_targets: Map<String, Value>,
    #[serde(default)]
    pub evaluations: BTreeMap<String, VistaRunDocument>,
    #[serde(default)]
    pub brain_methods: BTreeMap<String, VistaRunDocument>,
    pub version: String,
    pub created_at: DateTime<Utc>,
}

impl VistaDatasetDocument {
    /// Frame collection name derived from the sample collection name.
    pub fn frame_collection_name(&self) -> String {
        format!("{FRAME_COLLECTION_PREFIX}{}", self.sample_collection_name)
    }

    pub(crate) fn sample_schema(&self) -> VistaSchema {
        VistaSchema::from_fields(VistaSchemaRole::Sample, self.sample_fields.clone())
    }

    pub(crate) fn frame_schema(&self) -> VistaSchema {
        VistaSchema::from_fields(VistaSchemaRole::Frame, self.frame_fields.clone())
    }
}

/// Which run registry a run result belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VistaRunKind {
    Evaluation,
    Brain,
}

/// Physical statistics of a dataset's backing collections.
#[derive(Clone, Copy, Debug, Default)]
pub struct VistaDatasetStats {
    pub sample_count: u64,
    pub frame_count: u64,
    pub samples_bytes: u64,
    pub frames_bytes: u64,
    pub total_bytes: u64,
}

pub(crate) struct VistaDatasetState {
    pub(crate) doc: VistaDatasetDocument,
    pub(crate) schema_epoch: u64,
    pub(crate) deleted: bool,
}

struct ClientShared {
    store: Arc<dyn VistaStore>,
    registry: Mutex<HashMap<String, Arc<Mutex<VistaDatasetState>>>>,
}

/// Entry point owning the store connection and the dataset registry.
#[derive(Clone)]
pub struct VistaClient {
    shared: Arc<ClientShared>,
}

impl VistaClient {
    pub fn new(store: Arc<dyn VistaStore>) -> Self {
        VistaClient {
            shared: Arc::new(ClientShared {
                store,
                registry: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> Arc<dyn VistaStore> {
        self.shared.store.clone()
    }

    fn registry(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<Mutex<VistaDatasetState>>>>> {
        self.shared
            .registry
            .lock()
            .map_err(|_| VistaError::store("client registry mutex poisoned"))
    }

    fn find_dataset_doc(&self, name: &str) -> Result<Option<VistaDatasetDocument>> {
        let doc = self
            .shared
            .store
            .find_one(DATASET_COLLECTION, &json!({ "name": name }))?;
        match doc {
            Some(mut doc) => {
                if let Some(map) = doc.as_object_mut() {
                    map.remove("_id");
                }
                Ok(Some(serde_json::from_value(doc)?))
            }
            None => Ok(None),
        }
    }

    /// Allocates a fresh timestamp-derived sample collection name,
    /// collision-checked against the store.
    fn make_sample_collection_name(&self) -> Result<String> {
        let stamp = Utc::now().format("%Y.%m.%d.%H.%M.%S");
        let existing = self.shared.store.list_collection_names()?;

        let mut name = format!("{SAMPLE_COLLECTION_PREFIX}{stamp}");
        let mut rng = rand::thread_rng();
        while existing.contains(&name) {
            let suffix: u32 = rng.gen_range(0..0xffffff);
            name = format!("{SAMPLE_COLLECTION_PREFIX}{stamp}.{suffix:06x}");
        }
        Ok(name)
    }

    fn handle(&self, state: Arc<Mutex<VistaDatasetState>>) -> VistaDataset {
        VistaDataset {
            client: self.shared.clone(),
            state,
        }
    }

    fn register(&self, doc: VistaDatasetDocument) -> Result<VistaDataset> {
        let state = Arc::new(Mutex::new(VistaDatasetState {
            doc,
            schema_epoch: 0,
            deleted: false,
        }));
        let name = {
            let guard = state
                .lock()
                .map_err(|_| VistaError::store("dataset state mutex poisoned"))?;
            guard.doc.name.clone()
        };
        self.registry()?.insert(name, state.clone());
        Ok(self.handle(state))
    }

    /// Creates a new empty dataset.
    pub fn create_dataset(&self, name: &str, persistent: bool) -> Result<VistaDataset> {
        if name.is_empty() {
            return Err(VistaError::validation("dataset name must not be empty"));
        }

        {
            let registry = self.registry()?;
            if let Some(state) = registry.get(name) {
                let guard = state
                    .lock()
                    .map_err(|_| VistaError::store("dataset state mutex poisoned"))?;
                if !guard.deleted {
                    return Err(VistaError::validation(format!(
                        "dataset '{name}' already exists"
                    )));
                }
            }
        }
        if self.find_dataset_doc(name)?.is_some() {
            return Err(VistaError::validation(format!(
                "dataset '{name}' already exists"
            )));
        }

        let sample_collection_name = self.make_sample_collection_name()?;
        let doc = VistaDatasetDocument {
            name: name.to_string(),
            media_type: None,
            sample_collection_name,
            persistent,
            sample_fields: VistaSchema::default_sample().fields().to_vec(),
            frame_fields: VistaSchema::default_frame().fields().to_vec(),
            info: Map::new(),
            classes: BTreeMap::new(),
            default_classes: Vec::new(),
            mask_targets: BTreeMap::new(),
            default_mask_targets: Map::new(),
            evaluations: BTreeMap::new(),
            brain_methods: BTreeMap::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now(),
        };

        indexes::create_default_sample_indexes(&*self.shared.store, &doc.sample_collection_name)?;
        indexes::create_default_frame_indexes(&*self.shared.store, &doc.frame_collection_name())?;
        persist_dataset_doc(&*self.shared.store, &doc)?;

        log::info!("created dataset '{name}'");
        self.register(doc)
    }

    /// Loads an existing dataset, sharing state with all other holders.
    pub fn load_dataset(&self, name: &str) -> Result<VistaDataset> {
        {
            let registry = self.registry()?;
            if let Some(state) = registry.get(name) {
                let guard = state
                    .lock()
                    .map_err(|_| VistaError::store("dataset state mutex poisoned"))?;
                if !guard.deleted {
                    drop(guard);
                    return Ok(self.handle(state.clone()));
                }
            }
        }

        let doc = self
            .find_dataset_doc(name)?
            .ok_or_else(|| VistaError::not_found(format!("dataset '{name}' does not exist")))?;
        self.register(doc)
    }

    /// Names of all datasets, sorted.
    pub fn list_datasets(&self) -> Result<Vec<String>> {
        let docs = self.shared.store.find(DATASET_COLLECTION, &json!({}))?;
        let mut names: Vec<String> = docs
            .iter()
            .filter_map(|doc| doc.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn dataset_exists(&self, name: &str) -> Result<bool> {
        Ok(self.find_dataset_doc(name)?.is_some())
    }

    /// Deletes a dataset by name.
    pub fn delete_dataset(&self, name: &str) -> Result<()> {
        self.load_dataset(name)?.delete()
    }

    /// Deletes every non-persistent dataset; returns the deleted names.
    pub fn delete_non_persistent_datasets(&self) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for name in self.list_datasets()? {
            let dataset = self.load_dataset(&name)?;
            if !dataset.persistent()? {
                dataset.delete()?;
                deleted.push(name);
            }
        }
        Ok(deleted)
    }
}

fn persist_dataset_doc(store: &dyn VistaStore, doc: &VistaDatasetDocument) -> Result<()> {
    let value = serde_json::to_value(doc)?;
    store.bulk_write(
        DATASET_COLLECTION,
        vec![VistaWriteOp::ReplaceOne {
            filter: json!({ "name": doc.name }),
            replacement: value,
            upsert: true,
        }],
        true,
    )
}

/// Handle over one dataset's shared state.
#[derive(Clone)]
pub struct VistaDataset {
    client: Arc<ClientShared>,
    state: Arc<Mutex<VistaDatasetState>>,
}

impl std::fmt::Debug for VistaDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VistaDataset").finish_non_exhaustive()
    }
}

impl VistaDataset {
    fn lock_state(&self) -> Result<MutexGuard<'_, VistaDatasetState>> {
        self.state
            .lock()
            .map_err(|_| VistaError::store("dataset state mutex poisoned"))
    }

    fn active_state(&self) -> Result<MutexGuard<'_, VistaDatasetState>> {
        let state = self.lock_state()?;
        if state.deleted {
            return Err(VistaError::deleted(state.doc.name.clone()));
        }
        Ok(state)
    }

    /// The dataset's name; readable even after deletion.
    pub fn name(&self) -> String {
        self.lock_state()
            .map(|state| state.doc.name.clone())
            .unwrap_or_default()
    }

    /// Whether this dataset has been deleted; readable even after deletion.
    pub fn deleted(&self) -> bool {
        self.lock_state().map(|state| state.deleted).unwrap_or(true)
    }

    /// Fails with `DatasetDeleted` when the dataset is gone.
    pub fn ensure_active(&self) -> Result<()> {
        self.active_state().map(|_| ())
    }

    pub fn store(&self) -> Arc<dyn VistaStore> {
        self.client.store.clone()
    }

    pub fn persistent(&self) -> Result<bool> {
        Ok(self.active_state()?.doc.persistent)
    }

    pub fn set_persistent(&self, persistent: bool) -> Result<()> {
        let mut state = self.active_state()?;
        state.doc.persistent = persistent;
        persist_dataset_doc(&*self.client.store, &state.doc)
    }

    pub fn media_type(&self) -> Result<Option<VistaMediaType>> {
        let state = self.active_state()?;
        Ok(state
            .doc
            .media_type
            .as_deref()
            .and_then(VistaMediaType::parse))
    }

    pub fn sample_collection_name(&self) -> Result<String> {
        Ok(self.active_state()?.doc.sample_collection_name.clone())
    }

    pub fn frame_collection_name(&self) -> Result<String> {
        Ok(self.active_state()?.doc.frame_collection_name())
    }

    /// Current schema epoch; bumped by every schema mutation.
    pub fn schema_epoch(&self) -> Result<u64> {
        Ok(self.active_state()?.schema_epoch)
    }

    pub fn sample_schema(&self) -> Result<VistaSchema> {
        Ok(self.active_state()?.doc.sample_schema())
    }

    pub fn frame_schema(&self) -> Result<VistaSchema> {
        Ok(self.active_state()?.doc.frame_schema())
    }

    /// Free-form dataset info map.
    pub fn info(&self) -> Result<Map<String, Value>> {
        Ok(self.active_state()?.doc.info.clone())
    }

    pub fn set_info(&self, info: Map<String, Value>) -> Result<()> {
        let mut state = self.active_state()?;
        state.doc.info = info;
        persist_dataset_doc(&*self.client.store, &state.doc)
    }

    /// Re-reads the persisted dataset document.
    ///
    /// If the document is gone, another holder deleted the dataset and the
    /// shared state transitions to deleted.
    pub fn reload(&self) -> Result<()> {
        let mut state = self.active_state()?;
        let name = state.doc.name.clone();
        let client = VistaClient {
            shared: self.client.clone(),
        };
        match client.find_dataset_doc(&name)? {
            Some(doc) => {
                state.doc = doc;
                state.schema_epoch += 1;
                Ok(())
            }
            None => {
                state.deleted = true;
                Err(VistaError::deleted(name))
            }
        }
    }

    fn persist_schemas(&self, state: &mut VistaDatasetState) -> Result<()> {
        state.schema_epoch += 1;
        persist_dataset_doc(&*self.client.store, &state.doc)
    }

    // ---- ingestion ------------------------------------------------------

    /// Adds one sample, binding it to this dataset.
    pub fn add_sample(&self, sample: &mut VistaSample) -> Result<String> {
        let ids = self.add_samples(std::slice::from_mut(sample))?;
        ids.into_iter()
            .next()
            .ok_or_else(|| VistaError::store("insert returned no id"))
    }

    /// Adds samples in adaptively sized batches, binding each on success.
    ///
    /// The dataset's media type is fixed by the first sample ever added;
    /// subsequent mismatches fail. Undeclared non-null fields expand the
    /// schema before validation.
    pub fn add_samples(&self, samples: &mut [VistaSample]) -> Result<Vec<String>> {
        let mut state = self.active_state()?;
        if samples.is_empty() {
            return Ok(Vec::new());
        }

        // Media type is fixed on first insert
        let mut doc_changed = false;
        let media_type = match state.doc.media_type.as_deref().and_then(VistaMediaType::parse) {
            Some(media_type) => media_type,
            None => {
                let media_type = samples[0].media_type();
                state.doc.media_type = Some(media_type.as_str().to_string());
                doc_changed = true;
                media_type
            }
        };
        for sample in samples.iter() {
            if sample.media_type() != media_type {
                return Err(VistaError::media_type(format!(
                    "sample '{}' has media type '{}' but dataset '{}' contains '{}'",
                    sample.filepath(),
                    sample.media_type().as_str(),
                    state.doc.name,
                    media_type.as_str()
                )));
            }
        }

        let mut sample_schema = state.doc.sample_schema();
        let mut frame_schema = state.doc.frame_schema();
        let mut schema_changed = false;

        let mut rng = rand::thread_rng();
        for sample in samples.iter_mut() {
            sample.set_field("_media_type", json!(media_type.as_str()));
            if sample.get_field("_rand").is_none() {
                sample.set_field("_rand", json!(rng.gen::<f64>()));
            }

            schema_changed |= sample_schema.expand(sample.iter_fields())?;
            for (_, frame) in sample.frames.iter() {
                schema_changed |= frame_schema.expand(frame.iter_fields())?;
            }
        }

        if schema_changed || doc_changed {
            state.doc.sample_fields = sample_schema.fields().to_vec();
            state.doc.frame_fields = frame_schema.fields().to_vec();
            self.persist_schemas(&mut state)?;
        }

        for sample in samples.iter() {
            for (name, value) in sample.iter_fields() {
                if value.is_null() {
                    continue;
                }
                if let Some(field) = sample_schema.get_field(name) {
                    field.descriptor.validate_value(name, value)?;
                }
            }
            for (_, frame) in sample.frames.iter() {
                for (name, value) in frame.iter_fields() {
                    if value.is_null() {
                        continue;
                    }
                    if let Some(field) = frame_schema.get_field(name) {
                        field.descriptor.validate_value(name, value)?;
                    }
                }
            }
        }

        let collection = state.doc.sample_collection_name.clone();
        let frame_collection = state.doc.frame_collection_name();
        let dataset_name = state.doc.name.clone();
        let epoch = state.schema_epoch;
        drop(state);

        let docs: Vec<Value> = samples.iter().map(sample_to_document).collect();

        let mut batcher = VistaDynamicBatcher::default();
        let mut ids = Vec::with_capacity(docs.len());
        let mut offset = 0;
        while offset < docs.len() {
            let size = batcher.batch_size().min(docs.len() - offset);
            let batch = docs[offset..offset + size].to_vec();

            let started = Instant::now();
            let batch_ids = self.client.store.insert_many(&collection, batch, true)?;
            batcher.record_latency(started.elapsed());

            ids.extend(batch_ids);
            offset += size;
        }

        for (sample, id) in samples.iter_mut().zip(&ids) {
            sample.id = Some(id.clone());
            sample.bind(VistaSampleBinding {
                dataset_name: dataset_name.clone(),
                collection_name: collection.clone(),
                schema_epoch: epoch,
            });

            if media_type == VistaMediaType::Video && !sample.frames.is_empty() {
                let frame_docs: Vec<Value> = sample
                    .frames
                    .iter()
                    .map(|(number, frame)| frame_to_document(frame, *number, id))
                    .collect();
                let frame_ids =
                    self.client
                        .store
                        .insert_many(&frame_collection, frame_docs, true)?;
                for (frame, frame_id) in sample.frames.iter_mut().zip(frame_ids) {
                    frame.id = Some(frame_id);
                }
            }
        }

        log::debug!("added {} samples to '{dataset_name}'", ids.len());
        Ok(ids)
    }

    // ---- reads ----------------------------------------------------------

    pub(crate) fn decode_sample(&self, doc: Value) -> Result<VistaSample> {
        let schema = self.sample_schema()?;
        document_to_sample(&schema, doc)
    }

    /// Fetches one sample by id, with frames on video datasets.
    pub fn get_sample(&self, id: &str) -> Result<VistaSample> {
        let state = self.active_state()?;
        let collection = state.doc.sample_collection_name.clone();
        let frame_collection = state.doc.frame_collection_name();
        let sample_schema = state.doc.sample_schema();
        let frame_schema = state.doc.frame_schema();
        let is_video = state.doc.media_type.as_deref() == Some("video");
        let binding = VistaSampleBinding {
            dataset_name: state.doc.name.clone(),
            collection_name: collection.clone(),
            schema_epoch: state.schema_epoch,
        };
        drop(state);

        let doc = self
            .client
            .store
            .find_one(&collection, &json!({ "_id": id }))?
            .ok_or_else(|| VistaError::not_found(format!("no sample with id '{id}'")))?;

        let mut sample = document_to_sample(&sample_schema, doc)?;
        if is_video {
            for frame_doc in self
                .client
                .store
                .find(&frame_collection, &json!({ SAMPLE_ID_FIELD: id }))?
            {
                let (number, frame) = document_to_frame(&frame_schema, frame_doc)?;
                sample.frames.set(number, frame);
            }
        }

        sample.bind(binding);
        Ok(sample)
    }

    /// Number of samples in the dataset.
    pub fn count_samples(&self) -> Result<u64> {
        let collection = self.sample_collection_name()?;
        Ok(self.client.store.collection_stats(&collection)?.count)
    }

    /// Iterates all samples.
    pub fn iter_samples(&self) -> Result<crate::view::VistaSampleIter> {
        self.view().iter_samples()
    }

    /// A view over the full dataset.
    pub fn view(&self) -> VistaView {
        VistaView::new(self.clone())
    }

    // ---- sample mutation -------------------------------------------------

    /// Persists in-memory changes to a bound sample, including frames.
    pub fn save_sample(&self, sample: &mut VistaSample) -> Result<()> {
        let mut state = self.active_state()?;

        let id = sample
            .id
            .clone()
            .ok_or_else(|| VistaError::validation("cannot save an unpersisted sample"))?;
        let bound_here = sample
            .binding()
            .map(|binding| binding.dataset_name == state.doc.name)
            .unwrap_or(false);
        if !bound_here {
            return Err(VistaError::validation(
                "sample does not belong to this dataset",
            ));
        }

        let mut sample_schema = state.doc.sample_schema();
        let mut frame_schema = state.doc.frame_schema();
        let mut schema_changed = sample_schema.expand(sample.iter_fields())?;
        for (_, frame) in sample.frames.iter() {
            schema_changed |= frame_schema.expand(frame.iter_fields())?;
        }
        if schema_changed {
            state.doc.sample_fields = sample_schema.fields().to_vec();
            state.doc.frame_fields = frame_schema.fields().to_vec();
            self.persist_schemas(&mut state)?;
        }

        let collection = state.doc.sample_collection_name.clone();
        let frame_collection = state.doc.frame_collection_name();
        let is_video = state.doc.media_type.as_deref() == Some("video");
        let binding = VistaSampleBinding {
            dataset_name: state.doc.name.clone(),
            collection_name: collection.clone(),
            schema_epoch: state.schema_epoch,
        };
        drop(state);

        self.client.store.bulk_write(
            &collection,
            vec![VistaWriteOp::ReplaceOne {
                filter: json!({ "_id": id }),
                replacement: sample_to_document(sample),
                upsert: true,
            }],
            true,
        )?;

        if is_video {
            let ops: Vec<VistaWriteOp> = sample
                .frames
                .iter()
                .map(|(number, frame)| VistaWriteOp::ReplaceOne {
                    filter: json!({ SAMPLE_ID_FIELD: id, "frame_number": number }),
                    replacement: frame_to_document(frame, *number, &id),
                    upsert: true,
                })
                .collect();
            if !ops.is_empty() {
                self.client.store.bulk_write(&frame_collection, ops, true)?;
            }
        }

        sample.bind(binding);
        Ok(())
    }

    /// Refreshes a bound sample whose observed schema epoch is stale.
    ///
    /// A sample bound to a deleted dataset transitions to detached instead
    /// of erroring; detachment is the terminal answer to "my dataset is
    /// gone".
    pub fn refresh_sample(&self, sample: &mut VistaSample) -> Result<()> {
        if self.deleted() {
            sample.detach();
            return Ok(());
        }

        let current_epoch = self.schema_epoch()?;
        let stale = sample
            .binding()
            .map(|binding| binding.schema_epoch < current_epoch)
            .unwrap_or(true);
        if !stale {
            return Ok(());
        }

        let id = sample
            .id
            .clone()
            .ok_or_else(|| VistaError::validation("cannot refresh an unpersisted sample"))?;
        *sample = self.get_sample(&id)?;
        Ok(())
    }

    /// Deletes samples by id, cascading to their frames.
    pub fn delete_samples(&self, ids: &[String]) -> Result<u64> {
        let state = self.active_state()?;
        let collection = state.doc.sample_collection_name.clone();
        let frame_collection = state.doc.frame_collection_name();
        drop(state);

        let filter = json!({ "_id": { "$in": ids } });
        let deleted = self.client.store.delete_many(&collection, &filter)?;
        self.client.store.delete_many(
            &frame_collection,
            &json!({ SAMPLE_ID_FIELD: { "$in": ids } }),
        )?;
        Ok(deleted)
    }

    /// Removes every sample and frame, keeping the dataset itself.
    pub fn clear(&self) -> Result<()> {
        let state = self.active_state()?;
        let collection = state.doc.sample_collection_name.clone();
        let frame_collection = state.doc.frame_collection_name();
        drop(state);

        self.client.store.delete_many(&collection, &json!({}))?;
        self.client.store.delete_many(&frame_collection, &json!({}))?;
        Ok(())
    }

    // ---- field schema mutation ------------------------------------------

    fn role_collection(&self, state: &VistaDatasetState, role: VistaSchemaRole) -> String {
        match role {
            VistaSchemaRole::Sample => state.doc.sample_collection_name.clone(),
            VistaSchemaRole::Frame => state.doc.frame_collection_name(),
        }
    }

    fn role_schema(state: &VistaDatasetState, role: VistaSchemaRole) -> VistaSchema {
        match role {
            VistaSchemaRole::Sample => state.doc.sample_schema(),
            VistaSchemaRole::Frame => state.doc.frame_schema(),
        }
    }

    fn store_role_schema(state: &mut VistaDatasetState, role: VistaSchemaRole, schema: &VistaSchema) {
        match role {
            VistaSchemaRole::Sample => state.doc.sample_fields = schema.fields().to_vec(),
            VistaSchemaRole::Frame => state.doc.frame_fields = schema.fields().to_vec(),
        }
    }

    fn declare_field(
        &self,
        role: VistaSchemaRole,
        name: &str,
        descriptor: VistaFieldDescriptor,
    ) -> Result<()> {
        let mut state = self.active_state()?;
        let mut schema = Self::role_schema(&state, role);
        if schema.declare_field(name, descriptor)? {
            Self::store_role_schema(&mut state, role, &schema);
            self.persist_schemas(&mut state)?;
        }
        Ok(())
    }

    pub fn declare_sample_field(&self, name: &str, descriptor: VistaFieldDescriptor) -> Result<()> {
        self.declare_field(VistaSchemaRole::Sample, name, descriptor)
    }

    pub fn declare_frame_field(&self, name: &str, descriptor: VistaFieldDescriptor) -> Result<()> {
        self.declare_field(VistaSchemaRole::Frame, name, descriptor)
    }

    /// Splits a field mapping into top-level pairs (schema + data) and
    /// dotted pairs (data rewrite only), validating dotted heads exist.
    fn split_field_mapping(
        schema: &VistaSchema,
        mapping: &[(String, String)],
    ) -> Result<(Vec<(String, String)>, Vec<(String, String)>)> {
        let mut top_level = Vec::new();
        let mut dotted = Vec::new();
        for (old_name, new_name) in mapping {
            if old_name.contains('.') || new_name.contains('.') {
                let head = old_name.split('.').next().unwrap_or_default();
                if !schema.has_field(head) {
                    return Err(VistaError::field_not_found(head.to_string()));
                }
                dotted.push((old_name.clone(), new_name.clone()));
            } else {
                top_level.push((old_name.clone(), new_name.clone()));
            }
        }
        Ok((top_level, dotted))
    }

    fn rename_fields(&self, role: VistaSchemaRole, mapping: &[(String, String)]) -> Result<()> {
        let mut state = self.active_state()?;
        let mut schema = Self::role_schema(&state, role);
        let (top_level, dotted) = Self::split_field_mapping(&schema, mapping)?;

        schema.rename_fields(&top_level)?;
        Self::store_role_schema(&mut state, role, &schema);

        let collection = self.role_collection(&state, role);
        self.persist_schemas(&mut state)?;
        drop(state);

        let mut data_mapping = top_level;
        data_mapping.extend(dotted);
        self.client.store.update_many(
            &collection,
            &json!({}),
            &VistaUpdate::rename_fields(&data_mapping),
        )?;
        Ok(())
    }

    pub fn rename_sample_fields(&self, mapping: &[(String, String)]) -> Result<()> {
        self.rename_fields(VistaSchemaRole::Sample, mapping)
    }

    pub fn rename_frame_fields(&self, mapping: &[(String, String)]) -> Result<()> {
        self.rename_fields(VistaSchemaRole::Frame, mapping)
    }

    fn clone_fields(&self, role: VistaSchemaRole, mapping: &[(String, String)]) -> Result<()> {
        let mut state = self.active_state()?;
        let mut schema = Self::role_schema(&state, role);
        let (top_level, dotted) = Self::split_field_mapping(&schema, mapping)?;

        schema.clone_fields(&top_level)?;
        Self::store_role_schema(&mut state, role, &schema);

        let collection = self.role_collection(&state, role);
        self.persist_schemas(&mut state)?;
        drop(state);

        let mut data_mapping = top_level;
        data_mapping.extend(dotted);

        // Value copies need per-document rewrites
        let docs = self.client.store.find(&collection, &json!({}))?;
        let mut ops = Vec::with_capacity(docs.len());
        for doc in docs {
            let mut rewritten = doc.clone();
            let mut touched = false;
            for (src, dst) in &data_mapping {
                if let Some(value) = get_path(&doc, src).cloned() {
                    if let Some(map) = rewritten.as_object_mut() {
                        set_nested(map, dst, value);
                        touched = true;
                    }
                }
            }
            if touched {
                let id = doc.get("_id").cloned().unwrap_or(Value::Null);
                ops.push(VistaWriteOp::ReplaceOne {
                    filter: json!({ "_id": id }),
                    replacement: rewritten,
                    upsert: false,
                });
            }
        }
        if !ops.is_empty() {
            self.client.store.bulk_write(&collection, ops, true)?;
        }
        Ok(())
    }

    pub fn clone_sample_fields(&self, mapping: &[(String, String)]) -> Result<()> {
        self.clone_fields(VistaSchemaRole::Sample, mapping)
    }

    pub fn clone_frame_fields(&self, mapping: &[(String, String)]) -> Result<()> {
        self.clone_fields(VistaSchemaRole::Frame, mapping)
    }

    fn delete_fields(
        &self,
        role: VistaSchemaRole,
        names: &[String],
        level: VistaErrorLevel,
    ) -> Result<Vec<String>> {
        let mut state = self.active_state()?;
        let mut schema = Self::role_schema(&state, role);

        let (top_level, dotted): (Vec<String>, Vec<String>) =
            names.iter().cloned().partition(|name| !name.contains('.'));

        let mut deleted = schema.delete_fields(&top_level, level)?;
        Self::store_role_schema(&mut state, role, &schema);

        let collection = self.role_collection(&state, role);
        self.persist_schemas(&mut state)?;
        drop(state);

        deleted.extend(dotted);
        if !deleted.is_empty() {
            let update = VistaUpdate {
                unset: deleted.clone(),
                ..Default::default()
            };
            self.client
                .store
                .update_many(&collection, &json!({}), &update)?;
        }
        Ok(deleted)
    }

    pub fn delete_sample_fields(
        &self,
        names: &[String],
        level: VistaErrorLevel,
    ) -> Result<Vec<String>> {
        self.delete_fields(VistaSchemaRole::Sample, names, level)
    }

    pub fn delete_frame_fields(
        &self,
        names: &[String],
        level: VistaErrorLevel,
    ) -> Result<Vec<String>> {
        self.delete_fields(VistaSchemaRole::Frame, names, level)
    }

    // ---- indexes ---------------------------------------------------------

    pub fn create_sample_index(&self, field: &str, unique: bool) -> Result<()> {
        let collection = self.sample_collection_name()?;
        self.client
            .store
            .create_index(&collection, &VistaIndexSpec::on_field(field, unique))
    }

    /// Creates a geospatial index over a `GeoPoint` sample field.
    pub fn create_sample_geo_index(&self, field: &str) -> Result<()> {
        let collection = self.sample_collection_name()?;
        indexes::create_geo_index(&*self.client.store, &collection, field)
    }

    pub fn drop_sample_index(&self, name: &str) -> Result<()> {
        let collection = self.sample_collection_name()?;
        self.client.store.drop_index(&collection, name)
    }

    pub fn list_sample_indexes(&self) -> Result<Vec<VistaIndexSpec>> {
        let collection = self.sample_collection_name()?;
        self.client.store.list_indexes(&collection)
    }

    // ---- runs ------------------------------------------------------------

    fn run_registry<'a>(
        doc: &'a mut VistaDatasetDocument,
        kind: VistaRunKind,
    ) -> &'a mut BTreeMap<String, VistaRunDocument> {
        match kind {
            VistaRunKind::Evaluation => &mut doc.evaluations,
            VistaRunKind::Brain => &mut doc.brain_methods,
        }
    }

    /// Registers a run and stores its result payload.
    pub fn register_run(
        &self,
        kind: VistaRunKind,
        run: VistaRunDocument,
        results: Value,
    ) -> Result<()> {
        let mut state = self.active_state()?;
        let name = state.doc.name.clone();
        let key = run.key.clone();
        Self::run_registry(&mut state.doc, kind).insert(key.clone(), run);
        persist_dataset_doc(&*self.client.store, &state.doc)?;
        drop(state);

        runs::save_run_results(&*self.client.store, &name, &key, results)
    }

    pub fn list_runs(&self, kind: VistaRunKind) -> Result<Vec<String>> {
        let mut state = self.active_state()?;
        Ok(Self::run_registry(&mut state.doc, kind)
            .keys()
            .cloned()
            .collect())
    }

    /// Loads a run's metadata and result payload.
    pub fn load_run(
        &self,
        kind: VistaRunKind,
        key: &str,
    ) -> Result<(VistaRunDocument, Option<Value>)> {
        let mut state = self.active_state()?;
        let name = state.doc.name.clone();
        let run = Self::run_registry(&mut state.doc, kind)
            .get(key)
            .cloned()
            .ok_or_else(|| VistaError::not_found(format!("no run with key '{key}'")))?;
        drop(state);

        let results = runs::load_run_results(&*self.client.store, &name, key)?;
        Ok((run, results))
    }

    pub fn delete_run(&self, kind: VistaRunKind, key: &str) -> Result<()> {
        let mut state = self.active_state()?;
        let name = state.doc.name.clone();
        Self::run_registry(&mut state.doc, kind).remove(key);
        persist_dataset_doc(&*self.client.store, &state.doc)?;
        drop(state);

        runs::delete_run_results(&*self.client.store, &name, key)
    }

    // ---- lifecycle -------------------------------------------------------

    /// Clones the full dataset under a new name.
    pub fn clone_as(&self, name: &str) -> Result<VistaDataset> {
        self.clone_with_view(&self.view(), name)
    }

    /// Clones the contents of a view into a new dataset.
    ///
    /// Field-selecting and field-excluding stages are reflected in the
    /// cloned schema. Frames are routed through the sample pipeline so a
    /// filtered view clones only the frames of its surviving samples.
    pub(crate) fn clone_with_view(&self, view: &VistaView, name: &str) -> Result<VistaDataset> {
        let state = self.active_state()?;
        let src_name = state.doc.name.clone();
        let src_samples = state.doc.sample_collection_name.clone();
        let src_frames = state.doc.frame_collection_name();
        let is_video = state.doc.media_type.as_deref() == Some("video");
        let mut doc = state.doc.clone();
        drop(state);

        let client = VistaClient {
            shared: self.client.clone(),
        };
        if client.find_dataset_doc(name)?.is_some() {
            return Err(VistaError::validation(format!(
                "dataset '{name}' already exists"
            )));
        }

        // Field-selecting stages shape the cloned schema
        let mut selected: Option<Vec<String>> = None;
        let mut excluded: Vec<String> = Vec::new();
        for stage in view.stages() {
            if let Some(fields) = stage.selected_fields() {
                selected = Some(fields.to_vec());
            }
            if let Some(fields) = stage.excluded_fields() {
                excluded.extend(fields.iter().cloned());
            }
        }

        let protected: Vec<String> = doc
            .sample_schema()
            .protected_fields()
            .iter()
            .map(|f| f.to_string())
            .collect();
        doc.sample_fields.retain(|field| {
            let keep_selected = selected
                .as_ref()
                .map(|fields| fields.contains(&field.name) || protected.contains(&field.name))
                .unwrap_or(true);
            keep_selected && !excluded.contains(&field.name)
        });

        doc.name = name.to_string();
        doc.persistent = false;
        doc.sample_collection_name = client.make_sample_collection_name()?;
        doc.created_at = Utc::now();

        let dst_samples = doc.sample_collection_name.clone();
        let dst_frames = doc.frame_collection_name();

        let mut sample_pipeline = view.compile(false, true, false)?;
        sample_pipeline.push(VistaPipelineStep::Out(dst_samples.clone()));
        self.client.store.aggregate(&src_samples, &sample_pipeline)?;

        if is_video {
            if view.num_stages() == 0 {
                let frame_pipeline = vec![VistaPipelineStep::Out(dst_frames.clone())];
                self.client.store.aggregate(&src_frames, &frame_pipeline)?;
            } else {
                let mut frame_pipeline = view.compile(false, false, true)?;
                frame_pipeline.push(VistaPipelineStep::Out(dst_frames.clone()));
                self.client.store.aggregate(&src_samples, &frame_pipeline)?;
            }
        }

        indexes::create_default_sample_indexes(&*self.client.store, &dst_samples)?;
        indexes::create_default_frame_indexes(&*self.client.store, &dst_frames)?;

        // Result blobs are physically duplicated, never shared
        runs::clone_run_results(&*self.client.store, &src_name, name)?;

        persist_dataset_doc(&*self.client.store, &doc)?;
        log::info!("cloned dataset '{src_name}' as '{name}'");
        client.register(doc)
    }

    /// Destroys the dataset: collections, run results, and document.
    ///
    /// The shared state becomes terminally deleted; every holder of this
    /// dataset observes it.
    pub fn delete(&self) -> Result<()> {
        let mut state = self.active_state()?;
        let name = state.doc.name.clone();
        let samples = state.doc.sample_collection_name.clone();
        let frames = state.doc.frame_collection_name();

        self.client.store.drop_collection(&samples)?;
        self.client.store.drop_collection(&frames)?;
        runs::delete_all_run_results(&*self.client.store, &name)?;
        self.client
            .store
            .delete_many(DATASET_COLLECTION, &json!({ "name": name }))?;

        state.deleted = true;
        log::info!("deleted dataset '{name}'");
        Ok(())
    }

    /// Physical statistics of the backing collections.
    pub fn stats(&self) -> Result<VistaDatasetStats> {
        let state = self.active_state()?;
        let samples = state.doc.sample_collection_name.clone();
        let frames = state.doc.frame_collection_name();
        drop(state);

        let sample_stats = self.client.store.collection_stats(&samples)?;
        let frame_stats = self.client.store.collection_stats(&frames)?;
        Ok(VistaDatasetStats {
            sample_count: sample_stats.count,
            frame_count: frame_stats.count,
            samples_bytes: sample_stats.size_bytes,
            frames_bytes: frame_stats.size_bytes,
            total_bytes: sample_stats.size_bytes + frame_stats.size_bytes,
        })
    }

    /// Human-readable description of the dataset.
    pub fn summary(&self) -> Result<String> {
        let state = self.active_state()?;
        let stats = {
            let samples = state.doc.sample_collection_name.clone();
            self.client.store.collection_stats(&samples)?
        };

        let mut lines = vec![
            format!("Name:        {}", state.doc.name),
            format!(
                "Media type:  {}",
                state.doc.media_type.as_deref().unwrap_or("unset")
            ),
            format!("Persistent:  {}", state.doc.persistent),
            format!("Samples:     {}", stats.count),
            "Sample fields:".to_string(),
        ];
        for field in state.doc.sample_schema().get_schema(None, false) {
            lines.push(format!(
                "    {}: {}",
                field.name,
                field.descriptor.type_string()
            ));
        }
        if state.doc.media_type.as_deref() == Some("video") {
            lines.push("Frame fields:".to_string());
            for field in state.doc.frame_schema().get_schema(None, false) {
                lines.push(format!(
                    "    {}: {}",
                    field.name,
                    field.descriptor.type_string()
                ));
            }
        }
        Ok(lines.join("\n"))
    }

    // merge engine hooks; the heavy lifting lives in merge.rs
    pub(crate) fn make_client(&self) -> VistaClient {
        VistaClient {
            shared: self.client.clone(),
        }
    }

    pub(crate) fn doc_snapshot(&self) -> Result<VistaDatasetDocument> {
        Ok(self.active_state()?.doc.clone())
    }

    pub(crate) fn update_doc<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut VistaDatasetDocument),
    {
        let mut state = self.active_state()?;
        mutate(&mut state.doc);
        self.persist_schemas(&mut state)
    }
}
