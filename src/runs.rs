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

//! # Vista Run Module
//!
//! Named run results (evaluations, analyses) attached to a dataset. The
//! run document itself is small and lives inside the dataset document; the
//! potentially large result payload is an opaque blob in the store's blob
//! space, keyed by dataset name and run key.
//!
//! Blobs are physically duplicated on dataset clone so deleting the source
//! dataset can never orphan the clone's results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;
use crate::store::VistaStore;

/// Metadata for one named run, persisted in the dataset document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VistaRunDocument {
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub config: Value,
    pub version: String,
}

impl VistaRunDocument {
    pub fn new(key: impl Into<String>, config: Value) -> Self {
        VistaRunDocument {
            key: key.into(),
            timestamp: Utc::now(),
            config,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn blob_prefix(dataset_name: &str) -> String {
    format!("runs/{dataset_name}/")
}

/// Blob key of one run's results.
pub fn run_blob_key(dataset_name: &str, run_key: &str) -> String {
    format!("{}{run_key}", blob_prefix(dataset_name))
}

/// Stores a run's result payload, replacing any existing payload.
pub fn save_run_results(
    store: &dyn VistaStore,
    dataset_name: &str,
    run_key: &str,
    results: Value,
) -> Result<()> {
    store.save_blob(&run_blob_key(dataset_name, run_key), results)
}

/// Loads a run's result payload.
pub fn load_run_results(
    store: &dyn VistaStore,
    dataset_name: &str,
    run_key: &str,
) -> Result<Option<Value>> {
    store.load_blob(&run_blob_key(dataset_name, run_key))
}

/// Deletes a run's result payload.
pub fn delete_run_results(store: &dyn VistaStore, dataset_name: &str, run_key: &str) -> Result<()> {
    store.delete_blob(&run_blob_key(dataset_name, run_key))
}

/// Deletes every run result payload belonging to a dataset.
pub fn delete_all_run_results(store: &dyn VistaStore, dataset_name: &str) -> Result<()> {
    for key in store.list_blob_keys(&blob_prefix(dataset_name))? {
        store.delete_blob(&key)?;
    }
    Ok(())
}

/// Deep-copies every run result payload from one dataset to another.
pub fn clone_run_results(
    store: &dyn VistaStore,
    src_dataset: &str,
    dst_dataset: &str,
) -> Result<()> {
    let prefix = blob_prefix(src_dataset);
    for key in store.list_blob_keys(&prefix)? {
        let run_key = &key[prefix.len()..];
        if let Some(payload) = store.load_blob(&key)? {
            store.save_blob(&run_blob_key(dst_dataset, run_key), payload)?;
        }
    }
    Ok(())
}
