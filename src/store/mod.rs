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

//! # Vista Store Module
//!
//! This module defines the backing-store contract that the rest of the
//! library is written against, together with the in-memory engine used by
//! the test suite.
//!
//! ## Design Principles
//!
//! - **One seam**: [`VistaStore`] is the single trait boundary between the
//!   dataset layer and document storage; everything above it speaks typed
//!   pipelines and JSON documents
//! - **Object safety**: Stores are held as `Arc<dyn VistaStore>` so a
//!   client can be constructed over any implementation
//! - **Cursors are fallible**: [`VistaCursor::next_document`] may fail with
//!   `CursorExpired` mid-stream; callers that need resilience resume by
//!   re-issuing their pipeline with a skip

pub mod memory;
pub mod pipeline;

pub use memory::VistaMemoryStore;
pub use pipeline::{
    VistaDocumentMerge, VistaPipelineStep, VistaProjection, VistaSortOrder, VistaUpdate,
    VistaWhenMatched, VistaWhenNotMatched, VistaWriteOp,
};

use serde_json::Value;

use crate::errors::Result;

/// Kind of a single index key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VistaIndexKind {
    Ascending,
    Descending,
    /// Geospatial index over a `GeoPoint` field.
    Sphere2d,
}

/// Declaration of a collection index.
#[derive(Clone, Debug)]
pub struct VistaIndexSpec {
    pub name: String,
    pub keys: Vec<(String, VistaIndexKind)>,
    pub unique: bool,
}

impl VistaIndexSpec {
    /// Single ascending-key index named after its field.
    pub fn on_field(field: impl Into<String>, unique: bool) -> Self {
        let field = field.into();
        VistaIndexSpec {
            name: field.clone(),
            keys: vec![(field, VistaIndexKind::Ascending)],
            unique,
        }
    }

    /// Compound ascending index named `a_b_...` after its fields.
    pub fn compound(fields: &[&str], unique: bool) -> Self {
        VistaIndexSpec {
            name: fields.join("_"),
            keys: fields
                .iter()
                .map(|field| (field.to_string(), VistaIndexKind::Ascending))
                .collect(),
            unique,
        }
    }

    /// Geospatial index named after its field.
    pub fn sphere2d(field: impl Into<String>) -> Self {
        let field = field.into();
        VistaIndexSpec {
            name: field.clone(),
            keys: vec![(field, VistaIndexKind::Sphere2d)],
            unique: false,
        }
    }
}

/// Physical statistics of one collection.
#[derive(Clone, Copy, Debug, Default)]
pub struct VistaCollectionStats {
    pub count: u64,
    pub size_bytes: u64,
}

/// Streaming handle over aggregation results.
pub trait VistaCursor {
    /// Returns the next document, `None` at end of stream.
    ///
    /// May fail with [`VistaError::CursorExpired`] on a stale server-side
    /// cursor; the stream is unusable afterwards.
    ///
    /// [`VistaError::CursorExpired`]: crate::errors::VistaError::CursorExpired
    fn next_document(&mut self) -> Result<Option<Value>>;
}

/// Contract a document store must satisfy to back Vista datasets.
///
/// Documents are JSON objects whose identity field is `_id`. Implementations
/// must enforce declared unique indexes on every write path, including
/// `Merge` pipeline steps.
pub trait VistaStore: Send + Sync {
    /// Inserts documents, assigning `_id`s where absent, and returns the ids
    /// in input order.
    ///
    /// When `ordered`, stops at the first failure; either way only the first
    /// underlying error is surfaced.
    fn insert_many(&self, collection: &str, docs: Vec<Value>, ordered: bool)
        -> Result<Vec<String>>;

    /// Executes a batch of write operations.
    fn bulk_write(&self, collection: &str, ops: Vec<VistaWriteOp>, ordered: bool) -> Result<()>;

    /// Returns all documents matching the filter.
    fn find(&self, collection: &str, filter: &Value) -> Result<Vec<Value>>;

    /// Returns the first document matching the filter.
    fn find_one(&self, collection: &str, filter: &Value) -> Result<Option<Value>> {
        Ok(self.find(collection, filter)?.into_iter().next())
    }

    /// Deletes all documents matching the filter; returns the count.
    fn delete_many(&self, collection: &str, filter: &Value) -> Result<u64>;

    /// Applies an update to all documents matching the filter.
    fn update_many(&self, collection: &str, filter: &Value, update: &VistaUpdate) -> Result<u64>;

    /// Returns the distinct non-null values of a field.
    fn distinct(&self, collection: &str, field: &str) -> Result<Vec<Value>>;

    /// Creates an index; a no-op if an identical index already exists.
    fn create_index(&self, collection: &str, spec: &VistaIndexSpec) -> Result<()>;

    /// Drops an index by name.
    fn drop_index(&self, collection: &str, name: &str) -> Result<()>;

    /// Lists the indexes declared on a collection.
    fn list_indexes(&self, collection: &str) -> Result<Vec<VistaIndexSpec>>;

    /// Executes a typed aggregation pipeline.
    fn aggregate(
        &self,
        collection: &str,
        pipeline: &[VistaPipelineStep],
    ) -> Result<Box<dyn VistaCursor>>;

    /// Names of every collection in the store.
    fn list_collection_names(&self) -> Result<Vec<String>>;

    /// Physical statistics for one collection.
    fn collection_stats(&self, collection: &str) -> Result<VistaCollectionStats>;

    /// Drops a collection and its indexes.
    fn drop_collection(&self, collection: &str) -> Result<()>;

    /// Stores a named blob, replacing any existing value.
    fn save_blob(&self, key: &str, value: Value) -> Result<()>;

    /// Loads a named blob.
    fn load_blob(&self, key: &str) -> Result<Option<Value>>;

    /// Deletes a named blob; a no-op when absent.
    fn delete_blob(&self, key: &str) -> Result<()>;

    /// Lists blob keys beginning with the given prefix.
    fn list_blob_keys(&self, prefix: &str) -> Result<Vec<String>>;
}
