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

//! # Vista Core Library
//!
//! Vista manages structured collections of richly typed records — samples,
//! optionally with per-frame sub-records for video — stored in a
//! schema-flexible document store, and exposes declarative, composable
//! views over them.
//!
//! ## Module Overview
//!
//! - **errors**: Canonical error enumeration and result alias
//! - **fields**: Typed field descriptors and value→descriptor inference
//! - **schema**: Per-collection field registries (declare/rename/clone/delete)
//! - **sample**: Generic sample and frame records with dataset bindings
//! - **document**: Codec between in-memory records and stored documents
//! - **store**: Backing-store contract, typed pipelines, in-memory engine
//! - **stages**: Composable view stages
//! - **view**: Lazily compiled stage chains and the pipeline compiler
//! - **dataset**: Client registry and the dataset lifecycle manager
//! - **merge**: Three-strategy merge engine with frame re-linking
//! - **indexes**: Index management helpers
//! - **runs**: Named run results and their blob storage
//! - **batcher**: Latency-targeting adaptive batch sizing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vista::{VistaClient, VistaMemoryStore, VistaSample};
//!
//! let client = VistaClient::new(Arc::new(VistaMemoryStore::new()));
//! let dataset = client.create_dataset("quickstart", false).unwrap();
//!
//! let mut sample = VistaSample::new("/data/001.png");
//! sample.set_field("weather", serde_json::json!("sunny"));
//! dataset.add_sample(&mut sample).unwrap();
//!
//! let sunny = dataset
//!     .view()
//!     .match_samples(serde_json::json!({"weather": "sunny"}))
//!     .count()
//!     .unwrap();
//! assert_eq!(sunny, 1);
//! ```
//!
//! ## Error Handling
//!
//! All operations return `Result<T, VistaError>` for explicit error
//! handling. Lookup misses, schema conflicts, media-type mismatches, and
//! deleted-dataset accesses are distinct variants, never conflated.

pub mod batcher;
pub mod dataset;
pub mod document;
pub mod errors;
pub mod fields;
pub mod indexes;
pub mod merge;
pub mod runs;
pub mod sample;
pub mod schema;
pub mod stages;
pub mod store;
pub mod view;

pub use errors::{Result, VistaError, VistaErrorLevel};
pub use fields::{infer_descriptor, VistaField, VistaFieldDescriptor, VistaFieldType};
pub use schema::{VistaSchema, VistaSchemaRole};
pub use sample::{VistaFrame, VistaMediaType, VistaSample};
pub use document::{document_to_frame, document_to_sample, frame_to_document, sample_to_document};
pub use store::{
    VistaDocumentMerge, VistaIndexSpec, VistaMemoryStore, VistaPipelineStep, VistaProjection,
    VistaSortOrder, VistaStore, VistaUpdate, VistaWhenMatched, VistaWhenNotMatched, VistaWriteOp,
};
pub use stages::VistaStage;
pub use view::VistaView;
pub use dataset::{
    VistaClient, VistaDataset, VistaDatasetDocument, VistaDatasetStats, VistaRunKind,
};
pub use merge::VistaMergeOptions;
pub use runs::VistaRunDocument;
pub use batcher::VistaDynamicBatcher;

/// Library version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
