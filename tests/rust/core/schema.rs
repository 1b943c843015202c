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

//! # Vista Schema Tests
//!
//! Integration tests for the schema registry: declaration semantics,
//! ingestion-time expansion, rename round-trips, and deletion policies,
//! exercised through real datasets over the in-memory store.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test schema
//! ```

use std::sync::Arc;

use serde_json::json;
use vista::{
    VistaClient, VistaError, VistaErrorLevel, VistaFieldDescriptor, VistaFieldType,
    VistaMemoryStore, VistaSample,
};

fn new_client() -> VistaClient {
    VistaClient::new(Arc::new(VistaMemoryStore::new()))
}

/// Re-declaring a field with an identical descriptor is a no-op;
/// a conflicting descriptor fails with a schema error.
#[test]
fn test_redeclare_identical_noop_conflicting_fails() {
    let client = new_client();
    let dataset = client.create_dataset("schema-redeclare", false).unwrap();

    let descriptor = VistaFieldDescriptor::scalar(VistaFieldType::Integer);
    dataset.declare_sample_field("count", descriptor.clone()).unwrap();
    let epoch = dataset.schema_epoch().unwrap();

    // Identical: no change, no epoch bump
    dataset.declare_sample_field("count", descriptor).unwrap();
    assert_eq!(dataset.schema_epoch().unwrap(), epoch);

    let err = dataset
        .declare_sample_field("count", VistaFieldDescriptor::scalar(VistaFieldType::String))
        .unwrap_err();
    assert!(matches!(err, VistaError::Schema { .. }));
}

/// Renaming field A→B then B→A round-trips both the schema and the data.
#[test]
fn test_rename_round_trip() {
    let client = new_client();
    let dataset = client.create_dataset("schema-rename", false).unwrap();

    let mut sample = VistaSample::new("/data/001.png");
    sample.set_field("weather", json!("sunny"));
    dataset.add_sample(&mut sample).unwrap();

    let forward = vec![("weather".to_string(), "conditions".to_string())];
    dataset.rename_sample_fields(&forward).unwrap();

    let schema = dataset.sample_schema().unwrap();
    assert!(schema.has_field("conditions"));
    assert!(!schema.has_field("weather"));
    let fetched = dataset.get_sample(sample.id.as_deref().unwrap()).unwrap();
    assert_eq!(fetched.get_field("conditions"), Some(&json!("sunny")));

    let back = vec![("conditions".to_string(), "weather".to_string())];
    dataset.rename_sample_fields(&back).unwrap();

    let schema = dataset.sample_schema().unwrap();
    assert!(schema.has_field("weather"));
    assert!(!schema.has_field("conditions"));
    let fetched = dataset.get_sample(sample.id.as_deref().unwrap()).unwrap();
    assert_eq!(fetched.get_field("weather"), Some(&json!("sunny")));
}

/// Every field present on any inserted sample appears in the schema.
#[test]
fn test_expansion_covers_all_inserted_fields() {
    let client = new_client();
    let dataset = client.create_dataset("schema-expand", false).unwrap();

    let mut first = VistaSample::new("/data/001.png");
    first.set_field("weather", json!("sunny"));
    let mut second = VistaSample::new("/data/002.png");
    second.set_field("score", json!(0.75));
    second.set_field("counts", json!([1, 2, 3]));

    let mut samples = vec![first, second];
    dataset.add_samples(&mut samples).unwrap();

    let schema = dataset.sample_schema().unwrap();
    for name in ["weather", "score", "counts"] {
        assert!(schema.has_field(name), "schema is missing '{name}'");
    }
    assert_eq!(
        schema.get_field("counts").unwrap().descriptor.subfield,
        Some(VistaFieldType::Integer)
    );
}

/// A later sample whose declared field holds an incompatible value fails
/// validation instead of silently re-typing the field.
#[test]
fn test_conflicting_value_rejected_not_retyped() {
    let client = new_client();
    let dataset = client.create_dataset("schema-conflict", false).unwrap();

    let mut first = VistaSample::new("/data/001.png");
    first.set_field("score", json!(0.5));
    dataset.add_sample(&mut first).unwrap();

    let mut second = VistaSample::new("/data/002.png");
    second.set_field("score", json!("high"));
    let err = dataset.add_sample(&mut second).unwrap_err();
    assert!(matches!(err, VistaError::Schema { .. }));

    // The original declaration is untouched
    let schema = dataset.sample_schema().unwrap();
    assert_eq!(
        schema.get_field("score").unwrap().descriptor.ftype,
        VistaFieldType::Float
    );
}

/// Deleting a protected or missing field honors the per-field error level.
#[test]
fn test_delete_fields_error_levels() {
    let client = new_client();
    let dataset = client.create_dataset("schema-delete", false).unwrap();

    let mut sample = VistaSample::new("/data/001.png");
    sample.set_field("weather", json!("rainy"));
    dataset.add_sample(&mut sample).unwrap();

    let err = dataset
        .delete_sample_fields(&["filepath".to_string()], VistaErrorLevel::Raise)
        .unwrap_err();
    assert!(matches!(err, VistaError::Validation { .. }));

    let err = dataset
        .delete_sample_fields(&["missing".to_string()], VistaErrorLevel::Raise)
        .unwrap_err();
    assert!(matches!(err, VistaError::FieldNotFound { .. }));

    // Ignore skips failures and still deletes what it can
    let deleted = dataset
        .delete_sample_fields(
            &["missing".to_string(), "weather".to_string()],
            VistaErrorLevel::Ignore,
        )
        .unwrap();
    assert_eq!(deleted, vec!["weather".to_string()]);

    let fetched = dataset.get_sample(sample.id.as_deref().unwrap()).unwrap();
    assert!(fetched.get_field("weather").is_none());
}

/// Cloning a field duplicates both the declaration and the data.
#[test]
fn test_clone_field_copies_data() {
    let client = new_client();
    let dataset = client.create_dataset("schema-clone-field", false).unwrap();

    let mut sample = VistaSample::new("/data/001.png");
    sample.set_field("label", json!("cat"));
    dataset.add_sample(&mut sample).unwrap();

    let mapping = vec![("label".to_string(), "label_copy".to_string())];
    dataset.clone_sample_fields(&mapping).unwrap();

    let schema = dataset.sample_schema().unwrap();
    assert!(schema.has_field("label"));
    assert!(schema.has_field("label_copy"));

    let fetched = dataset.get_sample(sample.id.as_deref().unwrap()).unwrap();
    assert_eq!(fetched.get_field("label_copy"), Some(&json!("cat")));
    assert_eq!(fetched.get_field("label"), Some(&json!("cat")));
}

/// Schema mutations bump the epoch; a stale bound sample refreshes.
#[test]
fn test_schema_epoch_refresh() {
    let client = new_client();
    let dataset = client.create_dataset("schema-epoch", false).unwrap();

    let mut sample = VistaSample::new("/data/001.png");
    sample.set_field("weather", json!("sunny"));
    dataset.add_sample(&mut sample).unwrap();
    let bound_epoch = sample.binding().unwrap().schema_epoch;

    dataset
        .rename_sample_fields(&[("weather".to_string(), "conditions".to_string())])
        .unwrap();
    assert!(dataset.schema_epoch().unwrap() > bound_epoch);

    dataset.refresh_sample(&mut sample).unwrap();
    assert_eq!(sample.get_field("conditions"), Some(&json!("sunny")));
    assert!(sample.get_field("weather").is_none());
    assert_eq!(
        sample.binding().unwrap().schema_epoch,
        dataset.schema_epoch().unwrap()
    );
}

/// Dotted field paths rewrite embedded documents without schema entries.
#[test]
fn test_dotted_rename_rewrites_embedded_documents() {
    let client = new_client();
    let dataset = client.create_dataset("schema-dotted", false).unwrap();

    let mut sample = VistaSample::new("/data/001.png");
    sample.set_field(
        "prediction",
        json!({"_cls": "Classification", "label": "cat", "score": 0.9}),
    );
    dataset.add_sample(&mut sample).unwrap();

    dataset
        .rename_sample_fields(&[(
            "prediction.label".to_string(),
            "prediction.class_name".to_string(),
        )])
        .unwrap();

    let fetched = dataset.get_sample(sample.id.as_deref().unwrap()).unwrap();
    let prediction = fetched.get_field("prediction").unwrap();
    assert_eq!(prediction["class_name"], json!("cat"));
    assert!(prediction.get("label").is_none());
}
