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

//! # Vista Merge Tests
//!
//! Integration tests for the merge engine: all three strategies, label-list
//! element merging, conflict policies, field selection, and frame
//! re-linking on video datasets.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test merge
//! ```

use std::sync::Arc;

use serde_json::{json, Value};
use vista::{
    VistaClient, VistaDataset, VistaFrame, VistaMemoryStore, VistaMergeOptions, VistaSample,
};

fn new_client() -> VistaClient {
    VistaClient::new(Arc::new(VistaMemoryStore::new()))
}

fn detections(elements: Vec<Value>) -> Value {
    json!({"_cls": "Detections", "detections": elements})
}

fn detection(id: &str, label: &str) -> Value {
    json!({"_cls": "Detection", "id": id, "label": label})
}

fn labels_of(sample: &VistaSample, field: &str) -> Vec<String> {
    sample.get_field(field).unwrap()["detections"]
        .as_array()
        .unwrap()
        .iter()
        .map(|det| det["label"].as_str().unwrap().to_string())
        .collect()
}

fn sample_by_filepath(dataset: &VistaDataset, filepath: &str) -> VistaSample {
    dataset
        .view()
        .match_samples(json!({"filepath": filepath}))
        .first()
        .unwrap()
        .unwrap()
}

/// Merging a dataset into itself leaves counts and values unchanged.
#[test]
fn test_self_merge_is_idempotent() {
    let client = new_client();
    let dataset = client.create_dataset("merge-self", false).unwrap();

    let mut samples = Vec::new();
    for i in 0..3 {
        let mut sample = VistaSample::new(format!("/data/{i:03}.png"));
        sample.set_field("index", json!(i));
        sample.set_field("tags", json!(["train"]));
        sample.set_field(
            "ground_truth",
            detections(vec![detection(&format!("det-{i}"), "cat")]),
        );
        samples.push(sample);
    }
    dataset.add_samples(&mut samples).unwrap();

    dataset
        .merge_dataset(&dataset, &VistaMergeOptions::default())
        .unwrap();

    assert_eq!(dataset.count_samples().unwrap(), 3);
    for (i, result) in dataset.view().iter_samples().unwrap().enumerate() {
        let sample = result.unwrap();
        assert_eq!(sample.get_field("index"), Some(&json!(i)));
        assert_eq!(sample.get_field("tags"), Some(&json!(["train"])));
        assert_eq!(labels_of(&sample, "ground_truth"), vec!["cat"]);
    }
}

fn label_list_fixture(client: &VistaClient, prefix: &str) -> (VistaDataset, VistaDataset) {
    let dst = client
        .create_dataset(&format!("{prefix}-dst"), false)
        .unwrap();
    let mut sample = VistaSample::new("/data/001.png");
    sample.set_field(
        "ground_truth",
        detections(vec![detection("a", "cat"), detection("b", "dog")]),
    );
    dst.add_sample(&mut sample).unwrap();

    let src = client
        .create_dataset(&format!("{prefix}-src"), false)
        .unwrap();
    let mut sample = VistaSample::new("/data/001.png");
    sample.set_field(
        "ground_truth",
        detections(vec![detection("b", "bird"), detection("c", "fish")]),
    );
    src.add_sample(&mut sample).unwrap();

    (dst, src)
}

/// With overwrite, incoming elements replace same-id existing elements:
/// non-replaced existing elements keep their order, incoming follow.
#[test]
fn test_label_list_merge_overwrite() {
    let client = new_client();
    let (dst, src) = label_list_fixture(&client, "merge-ll-overwrite");

    dst.merge_dataset(&src, &VistaMergeOptions::default()).unwrap();

    assert_eq!(dst.count_samples().unwrap(), 1);
    let merged = sample_by_filepath(&dst, "/data/001.png");
    assert_eq!(labels_of(&merged, "ground_truth"), vec!["cat", "bird", "fish"]);
}

/// Without overwrite, existing elements are kept verbatim and only
/// incoming elements with unseen ids are appended.
#[test]
fn test_label_list_merge_preserve_existing() {
    let client = new_client();
    let (dst, src) = label_list_fixture(&client, "merge-ll-preserve");

    let options = VistaMergeOptions {
        overwrite: false,
        ..Default::default()
    };
    dst.merge_dataset(&src, &options).unwrap();

    let merged = sample_by_filepath(&dst, "/data/001.png");
    assert_eq!(labels_of(&merged, "ground_truth"), vec!["cat", "dog", "fish"]);
}

/// List fields merge by order-preserving union.
#[test]
fn test_list_union_merge() {
    let client = new_client();
    let dst = client.create_dataset("merge-list-dst", false).unwrap();
    let mut sample = VistaSample::new("/data/001.png");
    sample.set_field("tags", json!(["train", "reviewed"]));
    dst.add_sample(&mut sample).unwrap();

    let src = client.create_dataset("merge-list-src", false).unwrap();
    let mut sample = VistaSample::new("/data/001.png");
    sample.set_field("tags", json!(["reviewed", "hard"]));
    src.add_sample(&mut sample).unwrap();

    dst.merge_dataset(&src, &VistaMergeOptions::default()).unwrap();

    let merged = sample_by_filepath(&dst, "/data/001.png");
    assert_eq!(
        merged.get_field("tags"),
        Some(&json!(["train", "reviewed", "hard"]))
    );
}

/// `skip_existing` leaves matched samples untouched; `insert_new: false`
/// discards unmatched source samples.
#[test]
fn test_conflict_policies() {
    let client = new_client();
    let dst = client.create_dataset("merge-policy-dst", false).unwrap();
    let mut samples = vec![VistaSample::new("/data/001.png")];
    samples[0].set_field("weather", json!("sunny"));
    dst.add_samples(&mut samples).unwrap();

    let src = client.create_dataset("merge-policy-src", false).unwrap();
    let mut first = VistaSample::new("/data/001.png");
    first.set_field("weather", json!("rainy"));
    let second = VistaSample::new("/data/002.png");
    let mut samples = vec![first, second];
    src.add_samples(&mut samples).unwrap();

    let options = VistaMergeOptions {
        skip_existing: true,
        ..Default::default()
    };
    dst.merge_dataset(&src, &options).unwrap();
    assert_eq!(dst.count_samples().unwrap(), 2);
    let kept = sample_by_filepath(&dst, "/data/001.png");
    assert_eq!(kept.get_field("weather"), Some(&json!("sunny")));

    let dst2 = client.create_dataset("merge-policy-dst2", false).unwrap();
    let mut samples = vec![VistaSample::new("/data/001.png")];
    dst2.add_samples(&mut samples).unwrap();

    let options = VistaMergeOptions {
        insert_new: false,
        ..Default::default()
    };
    dst2.merge_dataset(&src, &options).unwrap();
    assert_eq!(dst2.count_samples().unwrap(), 1);
    let merged = sample_by_filepath(&dst2, "/data/001.png");
    assert_eq!(merged.get_field("weather"), Some(&json!("rainy")));
}

/// A field selection with renames merges only the selected fields, under
/// their destination names, and leaves other destination fields alone.
#[test]
fn test_field_selection_with_renames() {
    let client = new_client();
    let dst = client.create_dataset("merge-select-dst", false).unwrap();
    let mut sample = VistaSample::new("/data/001.png");
    sample.set_field("tags", json!(["keep"]));
    dst.add_sample(&mut sample).unwrap();

    let src = client.create_dataset("merge-select-src", false).unwrap();
    let mut sample = VistaSample::new("/data/001.png");
    sample.set_field("weather", json!("sunny"));
    sample.set_field("score", json!(0.9));
    sample.set_field("tags", json!(["drop"]));
    src.add_sample(&mut sample).unwrap();

    let options = VistaMergeOptions {
        fields: Some(vec![("weather".to_string(), "conditions".to_string())]),
        ..Default::default()
    };
    dst.merge_dataset(&src, &options).unwrap();

    let schema = dst.sample_schema().unwrap();
    assert!(schema.has_field("conditions"));
    assert!(!schema.has_field("weather"));
    assert!(!schema.has_field("score"));

    let merged = sample_by_filepath(&dst, "/data/001.png");
    assert_eq!(merged.get_field("conditions"), Some(&json!("sunny")));
    assert!(merged.get_field("score").is_none());
    assert_eq!(merged.get_field("tags"), Some(&json!(["keep"])));
}

/// Omitted fields never cross the merge.
#[test]
fn test_omit_fields() {
    let client = new_client();
    let dst = client.create_dataset("merge-omit-dst", false).unwrap();
    let mut samples = vec![VistaSample::new("/data/001.png")];
    dst.add_samples(&mut samples).unwrap();

    let src = client.create_dataset("merge-omit-src", false).unwrap();
    let mut sample = VistaSample::new("/data/001.png");
    sample.set_field("weather", json!("sunny"));
    sample.set_field("score", json!(0.9));
    src.add_sample(&mut sample).unwrap();

    let options = VistaMergeOptions {
        omit_fields: Some(vec!["score".to_string()]),
        ..Default::default()
    };
    dst.merge_dataset(&src, &options).unwrap();

    let merged = sample_by_filepath(&dst, "/data/001.png");
    assert_eq!(merged.get_field("weather"), Some(&json!("sunny")));
    assert!(merged.get_field("score").is_none());
}

fn video_sample(filepath: &str, frame_numbers: &[u32]) -> VistaSample {
    let mut sample = VistaSample::new(filepath);
    for &number in frame_numbers {
        let mut frame = VistaFrame::new();
        frame.set_field("quality", json!(number as f64));
        sample.frames.set(number, frame);
    }
    sample
}

/// After a video merge, every frame's back-reference resolves to an
/// existing destination sample and no temporary keys remain.
#[test]
fn test_video_merge_frame_consistency() {
    let client = new_client();
    let dst = client.create_dataset("merge-video-dst", false).unwrap();
    let mut samples = vec![
        video_sample("/data/001.mp4", &[1, 2]),
        video_sample("/data/002.mp4", &[1]),
    ];
    dst.add_samples(&mut samples).unwrap();

    let src = client.create_dataset("merge-video-src", false).unwrap();
    let mut samples = vec![
        video_sample("/data/002.mp4", &[1, 2]),
        video_sample("/data/003.mp4", &[1]),
    ];
    src.add_samples(&mut samples).unwrap();

    dst.merge_dataset(&src, &VistaMergeOptions::default()).unwrap();
    assert_eq!(dst.count_samples().unwrap(), 3);

    let store = dst.store();
    let sample_ids: Vec<String> = store
        .find(&dst.sample_collection_name().unwrap(), &json!({}))
        .unwrap()
        .iter()
        .map(|doc| doc["_id"].as_str().unwrap().to_string())
        .collect();

    let frame_docs = store
        .find(&dst.frame_collection_name().unwrap(), &json!({}))
        .unwrap();
    // 001: 2 frames, 002: union of {1} and {1,2}, 003: 1 frame
    assert_eq!(frame_docs.len(), 5);
    for doc in &frame_docs {
        let sample_id = doc["_sample_id"].as_str().unwrap();
        assert!(sample_ids.contains(&sample_id.to_string()));
        assert!(doc.get("_merge_key").is_none());
    }

    // Overlapping frame 1 of 002 was merged, not duplicated
    let merged = sample_by_filepath(&dst, "/data/002.mp4");
    assert_eq!(merged.frames.len(), 2);
}

/// The keyed in-memory strategy updates matches and inserts the rest.
#[test]
fn test_keyed_in_memory_merge() {
    let client = new_client();
    let dataset = client.create_dataset("merge-keyed", false).unwrap();
    let mut first = VistaSample::new("/data/001.png");
    first.set_field("weather", json!("cloudy"));
    let mut samples = vec![first];
    dataset.add_samples(&mut samples).unwrap();

    let mut updated = VistaSample::new("/data/001.png");
    updated.set_field("weather", json!("sunny"));
    updated.set_field("score", json!(0.7));
    let mut fresh = VistaSample::new("/data/002.png");
    fresh.set_field("weather", json!("rainy"));

    dataset
        .merge_samples_by_key(
            vec![updated, fresh],
            |sample| sample.filepath().to_string(),
            &VistaMergeOptions::default(),
        )
        .unwrap();

    assert_eq!(dataset.count_samples().unwrap(), 2);
    let merged = sample_by_filepath(&dataset, "/data/001.png");
    assert_eq!(merged.get_field("weather"), Some(&json!("sunny")));
    assert_eq!(merged.get_field("score"), Some(&json!(0.7)));
    let inserted = sample_by_filepath(&dataset, "/data/002.png");
    assert_eq!(inserted.get_field("weather"), Some(&json!("rainy")));
}

/// The key function is applied to decoded destination samples as well as
/// incoming ones, so a normalizing key matches samples whose stored field
/// values differ from the incoming spelling.
#[test]
fn test_keyed_merge_applies_key_function_to_destination() {
    let client = new_client();
    let dataset = client.create_dataset("merge-keyed-norm", false).unwrap();
    let mut existing = VistaSample::new("/data/A.PNG");
    existing.set_field("weather", json!("cloudy"));
    let mut samples = vec![existing];
    dataset.add_samples(&mut samples).unwrap();

    let mut incoming = VistaSample::new("/data/a.png");
    incoming.set_field("weather", json!("sunny"));

    dataset
        .merge_samples_by_key(
            vec![incoming],
            |sample| sample.filepath().to_lowercase(),
            &VistaMergeOptions::default(),
        )
        .unwrap();

    // Matched and merged, not inserted as a second sample
    assert_eq!(dataset.count_samples().unwrap(), 1);
    let merged = sample_by_filepath(&dataset, "/data/a.png");
    assert_eq!(merged.get_field("weather"), Some(&json!("sunny")));
}

/// With schema expansion disabled, the keyed strategy rejects undeclared
/// incoming fields instead of silently declaring them.
#[test]
fn test_keyed_merge_rejects_undeclared_fields_without_expansion() {
    let client = new_client();
    let dataset = client.create_dataset("merge-keyed-frozen", false).unwrap();
    let mut existing = VistaSample::new("/data/001.png");
    existing.set_field("weather", json!("cloudy"));
    let mut samples = vec![existing];
    dataset.add_samples(&mut samples).unwrap();

    let options = VistaMergeOptions {
        expand_schema: false,
        ..Default::default()
    };

    let mut undeclared = VistaSample::new("/data/001.png");
    undeclared.set_field("score", json!(0.9));
    let err = dataset
        .merge_samples_by_key(
            vec![undeclared],
            |sample| sample.filepath().to_string(),
            &options,
        )
        .unwrap_err();
    assert!(matches!(err, vista::VistaError::Schema { .. }));
    assert!(!dataset.sample_schema().unwrap().has_field("score"));

    // Declared fields still merge normally under the same options
    let mut declared = VistaSample::new("/data/001.png");
    declared.set_field("weather", json!("sunny"));
    dataset
        .merge_samples_by_key(
            vec![declared],
            |sample| sample.filepath().to_string(),
            &options,
        )
        .unwrap();
    let merged = sample_by_filepath(&dataset, "/data/001.png");
    assert_eq!(merged.get_field("weather"), Some(&json!("sunny")));
}

/// A video merge that fails between the frame and sample phases still
/// strips the temporary frame keys and indexes from both sides.
#[test]
fn test_failed_video_merge_strips_frame_stamps() {
    let client = new_client();
    let dst = client.create_dataset("merge-abort-dst", false).unwrap();
    let mut sample = video_sample("/data/001.mp4", &[1]);
    sample.set_field("external_id", json!("cam-7"));
    dst.add_sample(&mut sample).unwrap();
    dst.create_sample_index("external_id", true).unwrap();

    let src = client.create_dataset("merge-abort-src", false).unwrap();
    let mut sample = video_sample("/data/002.mp4", &[1]);
    sample.set_field("external_id", json!("cam-7"));
    src.add_sample(&mut sample).unwrap();

    // New filepath but duplicate external_id: the sample phase cannot insert
    let err = dst
        .merge_dataset(&src, &VistaMergeOptions::default())
        .unwrap_err();
    assert!(matches!(err, vista::VistaError::BulkWrite { .. }));

    let store = dst.store();
    for collection in [
        dst.frame_collection_name().unwrap(),
        src.frame_collection_name().unwrap(),
    ] {
        for doc in store.find(&collection, &json!({})).unwrap() {
            assert!(doc.get("_merge_key").is_none());
        }
        let indexes = store.list_indexes(&collection).unwrap();
        assert!(indexes
            .iter()
            .all(|index| index.name != "_merge_key_frame_number"));
    }
}

/// The staging strategy matches the pipeline strategy's results and
/// discards its staging dataset afterwards.
#[test]
fn test_staged_merge_discards_staging_dataset() {
    let client = new_client();
    let dataset = client.create_dataset("merge-staged", false).unwrap();
    let mut samples = vec![VistaSample::new("/data/001.png")];
    dataset.add_samples(&mut samples).unwrap();

    let mut updated = VistaSample::new("/data/001.png");
    updated.set_field("weather", json!("sunny"));
    let fresh = VistaSample::new("/data/002.png");

    dataset
        .merge_samples(vec![updated, fresh], &VistaMergeOptions::default())
        .unwrap();

    assert_eq!(dataset.count_samples().unwrap(), 2);
    let merged = sample_by_filepath(&dataset, "/data/001.png");
    assert_eq!(merged.get_field("weather"), Some(&json!("sunny")));

    let names = client.list_datasets().unwrap();
    assert_eq!(names, vec!["merge-staged".to_string()]);
}

/// Dataset-level info merges fill-only by default and replace under
/// `overwrite_info`.
#[test]
fn test_dataset_doc_info_merge() {
    let client = new_client();
    let dst = client.create_dataset("merge-info-dst", false).unwrap();
    let mut info = serde_json::Map::new();
    info.insert("author".to_string(), json!("alice"));
    dst.set_info(info).unwrap();

    let src = client.create_dataset("merge-info-src", false).unwrap();
    let mut info = serde_json::Map::new();
    info.insert("author".to_string(), json!("bob"));
    info.insert("source".to_string(), json!("capture-rig"));
    src.set_info(info).unwrap();

    dst.merge_dataset_doc(&src, &VistaMergeOptions::default())
        .unwrap();
    let info = dst.info().unwrap();
    assert_eq!(info.get("author"), Some(&json!("alice")));
    assert_eq!(info.get("source"), Some(&json!("capture-rig")));

    let options = VistaMergeOptions {
        overwrite_info: true,
        ..Default::default()
    };
    dst.merge_dataset_doc(&src, &options).unwrap();
    let info = dst.info().unwrap();
    assert_eq!(info.get("author"), Some(&json!("bob")));
}

/// Merging datasets of different media types fails up front.
#[test]
fn test_media_type_mismatch_rejected() {
    let client = new_client();
    let dst = client.create_dataset("merge-media-dst", false).unwrap();
    let mut samples = vec![VistaSample::new("/data/001.png")];
    dst.add_samples(&mut samples).unwrap();

    let src = client.create_dataset("merge-media-src", false).unwrap();
    let mut samples = vec![video_sample("/data/001.mp4", &[1])];
    src.add_samples(&mut samples).unwrap();

    let err = dst
        .merge_dataset(&src, &VistaMergeOptions::default())
        .unwrap_err();
    assert!(matches!(err, vista::VistaError::MediaType { .. }));
}
