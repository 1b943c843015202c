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

//! # Vista View Tests
//!
//! Integration tests for view compilation and execution: frame-attachment
//! rules, stage composition, streaming iteration, and cursor-expiry
//! recovery.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test view
//! ```

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use vista::store::{VistaCollectionStats, VistaCursor, VistaIndexSpec};
use vista::{
    VistaClient, VistaDataset, VistaError, VistaFrame, VistaMemoryStore, VistaPipelineStep,
    VistaSample, VistaSortOrder, VistaStore, VistaUpdate, VistaWriteOp,
};

fn new_client() -> VistaClient {
    VistaClient::new(Arc::new(VistaMemoryStore::new()))
}

fn image_dataset(client: &VistaClient, name: &str, count: usize) -> VistaDataset {
    let dataset = client.create_dataset(name, false).unwrap();
    let mut samples: Vec<VistaSample> = (0..count)
        .map(|i| {
            let mut sample = VistaSample::new(format!("/data/{i:03}.png"));
            sample.set_field("index", json!(i));
            sample
        })
        .collect();
    dataset.add_samples(&mut samples).unwrap();
    dataset
}

fn video_dataset(client: &VistaClient, name: &str) -> VistaDataset {
    let dataset = client.create_dataset(name, false).unwrap();
    let mut samples = Vec::new();
    for i in 0..3 {
        let mut sample = VistaSample::new(format!("/data/{i:03}.mp4"));
        sample.set_field("index", json!(i));
        for frame_number in 1..=4u32 {
            let mut frame = VistaFrame::new();
            frame.set_field("quality", json!(frame_number as f64 / 10.0));
            sample.frames.set(frame_number, frame);
        }
        samples.push(sample);
    }
    dataset.add_samples(&mut samples).unwrap();
    dataset
}

fn count_lookups(pipeline: &[VistaPipelineStep]) -> usize {
    pipeline
        .iter()
        .filter(|step| matches!(step, VistaPipelineStep::Lookup { .. }))
        .count()
}

/// Sample-level stages on a video dataset compile without a frames join.
#[test]
fn test_sample_level_stages_skip_frames_join() {
    let client = new_client();
    let dataset = video_dataset(&client, "view-no-join");

    let view = dataset
        .view()
        .select_fields(vec!["index".to_string()])
        .limit(5);
    let pipeline = view.compile(false, true, false).unwrap();
    assert_eq!(count_lookups(&pipeline), 0);
}

/// Any frame-level stage forces exactly one frames join, prepended and
/// sorted ascending by frame number, no matter how many stages ask.
#[test]
fn test_frame_stage_forces_single_join() {
    let client = new_client();
    let dataset = video_dataset(&client, "view-one-join");

    let view = dataset
        .view()
        .match_frames(json!({"quality": {"$gt": 0.1}}))
        .match_frames(json!({"quality": {"$lt": 0.9}}))
        .limit(5);
    let pipeline = view.compile(false, false, false).unwrap();
    assert_eq!(count_lookups(&pipeline), 1);

    match &pipeline[0] {
        VistaPipelineStep::Lookup {
            as_field, sort, ..
        } => {
            assert_eq!(as_field, "frames");
            assert_eq!(
                sort,
                &Some(("frame_number".to_string(), VistaSortOrder::Ascending))
            );
        }
        other => panic!("expected a leading frames join, got {other:?}"),
    }
}

/// Non-video datasets force all frame-attachment flags off.
#[test]
fn test_image_dataset_never_attaches_frames() {
    let client = new_client();
    let dataset = image_dataset(&client, "view-image", 3);

    let pipeline = dataset.view().compile(true, false, true).unwrap();
    assert_eq!(count_lookups(&pipeline), 0);
    assert!(!pipeline
        .iter()
        .any(|step| matches!(step, VistaPipelineStep::Unwind(_))));
}

/// Detached compilation appends removal of the frames array.
#[test]
fn test_detach_appends_unset() {
    let client = new_client();
    let dataset = video_dataset(&client, "view-detach");

    let view = dataset.view().match_frames(json!({"quality": {"$gt": 0.0}}));
    let pipeline = view.compile(true, true, false).unwrap();
    match pipeline.last() {
        Some(VistaPipelineStep::Unset(fields)) => {
            assert_eq!(fields, &vec!["frames".to_string()]);
        }
        other => panic!("expected trailing unset of frames, got {other:?}"),
    }
}

/// Frames-only compilation ends in project / unwind / replace-root.
#[test]
fn test_frames_only_tail() {
    let client = new_client();
    let dataset = video_dataset(&client, "view-frames-only");

    let pipeline = dataset.view().compile(false, false, true).unwrap();
    assert_eq!(count_lookups(&pipeline), 1);

    let tail = &pipeline[pipeline.len() - 2..];
    assert!(matches!(tail[0], VistaPipelineStep::Unwind(_)));
    assert!(matches!(tail[1], VistaPipelineStep::ReplaceRoot(_)));
}

/// Filters, sorts, skips, and limits compose over real data.
#[test]
fn test_view_execution() {
    let client = new_client();
    let dataset = image_dataset(&client, "view-exec", 10);

    let view = dataset
        .view()
        .match_samples(json!({"index": {"$gte": 3}}))
        .sort_by("index", VistaSortOrder::Descending)
        .skip(1)
        .limit(3);

    assert_eq!(view.count().unwrap(), 3);
    let values = view.values("index").unwrap();
    assert_eq!(values, vec![json!(8), json!(7), json!(6)]);

    let first = view.first().unwrap().unwrap();
    assert_eq!(first.get_field("index"), Some(&json!(8)));
}

/// Iterated video samples carry their frames, ordered by frame number.
#[test]
fn test_iter_samples_attaches_frames() {
    let client = new_client();
    let dataset = video_dataset(&client, "view-iter-frames");

    for result in dataset.view().iter_samples().unwrap() {
        let sample = result.unwrap();
        assert_eq!(sample.frames.len(), 4);
        let numbers: Vec<u32> = sample.frames.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }
}

/// Frame filters keep samples with at least one matching frame.
#[test]
fn test_match_frames_keeps_matching_samples() {
    let client = new_client();
    let dataset = video_dataset(&client, "view-match-frames");

    let all = dataset.view().match_frames(json!({"quality": {"$gt": 0.35}}));
    assert_eq!(all.count().unwrap(), 3);

    let none = dataset.view().match_frames(json!({"quality": {"$gt": 0.9}}));
    assert_eq!(none.count().unwrap(), 0);
}

/// Absent fields surface as nulls in extracted value lists.
#[test]
fn test_values_null_for_absent() {
    let client = new_client();
    let dataset = client.create_dataset("view-values-null", false).unwrap();

    let mut first = VistaSample::new("/data/001.png");
    first.set_field("score", json!(0.5));
    let second = VistaSample::new("/data/002.png");
    let mut samples = vec![first, second];
    dataset.add_samples(&mut samples).unwrap();

    let values = dataset.view().values("score").unwrap();
    assert_eq!(values, vec![json!(0.5), Value::Null]);
}

/// Dotted paths extract values out of embedded documents.
#[test]
fn test_values_dotted_path() {
    let client = new_client();
    let dataset = client.create_dataset("view-values-dotted", false).unwrap();

    let mut first = VistaSample::new("/data/001.png");
    first.set_field(
        "prediction",
        json!({"_cls": "Classification", "label": "cat", "confidence": 0.9}),
    );
    let mut second = VistaSample::new("/data/002.png");
    second.set_field(
        "prediction",
        json!({"_cls": "Classification", "label": "dog", "confidence": 0.4}),
    );
    let third = VistaSample::new("/data/003.png");
    let mut samples = vec![first, second, third];
    dataset.add_samples(&mut samples).unwrap();

    let labels = dataset.view().values("prediction.label").unwrap();
    assert_eq!(labels, vec![json!("cat"), json!("dog"), Value::Null]);
}

/// Store wrapper whose first aggregation cursor expires after N documents.
struct ExpiringStore {
    inner: Arc<VistaMemoryStore>,
    expire_after: Mutex<Option<usize>>,
}

struct ExpiringCursor {
    inner: Box<dyn VistaCursor>,
    remaining: usize,
}

impl VistaCursor for ExpiringCursor {
    fn next_document(&mut self) -> vista::Result<Option<Value>> {
        if self.remaining == 0 {
            return Err(VistaError::CursorExpired);
        }
        self.remaining -= 1;
        self.inner.next_document()
    }
}

impl VistaStore for ExpiringStore {
    fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Value>,
        ordered: bool,
    ) -> vista::Result<Vec<String>> {
        self.inner.insert_many(collection, docs, ordered)
    }

    fn bulk_write(
        &self,
        collection: &str,
        ops: Vec<VistaWriteOp>,
        ordered: bool,
    ) -> vista::Result<()> {
        self.inner.bulk_write(collection, ops, ordered)
    }

    fn find(&self, collection: &str, filter: &Value) -> vista::Result<Vec<Value>> {
        self.inner.find(collection, filter)
    }

    fn delete_many(&self, collection: &str, filter: &Value) -> vista::Result<u64> {
        self.inner.delete_many(collection, filter)
    }

    fn update_many(
        &self,
        collection: &str,
        filter: &Value,
        update: &VistaUpdate,
    ) -> vista::Result<u64> {
        self.inner.update_many(collection, filter, update)
    }

    fn distinct(&self, collection: &str, field: &str) -> vista::Result<Vec<Value>> {
        self.inner.distinct(collection, field)
    }

    fn create_index(&self, collection: &str, spec: &VistaIndexSpec) -> vista::Result<()> {
        self.inner.create_index(collection, spec)
    }

    fn drop_index(&self, collection: &str, name: &str) -> vista::Result<()> {
        self.inner.drop_index(collection, name)
    }

    fn list_indexes(&self, collection: &str) -> vista::Result<Vec<VistaIndexSpec>> {
        self.inner.list_indexes(collection)
    }

    fn aggregate(
        &self,
        collection: &str,
        pipeline: &[VistaPipelineStep],
    ) -> vista::Result<Box<dyn VistaCursor>> {
        let cursor = self.inner.aggregate(collection, pipeline)?;
        let mut expire_after = self
            .expire_after
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match expire_after.take() {
            Some(remaining) => Ok(Box::new(ExpiringCursor {
                inner: cursor,
                remaining,
            })),
            None => Ok(cursor),
        }
    }

    fn list_collection_names(&self) -> vista::Result<Vec<String>> {
        self.inner.list_collection_names()
    }

    fn collection_stats(&self, collection: &str) -> vista::Result<VistaCollectionStats> {
        self.inner.collection_stats(collection)
    }

    fn drop_collection(&self, collection: &str) -> vista::Result<()> {
        self.inner.drop_collection(collection)
    }

    fn save_blob(&self, key: &str, value: Value) -> vista::Result<()> {
        self.inner.save_blob(key, value)
    }

    fn load_blob(&self, key: &str) -> vista::Result<Option<Value>> {
        self.inner.load_blob(key)
    }

    fn delete_blob(&self, key: &str) -> vista::Result<()> {
        self.inner.delete_blob(key)
    }

    fn list_blob_keys(&self, prefix: &str) -> vista::Result<Vec<String>> {
        self.inner.list_blob_keys(prefix)
    }
}

/// A mid-stream cursor expiry resumes by skipping the consumed count; the
/// iterator yields every sample exactly once.
#[test]
fn test_iteration_resumes_after_cursor_expiry() {
    let store = Arc::new(ExpiringStore {
        inner: Arc::new(VistaMemoryStore::new()),
        expire_after: Mutex::new(None),
    });
    let client = VistaClient::new(store.clone());
    let dataset = image_dataset(&client, "view-expiry", 8);

    *store
        .expire_after
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(3);

    let view = dataset.view().sort_by("index", VistaSortOrder::Ascending);
    let indexes: Vec<Value> = view
        .iter_samples()
        .unwrap()
        .map(|result| result.unwrap().get_field("index").cloned().unwrap())
        .collect();

    let expected: Vec<Value> = (0..8).map(|i| json!(i)).collect();
    assert_eq!(indexes, expected);
}
