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

//! # Vista Memory Store Module
//!
//! Complete in-memory [`VistaStore`] implementation. This is the engine the
//! test suite runs against; it enforces declared unique indexes on every
//! write path and executes every typed pipeline step, including `Merge`
//! upserts and `Out` replacement.
//!
//! Documents are stored in insertion order so unsorted reads are
//! deterministic.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::{Result, VistaError};
use crate::store::pipeline::{
    collect_path_values, compare_sort_values, eval_filter, get_path, merge_documents, set_nested,
    VistaPipelineStep, VistaProjection, VistaSortOrder, VistaUpdate, VistaWhenMatched,
    VistaWhenNotMatched, VistaWriteOp,
};
use crate::store::{VistaCollectionStats, VistaCursor, VistaIndexSpec, VistaStore};

#[derive(Default)]
struct MemoryCollection {
    docs: Vec<Value>,
    indexes: Vec<VistaIndexSpec>,
}

#[derive(Default)]
struct MemoryInner {
    collections: HashMap<String, MemoryCollection>,
    blobs: BTreeMap<String, Value>,
}

/// In-memory document store backing tests and ephemeral datasets.
#[derive(Default)]
pub struct VistaMemoryStore {
    inner: Mutex<MemoryInner>,
}

impl VistaMemoryStore {
    pub fn new() -> Self {
        VistaMemoryStore::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| VistaError::store("store mutex poisoned"))
    }
}

fn new_object_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Index key of a document; missing components index as null.
fn index_key(doc: &Value, spec: &VistaIndexSpec) -> Vec<Value> {
    spec.keys
        .iter()
        .map(|(field, _)| get_path(doc, field).cloned().unwrap_or(Value::Null))
        .collect()
}

fn doc_id(doc: &Value) -> Option<&Value> {
    doc.as_object().and_then(|map| map.get("_id"))
}

impl MemoryCollection {
    /// Checks every unique index against a candidate document.
    ///
    /// `exclude_id` skips the document being replaced in place.
    fn check_unique(&self, candidate: &Value, exclude_id: Option<&Value>) -> Result<()> {
        for spec in self.indexes.iter().filter(|spec| spec.unique) {
            let key = index_key(candidate, spec);
            for existing in &self.docs {
                if let (Some(excluded), Some(id)) = (exclude_id, doc_id(existing)) {
                    if excluded == id {
                        continue;
                    }
                }
                if index_key(existing, spec) == key {
                    return Err(VistaError::bulk_write(format!(
                        "duplicate key for unique index '{}'",
                        spec.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn insert(&mut self, mut doc: Value) -> Result<String> {
        let map = doc
            .as_object_mut()
            .ok_or_else(|| VistaError::store("documents must be objects"))?;
        let id = match map.get("_id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = new_object_id();
                map.insert("_id".to_string(), Value::String(id.clone()));
                id
            }
        };

        self.check_unique(&doc, None)?;
        self.docs.push(doc);
        Ok(id)
    }

    fn position(&self, filter: &Value) -> Option<usize> {
        self.docs.iter().position(|doc| eval_filter(doc, filter))
    }
}

impl VistaStore for VistaMemoryStore {
    fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Value>,
        ordered: bool,
    ) -> Result<Vec<String>> {
        let mut inner = self.lock()?;
        let coll = inner.collections.entry(collection.to_string()).or_default();

        let mut ids = Vec::with_capacity(docs.len());
        let mut first_error = None;
        for doc in docs {
            match coll.insert(doc) {
                Ok(id) => ids.push(id),
                Err(err) => {
                    if ordered {
                        return Err(err);
                    }
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(ids),
        }
    }

    fn bulk_write(&self, collection: &str, ops: Vec<VistaWriteOp>, ordered: bool) -> Result<()> {
        let mut inner = self.lock()?;
        let coll = inner.collections.entry(collection.to_string()).or_default();

        let mut first_error = None;
        for op in ops {
            let outcome = apply_write_op(coll, op);
            if let Err(err) = outcome {
                if ordered {
                    return Err(err);
                }
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn find(&self, collection: &str, filter: &Value) -> Result<Vec<Value>> {
        let inner = self.lock()?;
        Ok(inner
            .collections
            .get(collection)
            .map(|coll| {
                coll.docs
                    .iter()
                    .filter(|doc| eval_filter(doc, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn delete_many(&self, collection: &str, filter: &Value) -> Result<u64> {
        let mut inner = self.lock()?;
        let Some(coll) = inner.collections.get_mut(collection) else {
            return Ok(0);
        };

        let before = coll.docs.len();
        coll.docs.retain(|doc| !eval_filter(doc, filter));
        Ok((before - coll.docs.len()) as u64)
    }

    fn update_many(&self, collection: &str, filter: &Value, update: &VistaUpdate) -> Result<u64> {
        let mut inner = self.lock()?;
        let Some(coll) = inner.collections.get_mut(collection) else {
            return Ok(0);
        };

        let mut modified = 0;
        for doc in &mut coll.docs {
            if !eval_filter(doc, filter) {
                continue;
            }
            if let Some(map) = doc.as_object_mut() {
                update.apply(map);
                modified += 1;
            }
        }
        Ok(modified)
    }

    fn distinct(&self, collection: &str, field: &str) -> Result<Vec<Value>> {
        let inner = self.lock()?;
        let mut seen = Vec::new();
        if let Some(coll) = inner.collections.get(collection) {
            for doc in &coll.docs {
                for value in collect_path_values(doc, field) {
                    if !value.is_null() && !seen.contains(value) {
                        seen.push(value.clone());
                    }
                }
            }
        }
        Ok(seen)
    }

    fn create_index(&self, collection: &str, spec: &VistaIndexSpec) -> Result<()> {
        let mut inner = self.lock()?;
        let coll = inner.collections.entry(collection.to_string()).or_default();

        if let Some(existing) = coll.indexes.iter().find(|index| index.name == spec.name) {
            if existing.keys == spec.keys && existing.unique == spec.unique {
                return Ok(());
            }
            return Err(VistaError::store(format!(
                "index '{}' already exists with a different definition",
                spec.name
            )));
        }

        if spec.unique {
            // Existing data must already satisfy the constraint
            let mut keys: Vec<Vec<Value>> = Vec::with_capacity(coll.docs.len());
            for doc in &coll.docs {
                let key = index_key(doc, spec);
                if keys.contains(&key) {
                    return Err(VistaError::store(format!(
                        "cannot build unique index '{}': duplicate key values exist",
                        spec.name
                    )));
                }
                keys.push(key);
            }
        }

        coll.indexes.push(spec.clone());
        Ok(())
    }

    fn drop_index(&self, collection: &str, name: &str) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(coll) = inner.collections.get_mut(collection) {
            coll.indexes.retain(|index| index.name != name);
        }
        Ok(())
    }

    fn list_indexes(&self, collection: &str) -> Result<Vec<VistaIndexSpec>> {
        let inner = self.lock()?;
        Ok(inner
            .collections
            .get(collection)
            .map(|coll| coll.indexes.clone())
            .unwrap_or_default())
    }

    fn aggregate(
        &self,
        collection: &str,
        pipeline: &[VistaPipelineStep],
    ) -> Result<Box<dyn VistaCursor>> {
        let mut inner = self.lock()?;
        let mut rows: Vec<Value> = inner
            .collections
            .get(collection)
            .map(|coll| coll.docs.clone())
            .unwrap_or_default();

        for step in pipeline {
            rows = apply_pipeline_step(&mut inner, rows, step)?;
        }

        Ok(Box::new(MemoryCursor {
            rows: rows.into(),
        }))
    }

    fn list_collection_names(&self) -> Result<Vec<String>> {
        let inner = self.lock()?;
        let mut names: Vec<String> = inner.collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn collection_stats(&self, collection: &str) -> Result<VistaCollectionStats> {
        let inner = self.lock()?;
        let Some(coll) = inner.collections.get(collection) else {
            return Ok(VistaCollectionStats::default());
        };

        let size_bytes = coll
            .docs
            .iter()
            .map(|doc| serde_json::to_string(doc).map(|s| s.len() as u64).unwrap_or(0))
            .sum();
        Ok(VistaCollectionStats {
            count: coll.docs.len() as u64,
            size_bytes,
        })
    }

    fn drop_collection(&self, collection: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.collections.remove(collection);
        Ok(())
    }

    fn save_blob(&self, key: &str, value: Value) -> Result<()> {
        let mut inner = self.lock()?;
        inner.blobs.insert(key.to_string(), value);
        Ok(())
    }

    fn load_blob(&self, key: &str) -> Result<Option<Value>> {
        let inner = self.lock()?;
        Ok(inner.blobs.get(key).cloned())
    }

    fn delete_blob(&self, key: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.blobs.remove(key);
        Ok(())
    }

    fn list_blob_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let inner = self.lock()?;
        Ok(inner
            .blobs
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

fn apply_write_op(coll: &mut MemoryCollection, op: VistaWriteOp) -> Result<()> {
    match op {
        VistaWriteOp::InsertOne(doc) => {
            coll.insert(doc)?;
            Ok(())
        }
        VistaWriteOp::ReplaceOne {
            filter,
            replacement,
            upsert,
        } => match coll.position(&filter) {
            Some(pos) => {
                let mut replacement = replacement;
                let existing_id = doc_id(&coll.docs[pos]).cloned();
                if let (Some(map), Some(id)) = (replacement.as_object_mut(), existing_id.clone()) {
                    map.entry("_id".to_string()).or_insert(id);
                }
                coll.check_unique(&replacement, existing_id.as_ref())?;
                coll.docs[pos] = replacement;
                Ok(())
            }
            None if upsert => {
                coll.insert(replacement)?;
                Ok(())
            }
            None => Ok(()),
        },
        VistaWriteOp::UpdateOne { filter, update } => {
            if let Some(pos) = coll.position(&filter) {
                if let Some(map) = coll.docs[pos].as_object_mut() {
                    update.apply(map);
                }
            }
            Ok(())
        }
        VistaWriteOp::UpdateMany { filter, update } => {
            for doc in &mut coll.docs {
                if eval_filter(doc, &filter) {
                    if let Some(map) = doc.as_object_mut() {
                        update.apply(map);
                    }
                }
            }
            Ok(())
        }
        VistaWriteOp::DeleteOne(filter) => {
            if let Some(pos) = coll.position(&filter) {
                coll.docs.remove(pos);
            }
            Ok(())
        }
        VistaWriteOp::DeleteMany(filter) => {
            coll.docs.retain(|doc| !eval_filter(doc, &filter));
            Ok(())
        }
    }
}

fn project_row(row: &Value, projections: &[VistaProjection]) -> Value {
    let mut out = Map::new();

    // Identity survives projection unless explicitly excluded
    if let Some(id) = doc_id(row) {
        if !projections.iter().any(|p| p.field == "_id") {
            out.insert("_id".to_string(), id.clone());
        }
    }

    for projection in projections {
        let source = projection.source.as_deref().unwrap_or(&projection.field);
        if let Some(value) = get_path(row, source) {
            // Dotted paths project as nested structure, not literal keys
            set_nested(&mut out, &projection.field, value.clone());
        }
    }
    Value::Object(out)
}

fn unset_path(row: &mut Value, path: &str) {
    match path.split_once('.') {
        None => {
            if let Some(map) = row.as_object_mut() {
                map.remove(path);
            }
        }
        Some((head, rest)) => {
            if let Some(child) = row.as_object_mut().and_then(|map| map.get_mut(head)) {
                match child {
                    Value::Array(items) => {
                        for item in items {
                            unset_path(item, rest);
                        }
                    }
                    _ => unset_path(child, rest),
                }
            }
        }
    }
}

fn apply_pipeline_step(
    inner: &mut MemoryInner,
    rows: Vec<Value>,
    step: &VistaPipelineStep,
) -> Result<Vec<Value>> {
    match step {
        VistaPipelineStep::Match(filter) => Ok(rows
            .into_iter()
            .filter(|row| eval_filter(row, filter))
            .collect()),
        VistaPipelineStep::Project(projections) => Ok(rows
            .iter()
            .map(|row| project_row(row, projections))
            .collect()),
        VistaPipelineStep::Unset(fields) => {
            let mut rows = rows;
            for row in &mut rows {
                for field in fields {
                    unset_path(row, field);
                }
            }
            Ok(rows)
        }
        VistaPipelineStep::Skip(n) => Ok(rows.into_iter().skip(*n as usize).collect()),
        VistaPipelineStep::Limit(n) => Ok(rows.into_iter().take(*n as usize).collect()),
        VistaPipelineStep::Sort(keys) => {
            let mut rows = rows;
            // Stable sort applied from the least significant key
            for (field, order) in keys.iter().rev() {
                rows.sort_by(|a, b| {
                    let ordering = compare_sort_values(get_path(a, field), get_path(b, field));
                    match order {
                        VistaSortOrder::Ascending => ordering,
                        VistaSortOrder::Descending => ordering.reverse(),
                    }
                });
            }
            Ok(rows)
        }
        VistaPipelineStep::Lookup {
            from,
            local_field,
            foreign_field,
            as_field,
            sort,
        } => {
            let foreign_docs = inner
                .collections
                .get(from)
                .map(|coll| coll.docs.clone())
                .unwrap_or_default();

            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                let local = get_path(&row, local_field).cloned().unwrap_or(Value::Null);
                let mut matches: Vec<Value> = foreign_docs
                    .iter()
                    .filter(|doc| {
                        get_path(doc, foreign_field).cloned().unwrap_or(Value::Null) == local
                    })
                    .cloned()
                    .collect();

                if let Some((field, order)) = sort {
                    matches.sort_by(|a, b| {
                        let ordering =
                            compare_sort_values(get_path(a, field), get_path(b, field));
                        match order {
                            VistaSortOrder::Ascending => ordering,
                            VistaSortOrder::Descending => ordering.reverse(),
                        }
                    });
                }

                let mut row = row;
                if let Some(map) = row.as_object_mut() {
                    map.insert(as_field.clone(), Value::Array(matches));
                }
                out.push(row);
            }
            Ok(out)
        }
        VistaPipelineStep::Unwind(field) => {
            let mut out = Vec::new();
            for row in rows {
                let Some(Value::Array(items)) = get_path(&row, field).cloned() else {
                    continue;
                };
                for item in items {
                    let mut unwound = row.clone();
                    if let Some(map) = unwound.as_object_mut() {
                        map.insert(field.clone(), item);
                    }
                    out.push(unwound);
                }
            }
            Ok(out)
        }
        VistaPipelineStep::ReplaceRoot(field) => {
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                match get_path(&row, field) {
                    Some(Value::Object(map)) => out.push(Value::Object(map.clone())),
                    _ => {
                        return Err(VistaError::store(format!(
                            "cannot replace root with non-document field '{field}'"
                        )))
                    }
                }
            }
            Ok(out)
        }
        VistaPipelineStep::Merge {
            into,
            on,
            when_matched,
            when_not_matched,
        } => {
            let target = inner.collections.entry(into.clone()).or_default();
            for incoming in rows {
                let key: Vec<Value> = on
                    .iter()
                    .map(|field| get_path(&incoming, field).cloned().unwrap_or(Value::Null))
                    .collect();
                let matched = target.docs.iter().position(|doc| {
                    on.iter()
                        .map(|field| get_path(doc, field).cloned().unwrap_or(Value::Null))
                        .collect::<Vec<Value>>()
                        == key
                });

                match matched {
                    Some(pos) => match when_matched {
                        VistaWhenMatched::KeepExisting => {}
                        VistaWhenMatched::Merge(spec) => {
                            let existing_id = doc_id(&target.docs[pos]).cloned();
                            let mut merged =
                                merge_documents(&target.docs[pos], &incoming, spec);
                            if let (Some(map), Some(id)) =
                                (merged.as_object_mut(), existing_id.clone())
                            {
                                map.insert("_id".to_string(), id);
                            }
                            target.check_unique(&merged, existing_id.as_ref())?;
                            target.docs[pos] = merged;
                        }
                    },
                    None => match when_not_matched {
                        VistaWhenNotMatched::Insert => {
                            target.insert(incoming)?;
                        }
                        VistaWhenNotMatched::Discard => {}
                    },
                }
            }
            Ok(Vec::new())
        }
        VistaPipelineStep::Out(collection) => {
            let target = inner.collections.entry(collection.clone()).or_default();
            target.docs = rows;
            Ok(Vec::new())
        }
    }
}

struct MemoryCursor {
    rows: VecDeque<Value>,
}

impl VistaCursor for MemoryCursor {
    fn next_document(&mut self) -> Result<Option<Value>> {
        Ok(self.rows.pop_front())
    }
}
