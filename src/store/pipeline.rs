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

//! # Vista Pipeline Module
//!
//! Typed aggregation pipeline steps consumed by [`VistaStore`]
//! implementations, plus the document-level merge semantics used by the
//! `Merge` step.
//!
//! The per-document merge behavior is expressed as an explicit
//! [`VistaDocumentMerge`] spec rather than a dynamically built expression
//! tree; [`merge_documents`] is its single evaluation function, shared by
//! the pipeline-side and in-memory merge paths.
//!
//! [`VistaStore`]: crate::store::VistaStore

use std::collections::HashSet;

use serde_json::{Map, Value};

/// Sort direction for pipeline sorts and index keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VistaSortOrder {
    Ascending,
    Descending,
}

/// One projected output field, optionally renamed from a source field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VistaProjection {
    /// Output field name.
    pub field: String,
    /// Source field to read from; defaults to `field` when unset.
    pub source: Option<String>,
}

impl VistaProjection {
    pub fn keep(field: impl Into<String>) -> Self {
        VistaProjection {
            field: field.into(),
            source: None,
        }
    }

    pub fn renamed(field: impl Into<String>, source: impl Into<String>) -> Self {
        VistaProjection {
            field: field.into(),
            source: Some(source.into()),
        }
    }
}

/// Behavior of a `Merge` step for documents matching an existing key.
#[derive(Clone, Debug)]
pub enum VistaWhenMatched {
    /// Keep the destination document untouched.
    KeepExisting,
    /// Replace the destination document with a per-document merge.
    Merge(VistaDocumentMerge),
}

/// Behavior of a `Merge` step for documents matching no existing key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VistaWhenNotMatched {
    Insert,
    Discard,
}

/// Per-document merge specification applied by `Merge` steps.
#[derive(Clone, Debug, Default)]
pub struct VistaDocumentMerge {
    /// Whether incoming non-null values replace existing ones.
    pub overwrite: bool,
    /// Incoming fields stripped before merging (e.g. defaults the caller's
    /// field selection excluded).
    pub delete_fields: Vec<String>,
    /// Plain list fields merged by order-preserving union.
    pub list_fields: Vec<String>,
    /// Label-list fields merged at the element level, addressed as
    /// `field.element_list_field`.
    pub label_list_fields: Vec<String>,
}

/// One step of a typed aggregation pipeline.
#[derive(Clone, Debug)]
pub enum VistaPipelineStep {
    /// Filter documents by a Mongo-flavored filter document.
    Match(Value),
    /// Keep only the given fields, with optional source renames.
    Project(Vec<VistaProjection>),
    /// Remove the given fields.
    Unset(Vec<String>),
    /// Skip the first `n` documents.
    Skip(u64),
    /// Pass through at most `n` documents.
    Limit(u64),
    /// Sort by the given fields in order.
    Sort(Vec<(String, VistaSortOrder)>),
    /// Correlated join materializing matches as an array field.
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
        sort: Option<(String, VistaSortOrder)>,
    },
    /// Emit one document per element of an array field.
    Unwind(String),
    /// Promote a document-valued field to the row root.
    ReplaceRoot(String),
    /// Upsert the pipeline output into another collection.
    Merge {
        into: String,
        on: Vec<String>,
        when_matched: VistaWhenMatched,
        when_not_matched: VistaWhenNotMatched,
    },
    /// Replace another collection with the pipeline output.
    Out(String),
}

/// A single operation within a bulk write.
#[derive(Clone, Debug)]
pub enum VistaWriteOp {
    InsertOne(Value),
    ReplaceOne {
        filter: Value,
        replacement: Value,
        upsert: bool,
    },
    UpdateOne {
        filter: Value,
        update: VistaUpdate,
    },
    UpdateMany {
        filter: Value,
        update: VistaUpdate,
    },
    DeleteOne(Value),
    DeleteMany(Value),
}

/// Field updates applied by update operations.
///
/// Paths may be dotted; renames and unsets descend through nested
/// documents but never broadcast over arrays, matching `$rename`.
#[derive(Clone, Debug, Default)]
pub struct VistaUpdate {
    pub set: Map<String, Value>,
    pub unset: Vec<String>,
    pub rename: Vec<(String, String)>,
}

impl VistaUpdate {
    pub fn set_field(field: impl Into<String>, value: Value) -> Self {
        let mut update = VistaUpdate::default();
        update.set.insert(field.into(), value);
        update
    }

    pub fn unset_field(field: impl Into<String>) -> Self {
        VistaUpdate {
            unset: vec![field.into()],
            ..Default::default()
        }
    }

    pub fn rename_fields(mapping: &[(String, String)]) -> Self {
        VistaUpdate {
            rename: mapping.to_vec(),
            ..Default::default()
        }
    }

    /// Applies this update to a document in place.
    pub fn apply(&self, doc: &mut Map<String, Value>) {
        for (field, value) in &self.set {
            set_nested(doc, field, value.clone());
        }
        for field in &self.unset {
            remove_nested(doc, field);
        }
        for (old_path, new_path) in &self.rename {
            if let Some(value) = remove_nested(doc, old_path) {
                set_nested(doc, new_path, value);
            }
        }
    }
}

pub(crate) fn remove_nested(doc: &mut Map<String, Value>, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, rest)) => match doc.get_mut(head)?.as_object_mut() {
            Some(child) => remove_nested(child, rest),
            None => None,
        },
    }
}

pub(crate) fn set_nested(doc: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(child) = child.as_object_mut() {
                set_nested(child, rest, value);
            }
        }
    }
}

/// Collects all values reachable through a dotted path, broadcasting over
/// intermediate arrays the way document stores match nested fields.
pub fn collect_path_values<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![doc];
    for part in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => {
                    if let Some(found) = map.get(part) {
                        next.push(found);
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        if let Some(found) = item.as_object().and_then(|map| map.get(part)) {
                            next.push(found);
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    current
}

/// Reads a top-level or dotted field without array broadcast.
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Evaluates a Mongo-flavored filter document against a document.
///
/// Supported: direct equality, `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`,
/// `$in`, `$nin`, `$exists`, and top-level `$and`/`$or`. Dotted paths
/// broadcast over arrays; equality against an array field also matches
/// element containment.
pub fn eval_filter(doc: &Value, filter: &Value) -> bool {
    let Some(clauses) = filter.as_object() else {
        return true;
    };

    clauses.iter().all(|(key, condition)| match key.as_str() {
        "$and" => condition
            .as_array()
            .map(|subs| subs.iter().all(|sub| eval_filter(doc, sub)))
            .unwrap_or(false),
        "$or" => condition
            .as_array()
            .map(|subs| subs.iter().any(|sub| eval_filter(doc, sub)))
            .unwrap_or(false),
        path => eval_condition(doc, path, condition),
    })
}

fn eval_condition(doc: &Value, path: &str, condition: &Value) -> bool {
    let values = collect_path_values(doc, path);

    match condition.as_object() {
        Some(ops) if ops.keys().any(|key| key.starts_with('$')) => {
            ops.iter().all(|(op, operand)| match op.as_str() {
                "$eq" => values.iter().any(|value| values_equal(value, operand)),
                "$ne" => !values.iter().any(|value| values_equal(value, operand)),
                "$gt" => values
                    .iter()
                    .any(|value| compare_scalars(value, operand) == Some(std::cmp::Ordering::Greater)),
                "$gte" => values.iter().any(|value| {
                    matches!(
                        compare_scalars(value, operand),
                        Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
                    )
                }),
                "$lt" => values
                    .iter()
                    .any(|value| compare_scalars(value, operand) == Some(std::cmp::Ordering::Less)),
                "$lte" => values.iter().any(|value| {
                    matches!(
                        compare_scalars(value, operand),
                        Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
                    )
                }),
                "$in" => operand
                    .as_array()
                    .map(|options| {
                        values
                            .iter()
                            .any(|value| options.iter().any(|option| values_equal(value, option)))
                    })
                    .unwrap_or(false),
                "$nin" => operand
                    .as_array()
                    .map(|options| {
                        !values
                            .iter()
                            .any(|value| options.iter().any(|option| values_equal(value, option)))
                    })
                    .unwrap_or(false),
                "$exists" => {
                    let exists = !values.is_empty();
                    operand.as_bool().map(|want| want == exists).unwrap_or(false)
                }
                _ => false,
            })
        }
        _ => values.iter().any(|value| values_equal(value, condition)),
    }
}

/// Equality with array-containment broadcast.
fn values_equal(value: &Value, target: &Value) -> bool {
    if value == target {
        return true;
    }
    match value {
        Value::Array(items) => items.iter().any(|item| item == target),
        _ => false,
    }
}

fn compare_scalars(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .zip(y.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total ordering used by pipeline sorts; ranks by type, then by value.
pub fn compare_sort_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(Value::Object(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Bool(_)) => 5,
        }
    }

    let (ra, rb) = (rank(a), rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }

    match (a, b) {
        (Some(x), Some(y)) => compare_scalars(x, y).unwrap_or(std::cmp::Ordering::Equal),
        _ => std::cmp::Ordering::Equal,
    }
}

fn deep_equality_key(value: &Value) -> [u8; 32] {
    let rendered = serde_json::to_string(value).unwrap_or_default();
    *blake3::hash(rendered.as_bytes()).as_bytes()
}

fn element_id(element: &Value) -> Option<&Value> {
    element
        .as_object()
        .and_then(|map| map.get("id").or_else(|| map.get("_id")))
}

/// Order-preserving union of two list values.
///
/// If either side is missing or null, the other side wins outright; else
/// existing elements keep their order and incoming elements not already
/// present (by deep equality) are appended.
fn merge_list_values(existing: Option<&Value>, incoming: Option<&Value>) -> Option<Value> {
    match (existing, incoming) {
        (None, None) => None,
        (None, Some(value)) | (Some(Value::Null), Some(value)) => Some(value.clone()),
        (Some(value), None) | (Some(value), Some(Value::Null)) => Some(value.clone()),
        (Some(old), Some(new)) => {
            let (Some(old_items), Some(new_items)) = (old.as_array(), new.as_array()) else {
                return Some(new.clone());
            };

            let mut seen: HashSet<[u8; 32]> =
                old_items.iter().map(deep_equality_key).collect();
            let mut merged = old_items.clone();
            for item in new_items {
                if seen.insert(deep_equality_key(item)) {
                    merged.push(item.clone());
                }
            }
            Some(Value::Array(merged))
        }
    }
}

/// Element-level merge of a label-list field.
///
/// On `overwrite`, incoming elements replace same-id existing elements and
/// the result keeps non-replaced existing elements in their original order
/// followed by incoming elements in theirs. Otherwise existing elements are
/// kept and only incoming elements with unseen ids are appended.
fn merge_label_list_values(
    existing: Option<&Value>,
    incoming: Option<&Value>,
    elements_field: &str,
    overwrite: bool,
) -> Option<Value> {
    match (existing, incoming) {
        (None, None) => None,
        (None, Some(value)) | (Some(Value::Null), Some(value)) => Some(value.clone()),
        (Some(value), None) | (Some(value), Some(Value::Null)) => Some(value.clone()),
        (Some(old), Some(new)) => {
            let old_items = old
                .get(elements_field)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let new_items = new
                .get(elements_field)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            let merged_items = if overwrite {
                let new_ids: Vec<Value> = new_items
                    .iter()
                    .filter_map(element_id)
                    .cloned()
                    .collect();

                // Non-replaced existing elements, in order, then incoming
                let mut merged: Vec<Value> = old_items
                    .into_iter()
                    .filter(|item| match element_id(item) {
                        Some(id) => !new_ids.contains(id),
                        None => true,
                    })
                    .collect();
                merged.extend(new_items);
                merged
            } else {
                let existing_ids: Vec<Value> = old_items
                    .iter()
                    .filter_map(element_id)
                    .cloned()
                    .collect();

                let mut merged = old_items;
                for item in new_items {
                    let duplicate = element_id(&item)
                        .map(|id| existing_ids.contains(id))
                        .unwrap_or(false);
                    if !duplicate {
                        merged.push(item);
                    }
                }
                merged
            };

            // The winning side contributes the field's other attributes
            let base = if overwrite { new } else { old };
            let mut result = base.as_object().cloned().unwrap_or_default();
            result.insert(elements_field.to_string(), Value::Array(merged_items));
            Some(Value::Object(result))
        }
    }
}

/// Merges an incoming document into an existing one per the given spec.
///
/// Null-valued incoming fields never overwrite; `delete_fields` are
/// stripped from the incoming side first; list and label-list fields are
/// merged per their dedicated semantics instead of wholesale replacement.
pub fn merge_documents(existing: &Value, incoming: &Value, spec: &VistaDocumentMerge) -> Value {
    let existing_map = existing.as_object().cloned().unwrap_or_default();
    let mut incoming_map = incoming.as_object().cloned().unwrap_or_default();

    for field in &spec.delete_fields {
        incoming_map.remove(field);
    }

    let mut result = if spec.overwrite {
        // Incoming non-null values win
        let mut merged = existing_map.clone();
        for (key, value) in &incoming_map {
            if !value.is_null() {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    } else {
        // Existing non-null values win; incoming fills the gaps
        let mut merged = incoming_map.clone();
        for (key, value) in &existing_map {
            if !value.is_null() {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    };

    for field in &spec.list_fields {
        if let Some(merged) =
            merge_list_values(existing_map.get(field), incoming_map.get(field))
        {
            result.insert(field.clone(), merged);
        }
    }

    for path in &spec.label_list_fields {
        let Some((field, elements_field)) = path.split_once('.') else {
            continue;
        };
        if let Some(merged) = merge_label_list_values(
            existing_map.get(field),
            incoming_map.get(field),
            elements_field,
            spec.overwrite,
        ) {
            result.insert(field.to_string(), merged);
        }
    }

    Value::Object(result)
}
