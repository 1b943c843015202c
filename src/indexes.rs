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

//! # Vista Index Module
//!
//! Index management helpers shared by dataset creation and the merge
//! engine. The merge engine in particular needs temporary unique key
//! indexes that must be torn back down to their prior state afterwards, so
//! the ensure functions report exactly what they changed.

use crate::errors::Result;
use crate::store::{VistaIndexSpec, VistaStore};

/// Outcome of an ensure-index call, so callers can restore prior state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VistaIndexChange {
    /// Whether a new index was created.
    pub created: bool,
    /// Whether a conflicting non-unique index was dropped first.
    pub dropped: bool,
}

fn single_field_index<'a>(
    indexes: &'a [VistaIndexSpec],
    field: &str,
) -> Option<&'a VistaIndexSpec> {
    indexes
        .iter()
        .find(|index| index.keys.len() == 1 && index.keys[0].0 == field)
}

/// Ensures a unique single-field index exists on a collection.
///
/// `_id` is natively unique and needs nothing. An existing non-unique index
/// on the field is dropped and rebuilt unique; the returned change lets the
/// caller undo both steps when the index was only transient.
pub fn ensure_unique_index(
    store: &dyn VistaStore,
    collection: &str,
    field: &str,
) -> Result<VistaIndexChange> {
    if field == "_id" {
        return Ok(VistaIndexChange::default());
    }

    let indexes = store.list_indexes(collection)?;
    if let Some(existing) = single_field_index(&indexes, field) {
        if existing.unique {
            return Ok(VistaIndexChange::default());
        }

        let name = existing.name.clone();
        store.drop_index(collection, &name)?;
        store.create_index(collection, &VistaIndexSpec::on_field(field, true))?;
        return Ok(VistaIndexChange {
            created: true,
            dropped: true,
        });
    }

    store.create_index(collection, &VistaIndexSpec::on_field(field, true))?;
    Ok(VistaIndexChange {
        created: true,
        dropped: false,
    })
}

/// Ensures a unique compound index exists on a collection.
pub fn ensure_compound_unique_index(
    store: &dyn VistaStore,
    collection: &str,
    fields: &[&str],
) -> Result<VistaIndexChange> {
    let spec = VistaIndexSpec::compound(fields, true);
    let indexes = store.list_indexes(collection)?;
    if indexes
        .iter()
        .any(|index| index.keys == spec.keys && index.unique)
    {
        return Ok(VistaIndexChange::default());
    }

    store.create_index(collection, &spec)?;
    Ok(VistaIndexChange {
        created: true,
        dropped: false,
    })
}

/// Undoes a transient unique index created by an ensure call.
///
/// When the ensure replaced a non-unique index, the original non-unique
/// index is restored.
pub fn restore_index(
    store: &dyn VistaStore,
    collection: &str,
    field: &str,
    change: VistaIndexChange,
) -> Result<()> {
    if !change.created {
        return Ok(());
    }

    store.drop_index(collection, field)?;
    if change.dropped {
        store.create_index(collection, &VistaIndexSpec::on_field(field, false))?;
    }
    Ok(())
}

/// Creates the default indexes for a new sample collection.
pub fn create_default_sample_indexes(store: &dyn VistaStore, collection: &str) -> Result<()> {
    store.create_index(collection, &VistaIndexSpec::on_field("filepath", false))
}

/// Creates the default indexes for a new frame collection, including the
/// `(_sample_id, frame_number)` uniqueness invariant.
pub fn create_default_frame_indexes(store: &dyn VistaStore, collection: &str) -> Result<()> {
    store.create_index(
        collection,
        &VistaIndexSpec::compound(&["_sample_id", "frame_number"], true),
    )
}

/// Creates a geospatial index on a `GeoPoint` field.
pub fn create_geo_index(store: &dyn VistaStore, collection: &str, field: &str) -> Result<()> {
    store.create_index(collection, &VistaIndexSpec::sphere2d(field))
}
