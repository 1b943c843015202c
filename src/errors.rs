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

//! # Vista Error Module
//!
//! This module defines the error types and utilities used throughout the
//! Vista library for consistent error handling and reporting.
//!
//! ## Error Handling Philosophy
//!
//! Vista uses a structured error approach with the following principles:
//!
//! - **Explicit Error Types**: Each error variant represents a specific
//!   category of failure, making it easier to handle errors appropriately
//! - **Context-Rich**: Errors include relevant context (field names, dataset
//!   names, detailed messages) to aid debugging
//! - **Distinct Kinds**: Lookup misses (`NotFound`) are never conflated with
//!   validation failures, and schema conflicts are always surfaced rather
//!   than auto-resolved
//!
//! ## Error Categories
//!
//! - **Schema**: Declared vs. inferred/validated type conflicts
//! - **FieldNotFound**: Rename/clone/delete of an absent field
//! - **MediaType**: A sample's media kind disagrees with its dataset's
//! - **NotFound**: Dataset or sample lookup misses
//! - **BulkWrite**: Batched write failures, unwrapped to the first error
//! - **CursorExpired**: Server-side cursor timeout; recovered internally
//! - **DatasetDeleted**: Operations on a terminally deleted dataset
//! - **Validation**: Invalid parameters or inputs
//! - **Store**: Failures raised by the backing-store implementation
//! - **Serde**: Document encode/decode failures

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience result type used throughout Vista.
pub type Result<T> = std::result::Result<T, VistaError>;

/// Canonical error enumeration for Vista.
#[derive(Clone, Debug, Error, Serialize, Deserialize)]
pub enum VistaError {
    /// Declared vs. inferred/validated field type conflicts.
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Rename, clone, or delete of a field that does not exist.
    #[error("field '{field}' does not exist")]
    FieldNotFound { field: String },

    /// A sample's media kind disagrees with its dataset's fixed kind.
    #[error("media type error: {message}")]
    MediaType { message: String },

    /// Dataset or sample lookup miss.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// A batched write failed; carries only the first underlying error.
    #[error("bulk write error: {message}")]
    BulkWrite { message: String },

    /// A server-side cursor expired; retryable via resume-from-offset.
    #[error("cursor expired")]
    CursorExpired,

    /// Any operation other than reading `name`/`deleted` on a deleted dataset.
    #[error("dataset '{name}' is deleted")]
    DatasetDeleted { name: String },

    /// Validation errors triggered by invalid parameters or inputs.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Failures raised by the backing-store implementation.
    #[error("store error: {message}")]
    Store { message: String },

    /// Wrapper for serde-style document encode/decode issues.
    #[error("serialization error: {message}")]
    Serde { message: String },
}

impl From<serde_json::Error> for VistaError {
    fn from(err: serde_json::Error) -> Self {
        VistaError::Serde {
            message: err.to_string(),
        }
    }
}

impl VistaError {
    /// Helper to construct schema errors.
    pub fn schema(message: impl Into<String>) -> Self {
        VistaError::Schema {
            message: message.into(),
        }
    }

    /// Helper to construct field-not-found errors.
    pub fn field_not_found(field: impl Into<String>) -> Self {
        VistaError::FieldNotFound {
            field: field.into(),
        }
    }

    /// Helper to construct media type errors.
    pub fn media_type(message: impl Into<String>) -> Self {
        VistaError::MediaType {
            message: message.into(),
        }
    }

    /// Helper to construct not-found errors.
    pub fn not_found(message: impl Into<String>) -> Self {
        VistaError::NotFound {
            message: message.into(),
        }
    }

    /// Helper to construct bulk-write errors from the first failure.
    pub fn bulk_write(message: impl Into<String>) -> Self {
        VistaError::BulkWrite {
            message: message.into(),
        }
    }

    /// Helper to construct deleted-dataset errors.
    pub fn deleted(name: impl Into<String>) -> Self {
        VistaError::DatasetDeleted { name: name.into() }
    }

    /// Helper to construct simple validation errors.
    pub fn validation(message: impl Into<String>) -> Self {
        VistaError::Validation {
            message: message.into(),
        }
    }

    /// Helper to construct store errors.
    pub fn store(message: impl Into<String>) -> Self {
        VistaError::Store {
            message: message.into(),
        }
    }

    /// Helper to construct serialization errors.
    pub fn serde(message: impl Into<String>) -> Self {
        VistaError::Serde {
            message: message.into(),
        }
    }
}

/// Severity applied per top-level field that cannot be deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VistaErrorLevel {
    /// Surface the failure to the caller.
    Raise,
    /// Log a warning and skip the field.
    Warn,
    /// Silently skip the field.
    Ignore,
}

impl Default for VistaErrorLevel {
    fn default() -> Self {
        VistaErrorLevel::Raise
    }
}
