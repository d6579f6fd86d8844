//! Durable metadata rows
//!
//! A [`Record`] is the in-memory handle of one row (bucket, object or
//! account index entry) for the lifetime of a request. Bodies that own a
//! backing index get a unique index name on first save through the
//! [`CollisionResolver`].

use crate::kvs::{IndexOid, KvsOpState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub mod account;
pub mod bucket;
pub mod collision;
pub mod object;
pub mod record;

pub use account::AccountUserIndex;
pub use bucket::{BucketMetadata, GlobalBucketEntry};
pub use collision::{CollisionDecision, CollisionResolver};
pub use object::ObjectMetadata;
pub use record::{Record, RecordLocation, WeakRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Empty,
    Present,
    Missing,
    /// Backing store rejected a dispatched call, or the row is corrupt
    Failed,
    /// The call was never dispatched
    FailedToLaunch,
    Saving,
    Deleting,
}

impl RecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::Empty => "empty",
            RecordState::Present => "present",
            RecordState::Missing => "missing",
            RecordState::Failed => "failed",
            RecordState::FailedToLaunch => "failed_to_launch",
            RecordState::Saving => "saving",
            RecordState::Deleting => "deleting",
        }
    }

    /// A backing-store call is outstanding
    pub fn is_busy(&self) -> bool {
        matches!(self, RecordState::Saving | RecordState::Deleting)
    }

    /// Map a failed call's outcome; only missing and failed_to_launch are
    /// kept apart from plain failure.
    pub fn from_failure(state: KvsOpState) -> Self {
        match state {
            KvsOpState::Missing => RecordState::Missing,
            KvsOpState::FailedToLaunch => RecordState::FailedToLaunch,
            _ => RecordState::Failed,
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("cannot {operation} a {entity} record in state {state}")]
    InvalidTransition {
        entity: &'static str,
        operation: &'static str,
        state: RecordState,
    },
    #[error("serialize metadata: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// JSON body stored in a metadata row.
pub trait RecordBody: Serialize + DeserializeOwned + Clone + 'static {
    /// Label for logs and metrics
    const ENTITY: &'static str;

    /// Base name of the backing index this body owns, while none has been
    /// assigned yet.
    fn index_base_name(&self) -> Option<String> {
        None
    }

    /// Record the index picked for this body.
    fn set_index(&mut self, _name: String, _oid: IndexOid) {}
}
