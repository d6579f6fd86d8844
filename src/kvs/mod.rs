// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Backing-store call contract
//!
//! Every call takes its arguments plus an `on_success` and an `on_failed`
//! continuation. Exactly one of the two fires, once, on the event loop
//! thread. Inside `on_failed` the caller inspects [`KvsClient::state`] to
//! tell expected outcomes (missing, already exists) from real failures.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::rc::Rc;

use crate::reactor::Callback;

pub mod in_memory;

/// Maps bucket name to owning account.
pub const GLOBAL_BUCKET_LIST_INDEX: &str = "global_bucket_list_index";
pub const REPLICA_GLOBAL_BUCKET_LIST_INDEX: &str = "replica_global_bucket_list_index";
/// Maps `<account_id>/<bucket>` to bucket metadata.
pub const BUCKET_METADATA_LIST_INDEX: &str = "bucket_metadata_list_index";
pub const REPLICA_BUCKET_METADATA_LIST_INDEX: &str = "replica_bucket_metadata_list_index";
/// Maps `ACCOUNTUSER/<account_id>` to the account's bucket list index.
pub const ACCOUNT_USER_INDEX: &str = "account_user_index";

/// Indexes every deployment starts with.
pub const WELL_KNOWN_INDEXES: [&str; 5] = [
    GLOBAL_BUCKET_LIST_INDEX,
    REPLICA_GLOBAL_BUCKET_LIST_INDEX,
    BUCKET_METADATA_LIST_INDEX,
    REPLICA_BUCKET_METADATA_LIST_INDEX,
    ACCOUNT_USER_INDEX,
];

/// Outcome of the last call issued through a [`KvsClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KvsOpState {
    /// No call completed yet
    Start,
    /// Read found the key
    Present,
    /// Key or index does not exist
    Missing,
    /// Create found the key or index already there
    AlreadyExists,
    Created,
    Deleted,
    /// Dispatched and rejected by the store
    Failed,
    /// Never dispatched (e.g. resource exhaustion)
    FailedToLaunch,
}

impl KvsOpState {
    pub fn as_str(&self) -> &'static str {
        match self {
            KvsOpState::Start => "start",
            KvsOpState::Present => "present",
            KvsOpState::Missing => "missing",
            KvsOpState::AlreadyExists => "already_exists",
            KvsOpState::Created => "created",
            KvsOpState::Deleted => "deleted",
            KvsOpState::Failed => "failed",
            KvsOpState::FailedToLaunch => "failed_to_launch",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            KvsOpState::Present | KvsOpState::Created | KvsOpState::Deleted
        )
    }
}

impl fmt::Display for KvsOpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backing-store call kinds, used for fault injection and telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KvsOp {
    GetKeyval,
    PutKeyval,
    DeleteKeyval,
    CreateIndex,
    DeleteIndex,
    ListKeys,
}

impl KvsOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            KvsOp::GetKeyval => "get_keyval",
            KvsOp::PutKeyval => "put_keyval",
            KvsOp::DeleteKeyval => "delete_keyval",
            KvsOp::CreateIndex => "create_index",
            KvsOp::DeleteIndex => "delete_index",
            KvsOp::ListKeys => "list_keys",
        }
    }
}

/// 128-bit identifier of a backing-store index, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexOid {
    pub hi: u64,
    pub lo: u64,
}

impl IndexOid {
    pub fn from_name(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let mut hi = [0u8; 8];
        let mut lo = [0u8; 8];
        hi.copy_from_slice(&digest[0..8]);
        lo.copy_from_slice(&digest[8..16]);
        Self {
            hi: u64::from_be_bytes(hi),
            lo: u64::from_be_bytes(lo),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.hi == 0 && self.lo == 0
    }
}

impl fmt::Display for IndexOid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}:{:016x}", self.hi, self.lo)
    }
}

/// One client per record or operation; `state()`, `value()` and `keys()`
/// describe the most recently completed call.
pub trait KvsClient {
    fn get_keyval(&self, index: &str, key: &str, on_success: Callback, on_failed: Callback);

    fn put_keyval(
        &self,
        index: &str,
        key: &str,
        value: String,
        on_success: Callback,
        on_failed: Callback,
    );

    fn delete_keyval(&self, index: &str, key: &str, on_success: Callback, on_failed: Callback);

    fn create_index(&self, name: &str, on_success: Callback, on_failed: Callback);

    fn delete_index(&self, name: &str, on_success: Callback, on_failed: Callback);

    fn list_keys(
        &self,
        index: &str,
        prefix: &str,
        limit: usize,
        on_success: Callback,
        on_failed: Callback,
    );

    fn state(&self) -> KvsOpState;

    fn value(&self) -> Option<String>;

    fn keys(&self) -> Vec<String>;
}

/// Creates fresh clients; the injection seam for tests.
pub trait KvsClientFactory {
    fn create_client(&self, request_id: &str) -> Rc<dyn KvsClient>;
}
