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

//! Concrete operations
//!
//! Each operation is a function that returns a ready-to-start [`Action`].
//! Protocol variants plug in through [`ProtocolCapabilities`] rather than
//! through a type hierarchy.

use crate::action::{Action, ActionBuilder};
use crate::auth::AuthClient;
use crate::config::Config;
use crate::error_code::ErrorCode;
use crate::kvs::{KvsClient, KvsClientFactory, KvsOpState};
use crate::metadata::{RecordBody, RecordState, WeakRecord};
use crate::reactor::Callback;
use crate::shutdown::ShutdownSignal;
use crate::transport::RequestTransport;
use std::rc::Rc;

pub mod account_register;
pub mod bucket_api;
pub mod create_bucket;
pub mod delete_bucket;
pub mod delete_object;
pub mod head_bucket;
pub mod management_api;
pub mod put_object;

pub use account_register::register_account;
pub use bucket_api::S3BucketApi;
pub use create_bucket::create_bucket;
pub use delete_bucket::delete_bucket;
pub use delete_object::delete_object;
pub use head_bucket::head_bucket;
pub use management_api::AccountManagementApi;
pub use put_object::put_object_metadata;

/// What a protocol variant contributes to its operations' step lists.
pub trait ProtocolCapabilities {
    fn api_name(&self) -> &'static str;

    /// Whether the built-in authentication step runs
    fn requires_authentication(&self) -> bool {
        true
    }

    /// Step: load the metadata the request is scoped to.
    fn load_metadata(self: Rc<Self>, action: &Action);

    /// Step: check the requester may act on what `load_metadata` found.
    fn authorize(self: Rc<Self>, action: &Action);
}

/// Append the capability steps shared by every operation of a variant.
pub fn with_capabilities<P: ProtocolCapabilities + 'static>(
    builder: ActionBuilder,
    api: &Rc<P>,
) -> ActionBuilder {
    let load = api.clone();
    let authorize = api.clone();
    tracing::trace!(api = api.api_name(), "adding capability steps");
    builder
        .skip_auth(!api.requires_authentication())
        .step(move |action: &Action| load.clone().load_metadata(action))
        .step(move |action: &Action| authorize.clone().authorize(action))
}

/// Shared collaborators for building operations.
#[derive(Clone)]
pub struct OperationContext {
    pub kvs: Rc<dyn KvsClientFactory>,
    pub shutdown: ShutdownSignal,
    pub config: Rc<Config>,
}

/// The inbound side of one request.
#[derive(Clone)]
pub struct Inbound {
    pub transport: Rc<dyn RequestTransport>,
    pub auth: Option<Rc<dyn AuthClient>>,
}

impl Inbound {
    pub fn new(transport: Rc<dyn RequestTransport>) -> Self {
        Self {
            transport,
            auth: None,
        }
    }

    pub fn with_auth(mut self, auth: Rc<dyn AuthClient>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn request_id(&self) -> String {
        self.transport.request_id().to_string()
    }
}

impl OperationContext {
    pub fn new(kvs: Rc<dyn KvsClientFactory>, shutdown: ShutdownSignal, config: Config) -> Self {
        Self {
            kvs,
            shutdown,
            config: Rc::new(config),
        }
    }

    pub fn client(&self, request_id: &str) -> Rc<dyn KvsClient> {
        self.kvs.create_client(request_id)
    }

    pub fn builder(&self, name: &str, inbound: &Inbound) -> ActionBuilder {
        let builder = ActionBuilder::new(name, inbound.transport.clone(), self.shutdown.clone())
            .config(self.config.action.clone());
        match &inbound.auth {
            Some(auth) => builder.auth_client(auth.clone()),
            None => builder,
        }
    }
}

/// Client-visible code for a metadata call that did not succeed.
pub fn metadata_failure_code(state: RecordState) -> ErrorCode {
    match state {
        RecordState::FailedToLaunch => ErrorCode::ServiceUnavailable,
        _ => ErrorCode::InternalError,
    }
}

/// Same as [`metadata_failure_code`], for raw backing-store calls.
pub fn kvs_failure_code(state: KvsOpState) -> ErrorCode {
    match state {
        KvsOpState::FailedToLaunch => ErrorCode::ServiceUnavailable,
        _ => ErrorCode::InternalError,
    }
}

/// Account id and name the request acts as.
pub fn requester(action: &Action) -> Option<(String, String)> {
    match action.auth_context() {
        Some(ctx) => Some((ctx.account_id, ctx.account_name)),
        None => action
            .requester_account()
            .map(|account| (account.clone(), account)),
    }
}

/// Backing-store continuation for `op`. Records keep their pending
/// continuations, so these hold the operation and its Action weakly and do
/// nothing once the request is gone.
pub fn resume<O: 'static>(
    op: &Rc<O>,
    action: &Action,
    f: impl FnOnce(Rc<O>, &Action) + 'static,
) -> Callback {
    let (op, action) = (Rc::downgrade(op), action.downgrade());
    Box::new(move || {
        if let (Some(op), Some(action)) = (op.upgrade(), action.upgrade()) {
            f(op, &action);
        }
    })
}

/// Same as [`resume`] for continuations that only drive the Action.
pub fn resume_action(action: &Action, f: impl FnOnce(&Action) + 'static) -> Callback {
    let action = action.downgrade();
    Box::new(move || {
        if let Some(action) = action.upgrade() {
            f(&action);
        }
    })
}

/// State of a record seen from one of its own continuations.
pub fn record_state<T: RecordBody>(record: &WeakRecord<T>) -> RecordState {
    record
        .upgrade()
        .map_or(RecordState::Failed, |record| record.state())
}

/// Final step of every operation.
pub fn respond(action: &Action) {
    action.send_response();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_codes_keep_launch_distinction() {
        assert_eq!(
            metadata_failure_code(RecordState::FailedToLaunch),
            ErrorCode::ServiceUnavailable
        );
        assert_eq!(metadata_failure_code(RecordState::Failed), ErrorCode::InternalError);
        assert_eq!(
            kvs_failure_code(KvsOpState::FailedToLaunch),
            ErrorCode::ServiceUnavailable
        );
        assert_eq!(kvs_failure_code(KvsOpState::Failed), ErrorCode::InternalError);
    }
}
