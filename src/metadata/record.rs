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

use super::{CollisionDecision, CollisionResolver, MetadataError, RecordBody, RecordState};
use crate::config::MetadataConfig;
use crate::kvs::{IndexOid, KvsClient, KvsOpState};
use crate::observability::metrics;
use crate::reactor::Callback;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Where a row lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLocation {
    pub index: String,
    /// Best-effort mirror of the row
    pub replica: Option<String>,
    pub key: String,
}

struct RecordInner<T> {
    location: RecordLocation,
    request_id: String,
    salt: String,
    max_retries: u16,
    replicate: bool,
    state: RecordState,
    body: Option<T>,
    json_parsing_error: bool,
    resolver: Option<CollisionResolver>,
    /// Index created by the save in progress, deleted again if the row
    /// write fails
    created_index: Option<String>,
    deferred_state: RecordState,
    pending: Option<(Callback, Callback)>,
}

/// Handle to one metadata row.
///
/// `load`, `save`, `update` and `remove` each take an `on_success` and an
/// `on_failed` continuation; exactly one of them runs, once, after the
/// backing-store calls of that operation are done. On failure
/// [`Record::state`] tells missing from failed from failed_to_launch.
pub struct Record<T: RecordBody> {
    inner: Rc<RefCell<RecordInner<T>>>,
    kvs: Rc<dyn KvsClient>,
}

impl<T: RecordBody> Clone for Record<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            kvs: self.kvs.clone(),
        }
    }
}

/// Non-owning handle; continuations stored on a record hold this rather
/// than the record itself.
pub struct WeakRecord<T: RecordBody> {
    inner: Weak<RefCell<RecordInner<T>>>,
    kvs: Rc<dyn KvsClient>,
}

impl<T: RecordBody> WeakRecord<T> {
    pub fn upgrade(&self) -> Option<Record<T>> {
        self.inner.upgrade().map(|inner| Record {
            inner,
            kvs: self.kvs.clone(),
        })
    }
}

fn write_failure_state(state: KvsOpState) -> RecordState {
    match state {
        KvsOpState::FailedToLaunch => RecordState::FailedToLaunch,
        _ => RecordState::Failed,
    }
}

impl<T: RecordBody> Record<T> {
    pub fn new(
        kvs: Rc<dyn KvsClient>,
        location: RecordLocation,
        config: &MetadataConfig,
        request_id: &str,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(RecordInner {
                location,
                request_id: request_id.to_string(),
                salt: config.collision_salt.clone(),
                max_retries: config.max_collision_retry_count,
                replicate: config.replicate_indexes,
                state: RecordState::Empty,
                body: None,
                json_parsing_error: false,
                resolver: None,
                created_index: None,
                deferred_state: RecordState::Failed,
                pending: None,
            })),
            kvs,
        }
    }

    pub fn state(&self) -> RecordState {
        self.inner.borrow().state
    }

    pub fn body(&self) -> Option<T> {
        self.inner.borrow().body.clone()
    }

    pub fn key(&self) -> String {
        self.inner.borrow().location.key.clone()
    }

    pub fn location(&self) -> RecordLocation {
        self.inner.borrow().location.clone()
    }

    /// The last load found a row that is not valid JSON for this entity
    pub fn json_parsing_error(&self) -> bool {
        self.inner.borrow().json_parsing_error
    }

    /// Collision attempts made by the current or last save
    pub fn attempt_count(&self) -> u32 {
        self.inner
            .borrow()
            .resolver
            .as_ref()
            .map(|r| r.attempt_count())
            .unwrap_or(0)
    }

    pub fn downgrade(&self) -> WeakRecord<T> {
        WeakRecord {
            inner: Rc::downgrade(&self.inner),
            kvs: self.kvs.clone(),
        }
    }

    /// Backing-store continuation bound to this record; a no-op once the
    /// record is gone.
    fn on(&self, f: fn(&Record<T>)) -> Callback {
        let weak = self.downgrade();
        Box::new(move || {
            if let Some(record) = weak.upgrade() {
                f(&record);
            }
        })
    }

    fn request_id(&self) -> String {
        self.inner.borrow().request_id.clone()
    }

    fn finish(&self, state: RecordState, success: bool) {
        let callbacks = {
            let mut inner = self.inner.borrow_mut();
            inner.state = state;
            inner.pending.take()
        };
        if let Some((on_success, on_failed)) = callbacks {
            if success {
                on_success();
            } else {
                on_failed();
            }
        }
    }

    fn invalid(state: RecordState, operation: &'static str) -> MetadataError {
        MetadataError::InvalidTransition {
            entity: T::ENTITY,
            operation,
            state,
        }
    }

    pub fn load(&self, on_success: Callback, on_failed: Callback) -> Result<(), MetadataError> {
        let (index, key) = {
            let mut inner = self.inner.borrow_mut();
            if inner.state.is_busy() {
                return Err(Self::invalid(inner.state, "load"));
            }
            inner.json_parsing_error = false;
            inner.pending = Some((on_success, on_failed));
            (inner.location.index.clone(), inner.location.key.clone())
        };
        self.kvs.get_keyval(
            &index,
            &key,
            self.on(Self::load_successful),
            self.on(Self::load_failed),
        );
        Ok(())
    }

    fn load_successful(&self) {
        let raw = self.kvs.value().unwrap_or_default();
        match serde_json::from_str::<T>(&raw) {
            Ok(body) => {
                self.inner.borrow_mut().body = Some(body);
                self.finish(RecordState::Present, true);
            }
            Err(e) => {
                let location = self.location();
                tracing::error!(
                    request_id = %self.request_id(),
                    entity = T::ENTITY,
                    index = %location.index,
                    key = %location.key,
                    error = %e,
                    "metadata corrupted, json parsing failed"
                );
                self.inner.borrow_mut().json_parsing_error = true;
                self.load_failed();
            }
        }
    }

    fn load_failed(&self) {
        let state = if self.json_parsing_error() {
            RecordState::Failed
        } else {
            RecordState::from_failure(self.kvs.state())
        };
        if state == RecordState::Missing {
            tracing::debug!(request_id = %self.request_id(), entity = T::ENTITY, "metadata missing");
        } else {
            tracing::error!(
                request_id = %self.request_id(),
                entity = T::ENTITY,
                state = %state,
                "metadata load failed"
            );
        }
        self.finish(state, false);
    }

    /// Write `body`. Legal before any load, after a load that found nothing,
    /// or over a present row. A body that owns an index and has none yet
    /// gets one first, with collision retries.
    pub fn save(&self, body: T, on_success: Callback, on_failed: Callback) -> Result<(), MetadataError> {
        let needs_index = {
            let mut inner = self.inner.borrow_mut();
            match inner.state {
                RecordState::Empty | RecordState::Missing | RecordState::Present => {}
                state => return Err(Self::invalid(state, "save")),
            }
            let salt = inner.salt.clone();
            let max_retries = inner.max_retries;
            inner.resolver = body
                .index_base_name()
                .map(|base| CollisionResolver::new(base, salt, max_retries));
            inner.created_index = None;
            inner.body = Some(body);
            inner.state = RecordState::Saving;
            inner.pending = Some((on_success, on_failed));
            inner.resolver.is_some()
        };

        if needs_index {
            self.create_owned_index();
        } else {
            self.put_row();
        }
        Ok(())
    }

    /// Rewrite a present row in place; the row's identity does not change.
    pub fn update(
        &self,
        modify: impl FnOnce(&mut T),
        on_success: Callback,
        on_failed: Callback,
    ) -> Result<(), MetadataError> {
        {
            let mut inner = self.inner.borrow_mut();
            let state = inner.state;
            if state != RecordState::Present {
                return Err(Self::invalid(state, "update"));
            }
            let Some(body) = inner.body.as_mut() else {
                return Err(Self::invalid(state, "update"));
            };
            modify(body);
            inner.resolver = None;
            inner.created_index = None;
            inner.state = RecordState::Saving;
            inner.pending = Some((on_success, on_failed));
        }
        self.put_row();
        Ok(())
    }

    fn create_owned_index(&self) {
        let candidate = self
            .inner
            .borrow()
            .resolver
            .as_ref()
            .map(|r| r.candidate().to_string());
        match candidate {
            Some(name) => self.kvs.create_index(
                &name,
                self.on(Self::create_index_successful),
                self.on(Self::create_index_failed),
            ),
            None => self.put_row(),
        }
    }

    fn create_index_successful(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            let name = inner
                .resolver
                .as_ref()
                .map(|r| r.candidate().to_string())
                .unwrap_or_default();
            let oid = IndexOid::from_name(&name);
            tracing::debug!(
                request_id = %inner.request_id,
                entity = T::ENTITY,
                index = %name,
                oid = %oid,
                "index created"
            );
            if let Some(body) = inner.body.as_mut() {
                body.set_index(name.clone(), oid);
            }
            inner.created_index = Some(name);
        }
        self.put_row();
    }

    fn create_index_failed(&self) {
        let state = self.kvs.state();
        if state != KvsOpState::AlreadyExists {
            tracing::error!(
                request_id = %self.request_id(),
                entity = T::ENTITY,
                state = %state,
                "index creation failed"
            );
            self.finish(write_failure_state(state), false);
            return;
        }

        metrics::increment_collision(T::ENTITY);
        let decision = match self.inner.borrow_mut().resolver.as_mut() {
            Some(resolver) => resolver.on_collision(),
            None => CollisionDecision::Exhausted { attempts: 0 },
        };
        match decision {
            CollisionDecision::Retry(next) => {
                tracing::info!(
                    request_id = %self.request_id(),
                    entity = T::ENTITY,
                    next = %next,
                    "index name collision, retrying"
                );
                self.create_owned_index();
            }
            CollisionDecision::Exhausted { attempts } => {
                tracing::error!(
                    request_id = %self.request_id(),
                    entity = T::ENTITY,
                    attempts,
                    "failed to resolve index name collision"
                );
                metrics::increment_collision_exhausted(T::ENTITY);
                self.finish(RecordState::Failed, false);
            }
        }
    }

    fn serialized_body(&self) -> Result<String, MetadataError> {
        let inner = self.inner.borrow();
        let json = serde_json::to_string(&inner.body)?;
        Ok(json)
    }

    fn put_row(&self) {
        let json = match self.serialized_body() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(request_id = %self.request_id(), entity = T::ENTITY, error = %e, "cannot serialize metadata");
                self.finish(RecordState::Failed, false);
                return;
            }
        };
        let location = self.location();
        self.kvs.put_keyval(
            &location.index,
            &location.key,
            json,
            self.on(Self::put_row_successful),
            self.on(Self::put_row_failed),
        );
    }

    fn replica_target(&self) -> Option<String> {
        let inner = self.inner.borrow();
        if inner.replicate {
            inner.location.replica.clone()
        } else {
            None
        }
    }

    fn put_row_successful(&self) {
        let replica = match self.replica_target() {
            Some(replica) => replica,
            None => return self.finish(RecordState::Present, true),
        };
        match self.serialized_body() {
            Ok(json) => {
                let key = self.key();
                self.kvs.put_keyval(
                    &replica,
                    &key,
                    json,
                    self.on(Self::save_replica),
                    self.on(Self::save_replica),
                );
            }
            Err(_) => self.save_replica(),
        }
    }

    /// The save succeeds whatever happened to the replica.
    fn save_replica(&self) {
        if self.kvs.state() != KvsOpState::Created {
            tracing::warn!(
                request_id = %self.request_id(),
                entity = T::ENTITY,
                key = %self.key(),
                "failed to save row in replica index"
            );
            metrics::increment_replica_failure(T::ENTITY, "save");
        }
        self.finish(RecordState::Present, true);
    }

    fn put_row_failed(&self) {
        let failed = write_failure_state(self.kvs.state());
        tracing::error!(
            request_id = %self.request_id(),
            entity = T::ENTITY,
            state = %failed,
            "saving metadata failed"
        );
        let created = {
            let mut inner = self.inner.borrow_mut();
            inner.deferred_state = failed;
            inner.created_index.take()
        };
        match created {
            Some(index) => self.kvs.delete_index(
                &index,
                self.on(Self::cleanup_done),
                self.on(Self::cleanup_done),
            ),
            None => self.finish(failed, false),
        }
    }

    fn cleanup_done(&self) {
        if self.kvs.state() != KvsOpState::Deleted {
            tracing::warn!(request_id = %self.request_id(), entity = T::ENTITY, "could not delete index of failed save");
        }
        let failed = self.inner.borrow().deferred_state;
        self.finish(failed, false);
    }

    pub fn remove(&self, on_success: Callback, on_failed: Callback) -> Result<(), MetadataError> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state != RecordState::Present {
                return Err(Self::invalid(inner.state, "remove"));
            }
            inner.state = RecordState::Deleting;
            inner.pending = Some((on_success, on_failed));
        }
        let location = self.location();
        self.kvs.delete_keyval(
            &location.index,
            &location.key,
            self.on(Self::remove_successful),
            self.on(Self::remove_failed),
        );
        Ok(())
    }

    fn remove_successful(&self) {
        match self.replica_target() {
            Some(replica) => {
                let key = self.key();
                self.kvs.delete_keyval(
                    &replica,
                    &key,
                    self.on(Self::remove_replica),
                    self.on(Self::remove_replica),
                );
            }
            None => self.finish(RecordState::Missing, true),
        }
    }

    fn remove_replica(&self) {
        if self.kvs.state() != KvsOpState::Deleted {
            tracing::warn!(
                request_id = %self.request_id(),
                entity = T::ENTITY,
                key = %self.key(),
                "failed to remove row from replica index"
            );
            metrics::increment_replica_failure(T::ENTITY, "remove");
        }
        self.finish(RecordState::Missing, true);
    }

    fn remove_failed(&self) {
        let state = self.kvs.state();
        if state == KvsOpState::Missing {
            // already gone: the remove achieved its goal
            return self.remove_successful();
        }
        tracing::error!(
            request_id = %self.request_id(),
            entity = T::ENTITY,
            state = %state,
            "removing metadata failed"
        );
        self.finish(write_failure_state(state), false);
    }
}
