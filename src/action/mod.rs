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

//! Action engine
//!
//! An [`Action`] owns the step pipeline of one request. Steps run one at a
//! time; only a step's own completion callback moves the pipeline forward
//! (through [`Action::advance`]). Shutdown, client disconnect and the read
//! timeout are checked at every dispatch point and redirect the Action to
//! its rollback list or straight to the response.
//!
//! Everything runs on the event loop thread. `Action` is a cheap `Rc`
//! handle; internal state sits in a `RefCell` that is never borrowed while a
//! step or callback runs.

use crate::auth::{AuthClient, AuthContext};
use crate::config::ActionConfig;
use crate::error_code::ErrorCode;
use crate::observability::metrics;
use crate::shutdown::{ShutdownCoordinator, ShutdownDecision, ShutdownSignal};
use crate::transport::RequestTransport;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Instant;
use thiserror::Error;

pub mod pipeline;

pub use pipeline::{Step, TaskPipeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    Start,
    Running,
    Paused,
    Stopped,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackState {
    Start,
    Running,
    Complete,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("steps cannot be added after the action started")]
    AlreadyStarted,
}

struct ActionCore {
    pipeline: TaskPipeline,
    state: ActionState,
    rollback_state: RollbackState,
    error_code: Option<ErrorCode>,
    coordinator: ShutdownCoordinator,
    response_sent: bool,
    started: bool,
    started_at: Option<Instant>,
    success_status: u16,
    response_body: Option<String>,
}

struct ActionInner {
    name: String,
    request_id: String,
    transport: Rc<dyn RequestTransport>,
    auth: Option<Rc<dyn AuthClient>>,
    skip_auth: bool,
    shutdown: ShutdownSignal,
    config: ActionConfig,
    core: RefCell<ActionCore>,
}

/// Handle to one request's pipeline.
#[derive(Clone)]
pub struct Action {
    inner: Rc<ActionInner>,
}

/// Non-owning handle, for callbacks stored on long-lived collaborators.
#[derive(Clone)]
pub struct WeakAction {
    inner: Weak<ActionInner>,
}

impl WeakAction {
    pub fn upgrade(&self) -> Option<Action> {
        self.inner.upgrade().map(|inner| Action { inner })
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.borrow();
        f.debug_struct("Action")
            .field("name", &self.inner.name)
            .field("request_id", &self.inner.request_id)
            .field("state", &core.state)
            .field("rollback_state", &core.rollback_state)
            .field("error_code", &core.error_code)
            .finish()
    }
}

impl Action {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    pub fn transport(&self) -> &Rc<dyn RequestTransport> {
        &self.inner.transport
    }

    pub fn config(&self) -> &ActionConfig {
        &self.inner.config
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.inner.shutdown
    }

    pub fn downgrade(&self) -> WeakAction {
        WeakAction {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn state(&self) -> ActionState {
        self.inner.core.borrow().state
    }

    pub fn rollback_state(&self) -> RollbackState {
        self.inner.core.borrow().rollback_state
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.inner.core.borrow().error_code.clone()
    }

    pub fn is_error_state(&self) -> bool {
        self.state() == ActionState::Error
    }

    pub fn is_response_sent(&self) -> bool {
        self.inner.core.borrow().response_sent
    }

    /// The idempotent "response scheduled" guard shared by shutdown and
    /// normal completion.
    pub fn is_response_scheduled(&self) -> bool {
        self.inner.core.borrow().coordinator.is_response_scheduled()
    }

    /// True once shutdown took over this Action's response.
    pub fn reject_if_shutting_down(&self) -> bool {
        self.inner.shutdown.is_shutting_down() && self.is_response_scheduled()
    }

    pub fn number_of_tasks(&self) -> usize {
        self.inner.core.borrow().pipeline.len()
    }

    pub fn number_of_rollback_tasks(&self) -> usize {
        self.inner.core.borrow().pipeline.rollback_len()
    }

    pub fn clear_tasks(&self) {
        self.inner.core.borrow_mut().pipeline.clear_tasks();
    }

    /// Identity established by the authentication step, if it ran.
    pub fn auth_context(&self) -> Option<AuthContext> {
        self.inner.auth.as_ref().and_then(|auth| auth.context())
    }

    /// Account the request acts as: the authenticated account, falling back
    /// to what the transport reports when auth is not in play.
    pub fn requester_account(&self) -> Option<String> {
        self.auth_context()
            .map(|ctx| ctx.account_id)
            .or_else(|| self.inner.transport.account_id())
    }

    pub fn set_success_status(&self, status: u16) {
        self.inner.core.borrow_mut().success_status = status;
    }

    pub fn set_response_body(&self, body: impl Into<String>) {
        self.inner.core.borrow_mut().response_body = Some(body.into());
    }

    pub fn add_step(&self, step: impl Fn(&Action) + 'static) -> Result<(), ActionError> {
        let mut core = self.inner.core.borrow_mut();
        if core.started {
            return Err(ActionError::AlreadyStarted);
        }
        core.pipeline.push_step(Rc::new(step));
        Ok(())
    }

    pub fn add_rollback_step(&self, step: impl Fn(&Action) + 'static) -> Result<(), ActionError> {
        let mut core = self.inner.core.borrow_mut();
        if core.started {
            return Err(ActionError::AlreadyStarted);
        }
        core.pipeline.push_rollback_step(Rc::new(step));
        Ok(())
    }

    pub fn start(&self) {
        {
            let mut core = self.inner.core.borrow_mut();
            core.started = true;
            core.started_at = Some(Instant::now());
        }
        tracing::debug!(
            request_id = %self.inner.request_id,
            action = %self.inner.name,
            "action start"
        );

        if self.check_shutdown_and_rollback(false) {
            return;
        }

        let step = {
            let mut core = self.inner.core.borrow_mut();
            core.pipeline.restart();
            if core.pipeline.is_empty() {
                None
            } else {
                core.state = ActionState::Running;
                core.pipeline.next_step()
            }
        };
        match step {
            Some(step) => step(self),
            None => self.send_response(),
        }
    }

    /// Called by every step on success.
    pub fn advance(&self) {
        {
            let core = self.inner.core.borrow();
            if core.response_sent || core.rollback_state != RollbackState::Start {
                tracing::debug!(
                    request_id = %self.inner.request_id,
                    "pipeline already finishing, ignoring advance"
                );
                return;
            }
        }

        if self.check_shutdown_and_rollback(false) || self.inner.transport.is_read_timed_out() {
            return;
        }

        let step = {
            let core = self.inner.core.borrow();
            if core.pipeline.is_done() {
                None
            } else {
                Some(core.pipeline.task_index())
            }
        };

        match step {
            Some(index) if !self.inner.transport.client_connected() => {
                tracing::warn!(
                    request_id = %self.inner.request_id,
                    next_step = index,
                    "client disconnected, rolling back"
                );
                self.rollback_start();
            }
            Some(_) => {
                let step = self.inner.core.borrow_mut().pipeline.next_step();
                if let Some(step) = step {
                    step(self);
                }
            }
            None => {
                if self.is_response_sent() {
                    self.complete();
                } else {
                    self.send_response();
                }
            }
        }
    }

    pub fn complete(&self) {
        let mut core = self.inner.core.borrow_mut();
        core.pipeline.reset_task_cursor();
        core.state = ActionState::Complete;
    }

    /// Waiting on an event outside the pipeline (e.g. more body bytes)
    pub fn pause(&self) {
        self.inner.core.borrow_mut().state = ActionState::Paused;
        self.inner.transport.pause();
    }

    pub fn resume(&self) {
        self.inner.core.borrow_mut().state = ActionState::Running;
        self.inner.transport.resume();
    }

    /// Hard cancellation; no rollback, no response.
    pub fn abort(&self) {
        {
            let mut core = self.inner.core.borrow_mut();
            core.pipeline.reset_task_cursor();
            core.state = ActionState::Stopped;
        }
        tracing::debug!(request_id = %self.inner.request_id, "action aborted");
    }

    pub fn rollback_start(&self) {
        let (entered, empty) = {
            let mut core = self.inner.core.borrow_mut();
            if core.response_sent {
                drop(core);
                tracing::debug!(request_id = %self.inner.request_id, "response already sent, no rollback");
                return;
            }
            if core.rollback_state != RollbackState::Start {
                (false, false)
            } else {
                core.rollback_state = RollbackState::Running;
                core.pipeline.restart_rollback();
                (true, core.pipeline.rollback_len() == 0)
            }
        };

        if !entered {
            tracing::warn!(
                request_id = %self.inner.request_id,
                rollback_state = ?self.rollback_state(),
                "rollback already started, finishing without running steps"
            );
            self.send_response();
            return;
        }

        tracing::debug!(request_id = %self.inner.request_id, "rollback start");
        if empty {
            tracing::warn!(request_id = %self.inner.request_id, "rollback triggered on empty list");
            self.rollback_done();
            return;
        }

        let step = self.inner.core.borrow_mut().pipeline.next_rollback_step();
        if let Some(step) = step {
            step(self);
        }
    }

    /// Called by every rollback step when it finishes, success or not.
    pub fn rollback_next(&self) {
        if self.rollback_state() != RollbackState::Running {
            return;
        }
        let step = if self.inner.transport.client_connected() {
            self.inner.core.borrow_mut().pipeline.next_rollback_step()
        } else {
            tracing::warn!(
                request_id = %self.inner.request_id,
                "client disconnected during rollback, abandoning it"
            );
            None
        };
        match step {
            Some(step) => step(self),
            None => self.rollback_done(),
        }
    }

    pub fn rollback_done(&self) {
        {
            let mut core = self.inner.core.borrow_mut();
            core.pipeline.reset_rollback_cursor();
            core.rollback_state = RollbackState::Complete;
        }
        tracing::debug!(request_id = %self.inner.request_id, "rollback done");
        self.send_response();
    }

    /// Consulted before every dispatch. Returns true when shutdown took over
    /// and the caller must not dispatch anything.
    pub fn check_shutdown_and_rollback(&self, check_auth_aborted: bool) -> bool {
        let auth_aborted = check_auth_aborted
            && self
                .inner
                .auth
                .as_ref()
                .map(|auth| auth.is_chunk_auth_aborted())
                .unwrap_or(false);

        let decision = {
            let mut core = self.inner.core.borrow_mut();
            let has_rollback =
                core.pipeline.rollback_len() > 0 && core.rollback_state == RollbackState::Start;
            core.coordinator
                .evaluate(&self.inner.shutdown, auth_aborted, has_rollback)
        };

        match decision {
            ShutdownDecision::Proceed => false,
            ShutdownDecision::Suppress => true,
            ShutdownDecision::Intercept { rollback } => {
                tracing::info!(
                    request_id = %self.inner.request_id,
                    rollback,
                    "shutting down, intercepting action"
                );
                metrics::increment_shutdown_interception("scheduled");
                self.inner.transport.pause();
                self.finish_with_default_error(ErrorCode::ServiceUnavailable, rollback);
                true
            }
            ShutdownDecision::AuthAborted { rollback } => {
                tracing::info!(
                    request_id = %self.inner.request_id,
                    rollback,
                    "auth aborted during shutdown"
                );
                metrics::increment_shutdown_interception("auth_aborted");
                self.finish_with_default_error(ErrorCode::ServiceUnavailable, rollback);
                true
            }
        }
    }

    fn finish_with_default_error(&self, code: ErrorCode, rollback: bool) {
        if self.error_code().is_none() {
            self.set_error(code);
        }
        if rollback {
            self.rollback_start();
        } else {
            self.send_response();
        }
    }

    /// Records the client-visible code. Does not stop the pipeline.
    pub fn set_error(&self, code: ErrorCode) {
        let mut core = self.inner.core.borrow_mut();
        core.error_code = Some(code);
        core.state = ActionState::Error;
    }

    /// Failure path for steps: record `code`, then roll back if there is
    /// anything to undo, else respond.
    pub fn fail_with(&self, code: ErrorCode) {
        tracing::debug!(
            request_id = %self.inner.request_id,
            code = %code,
            "step failed"
        );
        self.set_error(code);
        if self.should_roll_back() {
            self.rollback_start();
        } else {
            self.send_response();
        }
    }

    /// Failure before anything needed undoing: respond without rollback.
    pub fn respond_error(&self, code: ErrorCode) {
        tracing::debug!(
            request_id = %self.inner.request_id,
            code = %code,
            "responding with error"
        );
        self.set_error(code);
        self.send_response();
    }

    fn should_roll_back(&self) -> bool {
        let core = self.inner.core.borrow();
        core.rollback_state == RollbackState::Start && core.pipeline.rollback_len() > 0
    }

    /// Installed on the transport at construction.
    pub fn client_read_timeout_callback(&self) {
        if self.is_response_sent() {
            return;
        }
        tracing::debug!(request_id = %self.inner.request_id, "client read timeout");
        self.set_error(ErrorCode::RequestTimeout);
        if self.should_roll_back() {
            self.rollback_start();
        } else {
            self.send_response();
        }
    }

    /// Emit the one response of this Action and complete it. Later calls
    /// are ignored.
    pub fn send_response(&self) {
        let (error_code, status, body) = {
            let mut core = self.inner.core.borrow_mut();
            if core.response_sent {
                drop(core);
                tracing::warn!(request_id = %self.inner.request_id, "response already sent");
                return;
            }
            core.response_sent = true;
            core.coordinator.mark_response_scheduled();
            (
                core.error_code.clone(),
                core.success_status,
                core.response_body.take(),
            )
        };

        let transport = &self.inner.transport;
        if !transport.client_connected() {
            tracing::debug!(request_id = %self.inner.request_id, "client gone, response dropped");
        } else {
            match &error_code {
                Some(code) if code.wants_retry_after() => {
                    transport.respond_retry_after(code, self.inner.config.retry_after_secs)
                }
                Some(code) => transport.respond_error(code),
                None => transport.send_response(status, body),
            }
        }

        self.complete();
        self.record_outcome(error_code.as_ref());
    }

    /// Respond ServiceUnavailable with Retry-After and complete.
    pub fn send_retry_error(&self) {
        {
            let mut core = self.inner.core.borrow_mut();
            if core.response_sent {
                return;
            }
            core.response_sent = true;
            core.coordinator.mark_response_scheduled();
        }
        self.inner.transport.respond_retry_after(
            &ErrorCode::ServiceUnavailable,
            self.inner.config.retry_after_secs,
        );
        self.complete();
        self.record_outcome(Some(&ErrorCode::ServiceUnavailable));
    }

    fn record_outcome(&self, error_code: Option<&ErrorCode>) {
        let (rolled_back, started_at) = {
            let core = self.inner.core.borrow();
            (core.rollback_state == RollbackState::Complete, core.started_at)
        };
        let outcome = match (rolled_back, error_code) {
            (true, _) => "rolled_back",
            (false, Some(_)) => "error",
            (false, None) => "complete",
        };
        let elapsed = started_at
            .map(|at| at.elapsed().as_secs_f64())
            .unwrap_or_default();
        metrics::record_action_outcome(&self.inner.name, outcome, elapsed);
        tracing::debug!(
            request_id = %self.inner.request_id,
            action = %self.inner.name,
            outcome,
            error_code = error_code.map(|c| c.as_str()).unwrap_or(""),
            "action finished"
        );
    }

    fn auth_required(&self) -> bool {
        !self.inner.config.auth_disabled && !self.inner.skip_auth && self.inner.auth.is_some()
    }

    /// Built-in first step: authenticate the requester.
    pub fn authenticate(&self) {
        let auth = match (&self.inner.auth, self.auth_required()) {
            (Some(auth), true) => auth.clone(),
            _ => return self.advance(),
        };
        let on_success = {
            let action = self.clone();
            Box::new(move || action.advance())
        };
        let on_failed = {
            let action = self.clone();
            Box::new(move || action.auth_failed("authentication"))
        };
        auth.check_authentication(on_success, on_failed);
    }

    /// Authorize the requester against the resource owner account.
    pub fn authorize(&self, resource_owner: &str) {
        let auth = match (&self.inner.auth, self.auth_required()) {
            (Some(auth), true) => auth.clone(),
            _ => return self.advance(),
        };
        let on_success = {
            let action = self.clone();
            Box::new(move || action.advance())
        };
        let on_failed = {
            let action = self.clone();
            Box::new(move || action.auth_failed("authorization"))
        };
        auth.check_authorization(resource_owner, on_success, on_failed);
    }

    fn auth_failed(&self, stage: &str) {
        if self.check_shutdown_and_rollback(true) {
            return;
        }
        let code = self
            .inner
            .auth
            .as_ref()
            .map(|auth| auth.error_code())
            .unwrap_or(ErrorCode::InternalError);
        tracing::error!(
            request_id = %self.inner.request_id,
            stage,
            code = %code,
            "auth check failed"
        );
        metrics::increment_auth_failure(code.as_str());
        self.set_error(code);
        self.send_response();
    }
}

/// Assembles an [`Action`] from its step list.
pub struct ActionBuilder {
    name: String,
    transport: Rc<dyn RequestTransport>,
    shutdown: ShutdownSignal,
    auth: Option<Rc<dyn AuthClient>>,
    config: ActionConfig,
    skip_auth: bool,
    check_shutdown: Option<bool>,
    success_status: u16,
    steps: Vec<Step>,
    rollback_steps: Vec<Step>,
}

impl ActionBuilder {
    pub fn new(
        name: impl Into<String>,
        transport: Rc<dyn RequestTransport>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            shutdown,
            auth: None,
            config: ActionConfig::default(),
            skip_auth: false,
            check_shutdown: None,
            success_status: 200,
            steps: Vec::new(),
            rollback_steps: Vec::new(),
        }
    }

    pub fn auth_client(mut self, auth: Rc<dyn AuthClient>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn config(mut self, config: ActionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn skip_auth(mut self, skip: bool) -> Self {
        self.skip_auth = skip;
        self
    }

    /// Per-action override of `check_shutdown_signal`
    pub fn check_shutdown_signal(mut self, check: bool) -> Self {
        self.check_shutdown = Some(check);
        self
    }

    pub fn success_status(mut self, status: u16) -> Self {
        self.success_status = status;
        self
    }

    pub fn step(mut self, step: impl Fn(&Action) + 'static) -> Self {
        self.steps.push(Rc::new(step));
        self
    }

    pub fn rollback_step(mut self, step: impl Fn(&Action) + 'static) -> Self {
        self.rollback_steps.push(Rc::new(step));
        self
    }

    pub fn build(self) -> Action {
        let request_id = self.transport.request_id().to_string();
        let check_shutdown = self
            .check_shutdown
            .unwrap_or(self.config.check_shutdown_signal);

        let mut pipeline = TaskPipeline::new();
        let authenticate = !self.config.auth_disabled && !self.skip_auth && self.auth.is_some();
        if authenticate {
            pipeline.push_step(Rc::new(|action: &Action| action.authenticate()));
        }
        for step in self.steps {
            pipeline.push_step(step);
        }
        for step in self.rollback_steps {
            pipeline.push_rollback_step(step);
        }

        tracing::debug!(
            request_id = %request_id,
            action = %self.name,
            authenticate,
            steps = pipeline.len(),
            rollback_steps = pipeline.rollback_len(),
            "action set up"
        );

        let action = Action {
            inner: Rc::new(ActionInner {
                name: self.name,
                request_id,
                transport: self.transport,
                auth: self.auth,
                skip_auth: self.skip_auth,
                shutdown: self.shutdown,
                config: self.config,
                core: RefCell::new(ActionCore {
                    pipeline,
                    state: ActionState::Start,
                    rollback_state: RollbackState::Start,
                    error_code: None,
                    coordinator: ShutdownCoordinator::new(check_shutdown),
                    response_sent: false,
                    started: false,
                    started_at: None,
                    success_status: self.success_status,
                    response_body: None,
                }),
            }),
        };

        let weak = action.downgrade();
        action
            .inner
            .transport
            .set_client_read_timeout_callback(Box::new(move || {
                if let Some(action) = weak.upgrade() {
                    action.client_read_timeout_callback();
                }
            }));

        action
    }
}
