use crate::error_code::ErrorCode;
use crate::reactor::{Callback, LoopHandle};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use thiserror::Error;

pub mod file_auth;

/// Identity established by a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub access_key: String,
    pub account_id: String,
    pub account_name: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("internal auth error: {0}")]
    Internal(String),
}

/// Black-box auth service client. Outcomes arrive through the callbacks on
/// the event loop; on failure [`AuthClient::error_code`] holds the code to
/// return to the client verbatim.
pub trait AuthClient {
    fn check_authentication(&self, on_success: Callback, on_failed: Callback);

    /// `resource_owner` is the account id owning the target resource.
    fn check_authorization(&self, resource_owner: &str, on_success: Callback, on_failed: Callback);

    fn error_code(&self) -> ErrorCode;

    /// A chunked-upload signature check was abandoned mid-stream
    fn is_chunk_auth_aborted(&self) -> bool;

    fn context(&self) -> Option<AuthContext>;
}

/// Scripted auth client.
///
/// Authentication yields the configured context or code. Authorization
/// succeeds when the caller owns the resource unless a denial is scripted.
pub struct StaticAuthClient {
    handle: LoopHandle,
    authentication: RefCell<Result<AuthContext, ErrorCode>>,
    authorization_failure: RefCell<Option<ErrorCode>>,
    error_code: Rc<RefCell<Option<ErrorCode>>>,
    context: Rc<RefCell<Option<AuthContext>>>,
    chunk_auth_aborted: Cell<bool>,
    authentication_calls: Rc<Cell<usize>>,
    authorization_calls: Rc<Cell<usize>>,
}

impl StaticAuthClient {
    pub fn allow(handle: LoopHandle, account_id: &str) -> Self {
        Self::with_result(
            handle,
            Ok(AuthContext {
                access_key: format!("AK-{}", account_id),
                account_id: account_id.to_string(),
                account_name: account_id.to_string(),
            }),
        )
    }

    pub fn deny(handle: LoopHandle, code: ErrorCode) -> Self {
        Self::with_result(handle, Err(code))
    }

    fn with_result(handle: LoopHandle, authentication: Result<AuthContext, ErrorCode>) -> Self {
        Self {
            handle,
            authentication: RefCell::new(authentication),
            authorization_failure: RefCell::new(None),
            error_code: Rc::new(RefCell::new(None)),
            context: Rc::new(RefCell::new(None)),
            chunk_auth_aborted: Cell::new(false),
            authentication_calls: Rc::new(Cell::new(0)),
            authorization_calls: Rc::new(Cell::new(0)),
        }
    }

    pub fn deny_authorization(&self, code: ErrorCode) {
        *self.authorization_failure.borrow_mut() = Some(code);
    }

    pub fn set_chunk_auth_aborted(&self, aborted: bool) {
        self.chunk_auth_aborted.set(aborted);
    }

    pub fn authentication_calls(&self) -> usize {
        self.authentication_calls.get()
    }

    pub fn authorization_calls(&self) -> usize {
        self.authorization_calls.get()
    }

    fn finish(&self, outcome: Result<Option<AuthContext>, ErrorCode>, on_success: Callback, on_failed: Callback) {
        let error_code = self.error_code.clone();
        let context = self.context.clone();
        self.handle.post(move || match outcome {
            Ok(established) => {
                if let Some(established) = established {
                    *context.borrow_mut() = Some(established);
                }
                on_success();
            }
            Err(code) => {
                *error_code.borrow_mut() = Some(code);
                on_failed();
            }
        });
    }
}

impl AuthClient for StaticAuthClient {
    fn check_authentication(&self, on_success: Callback, on_failed: Callback) {
        self.authentication_calls.set(self.authentication_calls.get() + 1);
        let outcome = self.authentication.borrow().clone().map(Some);
        self.finish(outcome, on_success, on_failed);
    }

    fn check_authorization(&self, resource_owner: &str, on_success: Callback, on_failed: Callback) {
        self.authorization_calls.set(self.authorization_calls.get() + 1);
        let scripted = self.authorization_failure.borrow().clone();
        let outcome = match scripted {
            Some(code) => Err(code),
            None => match self.authentication.borrow().as_ref() {
                Ok(ctx) if ctx.account_id == resource_owner => Ok(None),
                _ => Err(ErrorCode::AccessDenied),
            },
        };
        self.finish(outcome, on_success, on_failed);
    }

    fn error_code(&self) -> ErrorCode {
        self.error_code
            .borrow()
            .clone()
            .unwrap_or(ErrorCode::InternalError)
    }

    fn is_chunk_auth_aborted(&self) -> bool {
        self.chunk_auth_aborted.get()
    }

    fn context(&self) -> Option<AuthContext> {
        self.context.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::EventLoop;

    fn flag() -> (Rc<Cell<&'static str>>, Callback, Callback) {
        let seen = Rc::new(Cell::new(""));
        let ok = seen.clone();
        let failed = seen.clone();
        (
            seen,
            Box::new(move || ok.set("ok")),
            Box::new(move || failed.set("failed")),
        )
    }

    #[test]
    fn test_allow_sets_context_after_loop_runs() {
        let mut event_loop = EventLoop::new();
        let client = StaticAuthClient::allow(event_loop.handle(), "acct-1");
        let (seen, ok, failed) = flag();

        client.check_authentication(ok, failed);
        assert!(client.context().is_none());
        event_loop.run_until_idle();

        assert_eq!(seen.get(), "ok");
        assert_eq!(client.context().unwrap().account_id, "acct-1");
    }

    #[test]
    fn test_deny_reports_code_verbatim() {
        let mut event_loop = EventLoop::new();
        let client = StaticAuthClient::deny(event_loop.handle(), ErrorCode::from("ExpiredToken"));
        let (seen, ok, failed) = flag();

        client.check_authentication(ok, failed);
        event_loop.run_until_idle();

        assert_eq!(seen.get(), "failed");
        assert_eq!(client.error_code().as_str(), "ExpiredToken");
    }

    #[test]
    fn test_authorization_requires_ownership() {
        let mut event_loop = EventLoop::new();
        let client = StaticAuthClient::allow(event_loop.handle(), "acct-1");

        let (seen, ok, failed) = flag();
        client.check_authorization("acct-1", ok, failed);
        event_loop.run_until_idle();
        assert_eq!(seen.get(), "ok");

        let (seen, ok, failed) = flag();
        client.check_authorization("acct-2", ok, failed);
        event_loop.run_until_idle();
        assert_eq!(seen.get(), "failed");
        assert_eq!(client.error_code(), ErrorCode::AccessDenied);
        assert_eq!(client.authorization_calls(), 2);
    }
}
