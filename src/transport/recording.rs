use super::{ReadTimeoutCallback, RequestTransport};
use crate::error_code::ErrorCode;
use std::cell::{Cell, RefCell};

/// A response as it would have gone out on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub error_code: Option<ErrorCode>,
    pub body: Option<String>,
    pub retry_after: Option<u32>,
}

/// Transport that records responses instead of writing them.
///
/// Used by tests and by the walkthrough binary; connectivity and the read
/// timeout are driven by hand.
pub struct RecordingRequest {
    request_id: String,
    account_id: Option<String>,
    access_key: Option<String>,
    connected: Cell<bool>,
    paused: Cell<bool>,
    timed_out: Cell<bool>,
    responses: RefCell<Vec<Response>>,
    timeout_callback: RefCell<Option<ReadTimeoutCallback>>,
}

impl RecordingRequest {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            account_id: None,
            access_key: None,
            connected: Cell::new(true),
            paused: Cell::new(false),
            timed_out: Cell::new(false),
            responses: RefCell::new(Vec::new()),
            timeout_callback: RefCell::new(None),
        }
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_access_key(mut self, access_key: impl Into<String>) -> Self {
        self.access_key = Some(access_key.into());
        self
    }

    pub fn disconnect(&self) {
        self.connected.set(false);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.get()
    }

    /// Simulate the read timer expiring. Returns false if no callback was
    /// installed.
    pub fn fire_read_timeout(&self) -> bool {
        self.timed_out.set(true);
        // take the callback out so it may reinstall or drop itself
        let callback = self.timeout_callback.borrow_mut().take();
        match callback {
            Some(callback) => {
                callback();
                let mut slot = self.timeout_callback.borrow_mut();
                if slot.is_none() {
                    *slot = Some(callback);
                }
                true
            }
            None => false,
        }
    }

    pub fn responses(&self) -> Vec<Response> {
        self.responses.borrow().clone()
    }

    pub fn response_count(&self) -> usize {
        self.responses.borrow().len()
    }

    pub fn last_response(&self) -> Option<Response> {
        self.responses.borrow().last().cloned()
    }

    fn push(&self, response: Response) {
        self.responses.borrow_mut().push(response);
    }
}

impl RequestTransport for RecordingRequest {
    fn request_id(&self) -> &str {
        &self.request_id
    }

    fn account_id(&self) -> Option<String> {
        self.account_id.clone()
    }

    fn access_key(&self) -> Option<String> {
        self.access_key.clone()
    }

    fn client_connected(&self) -> bool {
        self.connected.get()
    }

    fn is_read_timed_out(&self) -> bool {
        self.timed_out.get()
    }

    fn pause(&self) {
        self.paused.set(true);
    }

    fn resume(&self) {
        self.paused.set(false);
    }

    fn respond_error(&self, code: &ErrorCode) {
        self.push(Response {
            status: code.http_status(),
            error_code: Some(code.clone()),
            body: None,
            retry_after: None,
        });
    }

    fn respond_retry_after(&self, code: &ErrorCode, seconds: u32) {
        self.push(Response {
            status: code.http_status(),
            error_code: Some(code.clone()),
            body: None,
            retry_after: Some(seconds),
        });
    }

    fn send_response(&self, status: u16, body: Option<String>) {
        self.push(Response {
            status,
            error_code: None,
            body,
            retry_after: None,
        });
    }

    fn set_client_read_timeout_callback(&self, callback: ReadTimeoutCallback) {
        *self.timeout_callback.borrow_mut() = Some(callback);
    }
}
