//! Inbound request contract
//!
//! The HTTP front end lives outside this crate; an Action only needs to ask
//! whether the client is still there, pause reads and emit one response.

use crate::error_code::ErrorCode;

pub mod recording;

/// Invoked by the transport when the client read timeout expires.
pub type ReadTimeoutCallback = Box<dyn Fn() + 'static>;

pub trait RequestTransport {
    fn request_id(&self) -> &str;

    /// Account the request was signed for, if the front end knows it
    fn account_id(&self) -> Option<String>;

    fn access_key(&self) -> Option<String>;

    /// Polled, never pushed
    fn client_connected(&self) -> bool;

    fn is_read_timed_out(&self) -> bool;

    /// Stop reading body bytes from the client
    fn pause(&self);

    fn resume(&self);

    fn respond_error(&self, code: &ErrorCode);

    fn respond_retry_after(&self, code: &ErrorCode, seconds: u32);

    fn send_response(&self, status: u16, body: Option<String>);

    fn set_client_read_timeout_callback(&self, callback: ReadTimeoutCallback);
}
