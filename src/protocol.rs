//! Wire payloads exchanged between the client pool and the server.
//!
//! There is no framing: a connection carries one request and at most one
//! response, each delivered by a single read of up to the configured buffer
//! size. Payloads are raw bytes and only interpreted as text for logging.

use std::borrow::Cow;

/// Request payload sent by every client worker
pub struct Request;

impl Request {
    pub fn greeting() -> &'static [u8] {
        b"Hello from client"
    }
}

/// Response payload written by every connection handler
pub struct Response;

impl Response {
    /// Acknowledgment sent once a request was read
    pub fn ack() -> &'static [u8] {
        b"Message received."
    }
}

/// Render a payload for log output.
pub fn display(payload: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(payload)
}
