//! Connection and request state types for the NNTP connection

use std::fmt;

/// Lifecycle of one NNTP connection
///
/// `Inactive` is the initial state. `Disconnected` is reached after a failure
/// or a QUIT; the next request moves the connection back to `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected
    Inactive,
    /// Opening the transport and reading the greeting
    Connecting,
    /// AUTHINFO exchange in progress
    Authenticating,
    /// Ready for requests
    Connected,
    /// QUIT sent
    Closing,
    /// No transport
    Disconnected,
    /// Sleeping before the next reconnect attempt
    Waiting,
}

impl ConnectionState {
    /// Whether a session is open or being opened
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Authenticating
                | ConnectionState::Connected
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Inactive => "inactive",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Waiting => "waiting",
        };
        f.write_str(name)
    }
}

/// Operation carried by the in-flight request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// POST or IHAVE
    Post,
    /// STAT
    Stat,
    /// GROUP
    Group,
    /// DATE
    Date,
}

/// Where in its exchange a request currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStep {
    /// Command line sent, waiting for the first response
    Command,
    /// Article text being written
    Body,
    /// Article sent, waiting for the final response
    Result,
}

/// The single request a connection may have in flight
///
/// NNTP responses carry no identifiers, so the next line read always answers
/// this request.
#[derive(Debug, Clone)]
pub struct Request {
    pub(super) kind: RequestKind,
    pub(super) step: RequestStep,
    /// Replays after transient failures
    pub(super) retries: u32,
    /// Rejections by the server (posts only)
    pub(super) post_failures: u32,
    /// Timeouts after the article was sent (posts only)
    pub(super) post_timeouts: u32,
}

impl Request {
    pub(super) fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            step: RequestStep::Command,
            retries: 0,
            post_failures: 0,
            post_timeouts: 0,
        }
    }

    /// Operation of this request
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Current step
    pub fn step(&self) -> RequestStep {
        self.step
    }

    /// Replays so far
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

/// Per-connection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Bytes written to the transport
    pub bytes_sent: u64,
    /// Bytes read from the transport
    pub bytes_received: u64,
    /// Successful connects (including reconnects)
    pub connects: u64,
    /// Completed requests
    pub requests: u64,
    /// Failures that tore the session down or were returned to the caller
    pub errors: u64,
}
