//! NNTP connection with automatic reconnect and request retry

mod connection;
mod io;
mod posting;
mod request;
mod server;
mod state;

pub use state::{ConnectionState, ConnectionStats, Request, RequestKind, RequestStep};

use crate::config::ServerConfig;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::{Span, debug};

/// Byte stream an NNTP session runs over (TLS or plain TCP)
pub(crate) trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// One NNTP session to a server, reopened on demand
///
/// Requests are strictly serialized: each method takes `&mut self` and runs
/// one request to completion, reconnecting and replaying it when the
/// transport fails.
///
/// # Example
///
/// ```no_run
/// use nntp_upload::{NntpConnection, ServerConfig};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ServerConfig::tls("news.example.com", "user", "pass");
/// let mut conn = NntpConnection::new(Arc::new(config), tracing::Span::none());
///
/// conn.connect().await?;
/// println!("Server time: {}", conn.date().await?);
/// conn.quit().await?;
/// # Ok(())
/// # }
/// ```
#[must_use]
pub struct NntpConnection {
    /// Server configuration
    config: Arc<ServerConfig>,
    /// Open session, if any
    stream: Option<BufReader<Box<dyn Transport>>>,
    /// Connection state
    state: ConnectionState,
    /// Group re-selected after a reconnect
    current_group: Option<String>,
    /// The request in flight
    request: Option<Request>,
    /// Counters
    stats: ConnectionStats,
    /// Greeting was 200 rather than 201
    posting_allowed: bool,
    /// Already warned about a server replacing a message-id
    warned_message_id: bool,
    /// Reused for rendering articles
    buffer: Vec<u8>,
    /// Span every request is logged under
    span: Span,
}

impl NntpConnection {
    /// Create an inactive connection; nothing is opened until needed
    pub fn new(config: Arc<ServerConfig>, span: Span) -> Self {
        Self {
            config,
            stream: None,
            state: ConnectionState::Inactive,
            current_group: None,
            request: None,
            stats: ConnectionStats::default(),
            posting_allowed: true,
            warned_message_id: false,
            buffer: Vec::new(),
            span,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Counters for this connection
    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    /// Get the currently selected newsgroup, if any
    pub fn current_group(&self) -> Option<&str> {
        self.current_group.as_deref()
    }

    /// The request in flight, if any
    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    /// Whether the server greeted with "posting allowed"
    pub fn posting_allowed(&self) -> bool {
        self.posting_allowed
    }

    /// Server this connection talks to
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Drop the transport without saying goodbye
    pub fn abort(&mut self) {
        if self.stream.is_some() || self.request.is_some() {
            debug!(parent: &self.span, "Aborting connection in state {}", self.state);
        }
        self.request = None;
        self.teardown();
    }

    /// Forget the transport after a failure
    pub(crate) fn teardown(&mut self) {
        self.stream = None;
        self.state = ConnectionState::Disconnected;
    }
}

impl Drop for NntpConnection {
    fn drop(&mut self) {
        debug!(parent: &self.span, "NntpConnection dropped");
    }
}
