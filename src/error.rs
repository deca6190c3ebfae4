//! NNTP and upload error types

use std::fmt;
use thiserror::Error;

/// Closed taxonomy of failures surfaced by a connection
///
/// Every [`NntpError`] maps onto exactly one kind. The snake_case names are
/// stable and are what gets logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// TCP connect, TLS handshake or greeting did not finish in time
    ConnectTimeout,
    /// Transport could not be opened, or the server greeted with a refusal
    ConnectFail,
    /// Server answered with a code that is not valid at this point
    BadResponse,
    /// Server sent a line that is not an NNTP response
    InvalidResponse,
    /// Server does not allow posting at all
    PostingDenied,
    /// Server rejected this article after every post retry
    PostDenied,
    /// No response within the request/post timeout
    Timeout,
    /// Connection closed while a request was in flight
    ConnectionLost,
    /// Connect requested on a connection that is already up
    UnexpectedConnect,
    /// Operation abandoned because the upload was cancelled
    Cancelled,
}

impl ErrorKind {
    /// Stable name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectTimeout => "connect_timeout",
            ErrorKind::ConnectFail => "connect_fail",
            ErrorKind::BadResponse => "bad_response",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::PostingDenied => "posting_denied",
            ErrorKind::PostDenied => "post_denied",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionLost => "connection_lost",
            ErrorKind::UnexpectedConnect => "unexpected_connect",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// NNTP protocol and connection errors
#[derive(Error, Debug)]
pub enum NntpError {
    /// IO error during network operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error during secure connection
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connection could not be established in time
    #[error("Connection timeout")]
    ConnectTimeout,

    /// Connection could not be established
    #[error("Connection failed: {0}")]
    ConnectFail(String),

    /// Unexpected response code
    #[error("NNTP error {code}: {message}")]
    BadResponse {
        /// NNTP response code
        code: u16,
        /// Response text from server
        message: String,
    },

    /// Invalid response from server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Posting not permitted on this server
    #[error("Posting not permitted")]
    PostingDenied,

    /// Article rejected
    #[error("Post rejected ({code}): {message}")]
    PostDenied {
        /// Final rejection code (441, 436, 437, 435)
        code: u16,
        /// Response text from server
        message: String,
    },

    /// Response timeout
    #[error("Response timeout")]
    Timeout,

    /// Connection closed unexpectedly
    #[error("Connection lost")]
    ConnectionLost,

    /// Connect requested while a session is already open or opening
    #[error("Unexpected connect request")]
    UnexpectedConnect,

    /// Request cancelled
    #[error("Cancelled")]
    Cancelled,
}

impl NntpError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            NntpError::Io(_) => ErrorKind::ConnectionLost,
            NntpError::Tls(_) | NntpError::ConnectFail(_) => ErrorKind::ConnectFail,
            NntpError::ConnectTimeout => ErrorKind::ConnectTimeout,
            NntpError::BadResponse { .. } => ErrorKind::BadResponse,
            NntpError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            NntpError::PostingDenied => ErrorKind::PostingDenied,
            NntpError::PostDenied { .. } => ErrorKind::PostDenied,
            NntpError::Timeout => ErrorKind::Timeout,
            NntpError::ConnectionLost => ErrorKind::ConnectionLost,
            NntpError::UnexpectedConnect => ErrorKind::UnexpectedConnect,
            NntpError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether tearing the session down and trying again may help
    pub(crate) fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConnectTimeout
                | ErrorKind::ConnectFail
                | ErrorKind::Timeout
                | ErrorKind::ConnectionLost
                | ErrorKind::InvalidResponse
        )
    }

    /// Response code carried by this error, if any
    pub fn code(&self) -> Option<u16> {
        match self {
            NntpError::BadResponse { code, .. } | NntpError::PostDenied { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }
}

/// Result type alias using NntpError
pub type Result<T> = std::result::Result<T, NntpError>;

/// Stage of the pipeline an article failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// POST/IHAVE
    Post,
    /// STAT confirmation
    Check,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Post => f.write_str("post"),
            Phase::Check => f.write_str("check"),
        }
    }
}

/// Errors that abort a whole upload
#[derive(Error, Debug)]
pub enum UploadError {
    /// A request for one article failed and the error is not skippable
    #[error("{phase} of {message_id} failed: {source}")]
    Article {
        /// Message-ID of the article at the time of failure
        message_id: String,
        /// Where it failed
        phase: Phase,
        /// Underlying connection error
        #[source]
        source: NntpError,
    },

    /// Article never showed up on the server
    #[error("{message_id} not found after {tries} checks and no repost budget left")]
    ArticleMissing {
        /// Message-ID that was polled
        message_id: String,
        /// Consecutive failed STAT polls
        tries: u32,
    },

    /// Upload cancelled by the caller
    #[error("Upload cancelled: {0}")]
    Cancelled(String),

    /// Articles added after input was closed
    #[error("Input already finished")]
    InputClosed,
}

impl UploadError {
    /// Connection error kind behind this failure, if any
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            UploadError::Article { source, .. } => Some(source.kind()),
            UploadError::Cancelled(_) => Some(ErrorKind::Cancelled),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::ConnectTimeout.as_str(), "connect_timeout");
        assert_eq!(ErrorKind::PostDenied.to_string(), "post_denied");
        assert_eq!(ErrorKind::UnexpectedConnect.as_str(), "unexpected_connect");
    }

    #[test]
    fn test_io_and_tls_classification() {
        let err = NntpError::Io(std::io::Error::other("reset"));
        assert_eq!(err.kind(), ErrorKind::ConnectionLost);
        assert!(err.is_transient());

        let err = NntpError::Tls("handshake".to_string());
        assert_eq!(err.kind(), ErrorKind::ConnectFail);
    }

    #[test]
    fn test_non_transient_kinds() {
        assert!(!NntpError::PostingDenied.is_transient());
        assert!(!NntpError::Cancelled.is_transient());
        assert!(
            !NntpError::BadResponse {
                code: 481,
                message: "bad auth".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_upload_error_display() {
        let err = UploadError::Article {
            message_id: "<a@b>".to_string(),
            phase: Phase::Post,
            source: NntpError::PostDenied {
                code: 441,
                message: "no".to_string(),
            },
        };
        assert_eq!(err.to_string(), "post of <a@b> failed: Post rejected (441): no");
        assert_eq!(err.kind(), Some(ErrorKind::PostDenied));

        let err = UploadError::ArticleMissing {
            message_id: "<a@b>".to_string(),
            tries: 3,
        };
        assert!(err.to_string().contains("after 3 checks"));
        assert_eq!(err.kind(), None);
    }
}
