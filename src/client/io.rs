//! Low-level I/O for the NNTP connection
//!
//! Every byte goes through these helpers so that traffic counters stay exact
//! and a missing or broken transport always surfaces as
//! [`NntpError::ConnectionLost`].

use super::NntpConnection;
use crate::commands::{self, MAX_RESPONSE_LINE};
use crate::error::{NntpError, Result};
use crate::response::NntpResponse;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::trace;

/// Mask credentials before a command line is logged
fn loggable(command: &str) -> &str {
    if command.starts_with("AUTHINFO PASS") {
        "AUTHINFO PASS ****"
    } else {
        command.trim_end()
    }
}

impl NntpConnection {
    /// Send a command line
    pub(super) async fn send_command(&mut self, command: &str) -> Result<()> {
        trace!(parent: &self.span, "Sending command: {}", loggable(command));
        self.send(command.as_bytes()).await
    }

    /// Write raw bytes and flush
    pub(super) async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(NntpError::ConnectionLost)?;
        stream.get_mut().write_all(data).await?;
        stream.get_mut().flush().await?;
        self.stats.bytes_sent += data.len() as u64;
        Ok(())
    }

    /// Read a single-line response within `limit`
    pub(super) async fn read_response(&mut self, limit: Duration) -> Result<NntpResponse> {
        timeout(limit, self.read_line())
            .await
            .map_err(|_| NntpError::Timeout)?
    }

    async fn read_line(&mut self) -> Result<NntpResponse> {
        let stream = self.stream.as_mut().ok_or(NntpError::ConnectionLost)?;

        let mut line_bytes = Vec::with_capacity(128);
        // +2 leaves room for the CRLF after a maximal line
        let mut limited = stream.take(MAX_RESPONSE_LINE as u64 + 2);
        let n = limited.read_until(b'\n', &mut line_bytes).await?;
        self.stats.bytes_received += n as u64;

        if n == 0 {
            return Err(NntpError::ConnectionLost);
        }
        if !line_bytes.ends_with(b"\n") {
            if n > MAX_RESPONSE_LINE {
                return Err(NntpError::InvalidResponse(format!(
                    "response line longer than {} bytes",
                    MAX_RESPONSE_LINE
                )));
            }
            // EOF in the middle of a line
            return Err(NntpError::ConnectionLost);
        }

        // Convert to string with lossy UTF-8 conversion
        let line = String::from_utf8_lossy(&line_bytes);
        let line = line.trim_end();
        trace!(parent: &self.span, "Received: {}", line);

        commands::parse_single_response(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_is_masked() {
        assert_eq!(loggable("AUTHINFO PASS hunter2\r\n"), "AUTHINFO PASS ****");
        assert_eq!(loggable("AUTHINFO USER bob\r\n"), "AUTHINFO USER bob");
        assert_eq!(loggable("STAT <a@b>\r\n"), "STAT <a@b>");
    }
}
