//! Ancillary requests: STAT, GROUP, DATE and QUIT

use super::NntpConnection;
use super::state::{ConnectionState, RequestKind};
use crate::commands::{self, GroupInfo};
use crate::error::{NntpError, Result};
use crate::response::{NntpResponse, codes};
use chrono::NaiveDateTime;
use tracing::{Instrument, debug};

fn unexpected(response: NntpResponse) -> NntpError {
    NntpError::BadResponse {
        code: response.code,
        message: response.message,
    }
}

impl NntpConnection {
    /// Check whether an article exists (RFC 3977 §6.2.4)
    ///
    /// `id` is a message-id (`<...>`) or an article number in the current
    /// group. Returns `(article_number, message_id)` when the article
    /// exists and `None` when the server reports 423 or 430.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use nntp_upload::{NntpConnection, ServerConfig};
    /// # use std::sync::Arc;
    /// # async fn example() -> nntp_upload::Result<()> {
    /// # let config = ServerConfig::plain("news.example.com", "", "");
    /// # let mut conn = NntpConnection::new(Arc::new(config), tracing::Span::none());
    /// match conn.stat("<part1of3@example.com>").await? {
    ///     Some((number, id)) => println!("{} is article {}", id, number),
    ///     None => println!("not there (yet)"),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn stat(&mut self, id: &str) -> Result<Option<(u64, String)>> {
        let span = self.span.clone();
        async {
            let response = self
                .simple_request(RequestKind::Stat, &commands::stat(id))
                .await?;
            match response.code {
                codes::ARTICLE_STAT => commands::parse_stat_response(&response).map(Some),
                codes::NO_SUCH_ARTICLE_NUMBER | codes::NO_SUCH_ARTICLE_ID => Ok(None),
                _ => Err(unexpected(response)),
            }
        }
        .instrument(span)
        .await
    }

    /// Select a newsgroup (RFC 3977 §6.1.1)
    ///
    /// A selected group is remembered and selected again after every
    /// reconnect. Returns `None` if the group does not exist (411).
    pub async fn group(&mut self, name: &str) -> Result<Option<GroupInfo>> {
        let span = self.span.clone();
        async {
            let response = self
                .simple_request(RequestKind::Group, &commands::group(name))
                .await?;
            match response.code {
                codes::GROUP_SELECTED => {
                    let info = commands::parse_group_response(&response)?;
                    self.current_group = Some(name.to_string());
                    debug!("Selected group {} ({} articles)", name, info.count);
                    Ok(Some(info))
                }
                codes::NO_SUCH_GROUP => Ok(None),
                _ => Err(unexpected(response)),
            }
        }
        .instrument(span)
        .await
    }

    /// Server's current time in UTC (RFC 3977 §7.1)
    pub async fn date(&mut self) -> Result<NaiveDateTime> {
        let span = self.span.clone();
        async {
            let response = self
                .simple_request(RequestKind::Date, commands::date())
                .await?;
            if response.code != codes::SERVER_DATE {
                return Err(unexpected(response));
            }
            commands::parse_date_response(&response)
        }
        .instrument(span)
        .await
    }

    /// Close the session gracefully
    ///
    /// Sends QUIT and waits briefly for the goodbye; a server that does not
    /// answer is not an error. Never reconnects.
    pub async fn quit(&mut self) -> Result<()> {
        if self.stream.is_none() {
            self.state = ConnectionState::Disconnected;
            return Ok(());
        }
        let span = self.span.clone();
        async {
            self.state = ConnectionState::Closing;
            let result = match self.send_command(commands::quit()).await {
                Ok(()) => {
                    let limit = self.config.request_timeout;
                    match self.read_response(limit).await {
                        Ok(response) if response.code == codes::CLOSING_CONNECTION => Ok(()),
                        Ok(response) => {
                            debug!("Unexpected QUIT response: {} {}", response.code, response.message);
                            Ok(())
                        }
                        Err(NntpError::ConnectionLost) | Err(NntpError::Timeout) => Ok(()),
                        Err(e) => Err(e),
                    }
                }
                Err(e) => Err(e),
            };
            self.request = None;
            self.teardown();
            debug!("Connection closed");
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_keeps_code_and_text() {
        let err = unexpected(NntpResponse {
            code: 480,
            message: "Authentication required".to_string(),
        });
        assert_eq!(err.code(), Some(480));
        assert!(err.to_string().contains("Authentication required"));
    }
}
