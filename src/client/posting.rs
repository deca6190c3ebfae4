use crate::article::Post;
use crate::commands;
use crate::config::{PostMethod, PostTimeoutAction};
use crate::error::{NntpError, Result};
use crate::response::codes;
use tokio::time::timeout;
use tracing::{Instrument, debug, warn};

use super::NntpConnection;
use super::state::{RequestKind, RequestStep};

/// How one POST/IHAVE exchange ended when the transport held up
enum PostOutcome {
    /// Accepted; carries the message-id the server acknowledged
    Posted(String),
    /// The server refused this copy of the article
    Rejected { code: u16, message: String },
}

impl NntpConnection {
    /// Post an article (RFC 3977 §6.3.1, or §6.3.2 with [`PostMethod::Ihave`])
    ///
    /// Returns the message-id the article was accepted under. The article's
    /// message-id is regenerated before every attempt after the first, unless
    /// `keep_message_id` is set. If the server acknowledges under a different
    /// message-id, the article adopts it.
    ///
    /// # Retries
    ///
    /// - Rejections (441, 435, 436, 437) are retried up to `post_retries` times.
    /// - A timeout after the article text was sent follows `on_post_timeout`.
    /// - Lost connections and other timeouts replay the post on a new session,
    ///   up to `request_retries` times.
    ///
    /// # Errors
    ///
    /// - [`NntpError::PostingDenied`] - the server does not allow posting (201 greeting or 440)
    /// - [`NntpError::PostDenied`] - the article was rejected more than `post_retries` times
    /// - [`NntpError::Timeout`] - post timeouts exhausted `on_post_timeout`
    /// - [`NntpError::BadResponse`] - any other unexpected response
    pub async fn post(&mut self, article: &mut dyn Post) -> Result<String> {
        let span = self.span.clone();
        async {
            self.begin_request(RequestKind::Post);
            let result = self.post_loop(article).await;
            self.end_request(result)
        }
        .instrument(span)
        .await
    }

    async fn post_loop(&mut self, article: &mut dyn Post) -> Result<String> {
        let mut attempts = 0u32;
        loop {
            if attempts > 0 && !self.config.keep_message_id {
                article.regenerate_message_id();
            }
            attempts += 1;

            self.ensure_connected().await?;
            if !self.posting_allowed && self.config.post_method == PostMethod::Post {
                return Err(NntpError::PostingDenied);
            }

            let err = match self.post_once(article).await {
                Ok(PostOutcome::Posted(message_id)) => return Ok(message_id),
                Ok(PostOutcome::Rejected { code, message }) => {
                    let failures = self.note_post_failure();
                    if failures > self.config.post_retries {
                        return Err(NntpError::PostDenied { code, message });
                    }
                    warn!(
                        "Post of {} rejected ({} {}), retrying ({}/{})",
                        article.message_id(),
                        code,
                        message,
                        failures,
                        self.config.post_retries
                    );
                    continue;
                }
                Err(e) => e,
            };

            let after_body = matches!(
                self.step(),
                Some(RequestStep::Body) | Some(RequestStep::Result)
            );
            if matches!(err, NntpError::Timeout)
                && after_body
                && !self.config.on_post_timeout.is_empty()
            {
                // Whatever the server does with the article now, this session is out of step
                self.teardown();
                match self.next_post_timeout_action() {
                    Some(PostTimeoutAction::Retry) => {
                        warn!("Post of {} timed out, posting again", article.message_id());
                    }
                    Some(PostTimeoutAction::Ignore) => {
                        warn!(
                            "Post of {} timed out, assuming it was accepted",
                            article.message_id()
                        );
                        return Ok(article.message_id().to_string());
                    }
                    Some(PostTimeoutAction::StripHeader(name)) => {
                        let stripped = article.strip_header(&name);
                        warn!(
                            "Post of {} timed out, posting again without {} header{}",
                            article.message_id(),
                            name,
                            if stripped { "" } else { " (not present)" }
                        );
                    }
                    None => return Err(err),
                }
                continue;
            }

            if !self.recover(&err).await {
                return Err(err);
            }
        }
    }

    /// One POST/IHAVE exchange on the current session
    async fn post_once(&mut self, article: &mut dyn Post) -> Result<PostOutcome> {
        let (command, continue_code) = match self.config.post_method {
            PostMethod::Post => (commands::post().to_string(), codes::SEND_ARTICLE),
            PostMethod::Ihave => (
                commands::ihave(article.message_id()),
                codes::SEND_ARTICLE_TRANSFER,
            ),
        };

        self.set_step(RequestStep::Command);
        self.send_command(&command).await?;
        let request_timeout = self.config.request_timeout;
        let response = self.read_response(request_timeout).await?;
        match response.code {
            code if code == continue_code => {}
            codes::POSTING_NOT_PERMITTED => return Err(NntpError::PostingDenied),
            codes::ARTICLE_NOT_WANTED | codes::TRANSFER_NOT_POSSIBLE => {
                return Ok(PostOutcome::Rejected {
                    code: response.code,
                    message: response.message,
                });
            }
            _ => {
                return Err(NntpError::BadResponse {
                    code: response.code,
                    message: response.message,
                });
            }
        }

        self.set_step(RequestStep::Body);
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.clear();
        article.render(&mut buffer);
        let post_timeout = self.config.post_timeout;
        let sent = timeout(post_timeout, self.send(&buffer)).await;
        self.buffer = buffer;
        sent.map_err(|_| NntpError::Timeout)??;

        self.set_step(RequestStep::Result);
        let response = self.read_response(post_timeout).await?;
        match response.code {
            codes::ARTICLE_POSTED | codes::ARTICLE_TRANSFERRED => {
                let echoed = commands::find_message_id(&response.message)
                    .filter(|echoed| *echoed != article.message_id());
                if let Some(echoed) = echoed {
                    if self.warned_message_id {
                        debug!(
                            "Server acknowledged {} as {}",
                            article.message_id(),
                            echoed
                        );
                    } else {
                        warn!(
                            "Server acknowledged {} as {}; using the server's message-id",
                            article.message_id(),
                            echoed
                        );
                        self.warned_message_id = true;
                    }
                    article.set_message_id(echoed.to_string());
                }
                debug!("Posted {}", article.message_id());
                Ok(PostOutcome::Posted(article.message_id().to_string()))
            }
            codes::POSTING_FAILED | codes::TRANSFER_NOT_POSSIBLE | codes::TRANSFER_REJECTED => {
                Ok(PostOutcome::Rejected {
                    code: response.code,
                    message: response.message,
                })
            }
            _ => Err(NntpError::BadResponse {
                code: response.code,
                message: response.message,
            }),
        }
    }
}
