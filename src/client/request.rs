//! Request bookkeeping and the replay loop
//!
//! A request that loses its connection or times out is replayed from its
//! command line on a fresh session, up to `request_retries` times. Responses
//! are returned to the caller verbatim; interpreting codes is the caller's job.

use super::NntpConnection;
use super::state::{Request, RequestKind, RequestStep};
use crate::config::PostTimeoutAction;
use crate::error::{NntpError, Result};
use crate::response::NntpResponse;
use tracing::warn;

impl NntpConnection {
    /// Install a new in-flight request
    pub(super) fn begin_request(&mut self, kind: RequestKind) {
        self.request = Some(Request::new(kind));
    }

    /// Clear the in-flight request, counting it if it completed
    pub(super) fn end_request<T>(&mut self, result: Result<T>) -> Result<T> {
        self.request = None;
        match &result {
            Ok(_) => self.stats.requests += 1,
            Err(_) => self.stats.errors += 1,
        }
        result
    }

    pub(super) fn set_step(&mut self, step: RequestStep) {
        if let Some(request) = self.request.as_mut() {
            request.step = step;
        }
    }

    pub(super) fn step(&self) -> Option<RequestStep> {
        self.request.as_ref().map(|r| r.step)
    }

    /// Tear the session down after `err` and decide whether to replay
    ///
    /// Consumes one unit of the request's retry budget when it returns true.
    pub(super) async fn recover(&mut self, err: &NntpError) -> bool {
        self.teardown();
        let limit = self.config.request_retries;
        let Some(request) = self.request.as_mut() else {
            return false;
        };
        if !err.is_transient() || request.retries >= limit {
            return false;
        }
        request.retries += 1;
        warn!(
            "{:?} request failed at {:?} ({}), retry {}/{}",
            request.kind, request.step, err, request.retries, limit
        );
        self.stats.errors += 1;
        self.backoff().await;
        true
    }

    /// Count a server rejection; returns the total so far
    pub(super) fn note_post_failure(&mut self) -> u32 {
        match self.request.as_mut() {
            Some(request) => {
                request.post_failures += 1;
                request.post_failures
            }
            None => u32::MAX,
        }
    }

    /// Action configured for the next post timeout, if any remain
    pub(super) fn next_post_timeout_action(&mut self) -> Option<PostTimeoutAction> {
        let request = self.request.as_mut()?;
        let action = self
            .config
            .on_post_timeout
            .get(request.post_timeouts as usize)
            .cloned();
        request.post_timeouts += 1;
        action
    }

    /// Run a one-line command as a request, replaying it on transient failures
    pub(super) async fn simple_request(
        &mut self,
        kind: RequestKind,
        command: &str,
    ) -> Result<NntpResponse> {
        self.begin_request(kind);
        let result = loop {
            if let Err(e) = self.ensure_connected().await {
                break Err(e);
            }
            self.set_step(RequestStep::Command);
            match self.exchange(command).await {
                Ok(response) => break Ok(response),
                Err(e) => {
                    if !self.recover(&e).await {
                        break Err(e);
                    }
                }
            }
        };
        self.end_request(result)
    }

    /// Send one command line and read its response
    async fn exchange(&mut self, command: &str) -> Result<NntpResponse> {
        self.send_command(command).await?;
        let limit = self.config.request_timeout;
        self.read_response(limit).await
    }
}
