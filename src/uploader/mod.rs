//! Upload orchestration
//!
//! Articles flow through two queues:
//!
//! ```text
//! add() -> post queue -> posting connections -> check queue (delayed) -> checking connections
//!              ^                                                                |
//!              +---------------------- repost after failed checks -------------+
//! ```
//!
//! Each posting connection takes an article, waits for the throttle,
//! reserves a slot in the check queue and posts. Successful posts enter the
//! check queue after `check.delay`; checking connections STAT them and
//! either confirm them, schedule another check, send them back for posting
//! or give up according to the skip policy. With `check.connections == 0`
//! the posting connections serve the check queue too, preferring checks.

mod stats;
mod worker;

pub use stats::{UploadStatsSnapshot, UploadSummary};

use crate::article::Post;
use crate::config::UploadConfig;
use crate::error::{ErrorKind, Phase, UploadError};
use crate::queue::BoundedQueue;
use crate::throttle::ThrottleQueue;
use crate::timer_queue::TimerQueue;
use stats::UploadStats;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Span, debug, error, info, info_span};

/// An article plus its pipeline bookkeeping
pub(crate) struct UploadItem {
    pub(crate) post: Box<dyn Post>,
    /// Times the article was handed to a connection for posting
    pub(crate) post_tries: u32,
    /// Consecutive STATs that did not find it
    pub(crate) chk_failures: u32,
}

impl UploadItem {
    fn new(post: Box<dyn Post>) -> Self {
        Self {
            post,
            post_tries: 0,
            chk_failures: 0,
        }
    }
}

/// Progress notifications
///
/// An article's payload is dropped right after its final event
/// (`Confirmed`, `Skipped` or `Dropped`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    /// The server accepted the article
    Posted {
        /// Message-ID it was accepted under
        message_id: String,
        /// Input bytes of the article
        input_len: u64,
    },
    /// STAT found the article (or checking is off)
    Confirmed {
        /// Message-ID that was confirmed
        message_id: String,
    },
    /// Checks kept failing; the article goes back to the post queue
    Reposting {
        /// Message-ID that could not be found
        message_id: String,
        /// Posts so far
        post_tries: u32,
    },
    /// Given up on under the skip policy
    Skipped {
        /// Message-ID at the time of failure
        message_id: String,
        /// Where it failed
        phase: Phase,
        /// Connection error kind, `None` for articles that never showed up
        kind: Option<ErrorKind>,
    },
    /// Discarded because the upload was aborted, whether queued or in flight
    Dropped {
        /// Message-ID of the discarded article
        message_id: String,
    },
}

/// State shared by the handle and every connection task
pub(crate) struct Shared {
    pub(crate) config: UploadConfig,
    pub(crate) post_queue: BoundedQueue<UploadItem>,
    pub(crate) check_queue: Option<TimerQueue<UploadItem>>,
    pub(crate) throttle: Option<ThrottleQueue>,
    pub(crate) stats: UploadStats,
    input_done: AtomicBool,
    fatal: Mutex<Option<UploadError>>,
    pub(crate) cancel: CancellationToken,
    events: mpsc::UnboundedSender<UploadEvent>,
}

impl Shared {
    fn fatal(&self) -> MutexGuard<'_, Option<UploadError>> {
        self.fatal.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn emit(&self, event: UploadEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    /// Close both queues once every article read is confirmed or skipped
    pub(crate) fn maybe_finish(&self) {
        if !self.input_done.load(Ordering::SeqCst) {
            return;
        }
        let read = self.stats.articles_read.load(Ordering::SeqCst);
        if self.stats.resolved() >= read {
            debug!("All {} articles resolved, closing queues", read);
            self.post_queue.finish();
            if let Some(check_queue) = &self.check_queue {
                check_queue.finish();
            }
        }
    }

    /// Abort the upload with `err` unless it already failed
    pub(crate) fn fail(&self, err: UploadError) {
        {
            let mut fatal = self.fatal();
            if fatal.is_some() {
                return;
            }
            error!("Upload failed: {}", err);
            *fatal = Some(err);
        }
        self.abort();
    }

    /// Stop all work and discard everything queued
    fn abort(&self) {
        self.cancel.cancel();
        if let Some(throttle) = &self.throttle {
            throttle.cancel_all();
        }
        let mut dropped = self.post_queue.clear();
        if let Some(check_queue) = &self.check_queue {
            dropped.extend(check_queue.clear());
        }
        for item in dropped {
            self.emit(UploadEvent::Dropped {
                message_id: item.post.message_id().to_string(),
            });
        }
    }

    fn abort_reason(&self) -> String {
        self.fatal()
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "upload aborted".to_string())
    }
}

/// Handle to a running upload
///
/// # Example
///
/// ```no_run
/// use nntp_upload::{ArticleBuilder, ServerConfig, UploadConfig, Uploader};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let server = ServerConfig::tls("news.example.com", "user", "pass").with_connections(8);
/// let uploader = Uploader::start(UploadConfig::new(server));
///
/// for part in 1..=3 {
///     let article = ArticleBuilder::new()
///         .from("poster <poster@example.com>")
///         .subject(format!("file.bin ({}/3)", part))
///         .newsgroups(["alt.binaries.test"])
///         .body(b"...encoded data...".to_vec())
///         .build();
///     uploader.add(article).await?;
/// }
/// uploader.finish_input();
///
/// let summary = uploader.wait().await?;
/// println!("{} articles, {:.0} B/s", summary.stats.articles_checked, summary.bytes_per_second());
/// # Ok(())
/// # }
/// ```
pub struct Uploader {
    shared: Arc<Shared>,
    tracker: TaskTracker,
    events: Mutex<Option<mpsc::UnboundedReceiver<UploadEvent>>>,
    started: Instant,
    span: Span,
}

impl Uploader {
    /// Spawn the posting and checking connections
    ///
    /// Must be called from within a tokio runtime. Connections open lazily
    /// when they get their first article.
    pub fn start(config: UploadConfig) -> Self {
        let span = info_span!("upload", server = %config.server.host);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let check_queue = config
            .check
            .enabled()
            .then(|| TimerQueue::new(config.check.queue_size.max(1)));
        let throttle = config
            .throttle
            .as_ref()
            .map(ThrottleQueue::from_config)
            .filter(|t| !t.is_disabled());

        let shared = Arc::new(Shared {
            post_queue: BoundedQueue::new(config.post_queue_size.max(1)),
            check_queue,
            throttle,
            stats: UploadStats::default(),
            input_done: AtomicBool::new(false),
            fatal: Mutex::new(None),
            cancel: CancellationToken::new(),
            events: events_tx,
            config,
        });

        let tracker = TaskTracker::new();
        let posters = shared.config.server.connections.max(1);
        let reuse = shared.check_queue.is_some() && shared.config.check.connections == 0;
        let checkers = if shared.check_queue.is_some() {
            shared.config.check.connections
        } else {
            0
        };

        info!(
            parent: &span,
            "Starting upload with {} posting and {} checking connections",
            posters,
            if reuse { posters } else { checkers }
        );

        for id in 0..posters {
            let conn_span = info_span!(parent: &span, "conn", id, role = "post");
            tracker.spawn(
                worker::run_poster(Arc::clone(&shared), reuse, conn_span.clone())
                    .instrument(conn_span),
            );
        }
        for id in 0..checkers {
            let conn_span = info_span!(parent: &span, "conn", id, role = "check");
            tracker.spawn(
                worker::run_checker(Arc::clone(&shared), conn_span.clone()).instrument(conn_span),
            );
        }
        tracker.close();

        Self {
            shared,
            tracker,
            events: Mutex::new(Some(events_rx)),
            started: Instant::now(),
            span,
        }
    }

    /// Queue an article for upload
    ///
    /// Waits while the post queue is over capacity. The article is queued
    /// even if this future is dropped while waiting.
    ///
    /// # Errors
    ///
    /// - [`UploadError::InputClosed`] - called after [`finish_input`](Self::finish_input)
    /// - [`UploadError::Cancelled`] - the upload was aborted
    pub async fn add(&self, post: impl Post) -> Result<(), UploadError> {
        if self.shared.cancel.is_cancelled() {
            return Err(UploadError::Cancelled(self.shared.abort_reason()));
        }
        if self.shared.input_done.load(Ordering::SeqCst) {
            return Err(UploadError::InputClosed);
        }

        UploadStats::incr(&self.shared.stats.articles_read);
        let admission = match self.shared.post_queue.add(UploadItem::new(Box::new(post))) {
            Ok(admission) => admission,
            Err(_) => {
                UploadStats::sub(&self.shared.stats.articles_read, 1);
                return Err(UploadError::Cancelled(self.shared.abort_reason()));
            }
        };

        tokio::select! {
            () = admission => Ok(()),
            () = self.shared.cancel.cancelled() => {
                Err(UploadError::Cancelled(self.shared.abort_reason()))
            }
        }
    }

    /// No more articles will be added
    ///
    /// The upload completes once everything added so far is confirmed or skipped.
    pub fn finish_input(&self) {
        debug!(parent: &self.span, "Input finished");
        self.shared.input_done.store(true, Ordering::SeqCst);
        self.shared.maybe_finish();
    }

    /// Abort the upload; [`wait`](Self::wait) returns [`UploadError::Cancelled`]
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        info!(parent: &self.span, "Cancelling upload: {}", reason);
        self.shared.fail(UploadError::Cancelled(reason));
    }

    /// Current counters
    pub fn stats(&self) -> UploadStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Progress events; returns `None` after the first call
    ///
    /// Events are buffered without bound until read.
    pub fn events(&self) -> Option<mpsc::UnboundedReceiver<UploadEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Whether the upload was aborted
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Wait for completion
    ///
    /// Resolves once every connection has shut down: after
    /// [`finish_input`](Self::finish_input) and full resolution of all
    /// articles, or after the first fatal error.
    pub async fn wait(self) -> Result<UploadSummary, UploadError> {
        self.tracker.wait().await;

        let fatal = self.shared.fatal().take();
        match fatal {
            Some(err) => Err(err),
            None => {
                let summary = UploadSummary {
                    stats: self.shared.stats.snapshot(),
                    elapsed: self.started.elapsed(),
                };
                info!(
                    parent: &self.span,
                    "Upload finished: {} posted, {} checked, {} skipped, {} bytes in {:?}",
                    summary.stats.articles_posted,
                    summary.stats.articles_checked,
                    summary.stats.articles_skipped,
                    summary.stats.bytes_posted,
                    summary.elapsed
                );
                Ok(summary)
            }
        }
    }
}

impl Drop for Uploader {
    fn drop(&mut self) {
        // Connection tasks must not outlive an abandoned handle
        if !self.tracker.is_empty() {
            self.shared.cancel.cancel();
        }
    }
}
