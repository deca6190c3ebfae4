//! Upload progress counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live counters shared by every connection task
///
/// Readable at any time through [`Uploader::stats`](super::Uploader::stats).
#[derive(Debug, Default)]
pub(crate) struct UploadStats {
    pub(crate) articles_read: AtomicU64,
    pub(crate) articles_posted: AtomicU64,
    pub(crate) articles_checked: AtomicU64,
    pub(crate) articles_skipped: AtomicU64,
    pub(crate) articles_reposted: AtomicU64,
    pub(crate) bytes_posted: AtomicU64,
    pub(crate) post_errors_skipped: AtomicU64,
    pub(crate) check_errors_skipped: AtomicU64,
    pub(crate) check_misses: AtomicU64,
}

impl UploadStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::SeqCst);
    }

    pub(crate) fn sub(counter: &AtomicU64, amount: u64) {
        // Never wraps: every subtraction undoes an earlier addition
        let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
            Some(v.saturating_sub(amount))
        });
    }

    /// Articles that need no further work
    pub(crate) fn resolved(&self) -> u64 {
        self.articles_checked.load(Ordering::SeqCst) + self.articles_skipped.load(Ordering::SeqCst)
    }

    pub(crate) fn snapshot(&self) -> UploadStatsSnapshot {
        UploadStatsSnapshot {
            articles_read: self.articles_read.load(Ordering::SeqCst),
            articles_posted: self.articles_posted.load(Ordering::SeqCst),
            articles_checked: self.articles_checked.load(Ordering::SeqCst),
            articles_skipped: self.articles_skipped.load(Ordering::SeqCst),
            articles_reposted: self.articles_reposted.load(Ordering::SeqCst),
            bytes_posted: self.bytes_posted.load(Ordering::SeqCst),
            post_errors_skipped: self.post_errors_skipped.load(Ordering::SeqCst),
            check_errors_skipped: self.check_errors_skipped.load(Ordering::SeqCst),
            check_misses: self.check_misses.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time copy of the upload counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStatsSnapshot {
    /// Articles handed to [`Uploader::add`](super::Uploader::add)
    pub articles_read: u64,
    /// Articles the server accepted (reposts are subtracted again)
    pub articles_posted: u64,
    /// Articles confirmed by STAT, or posted while checking is off
    pub articles_checked: u64,
    /// Articles given up on under the skip policy
    pub articles_skipped: u64,
    /// Articles sent back to the post queue after failed checks
    pub articles_reposted: u64,
    /// Input bytes of posted articles
    pub bytes_posted: u64,
    /// Post errors downgraded to warnings
    pub post_errors_skipped: u64,
    /// Check errors (including missing articles) downgraded to warnings
    pub check_errors_skipped: u64,
    /// STATs that did not find the article
    pub check_misses: u64,
}

/// Result of a finished upload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadSummary {
    /// Final counters
    pub stats: UploadStatsSnapshot,
    /// Time from start to completion
    pub elapsed: Duration,
}

impl UploadSummary {
    /// Average posting speed in input bytes per second
    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.stats.bytes_posted as f64 / secs
        } else {
            0.0
        }
    }
}
