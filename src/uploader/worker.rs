//! Connection tasks: posting and checking loops

use super::stats::UploadStats;
use super::{Shared, UploadEvent, UploadItem};
use crate::client::NntpConnection;
use crate::config::SkippableError;
use crate::error::{ErrorKind, NntpError, Phase, Result, UploadError};
use std::sync::Arc;
use tracing::{Span, debug, warn};

/// Work a posting connection may pick up
enum Job {
    Post(UploadItem),
    Check(UploadItem),
}

impl Job {
    fn message_id(&self) -> String {
        match self {
            Job::Post(item) | Job::Check(item) => item.post.message_id().to_string(),
        }
    }
}

/// Skip class of a failed post; `None` for errors that always abort
fn post_skip_class(err: &NntpError) -> Option<SkippableError> {
    match err.kind() {
        ErrorKind::PostingDenied | ErrorKind::Cancelled => None,
        ErrorKind::Timeout => Some(SkippableError::PostTimeout),
        ErrorKind::PostDenied => Some(SkippableError::PostReject),
        _ => Some(SkippableError::PostFail),
    }
}

/// Skip class of a failed STAT
fn check_skip_class(err: &NntpError) -> Option<SkippableError> {
    match err.kind() {
        ErrorKind::Cancelled => None,
        ErrorKind::Timeout => Some(SkippableError::CheckTimeout),
        _ => Some(SkippableError::CheckFail),
    }
}

/// Posting connection loop
///
/// With `reuse` set, the connection also serves the check queue and prefers
/// it, so that confirmations are not starved by new posts.
pub(super) async fn run_poster(shared: Arc<Shared>, reuse: bool, span: Span) {
    let mut conn = NntpConnection::new(Arc::new(shared.config.server.clone()), span);

    loop {
        let job = match (&shared.check_queue, reuse) {
            (Some(check_queue), true) => tokio::select! {
                biased;
                () = shared.cancel.cancelled() => None,
                item = check_queue.take() => item.map(Job::Check),
                item = shared.post_queue.take() => item.map(Job::Post),
            },
            _ => tokio::select! {
                biased;
                () = shared.cancel.cancelled() => None,
                item = shared.post_queue.take() => item.map(Job::Post),
            },
        };
        let Some(job) = job else {
            break;
        };

        let message_id = job.message_id();
        let result = tokio::select! {
            biased;
            () = shared.cancel.cancelled() => {
                shared.emit(UploadEvent::Dropped { message_id });
                break;
            }
            result = async {
                match job {
                    Job::Post(item) => post_article(&shared, &mut conn, item, reuse).await,
                    Job::Check(item) => check_article(&shared, &mut conn, item).await,
                }
            } => result,
        };
        if let Err(err) = result {
            shared.fail(err);
            break;
        }
    }

    close(conn).await;
}

/// Checking connection loop
pub(super) async fn run_checker(shared: Arc<Shared>, span: Span) {
    let Some(check_queue) = shared.check_queue.clone() else {
        return;
    };
    let config = shared.config.check_server().clone();
    let mut conn = NntpConnection::new(Arc::new(config), span);

    loop {
        let item = tokio::select! {
            biased;
            () = shared.cancel.cancelled() => None,
            item = check_queue.take() => item,
        };
        let Some(item) = item else {
            break;
        };

        let message_id = item.post.message_id().to_string();
        let result = tokio::select! {
            biased;
            () = shared.cancel.cancelled() => {
                shared.emit(UploadEvent::Dropped { message_id });
                break;
            }
            result = check_article(&shared, &mut conn, item) => result,
        };
        if let Err(err) = result {
            shared.fail(err);
            break;
        }
    }

    close(conn).await;
}

/// QUIT an idle connection, drop one that is mid-request
async fn close(mut conn: NntpConnection) {
    if conn.request().is_some() {
        conn.abort();
    } else if let Err(e) = conn.quit().await {
        debug!("QUIT failed: {}", e);
    }
}

/// Resolve an article as given up on, or turn the failure into a fatal error
fn skip_or_fail(
    shared: &Shared,
    item: UploadItem,
    phase: Phase,
    class: Option<SkippableError>,
    err: UploadError,
) -> std::result::Result<(), UploadError> {
    let skippable = class.is_some_and(|class| shared.config.skip_errors.contains(class));
    if !skippable {
        return Err(err);
    }

    warn!("Skipping article: {}", err);
    let counter = match phase {
        Phase::Post => &shared.stats.post_errors_skipped,
        Phase::Check => &shared.stats.check_errors_skipped,
    };
    UploadStats::incr(counter);
    UploadStats::incr(&shared.stats.articles_skipped);
    shared.emit(UploadEvent::Skipped {
        message_id: item.post.message_id().to_string(),
        phase,
        kind: err.kind(),
    });
    drop(item);
    shared.maybe_finish();
    Ok(())
}

async fn post_article(
    shared: &Shared,
    conn: &mut NntpConnection,
    mut item: UploadItem,
    reuse: bool,
) -> std::result::Result<(), UploadError> {
    let input_len = item.post.input_len();

    if let Some(throttle) = &shared.throttle {
        throttle.pass(input_len).await.map_err(|e| UploadError::Article {
            message_id: item.post.message_id().to_string(),
            phase: Phase::Post,
            source: e,
        })?;
    }

    // Claim the check slot first so a successful post always has somewhere to go.
    // A connection that also serves checks cannot wait for one: it would wait on itself.
    if let Some(check_queue) = &shared.check_queue {
        let admission = check_queue.reserve();
        if !reuse {
            admission.await;
        }
    }

    item.post_tries += 1;
    match conn.post(item.post.as_mut()).await {
        Ok(message_id) => {
            UploadStats::incr(&shared.stats.articles_posted);
            UploadStats::add(&shared.stats.bytes_posted, input_len);
            shared.emit(UploadEvent::Posted {
                message_id: message_id.clone(),
                input_len,
            });

            match &shared.check_queue {
                Some(check_queue) => {
                    item.chk_failures = 0;
                    check_queue.fulfill(shared.config.check.delay, item);
                }
                None => {
                    UploadStats::incr(&shared.stats.articles_checked);
                    shared.emit(UploadEvent::Confirmed { message_id });
                    drop(item);
                    shared.maybe_finish();
                }
            }
            Ok(())
        }
        Err(e) => {
            if let Some(check_queue) = &shared.check_queue {
                check_queue.unreserve();
            }
            let class = post_skip_class(&e);
            let err = UploadError::Article {
                message_id: item.post.message_id().to_string(),
                phase: Phase::Post,
                source: e,
            };
            skip_or_fail(shared, item, Phase::Post, class, err)
        }
    }
}

async fn check_article(
    shared: &Shared,
    conn: &mut NntpConnection,
    mut item: UploadItem,
) -> std::result::Result<(), UploadError> {
    let check = &shared.config.check;

    let lookup = match select_check_group(conn, check.group.as_deref()).await {
        Ok(()) => conn.stat(item.post.message_id()).await,
        Err(e) => Err(e),
    };

    match lookup {
        Ok(Some(_)) => {
            UploadStats::incr(&shared.stats.articles_checked);
            debug!("Confirmed {}", item.post.message_id());
            shared.emit(UploadEvent::Confirmed {
                message_id: item.post.message_id().to_string(),
            });
            drop(item);
            shared.maybe_finish();
            Ok(())
        }
        Ok(None) => {
            item.chk_failures += 1;
            UploadStats::incr(&shared.stats.check_misses);

            if item.chk_failures < check.tries {
                debug!(
                    "{} not found yet ({}/{}), checking again in {:?}",
                    item.post.message_id(),
                    item.chk_failures,
                    check.tries,
                    check.recheck_delay
                );
                requeue_check(shared, item);
                return Ok(());
            }

            if item.post_tries <= check.post_retries {
                warn!(
                    "{} not found after {} checks, posting again",
                    item.post.message_id(),
                    item.chk_failures
                );
                UploadStats::sub(&shared.stats.articles_posted, 1);
                UploadStats::sub(&shared.stats.bytes_posted, item.post.input_len());
                UploadStats::incr(&shared.stats.articles_reposted);
                shared.emit(UploadEvent::Reposting {
                    message_id: item.post.message_id().to_string(),
                    post_tries: item.post_tries,
                });
                item.chk_failures = 0;
                // The server may have rejected the old id silently
                if !shared.config.server.keep_message_id {
                    item.post.regenerate_message_id();
                }
                // Admission is not awaited: a connection must never block on the queue
                // it drains, so the post queue may briefly exceed its size here
                if let Err(item) = shared.post_queue.add(item) {
                    debug!("Post queue closed, dropping {}", item.post.message_id());
                }
                return Ok(());
            }

            let err = UploadError::ArticleMissing {
                message_id: item.post.message_id().to_string(),
                tries: item.chk_failures,
            };
            skip_or_fail(
                shared,
                item,
                Phase::Check,
                Some(SkippableError::CheckMissing),
                err,
            )
        }
        Err(e) => {
            let class = check_skip_class(&e);
            let err = UploadError::Article {
                message_id: item.post.message_id().to_string(),
                phase: Phase::Check,
                source: e,
            };
            skip_or_fail(shared, item, Phase::Check, class, err)
        }
    }
}

/// Select the configured check group unless the connection is already in it
async fn select_check_group(conn: &mut NntpConnection, group: Option<&str>) -> Result<()> {
    let Some(group) = group else {
        return Ok(());
    };
    if conn.current_group() == Some(group) {
        return Ok(());
    }
    if conn.group(group).await?.is_none() {
        warn!("Check group {} does not exist, checking without it", group);
    }
    Ok(())
}

/// Schedule another STAT after `recheck_delay`
fn requeue_check(shared: &Shared, item: UploadItem) {
    let Some(check_queue) = &shared.check_queue else {
        return;
    };
    // Same overshoot as reposting: the checker is the queue's own consumer
    if let Err(item) = check_queue.add(shared.config.check.recheck_delay, item) {
        debug!("Check queue closed, dropping {}", item.post.message_id());
    }
}
