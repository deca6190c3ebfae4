//! Upload rate limiting
//!
//! A debt based limiter: every admitted pass adds its cost to a debt counter
//! and the debt decays by `max_amount` for each whole window that elapses.
//! Callers are admitted while the debt is below `max_amount`, so a single
//! large pass may overshoot and the following ones wait until it has been
//! paid back. Waiting callers are admitted strictly in arrival order.

use crate::config::ThrottleConfig;
use crate::error::{NntpError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug)]
struct ThrottleState {
    /// Quota consumed and not yet decayed
    debt: u64,
    /// Start of the current decay window
    last_update: Instant,
    /// Queued passes and their cost
    waiters: VecDeque<(u64, oneshot::Sender<()>)>,
    /// Timer task admitting queued passes
    driver: Option<JoinHandle<()>>,
}

impl ThrottleState {
    fn decay(&mut self, now: Instant, max_amount: u64, window: Duration) {
        let elapsed = now.saturating_duration_since(self.last_update);
        let windows = elapsed.as_nanos() / window.as_nanos();
        if windows > 0 {
            let windows = u64::try_from(windows).unwrap_or(u64::MAX);
            self.debt = self.debt.saturating_sub(windows.saturating_mul(max_amount));
            self.last_update += window.saturating_mul(u32::try_from(windows).unwrap_or(u32::MAX));
        }
        if self.debt == 0 {
            self.last_update = now;
        }
    }

    /// Time until the debt drops below `max_amount`, never less than one window
    fn wait_time(&self, now: Instant, max_amount: u64, window: Duration) -> Duration {
        let windows = self.debt / max_amount.max(1);
        let windows = u32::try_from(windows).unwrap_or(u32::MAX);
        let deadline = self.last_update + window.saturating_mul(windows);
        let wait = deadline.saturating_duration_since(now);
        if wait.is_zero() { window } else { wait }
    }

    /// Admit queued passes in order while the debt allows
    fn admit(&mut self, max_amount: u64) {
        while self.debt < max_amount {
            let Some((cost, waiter)) = self.waiters.pop_front() else {
                break;
            };
            // A dropped receiver means that pass was cancelled; it costs nothing
            if waiter.send(()).is_ok() {
                self.debt = self.debt.saturating_add(cost);
            }
        }
        self.waiters.retain(|(_, waiter)| !waiter.is_closed());
    }
}

#[derive(Debug)]
struct ThrottleInner {
    max_amount: u64,
    window: Duration,
    state: Mutex<ThrottleState>,
}

impl ThrottleInner {
    fn lock(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Debt based rate limiter shared by all posting connections
///
/// # Example
///
/// ```no_run
/// # async fn example() -> nntp_upload::Result<()> {
/// use nntp_upload::ThrottleQueue;
/// use std::time::Duration;
///
/// // Roughly 10 MB per second
/// let throttle = ThrottleQueue::new(10_000_000, Duration::from_secs(1));
/// throttle.pass(750_000).await?;
/// // ... send the article ...
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ThrottleQueue {
    inner: Arc<ThrottleInner>,
}

impl ThrottleQueue {
    /// Allow `max_amount` units per `window`
    ///
    /// A zero window or a zero amount disables throttling.
    pub fn new(max_amount: u64, window: Duration) -> Self {
        Self {
            inner: Arc::new(ThrottleInner {
                max_amount,
                window,
                state: Mutex::new(ThrottleState {
                    debt: 0,
                    last_update: Instant::now(),
                    waiters: VecDeque::new(),
                    driver: None,
                }),
            }),
        }
    }

    /// Build from configuration
    pub fn from_config(config: &ThrottleConfig) -> Self {
        Self::new(config.amount, config.window)
    }

    /// True if this limiter never delays anyone
    pub fn is_disabled(&self) -> bool {
        self.inner.window.is_zero() || self.inner.max_amount == 0
    }

    /// Wait until `cost` units may be spent
    ///
    /// Dropping the returned future withdraws the pass without consuming
    /// quota. Fails with [`NntpError::Cancelled`] if [`cancel_all`](Self::cancel_all)
    /// runs while waiting.
    pub async fn pass(&self, cost: u64) -> Result<()> {
        if self.is_disabled() {
            return Ok(());
        }

        let admitted = {
            let mut state = self.inner.lock();
            state.decay(Instant::now(), self.inner.max_amount, self.inner.window);

            if state.waiters.is_empty() && state.debt < self.inner.max_amount {
                state.debt = state.debt.saturating_add(cost);
                return Ok(());
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back((cost, tx));
            trace!(
                "Throttling pass of {} (debt {}, {} queued)",
                cost,
                state.debt,
                state.waiters.len()
            );
            if state.driver.is_none() {
                state.driver = Some(tokio::spawn(drive(Arc::clone(&self.inner))));
            }
            rx
        };

        admitted.await.map_err(|_| NntpError::Cancelled)
    }

    /// Fail every queued pass with [`NntpError::Cancelled`]
    pub fn cancel_all(&self) {
        let mut state = self.inner.lock();
        state.waiters.clear();
        if let Some(driver) = state.driver.take() {
            driver.abort();
        }
    }

    /// Passes currently waiting
    pub fn queued(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Current debt after decay
    pub fn debt(&self) -> u64 {
        let mut state = self.inner.lock();
        state.decay(Instant::now(), self.inner.max_amount, self.inner.window);
        state.debt
    }
}

async fn drive(inner: Arc<ThrottleInner>) {
    loop {
        let wait = {
            let mut state = inner.lock();
            let now = Instant::now();
            state.decay(now, inner.max_amount, inner.window);
            state.admit(inner.max_amount);
            if state.waiters.is_empty() {
                state.driver = None;
                return;
            }
            state.wait_time(now, inner.max_amount, inner.window)
        };
        tokio::time::sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn test_large_pass_then_delay() {
        let throttle = ThrottleQueue::new(5, Duration::from_millis(100));
        let start = Instant::now();

        throttle.pass(9).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        throttle.pass(5).await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(90), "waited {:?}", waited);
        assert!(waited <= Duration::from_millis(110), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_window_never_waits() {
        let throttle = ThrottleQueue::new(1, Duration::ZERO);
        assert!(throttle.is_disabled());
        for _ in 0..100 {
            throttle.pass(1_000_000).await.unwrap();
        }
        assert_eq!(throttle.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_amount_never_waits() {
        let throttle = ThrottleQueue::new(0, Duration::from_millis(100));
        assert!(throttle.is_disabled());
        let start = Instant::now();
        timeout(Duration::from_secs(1), throttle.pass(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(throttle.queued(), 0);

        let config = ThrottleConfig {
            amount: 0,
            window: Duration::from_secs(1),
        };
        assert!(ThrottleQueue::from_config(&config).is_disabled());
    }

    #[test]
    fn test_wait_time_is_at_least_one_window() {
        let now = Instant::now();
        let window = Duration::from_millis(100);
        let state = ThrottleState {
            debt: 0,
            last_update: now,
            waiters: VecDeque::new(),
            driver: None,
        };
        assert_eq!(state.wait_time(now, 5, window), window);

        let state = ThrottleState {
            debt: 10,
            last_update: now,
            ..state
        };
        assert_eq!(state.wait_time(now, 5, window), window * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_under_limit_admits_immediately() {
        let throttle = ThrottleQueue::new(10, Duration::from_secs(1));
        let start = Instant::now();
        throttle.pass(3).await.unwrap();
        throttle.pass(3).await.unwrap();
        throttle.pass(3).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(throttle.debt(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_passes_admitted_in_order() {
        let throttle = ThrottleQueue::new(5, Duration::from_millis(100));
        throttle.pass(10).await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3u32 {
            let throttle = throttle.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                throttle.pass(5).await.unwrap();
                order.lock().unwrap().push(i);
            }));
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debt_decays_per_window() {
        let throttle = ThrottleQueue::new(5, Duration::from_millis(100));
        throttle.pass(12).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(throttle.debt(), 7);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(throttle.debt(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_pass_costs_nothing() {
        let throttle = ThrottleQueue::new(5, Duration::from_millis(100));
        throttle.pass(5).await.unwrap();

        assert!(
            timeout(Duration::from_millis(10), throttle.pass(100))
                .await
                .is_err()
        );
        // The withdrawn pass must not hold up the next one
        let start = Instant::now();
        throttle.pass(1).await.unwrap();
        assert!(start.elapsed() <= Duration::from_millis(100));
        assert_eq!(throttle.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let throttle = ThrottleQueue::new(1, Duration::from_secs(10));
        throttle.pass(1).await.unwrap();

        let waiter = {
            let throttle = throttle.clone();
            tokio::spawn(async move { throttle.pass(1).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(throttle.queued(), 1);

        throttle.cancel_all();
        assert!(matches!(waiter.await.unwrap(), Err(NntpError::Cancelled)));
    }
}
