//! Bounded queue whose items become visible after a delay
//!
//! Used to hold freshly posted articles until it is worth asking the server
//! whether they arrived. A delayed item occupies a slot of the underlying
//! [`BoundedQueue`] from the moment it is added, so producers feel
//! backpressure even though consumers cannot see the item yet.

use crate::queue::{Admission, BoundedQueue, Take};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

struct Pending<T> {
    item: T,
    timer: JoinHandle<()>,
}

struct PendingState<T> {
    next_id: u64,
    timers: HashMap<u64, Pending<T>>,
    finished: bool,
}

struct Shared<T> {
    queue: BoundedQueue<T>,
    pending: Mutex<PendingState<T>>,
}

impl<T: Send + 'static> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, PendingState<T>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the timer for an item whose slot is already reserved
    fn schedule(self: &Arc<Self>, delay: Duration, item: T) {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;

        let weak: Weak<Self> = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.promote(id);
            }
        });
        // The timer task cannot promote before this insert: promote takes the same lock
        state.timers.insert(id, Pending { item, timer });
    }

    fn promote(&self, id: u64) {
        let mut state = self.lock();
        if let Some(pending) = state.timers.remove(&id) {
            trace!("Delayed item {} became visible", id);
            self.queue.fulfill(pending.item);
        }
        if state.finished && state.timers.is_empty() {
            self.queue.finish();
        }
    }
}

/// Bounded queue with per-item visibility delay
///
/// Cloning gives another handle to the same queue.
pub struct TimerQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for TimerQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for TimerQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerQueue").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> TimerQueue<T> {
    /// Create a queue with capacity `size` (visible plus pending items)
    pub fn new(size: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: BoundedQueue::new(size),
                pending: Mutex::new(PendingState {
                    next_id: 0,
                    timers: HashMap::new(),
                    finished: false,
                }),
            }),
        }
    }

    /// Add an item that becomes takeable after `delay`
    ///
    /// A zero delay behaves like [`BoundedQueue::add`]. Must be called from
    /// within a tokio runtime. Fails with the item after [`finish`](Self::finish).
    pub fn add(&self, delay: Duration, item: T) -> std::result::Result<Admission, T> {
        if self.shared.lock().finished {
            return Err(item);
        }
        if delay.is_zero() {
            return self.shared.queue.add(item);
        }
        let admission = self.shared.queue.reserve();
        self.shared.schedule(delay, item);
        Ok(admission)
    }

    /// Claim a slot before the item exists
    pub fn reserve(&self) -> Admission {
        self.shared.queue.reserve()
    }

    /// Fill a reserved slot; the item becomes takeable after `delay`
    pub fn fulfill(&self, delay: Duration, item: T) {
        if delay.is_zero() {
            self.shared.queue.fulfill(item);
        } else {
            self.shared.schedule(delay, item);
        }
    }

    /// Give a reserved slot back
    pub fn unreserve(&self) {
        self.shared.queue.unreserve();
    }

    /// Take the next visible item
    pub fn take(&self) -> Take<'_, T> {
        self.shared.queue.take()
    }

    /// Take a visible item without waiting
    pub fn try_take(&self) -> Option<T> {
        self.shared.queue.try_take()
    }

    /// Cancel every pending timer
    ///
    /// With `discard` the pending items are removed and returned; otherwise
    /// they become visible immediately and an empty vector is returned.
    pub fn flush_pending(&self, discard: bool) -> Vec<T> {
        let mut state = self.shared.lock();
        let mut discarded = Vec::new();
        for (_, pending) in state.timers.drain() {
            pending.timer.abort();
            if discard {
                self.shared.queue.unreserve();
                discarded.push(pending.item);
            } else {
                self.shared.queue.fulfill(pending.item);
            }
        }
        if state.finished {
            self.shared.queue.finish();
        }
        discarded
    }

    /// No more items will be added
    ///
    /// Takers are released with `None` once pending items, reservations and
    /// visible items are all gone.
    pub fn finish(&self) {
        let mut state = self.shared.lock();
        state.finished = true;
        if state.timers.is_empty() {
            self.shared.queue.finish();
        }
    }

    /// Drop everything and release all waiters; returns the removed items
    pub fn clear(&self) -> Vec<T> {
        let mut items = {
            let mut state = self.shared.lock();
            state.finished = true;
            state
                .timers
                .drain()
                .map(|(_, pending)| {
                    pending.timer.abort();
                    pending.item
                })
                .collect::<Vec<_>>()
        };
        items.extend(self.shared.queue.clear());
        items
    }

    /// Items waiting for their delay
    pub fn pending(&self) -> usize {
        self.shared.lock().timers.len()
    }

    /// Visible items
    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    /// True if nothing is visible or pending
    pub fn is_empty(&self) -> bool {
        self.pending() == 0 && self.shared.queue.is_empty()
    }

    /// Visible, pending and reserved items
    pub fn occupancy(&self) -> usize {
        self.shared.queue.occupancy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Instant, timeout};

    #[tokio::test(start_paused = true)]
    async fn test_item_invisible_until_delay() {
        let queue = TimerQueue::new(4);
        let start = Instant::now();
        assert!(queue.add(Duration::from_millis(100), "a").unwrap().is_ready());
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.try_take(), None);

        assert!(
            timeout(Duration::from_millis(99), queue.take())
                .await
                .is_err()
        );
        assert_eq!(queue.take().await, Some("a"));
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_is_immediate() {
        let queue = TimerQueue::new(4);
        let _ = queue.add(Duration::ZERO, 1).unwrap();
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.try_take(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_counts_toward_capacity() {
        let queue = TimerQueue::new(1);
        assert!(queue.add(Duration::from_secs(1), 1).unwrap().is_ready());
        let admission = queue.add(Duration::ZERO, 2).unwrap();
        assert!(!admission.is_ready());
        assert_eq!(queue.occupancy(), 2);

        // The visible item is taken first; that frees the slot
        assert_eq!(queue.take().await, Some(2));
        admission.await;
        assert_eq!(queue.take().await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_order_visibility() {
        let queue = TimerQueue::new(4);
        let _ = queue.add(Duration::from_millis(30), "late").unwrap();
        let _ = queue.add(Duration::from_millis(10), "early").unwrap();
        assert_eq!(queue.take().await, Some("early"));
        assert_eq!(queue.take().await, Some("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_pending_makes_visible() {
        let queue = TimerQueue::new(4);
        let _ = queue.add(Duration::from_secs(60), 1).unwrap();
        let _ = queue.add(Duration::from_secs(60), 2).unwrap();
        assert!(queue.flush_pending(false).is_empty());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_pending_discard() {
        let queue = TimerQueue::new(4);
        let _ = queue.add(Duration::from_secs(60), 1).unwrap();
        let discarded = queue.flush_pending(true);
        assert_eq!(discarded, vec![1]);
        assert_eq!(queue.occupancy(), 0);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_waits_for_pending() {
        let queue = TimerQueue::new(4);
        let _ = queue.add(Duration::from_millis(50), 1).unwrap();
        queue.finish();
        assert!(queue.add(Duration::ZERO, 2).is_err());

        assert_eq!(queue.take().await, Some(1));
        assert_eq!(queue.take().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_then_fulfill_with_delay() {
        let queue = TimerQueue::new(1);
        assert!(queue.reserve().is_ready());
        assert_eq!(queue.occupancy(), 1);

        queue.fulfill(Duration::from_millis(20), "x");
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.occupancy(), 1);
        assert_eq!(queue.take().await, Some("x"));
        assert_eq!(queue.occupancy(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_returns_everything() {
        let queue = TimerQueue::new(4);
        let _ = queue.add(Duration::from_secs(5), 1).unwrap();
        let _ = queue.add(Duration::ZERO, 2).unwrap();
        let mut items = queue.clear();
        items.sort();
        assert_eq!(items, vec![1, 2]);
        assert_eq!(queue.take().await, None);
    }
}
