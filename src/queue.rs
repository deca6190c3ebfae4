//! Bounded queue with deferred admission
//!
//! Moves articles between pipeline stages. Data handed to [`BoundedQueue::add`]
//! is always stored (or passed straight to a waiting taker); only the
//! producer's acknowledgment, the returned [`Admission`], is held back while
//! the queue is over capacity. A producer that awaits each admission before
//! adding the next item therefore never has more than one item in excess.
//!
//! # Reservations
//!
//! [`reserve`](BoundedQueue::reserve) claims a slot before the data exists.
//! Reserved slots count toward capacity. A reservation is turned into data with
//! [`fulfill`](BoundedQueue::fulfill) or given back with
//! [`unreserve`](BoundedQueue::unreserve).

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Pending acknowledgment for an `add` or `reserve`
///
/// Resolves once the item fits within the queue capacity, or when the queue
/// is cleared.
#[must_use = "an admission does nothing unless awaited or checked"]
#[derive(Debug)]
pub struct Admission {
    waiter: Option<oneshot::Receiver<()>>,
}

impl Admission {
    fn ready() -> Self {
        Self { waiter: None }
    }

    /// True if the item was admitted without waiting
    pub fn is_ready(&self) -> bool {
        self.waiter.is_none()
    }
}

impl Future for Admission {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let polled = match self.waiter.as_mut() {
            None => return Poll::Ready(()),
            Some(rx) => Pin::new(rx).poll(cx),
        };
        // A dropped sender means the queue was cleared; nothing left to wait for
        if polled.is_ready() {
            self.waiter = None;
            return Poll::Ready(());
        }
        Poll::Pending
    }
}

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    reserved: usize,
    size: usize,
    lifo: bool,
    finished: bool,
    takers: VecDeque<oneshot::Sender<T>>,
    adders: VecDeque<oneshot::Sender<()>>,
}

impl<T> Inner<T> {
    fn occupancy(&self) -> usize {
        self.items.len() + self.reserved
    }

    /// Hand `item` to the oldest live taker or store it; true if a taker got it
    fn deliver(&mut self, mut item: T) -> bool {
        while let Some(taker) = self.takers.pop_front() {
            match taker.send(item) {
                Ok(()) => return true,
                // Taker went away, try the next one
                Err(returned) => item = returned,
            }
        }
        self.items.push_back(item);
        false
    }

    /// Release waiting takers once nothing more can arrive
    fn release_if_done(&mut self) {
        if self.finished && self.items.is_empty() && self.reserved == 0 {
            // Dropping the senders resolves every waiting taker with None
            self.takers.clear();
        }
    }

    fn admission(&mut self) -> Admission {
        if self.occupancy() > self.size {
            let (tx, rx) = oneshot::channel();
            self.adders.push_back(tx);
            Admission { waiter: Some(rx) }
        } else {
            Admission::ready()
        }
    }

    /// Release blocked producers whose items now fit
    fn wake_adders(&mut self) {
        let excess = self.occupancy().saturating_sub(self.size);
        while self.adders.len() > excess {
            if let Some(adder) = self.adders.pop_front() {
                let _ = adder.send(());
            }
        }
    }

    fn pop(&mut self) -> Option<T> {
        let item = if self.lifo {
            self.items.pop_back()
        } else {
            self.items.pop_front()
        };
        if item.is_some() {
            self.wake_adders();
        }
        item
    }
}

/// Bounded FIFO (or LIFO) queue shared between producer and consumer tasks
#[derive(Debug)]
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> BoundedQueue<T> {
    /// Create a FIFO queue holding up to `size` items before deferring admissions
    pub fn new(size: usize) -> Self {
        Self::with_order(size, false)
    }

    /// Create a queue that hands out the newest item first
    pub fn lifo(size: usize) -> Self {
        Self::with_order(size, true)
    }

    fn with_order(size: usize, lifo: bool) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                reserved: 0,
                size,
                lifo,
                finished: false,
                takers: VecDeque::new(),
                adders: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // Critical sections never panic, recover from poisoning anyway
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an item
    ///
    /// The item is stored immediately. The returned admission resolves once
    /// the queue is back within capacity. Fails with the item if the queue
    /// has been [`finish`](Self::finish)ed.
    pub fn add(&self, item: T) -> std::result::Result<Admission, T> {
        let mut inner = self.lock();
        if inner.finished {
            return Err(item);
        }
        if inner.deliver(item) {
            return Ok(Admission::ready());
        }
        Ok(inner.admission())
    }

    /// Claim a slot for an item that is not ready yet
    ///
    /// The slot is claimed even when the queue is full; the admission tells
    /// the caller when it fits.
    pub fn reserve(&self) -> Admission {
        let mut inner = self.lock();
        inner.reserved += 1;
        inner.admission()
    }

    /// Store the item for a previously reserved slot
    ///
    /// Allowed after `finish`, since the slot was claimed before.
    pub fn fulfill(&self, item: T) {
        let mut inner = self.lock();
        inner.reserved = inner.reserved.saturating_sub(1);
        inner.deliver(item);
        inner.release_if_done();
    }

    /// Give a reserved slot back
    pub fn unreserve(&self) {
        let mut inner = self.lock();
        inner.reserved = inner.reserved.saturating_sub(1);
        inner.wake_adders();
        inner.release_if_done();
    }

    /// Take the next item, waiting for one if the queue is empty
    ///
    /// Returns `None` once the queue is finished and drained. The returned
    /// future is cancel-safe: an item handed to a dropped taker goes back to
    /// the head of the queue.
    pub fn take(&self) -> Take<'_, T> {
        let mut inner = self.lock();
        if let Some(item) = inner.pop() {
            return Take {
                queue: self,
                state: TakeState::Ready(Some(item)),
            };
        }
        if inner.finished && inner.reserved == 0 {
            return Take {
                queue: self,
                state: TakeState::Ready(None),
            };
        }
        let (tx, rx) = oneshot::channel();
        inner.takers.push_back(tx);
        Take {
            queue: self,
            state: TakeState::Waiting(rx),
        }
    }

    /// Take an item without waiting
    pub fn try_take(&self) -> Option<T> {
        self.lock().pop()
    }

    /// Mark that no more items will be added
    ///
    /// Stored items and outstanding reservations can still be taken; waiting
    /// takers are released with `None` once both are gone.
    pub fn finish(&self) {
        let mut inner = self.lock();
        inner.finished = true;
        inner.release_if_done();
    }

    /// Drop all state: stored items are returned, every waiter is released
    pub fn clear(&self) -> Vec<T> {
        let mut inner = self.lock();
        inner.finished = true;
        inner.reserved = 0;
        inner.takers.clear();
        for adder in inner.adders.drain(..) {
            let _ = adder.send(());
        }
        inner.items.drain(..).collect()
    }

    /// Stored items
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// True if no items are stored
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Stored items plus reserved slots
    pub fn occupancy(&self) -> usize {
        self.lock().occupancy()
    }

    /// Outstanding reservations
    pub fn reserved(&self) -> usize {
        self.lock().reserved
    }

    /// Capacity before admissions are deferred
    pub fn size(&self) -> usize {
        self.lock().size
    }

    /// Whether `finish` or `clear` was called
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Re-insert an item at the head of the queue
    fn push_front(&self, item: T) {
        let mut inner = self.lock();
        if inner.takers.is_empty() {
            if inner.lifo {
                inner.items.push_back(item);
            } else {
                inner.items.push_front(item);
            }
        } else {
            inner.deliver(item);
        }
    }

    fn release_if_done(&self) {
        self.lock().release_if_done();
    }
}

#[derive(Debug)]
enum TakeState<T> {
    Ready(Option<T>),
    Waiting(oneshot::Receiver<T>),
    Done,
}

/// Future returned by [`BoundedQueue::take`]
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct Take<'a, T> {
    queue: &'a BoundedQueue<T>,
    state: TakeState<T>,
}

impl<T> Future for Take<'_, T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        // Take holds no self-references, so it is Unpin
        let this = self.get_mut();
        match &mut this.state {
            TakeState::Ready(item) => {
                let item = item.take();
                this.state = TakeState::Done;
                Poll::Ready(item)
            }
            TakeState::Waiting(rx) => {
                let polled = Pin::new(rx).poll(cx);
                match polled {
                    Poll::Ready(result) => {
                        this.state = TakeState::Done;
                        Poll::Ready(result.ok())
                    }
                    Poll::Pending => Poll::Pending,
                }
            }
            TakeState::Done => Poll::Ready(None),
        }
    }
}

impl<T> Unpin for Take<'_, T> {}

impl<T> Drop for Take<'_, T> {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.state, TakeState::Done) {
            TakeState::Ready(Some(item)) => self.queue.push_front(item),
            TakeState::Waiting(mut rx) => {
                // After close no item can arrive; one that already did is recovered
                rx.close();
                if let Ok(item) = rx.try_recv() {
                    self.queue.push_front(item);
                } else {
                    self.queue.release_if_done();
                }
            }
            _ => {}
        }
    }
}
