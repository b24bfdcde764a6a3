//! Bounded multi-level priority queue with async waits.
//!
//! ```ascii
//! lane 0 (highest) │ r7 r9
//! lane 1           │ r3
//! lane 2 (lowest)  │ r1 r2 r4   ◄── priorities ≥ levels share the last lane
//! ```
//!
//! Items leave in lane order, insertion order within a lane. Every mutation
//! wakes all waiters, which re-check their condition. A waiter whose future
//! is dropped takes its ticket with it.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue is full ({capacity} items)")]
    Full { capacity: usize },

    #[error("timed out after {0:?} waiting in queue")]
    Timeout(Duration),
}

struct Lanes<T> {
    lanes: Vec<VecDeque<T>>,
    len: usize,
}

impl<T> Lanes<T> {
    fn head(&self) -> Option<&T> {
        self.lanes.iter().find_map(|lane| lane.front())
    }

    fn pop(&mut self) -> Option<T> {
        let item = self.lanes.iter_mut().find_map(|lane| lane.pop_front());
        if item.is_some() {
            self.len -= 1;
        }
        item
    }
}

/// Bounded async priority queue. Lower priority values are served first.
pub struct PriorityQueue<T> {
    state: Mutex<Lanes<T>>,
    capacity: usize,
    changed: Notify,
}

impl<T> PriorityQueue<T> {
    pub fn new(capacity: usize, priority_levels: usize) -> Self {
        let levels = priority_levels.max(1);
        Self {
            state: Mutex::new(Lanes {
                lanes: (0..levels).map(|_| VecDeque::new()).collect(),
                len: 0,
            }),
            capacity: capacity.max(1),
            changed: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items waiting per lane, highest priority first.
    pub fn depth_by_priority(&self) -> Vec<usize> {
        self.state.lock().lanes.iter().map(VecDeque::len).collect()
    }

    /// Enqueue without waiting.
    pub fn try_put(&self, item: T, priority: usize) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock();
            if state.len >= self.capacity {
                return Err(QueueError::Full {
                    capacity: self.capacity,
                });
            }
            let lane = priority.min(state.lanes.len() - 1);
            state.lanes[lane].push_back(item);
            state.len += 1;
        }
        self.changed.notify_waiters();
        Ok(())
    }

    /// Enqueue, waiting up to `timeout` for space.
    pub async fn put(&self, item: T, priority: usize, timeout: Duration) -> Result<(), QueueError> {
        let deadline = deadline_after(timeout);
        let mut item = Some(item);
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.len < self.capacity {
                    if let Some(item) = item.take() {
                        let lane = priority.min(state.lanes.len() - 1);
                        state.lanes[lane].push_back(item);
                        state.len += 1;
                    }
                    drop(state);
                    self.changed.notify_waiters();
                    return Ok(());
                }
            }

            if !wait_changed(notified, deadline).await {
                return Err(QueueError::Timeout(timeout));
            }
        }
    }

    /// Dequeue the highest-priority item without waiting.
    pub fn try_get(&self) -> Option<T> {
        let item = self.state.lock().pop();
        if item.is_some() {
            self.changed.notify_waiters();
        }
        item
    }

    /// Dequeue the highest-priority item, waiting up to `timeout`.
    pub async fn get(&self, timeout: Duration) -> Result<T, QueueError> {
        self.take_when(timeout, |_| true, || Some(()))
            .await
            .map(|(item, ())| item)
    }

    /// Wait until the head of the queue satisfies `pred`, then remove it.
    pub async fn take_when_head<F>(&self, timeout: Duration, pred: F) -> Result<T, QueueError>
    where
        F: Fn(&T) -> bool,
    {
        self.wait_turn(timeout, pred, || Some(()))
            .await
            .map(|(item, ())| item)
    }

    /// Wait until the head satisfies `pred` and `claim` yields a value, then
    /// remove the head and return it with the claim.
    ///
    /// `claim` runs under the queue lock, only for the matching head, so a
    /// shared resource is handed out in queue order. If the wait times out
    /// or the future is dropped, the matching item is removed from wherever
    /// it sits so it cannot block the requests behind it. Callers that gate
    /// on `claim` call [`PriorityQueue::notify_waiters`] when it may succeed.
    pub async fn wait_turn<F, C, R>(
        &self,
        timeout: Duration,
        pred: F,
        claim: C,
    ) -> Result<(T, R), QueueError>
    where
        F: Fn(&T) -> bool,
        C: FnMut() -> Option<R>,
    {
        let mut guard = TicketGuard {
            queue: self,
            pred: &pred,
            armed: true,
        };
        let result = self.take_when(timeout, &pred, claim).await;
        if result.is_ok() {
            guard.armed = false;
        }
        result
    }

    /// Wake every waiter so it re-checks its condition.
    pub fn notify_waiters(&self) {
        self.changed.notify_waiters();
    }

    async fn take_when<F, C, R>(
        &self,
        timeout: Duration,
        pred: F,
        mut claim: C,
    ) -> Result<(T, R), QueueError>
    where
        F: Fn(&T) -> bool,
        C: FnMut() -> Option<R>,
    {
        let deadline = deadline_after(timeout);
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let taken = {
                let mut state = self.state.lock();
                match state.head() {
                    Some(head) if pred(head) => match claim() {
                        Some(claimed) => state.pop().map(|item| (item, claimed)),
                        None => None,
                    },
                    _ => None,
                }
            };
            if let Some(taken) = taken {
                self.changed.notify_waiters();
                return Ok(taken);
            }

            if !wait_changed(notified, deadline).await {
                return Err(QueueError::Timeout(timeout));
            }
        }
    }

    /// Remove the first item matching `pred`, in any lane.
    pub fn remove_where<F>(&self, pred: F) -> Option<T>
    where
        F: Fn(&T) -> bool,
    {
        let removed = {
            let mut state = self.state.lock();
            let mut removed = None;
            for lane in state.lanes.iter_mut() {
                if let Some(pos) = lane.iter().position(&pred) {
                    removed = lane.remove(pos);
                    break;
                }
            }
            if removed.is_some() {
                state.len -= 1;
            }
            removed
        };
        if removed.is_some() {
            self.changed.notify_waiters();
        }
        removed
    }
}

/// `None` when `timeout` is too large to represent as a deadline.
fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Wait for a change notification; `false` once `deadline` has passed.
async fn wait_changed(notified: Pin<&mut Notified<'_>>, deadline: Option<Instant>) -> bool {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, notified).await.is_ok(),
        None => {
            notified.await;
            true
        }
    }
}

/// Removes a waiter's ticket unless the wait succeeded.
struct TicketGuard<'a, T, F: Fn(&T) -> bool> {
    queue: &'a PriorityQueue<T>,
    pred: &'a F,
    armed: bool,
}

impl<T, F: Fn(&T) -> bool> Drop for TicketGuard<'_, T, F> {
    fn drop(&mut self) {
        if self.armed {
            self.queue.remove_where(self.pred);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_priority_order() {
        let queue = PriorityQueue::new(10, 3);
        queue.try_put("low", 2).unwrap();
        queue.try_put("high", 0).unwrap();
        queue.try_put("mid", 1).unwrap();
        queue.try_put("high2", 0).unwrap();

        assert_eq!(queue.depth_by_priority(), vec![2, 1, 1]);
        assert_eq!(queue.try_get(), Some("high"));
        assert_eq!(queue.try_get(), Some("high2"));
        assert_eq!(queue.try_get(), Some("mid"));
        assert_eq!(queue.try_get(), Some("low"));
        assert_eq!(queue.try_get(), None);
    }

    #[test]
    fn test_out_of_range_priority_uses_last_lane() {
        let queue = PriorityQueue::new(10, 2);
        queue.try_put(1, 7).unwrap();
        assert_eq!(queue.depth_by_priority(), vec![0, 1]);
    }

    #[test]
    fn test_full_queue_rejects() {
        let queue = PriorityQueue::new(2, 3);
        queue.try_put(1, 0).unwrap();
        queue.try_put(2, 0).unwrap();
        assert_eq!(queue.try_put(3, 0), Err(QueueError::Full { capacity: 2 }));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_times_out_when_empty() {
        let queue: PriorityQueue<u32> = PriorityQueue::new(4, 1);
        let err = queue.get(Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(err, QueueError::Timeout(Duration::from_millis(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_wakes_on_put() {
        let queue = Arc::new(PriorityQueue::new(4, 1));
        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.try_put(42u32, 0).unwrap();
        });

        let item = queue.get(Duration::from_secs(1)).await.unwrap();
        assert_eq!(item, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_waits_for_space() {
        let queue = Arc::new(PriorityQueue::new(1, 1));
        queue.try_put(1u32, 0).unwrap();

        let consumer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            consumer.try_get();
        });

        queue.put(2, 0, Duration::from_secs(1)).await.unwrap();
        assert_eq!(queue.try_get(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_when_head_removes_own_ticket_on_timeout() {
        let queue = PriorityQueue::new(4, 2);
        queue.try_put(1u32, 0).unwrap();
        queue.try_put(2u32, 1).unwrap();

        let err = queue
            .take_when_head(Duration::from_millis(20), |t| *t == 2)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Timeout(_)));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_get(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_when_head_waits_for_turn() {
        let queue = Arc::new(PriorityQueue::new(4, 2));
        queue.try_put(1u32, 0).unwrap();
        queue.try_put(2u32, 1).unwrap();

        let first = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            first.take_when_head(Duration::from_secs(1), |t| *t == 1).await
        });

        let item = queue
            .take_when_head(Duration::from_secs(1), |t| *t == 2)
            .await
            .unwrap();
        assert_eq!(item, 2);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_removes_its_ticket() {
        let queue = PriorityQueue::new(4, 2);
        queue.try_put(1u32, 0).unwrap();
        queue.try_put(2u32, 1).unwrap();

        let waited = tokio::time::timeout(
            Duration::from_millis(5),
            queue.take_when_head(Duration::from_secs(1), |t| *t == 2),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.try_get(), Some(1));
        queue.try_put(3u32, 1).unwrap();
        let item = queue
            .take_when_head(Duration::from_secs(1), |t| *t == 3)
            .await
            .unwrap();
        assert_eq!(item, 3);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_turn_holds_head_until_claimed() {
        let queue = Arc::new(PriorityQueue::new(4, 1));
        let open = Arc::new(std::sync::atomic::AtomicBool::new(false));
        queue.try_put(7u32, 0).unwrap();

        let opener = (queue.clone(), open.clone());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            opener.1.store(true, std::sync::atomic::Ordering::SeqCst);
            opener.0.notify_waiters();
        });

        let start = Instant::now();
        let (item, claimed) = queue
            .wait_turn(
                Duration::from_secs(1),
                |t| *t == 7,
                || open.load(std::sync::atomic::Ordering::SeqCst).then_some("slot"),
            )
            .await
            .unwrap();
        assert_eq!((item, claimed), (7, "slot"));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_does_not_overflow() {
        let queue = PriorityQueue::new(2, 1);
        queue.try_put(5u32, 0).unwrap();
        let item = queue.get(Duration::MAX).await.unwrap();
        assert_eq!(item, 5);
    }
}
