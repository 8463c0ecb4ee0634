//! Bounded FIFO of pending notification intents.
//!
//! Producers never block: when the queue is full the overflow policy
//! decides what is lost. The lowest-priority, oldest intent that ranks at
//! most as high as the incoming one is evicted. Critical intents (stops
//! and errors) are never evicted, and a critical intent that finds no
//! victim is queued beyond capacity rather than dropped.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use timelapse_core::intent::{IntentKind, NotificationIntent, Priority};
use tokio::sync::Notify;

/// What happened to an intent handed to [`IntentQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queued after evicting an older intent of the given kind.
    Evicted(IntentKind),
    /// The queue was full and nothing could make room.
    Dropped,
    /// Notifications of this kind are switched off.
    Disabled,
    /// The queue no longer accepts work.
    Closed,
}

struct QueueState {
    items: VecDeque<NotificationIntent>,
    closed: bool,
}

pub struct IntentQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl IntentQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, intent: NotificationIntent) -> EnqueueOutcome {
        self.offer(intent).0
    }

    /// Like [`push`](Self::push), also handing back the intent that did not
    /// stay queued: the evicted one, or `intent` itself when it was dropped.
    pub fn offer(
        &self,
        intent: NotificationIntent,
    ) -> (EnqueueOutcome, Option<NotificationIntent>) {
        let result = {
            let mut state = self.lock();
            if state.closed {
                return (EnqueueOutcome::Closed, Some(intent));
            }

            if state.items.len() < self.capacity {
                state.items.push_back(intent);
                (EnqueueOutcome::Queued, None)
            } else {
                let incoming = intent.priority();
                let victim = state
                    .items
                    .iter()
                    .enumerate()
                    .filter(|(_, queued)| {
                        queued.priority() != Priority::Critical && queued.priority() <= incoming
                    })
                    .min_by_key(|(idx, queued)| (queued.priority(), *idx))
                    .map(|(idx, _)| idx);

                match victim {
                    Some(idx) => {
                        let evicted = state.items.remove(idx);
                        state.items.push_back(intent);
                        match evicted {
                            Some(evicted) => (EnqueueOutcome::Evicted(evicted.kind), Some(evicted)),
                            None => (EnqueueOutcome::Queued, None),
                        }
                    }
                    None if incoming == Priority::Critical => {
                        state.items.push_back(intent);
                        (EnqueueOutcome::Queued, None)
                    }
                    None => return (EnqueueOutcome::Dropped, Some(intent)),
                }
            }
        };
        self.notify.notify_one();
        result
    }

    /// Wait for the next intent. Returns `None` once the queue is closed
    /// and fully drained.
    pub async fn pop(&self) -> Option<NotificationIntent> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if let Some(intent) = state.items.pop_front() {
                    return Some(intent);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn try_pop(&self) -> Option<NotificationIntent> {
        self.lock().items.pop_front()
    }

    /// Stop accepting new intents. Already queued ones stay poppable.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use timelapse_core::intent::IntentPayload;
    use timelapse_core::run::StopReason;

    use super::*;

    fn progress(n: u64) -> NotificationIntent {
        NotificationIntent::new(IntentPayload::Progress {
            image_count: n,
            failed_captures: 0,
            elapsed: Duration::from_secs(n),
            remaining: Duration::ZERO,
        })
    }

    fn start() -> NotificationIntent {
        NotificationIntent::new(IntentPayload::Start {
            interval_secs: 5,
            duration_secs: 60,
            output_dir: "out".into(),
        })
    }

    fn stop() -> NotificationIntent {
        NotificationIntent::new(IntentPayload::Stop {
            image_count: 1,
            failed_captures: 0,
            elapsed: Duration::from_secs(5),
            reason: StopReason::Completed,
        })
    }

    fn kinds(queue: &IntentQueue) -> Vec<IntentKind> {
        std::iter::from_fn(|| queue.try_pop()).map(|i| i.kind).collect()
    }

    #[test]
    fn fifo_under_capacity() {
        let queue = IntentQueue::new(8);
        queue.push(start());
        queue.push(progress(1));
        queue.push(stop());
        assert_eq!(
            kinds(&queue),
            vec![IntentKind::Start, IntentKind::Progress, IntentKind::Stop]
        );
    }

    #[test]
    fn overflow_evicts_oldest_low_priority() {
        let queue = IntentQueue::new(3);
        queue.push(start());
        queue.push(progress(1));
        queue.push(progress(2));

        assert_eq!(queue.push(progress(3)), EnqueueOutcome::Evicted(IntentKind::Progress));

        let remaining: Vec<_> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(remaining[0].kind, IntentKind::Start);
        assert_eq!(remaining[1].payload, progress(2).payload);
        assert_eq!(remaining[2].payload, progress(3).payload);
    }

    #[test]
    fn low_priority_is_dropped_when_only_higher_ranks_remain() {
        let queue = IntentQueue::new(2);
        queue.push(start());
        queue.push(stop());
        assert_eq!(queue.push(progress(1)), EnqueueOutcome::Dropped);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn critical_is_never_dropped() {
        let queue = IntentQueue::new(2);
        queue.push(stop());
        queue.push(stop());
        assert_eq!(queue.push(stop()), EnqueueOutcome::Queued);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn critical_prefers_evicting_low_over_normal() {
        let queue = IntentQueue::new(2);
        queue.push(start());
        queue.push(progress(1));
        assert_eq!(queue.push(stop()), EnqueueOutcome::Evicted(IntentKind::Progress));
        assert_eq!(kinds(&queue), vec![IntentKind::Start, IntentKind::Stop]);
    }

    #[test]
    fn offer_hands_back_what_was_lost() {
        let queue = IntentQueue::new(2);
        queue.push(start());
        queue.push(progress(1));

        let (outcome, evicted) = queue.offer(progress(2));
        assert_eq!(outcome, EnqueueOutcome::Evicted(IntentKind::Progress));
        assert_eq!(evicted.map(|i| i.payload), Some(progress(1).payload));

        queue.push(stop());
        let (outcome, dropped) = queue.offer(progress(3));
        assert_eq!(outcome, EnqueueOutcome::Dropped);
        assert_eq!(dropped.map(|i| i.payload), Some(progress(3).payload));
    }

    #[test]
    fn closed_queue_rejects_but_drains() {
        let queue = IntentQueue::new(4);
        queue.push(start());
        queue.close();
        assert_eq!(queue.push(stop()), EnqueueOutcome::Closed);
        assert!(queue.is_closed());
        assert_eq!(kinds(&queue), vec![IntentKind::Start]);
    }

    #[tokio::test]
    async fn pop_returns_none_after_close_and_drain() {
        let queue = IntentQueue::new(4);
        queue.push(progress(1));
        queue.close();
        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let queue = std::sync::Arc::new(IntentQueue::new(4));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push(start());
        let popped = consumer.await.unwrap();
        assert_eq!(popped.map(|i| i.kind), Some(IntentKind::Start));
    }
}
