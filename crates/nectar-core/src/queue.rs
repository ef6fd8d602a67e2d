//! The update queue between ingestion and dispatch.
//!
//! [`UpdateQueue`] is a FIFO shared by any number of producers (the poller or
//! the webhook listener) and consumers (dispatcher workers). It is unbounded
//! by default; with a capacity, the [`OverflowPolicy`] decides what happens
//! when it is full. A window of recently seen `update_id`s makes redelivered
//! updates idempotent.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::QueueClosed;
use crate::types::Update;

/// Number of recent update ids remembered for duplicate detection.
pub const DEFAULT_DEDUPE_WINDOW: usize = 1024;

/// What a full bounded queue does with a new update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// The producer waits until a consumer makes room.
    #[default]
    Block,
    /// The incoming update is discarded.
    DropNewest,
    /// The update at the head of the queue is discarded.
    DropOldest,
}

/// The result of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The id was seen recently; nothing was queued.
    Duplicate,
    /// The queue was full and the incoming update was discarded.
    DroppedNewest,
    /// The queue was full; the head with this id was discarded to make room.
    DroppedOldest(i64),
}

/// Queue construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// `None` for an unbounded queue.
    pub capacity: Option<usize>,
    pub overflow: OverflowPolicy,
    /// `0` disables duplicate detection.
    pub dedupe_window: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            overflow: OverflowPolicy::Block,
            dedupe_window: DEFAULT_DEDUPE_WINDOW,
        }
    }
}

struct State {
    items: VecDeque<Update>,
    closed: bool,
    seen: HashSet<i64>,
    seen_order: VecDeque<i64>,
}

impl State {
    /// Records `id`; returns `false` if it was already in the window.
    fn remember(&mut self, id: i64, window: usize) -> bool {
        if window == 0 {
            return true;
        }
        if !self.seen.insert(id) {
            return false;
        }
        self.seen_order.push_back(id);
        while self.seen_order.len() > window {
            if let Some(old) = self.seen_order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }

    fn is_seen(&self, id: i64) -> bool {
        self.seen.contains(&id)
    }
}

struct Shared {
    config: QueueConfig,
    state: Mutex<State>,
    items_available: Notify,
    space_available: Notify,
}

/// A multi-producer, multi-consumer FIFO of updates. Clones share the queue.
#[derive(Clone)]
pub struct UpdateQueue {
    shared: Arc<Shared>,
}

impl Default for UpdateQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl UpdateQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State {
                    items: VecDeque::new(),
                    closed: false,
                    seen: HashSet::new(),
                    seen_order: VecDeque::new(),
                }),
                items_available: Notify::new(),
                space_available: Notify::new(),
            }),
        }
    }

    /// An unbounded queue with the default dedupe window.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// A bounded queue with the default dedupe window.
    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self::new(QueueConfig {
            capacity: Some(capacity),
            overflow,
            ..QueueConfig::default()
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Appends an update at the tail.
    ///
    /// Under [`OverflowPolicy::Block`] this waits for room; closing the queue
    /// while waiting returns [`QueueClosed`].
    pub async fn push(&self, update: Update) -> Result<PushOutcome, QueueClosed> {
        let config = self.shared.config;
        let update_id = update.update_id;

        loop {
            let space = self.shared.space_available.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            {
                let mut state = self.shared.state.lock();
                if state.closed {
                    return Err(QueueClosed);
                }
                if config.dedupe_window > 0 && state.is_seen(update_id) {
                    debug!(update_id, "Dropping duplicate update");
                    return Ok(PushOutcome::Duplicate);
                }

                let full = config
                    .capacity
                    .is_some_and(|cap| state.items.len() >= cap);
                let outcome = match (full, config.overflow) {
                    (false, _) => PushOutcome::Queued,
                    (true, OverflowPolicy::DropNewest) => {
                        warn!(update_id, "Update queue full, dropping incoming update");
                        return Ok(PushOutcome::DroppedNewest);
                    }
                    (true, OverflowPolicy::DropOldest) => match state.items.pop_front() {
                        Some(oldest) => {
                            warn!(
                                update_id,
                                dropped = oldest.update_id,
                                "Update queue full, dropping oldest update"
                            );
                            PushOutcome::DroppedOldest(oldest.update_id)
                        }
                        // Capacity 0 has no head to evict.
                        None => return Ok(PushOutcome::DroppedNewest),
                    },
                    (true, OverflowPolicy::Block) => PushOutcome::Queued,
                };

                if !(full && config.overflow == OverflowPolicy::Block) {
                    state.remember(update_id, config.dedupe_window);
                    state.items.push_back(update);
                    drop(state);
                    self.shared.items_available.notify_one();
                    return Ok(outcome);
                }
            }

            space.await;
        }
    }

    /// Removes the update at the head, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Update> {
        loop {
            let items = self.shared.items_available.notified();
            tokio::pin!(items);
            items.as_mut().enable();

            if let Some(result) = self.try_pop_inner() {
                return result;
            }

            items.await;
        }
    }

    /// Removes the head without waiting.
    pub fn try_pop(&self) -> Option<Update> {
        self.try_pop_inner().flatten()
    }

    /// `Some(Some(_))` for an item, `Some(None)` for closed-and-empty, `None`
    /// when the caller should wait.
    fn try_pop_inner(&self) -> Option<Option<Update>> {
        let mut state = self.shared.state.lock();
        match state.items.pop_front() {
            Some(update) => {
                drop(state);
                self.shared.space_available.notify_one();
                Some(Some(update))
            }
            None if state.closed => Some(None),
            None => None,
        }
    }

    /// Stops accepting pushes. Queued updates remain available to consumers.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        debug!("Update queue closed");
        self.shared.items_available.notify_waiters();
        self.shared.space_available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().items.is_empty()
    }
}

impl std::fmt::Debug for UpdateQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("UpdateQueue")
            .field("len", &state.items.len())
            .field("closed", &state.closed)
            .field("config", &self.shared.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Poll, UpdateKind};
    use std::time::Duration;

    fn update(id: i64) -> Update {
        Update::new(id, UpdateKind::Poll(Poll::default()))
    }

    fn drain(queue: &UpdateQueue) -> Vec<i64> {
        std::iter::from_fn(|| queue.try_pop())
            .map(|u| u.update_id)
            .collect()
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = UpdateQueue::unbounded();
        for id in [3, 1, 2] {
            assert_eq!(queue.push(update(id)).await, Ok(PushOutcome::Queued));
        }
        assert_eq!(drain(&queue), vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn test_duplicates_within_window_are_dropped() {
        let queue = UpdateQueue::new(QueueConfig {
            dedupe_window: 2,
            ..QueueConfig::default()
        });
        queue.push(update(1)).await.unwrap();
        assert_eq!(queue.push(update(1)).await, Ok(PushOutcome::Duplicate));
        queue.push(update(2)).await.unwrap();
        queue.push(update(3)).await.unwrap();
        // 1 has left the window.
        assert_eq!(queue.push(update(1)).await, Ok(PushOutcome::Queued));
        assert_eq!(drain(&queue), vec![1, 2, 3, 1]);
    }

    #[tokio::test]
    async fn test_zero_window_disables_dedupe() {
        let queue = UpdateQueue::new(QueueConfig {
            dedupe_window: 0,
            ..QueueConfig::default()
        });
        queue.push(update(1)).await.unwrap();
        assert_eq!(queue.push(update(1)).await, Ok(PushOutcome::Queued));
    }

    #[tokio::test]
    async fn test_drop_newest_and_drop_oldest() {
        let newest = UpdateQueue::bounded(2, OverflowPolicy::DropNewest);
        newest.push(update(1)).await.unwrap();
        newest.push(update(2)).await.unwrap();
        assert_eq!(newest.push(update(3)).await, Ok(PushOutcome::DroppedNewest));
        assert_eq!(drain(&newest), vec![1, 2]);

        let oldest = UpdateQueue::bounded(2, OverflowPolicy::DropOldest);
        oldest.push(update(1)).await.unwrap();
        oldest.push(update(2)).await.unwrap();
        assert_eq!(oldest.push(update(3)).await, Ok(PushOutcome::DroppedOldest(1)));
        assert_eq!(drain(&oldest), vec![2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_waits_for_space() {
        let queue = UpdateQueue::bounded(1, OverflowPolicy::Block);
        queue.push(update(1)).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(update(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!producer.is_finished());
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.pop().await.map(|u| u.update_id), Some(1));
        assert_eq!(producer.await.unwrap(), Ok(PushOutcome::Queued));
        assert_eq!(queue.pop().await.map(|u| u.update_id), Some(2));
    }

    #[tokio::test]
    async fn test_close_rejects_push_and_drains() {
        let queue = UpdateQueue::unbounded();
        queue.push(update(1)).await.unwrap();
        queue.close();

        assert_eq!(queue.push(update(2)).await, Err(QueueClosed));
        assert_eq!(queue.pop().await.map(|u| u.update_id), Some(1));
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_wakes_blocked_consumers_and_producers() {
        let queue = UpdateQueue::bounded(1, OverflowPolicy::Block);
        queue.push(update(1)).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(update(2)).await })
        };
        let empty = UpdateQueue::unbounded();
        let consumer = {
            let empty = empty.clone();
            tokio::spawn(async move { empty.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        queue.close();
        empty.close();
        assert_eq!(producer.await.unwrap(), Err(QueueClosed));
        assert!(consumer.await.unwrap().is_none());
    }
}
