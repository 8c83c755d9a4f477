//! Bounded random-shuffle queue shared by reader and worker threads.
//!
//! [`ShuffleQueue`] buffers raw examples between the shard readers and the
//! preprocessing workers. In [`QueueOrder::Random`] mode a dequeue removes a
//! uniformly random element, but only once more than `min_after_dequeue`
//! elements are buffered, so consecutive examples are drawn from a large mixed
//! pool rather than from one shard. Once the queue is closed the remaining
//! elements are drained regardless of the minimum.
//!
//! ```rust
//! use mpii_pose_train::queue::{QueueOrder, ShuffleQueue};
//!
//! let q = ShuffleQueue::new(4, 0, QueueOrder::Fifo, 0);
//! q.push(1).unwrap();
//! q.push(2).unwrap();
//! q.close();
//! assert_eq!(q.pop(), Some(1));
//! assert_eq!(q.pop(), Some(2));
//! assert_eq!(q.pop(), None);
//! ```

use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

/// Dequeue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOrder {
    /// Uniformly random element once the minimum fill is reached.
    Random,
    /// Insertion order.
    Fifo,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
    rng: StdRng,
}

/// Bounded many-producer, many-consumer queue with optional random dequeue.
pub struct ShuffleQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    min_after_dequeue: usize,
    order: QueueOrder,
}

impl<T> ShuffleQueue<T> {
    /// Create a queue.
    ///
    /// `capacity` is raised to `min_after_dequeue + 1` if smaller, so a full
    /// queue can always be dequeued from.
    pub fn new(capacity: usize, min_after_dequeue: usize, order: QueueOrder, seed: u64) -> Self {
        let capacity = capacity.max(min_after_dequeue + 1);
        ShuffleQueue {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity.min(1 << 16)),
                closed: false,
                rng: StdRng::seed_from_u64(seed),
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            min_after_dequeue,
            order,
        }
    }

    /// Add an element, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns the element back if the queue is closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        while state.items.len() >= self.capacity && !state.closed {
            self.not_full.wait(&mut state);
        }
        if state.closed {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove an element, blocking until one is available.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        while !state.closed && state.items.len() <= self.min_after_dequeue {
            self.not_empty.wait(&mut state);
        }
        let item = match self.order {
            QueueOrder::Fifo => state.items.pop_front(),
            QueueOrder::Random if state.items.is_empty() => None,
            QueueOrder::Random => {
                let len = state.items.len();
                let idx = state.rng.gen_range(0..len);
                state.items.swap_remove_back(idx)
            }
        };
        drop(state);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Refuse further pushes and wake every blocked thread.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Whether [`ShuffleQueue::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of buffered elements.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns `true` when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of buffered elements.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
