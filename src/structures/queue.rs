use super::backoff::Backoff;
use super::node::Node;
use crate::error::{HazardError, HazardResult, InsertError};
use crate::memory::HazardTable;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;
use tracing::warn;

const SLOTS_REQUIRED: usize = 2;

/// A lock-free Michael-Scott queue.
///
/// This queue is an implementation of that described in [Simple, Fast, and Practical
/// Non-blocking and Blocking Concurrent Queue Algorithms](https://dl.acm.org/citation.cfm?id=248106).
/// It is implemented as a linked-list of nodes whose first node is always a dummy.
/// Removed nodes are reclaimed through a [`HazardTable`], which may be shared
/// with other structures over the same node type.
pub struct Queue<T> {
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
    table: Arc<HazardTable<Node<T>>>,
}

impl<T> Queue<T> {
    /// Create a new Queue with its own hazard table.
    /// # Examples
    /// ```
    /// use hazcurrent::structures::Queue;
    /// let queue: Queue<String> = Queue::new();
    /// ```
    pub fn new() -> Self {
        Queue::build(Arc::new(HazardTable::default()))
    }

    /// Create a new Queue reclaiming through `table`. The table needs at least
    /// two slots per thread.
    pub fn with_table(table: Arc<HazardTable<Node<T>>>) -> HazardResult<Self> {
        let available = table.config().get_slots_per_thread();
        if available < SLOTS_REQUIRED {
            warn!(available, required = SLOTS_REQUIRED, "hazard table too small for a queue");
            return Err(HazardError::TooFewSlots {
                required: SLOTS_REQUIRED,
                available,
            });
        }
        Ok(Queue::build(table))
    }

    fn build(table: Arc<HazardTable<Node<T>>>) -> Self {
        let dummy_node = Box::into_raw(Box::new(Node::new_dummy_node()));
        Queue {
            head: AtomicPtr::new(dummy_node),
            tail: AtomicPtr::new(dummy_node),
            table,
        }
    }

    pub fn table(&self) -> &Arc<HazardTable<Node<T>>> {
        &self.table
    }

    /// Add a new element to the back of the queue.
    ///
    /// Only fails when no hazard record can be claimed, in which case the
    /// element is handed back inside the error.
    /// # Examples
    /// ```
    /// use hazcurrent::structures::Queue;
    /// let queue: Queue<String> = Queue::new();
    /// queue.enqueue("hello".to_owned()).unwrap();
    /// ```
    pub fn enqueue(&self, item: T) -> Result<(), InsertError<T>> {
        let mut handle = match self.table.enter() {
            Ok(handle) => handle,
            Err(kind) => return Err(InsertError::new(item, kind)),
        };
        let node = Node::new_as_pointer(item);
        let mut backoff = Backoff::new();

        loop {
            let tail = self.tail.load(Ordering::Acquire);
            handle.protect(0, tail);
            // Is the tail still consistent? Required for the hazard pointer to work
            if !ptr::eq(tail, self.tail.load(Ordering::SeqCst)) {
                backoff.snooze();
                continue;
            }
            let next = unsafe { (*tail).next.load(Ordering::Acquire) };

            // Is the tail actually the end of the queue?
            if !next.is_null() {
                // If it isn't, try to make next the end of the queue
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Ordering::AcqRel, Ordering::Relaxed);
                backoff.snooze();
                continue;
            }

            // Try to CAS our node onto the end of the queue
            let linked = unsafe {
                (*tail).next.compare_exchange(
                    ptr::null_mut(),
                    node,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
            };
            if linked.is_ok() {
                // Success! Swinging the tail is best effort, anyone can fix it later
                let _ = self
                    .tail
                    .compare_exchange(tail, node, Ordering::AcqRel, Ordering::Relaxed);
                // The old tail is still linked, so it is not retired
                let _ = unsafe { handle.release(tail, false) };
                return Ok(());
            }
            backoff.snooze();
        }
    }

    /// Take an element from the front of the queue, or return None if the queue is empty.
    /// # Examples
    /// ```
    /// use hazcurrent::structures::Queue;
    /// let queue: Queue<String> = Queue::new();
    /// queue.enqueue("hello".to_owned()).unwrap();
    /// assert_eq!(queue.dequeue().unwrap(), Some("hello".to_owned()));
    /// ```
    pub fn dequeue(&self) -> HazardResult<Option<T>> {
        let mut handle = self.table.enter()?;
        let mut backoff = Backoff::new();

        loop {
            let head = self.head.load(Ordering::Acquire);
            handle.protect(0, head);
            if !ptr::eq(head, self.head.load(Ordering::SeqCst)) {
                backoff.snooze();
                continue;
            }

            let tail = self.tail.load(Ordering::Acquire);
            let next = unsafe { (*head).next.load(Ordering::Acquire) };
            handle.protect(1, next);
            // While head is still the head, next cannot have been retired
            if !ptr::eq(head, self.head.load(Ordering::SeqCst)) {
                backoff.snooze();
                continue;
            }

            if next.is_null() {
                handle.clear();
                return Ok(None);
            }

            if ptr::eq(head, tail) {
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Ordering::AcqRel, Ordering::Relaxed);
                backoff.snooze();
                continue;
            }

            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                // next is the new dummy. Only the thread that won the CAS
                // touches its item.
                let item = unsafe { Node::take(next) };
                unsafe {
                    let _ = handle.release(head, true);
                    let _ = handle.release(next, false);
                }
                return Ok(item);
            }
            backoff.snooze();
        }
    }

    /// Whether the queue held no elements at the moment it was inspected.
    pub fn is_empty(&self) -> HazardResult<bool> {
        let mut handle = self.table.enter()?;
        loop {
            let head = self.head.load(Ordering::Acquire);
            handle.protect(0, head);
            if ptr::eq(head, self.head.load(Ordering::SeqCst)) {
                return Ok(unsafe { (*head).next.load(Ordering::Acquire) }.is_null());
            }
        }
    }

    /// Destroy the queue, passing every remaining element to `destructor` in
    /// FIFO order.
    ///
    /// No other thread may still be operating on the queue.
    pub fn destroy_with<F: FnMut(T)>(self, mut destructor: F) {
        let dummy = self.head.load(Ordering::Acquire);
        let mut current = unsafe { (*dummy).next.load(Ordering::Acquire) };
        while !current.is_null() {
            unsafe {
                if let Some(item) = Node::take(current) {
                    destructor(item);
                }
                current = (*current).next.load(Ordering::Acquire);
            }
        }
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Queue::new()
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Queue")
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("table", &self.table)
            .finish()
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        let mut current = *self.head.get_mut();
        while !current.is_null() {
            unsafe {
                let next = (*current).next.load(Ordering::Relaxed);
                drop(Box::from_raw(current));
                current = next;
            }
        }
    }
}
