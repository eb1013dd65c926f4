use super::backoff::Backoff;
use super::node::Node;
use crate::error::{HazardError, HazardResult, InsertError};
use crate::memory::HazardTable;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;
use tracing::warn;

const SLOTS_REQUIRED: usize = 1;

/// A lock-free Treiber stack.
///
/// Popped nodes are retired through a [`HazardTable`] rather than freed, so a
/// node is never reused while another thread may still compare against it.
pub struct Stack<T> {
    head: AtomicPtr<Node<T>>,
    table: Arc<HazardTable<Node<T>>>,
}

impl<T> Stack<T> {
    /// Create a new Stack with its own hazard table.
    /// # Examples
    /// ```
    /// use hazcurrent::structures::Stack;
    /// let stack: Stack<u32> = Stack::new();
    /// ```
    pub fn new() -> Stack<T> {
        Stack {
            head: AtomicPtr::default(),
            table: Arc::new(HazardTable::default()),
        }
    }

    /// Create a new Stack reclaiming through `table`.
    pub fn with_table(table: Arc<HazardTable<Node<T>>>) -> HazardResult<Self> {
        let available = table.config().get_slots_per_thread();
        if available < SLOTS_REQUIRED {
            warn!(available, required = SLOTS_REQUIRED, "hazard table too small for a stack");
            return Err(HazardError::TooFewSlots {
                required: SLOTS_REQUIRED,
                available,
            });
        }
        Ok(Stack {
            head: AtomicPtr::default(),
            table,
        })
    }

    pub fn table(&self) -> &Arc<HazardTable<Node<T>>> {
        &self.table
    }

    /// Push an element onto the top of the stack.
    /// # Examples
    /// ```
    /// use hazcurrent::structures::Stack;
    /// let stack: Stack<u32> = Stack::new();
    /// stack.push(3).unwrap();
    /// ```
    pub fn push(&self, item: T) -> Result<(), InsertError<T>> {
        let mut handle = match self.table.enter() {
            Ok(handle) => handle,
            Err(kind) => return Err(InsertError::new(item, kind)),
        };
        // Create a new node on the heap, with a pointer to it
        let node = Node::new_as_pointer(item);
        let mut backoff = Backoff::new();

        loop {
            let old_head = self.head.load(Ordering::Acquire);
            if !old_head.is_null() {
                handle.protect(0, old_head);
                if !ptr::eq(old_head, self.head.load(Ordering::SeqCst)) {
                    backoff.snooze();
                    continue;
                }
            }
            unsafe {
                (*node).next.store(old_head, Ordering::Relaxed);
            }
            if self
                .head
                .compare_exchange(old_head, node, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if !old_head.is_null() {
                    let _ = unsafe { handle.release(old_head, false) };
                }
                return Ok(());
            }
            backoff.snooze();
        }
    }

    /// Pop the top element, or return None if the stack is empty.
    /// # Examples
    /// ```
    /// use hazcurrent::structures::Stack;
    /// let stack: Stack<u32> = Stack::new();
    /// stack.push(3).unwrap();
    /// assert_eq!(stack.pop().unwrap(), Some(3));
    /// assert_eq!(stack.pop().unwrap(), None);
    /// ```
    pub fn pop(&self) -> HazardResult<Option<T>> {
        let mut handle = self.table.enter()?;
        let mut backoff = Backoff::new();

        loop {
            let old_head = self.head.load(Ordering::Acquire);
            if old_head.is_null() {
                return Ok(None);
            }
            // This is the pointer that needs protecting: reading its next
            // after a free would be a use-after-free
            handle.protect(0, old_head);
            if !ptr::eq(old_head, self.head.load(Ordering::SeqCst)) {
                backoff.snooze();
                continue;
            }

            let new_head = unsafe { (*old_head).next.load(Ordering::Acquire) };
            if self
                .head
                .compare_exchange(old_head, new_head, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let item = unsafe { Node::take(old_head) };
                // Retire the node
                let _ = unsafe { handle.release(old_head, true) };
                return Ok(item);
            }
            backoff.snooze();
        }
    }

    /// Whether the stack held no elements at the moment it was inspected.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    /// Destroy the stack, passing every remaining element to `destructor` in
    /// LIFO order.
    ///
    /// No other thread may still be operating on the stack.
    pub fn destroy_with<F: FnMut(T)>(self, mut destructor: F) {
        let mut current = self.head.load(Ordering::Acquire);
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

impl<T> Default for Stack<T> {
    fn default() -> Self {
        Stack::new()
    }
}

impl<T> fmt::Debug for Stack<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Stack")
            .field("head", &self.head)
            .field("table", &self.table)
            .finish()
    }
}

impl<T> Drop for Stack<T> {
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
