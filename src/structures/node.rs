use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::AtomicPtr;

/// Link cell shared by [`Queue`](super::Queue) and [`Stack`](super::Stack).
///
/// Retired nodes reach the table's destructor with their item already moved
/// out, so a custom destructor only has to free the node itself.
pub struct Node<T> {
    pub(crate) item: UnsafeCell<Option<T>>,
    pub(crate) next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    pub(crate) fn new(item: T) -> Self {
        Node {
            item: UnsafeCell::new(Some(item)),
            next: AtomicPtr::default(),
        }
    }

    pub(crate) fn new_dummy_node() -> Self {
        Node {
            item: UnsafeCell::new(None),
            next: AtomicPtr::default(),
        }
    }

    pub(crate) fn new_as_pointer(item: T) -> *mut Self {
        Box::into_raw(Box::new(Node::new(item)))
    }

    /// Moves the item out of the node.
    ///
    /// # Safety
    /// Only the thread whose CAS unlinked (or turned into a dummy) this node
    /// may call it, and only once.
    pub(crate) unsafe fn take(node: *mut Self) -> Option<T> {
        (*(*node).item.get()).take()
    }
}

impl<T> fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Node").field("next", &self.next).finish()
    }
}
