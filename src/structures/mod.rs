pub use self::node::Node;
pub use self::queue::Queue;
pub use self::stack::Stack;

pub(crate) mod backoff;
mod node;
mod queue;
mod stack;
