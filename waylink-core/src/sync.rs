//! Shared data structures used by the client and server runtimes
//!
//! All of these are generic over the element type and independent of the
//! wire protocol; the runtimes compose them where connections, globals or
//! messages are shared between threads.

mod pool;
mod queue;
mod ref_count;
mod registry;
mod spsc;

pub use pool::ObjectPool;
pub use queue::{MessageQueue, PopError, PushError};
pub use ref_count::RefCounted;
pub use registry::SharedRegistry;
pub use spsc::SpscRing;
