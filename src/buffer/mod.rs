//! Buffer Manager & Tuple Buffer: the fixed-size pooled page allocator and
//! the refcounted buffer handle built on top of it.

mod manager;
mod pool;
mod tuple_buffer;
mod unpooled;

pub use manager::BufferManager;
pub use pool::{BufferPool, SubBufferPool};
pub use tuple_buffer::{BufferMetadata, TupleBuffer};
pub use unpooled::{acquire_unpooled, UnpooledArena};
