mod error;
mod hash_index;
mod pool;

pub use error::{BufferError, BufferResult};
pub use pool::{BlockHandle, BufferPool};

/// Number of slots in the buffer pool
pub const BUFFER_POOL_SIZE: usize = 40;

/// Number of buckets in the buffer hash index
pub const HASH_TABLE_SIZE: usize = 20;
