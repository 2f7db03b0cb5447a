//! In-memory backends.
//!
//! State lives in the process, so these are only shared between worker loops
//! running in the same process. Leases use `tokio::time::Instant`, which lets
//! tests drive expiry with a paused clock.

mod blob;
mod queue;
mod store;

pub use blob::MemoryBlobStore;
pub use queue::{MemoryQueue, QueueStats};
pub use store::MemoryStatusStore;
