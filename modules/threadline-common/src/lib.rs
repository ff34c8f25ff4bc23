pub mod config;
pub mod error;
pub mod memory;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{StoreError, ThreadlineError};
pub use memory::{entity_id, memory_id, room_id, MemoryContent, MemoryRecord};
pub use store::{InMemoryMemoryStore, KvStore, MemoryKvStore, MemoryStore, StoreResult};
pub use types::*;
