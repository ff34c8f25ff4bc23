//! Postgres-backed collaborators: the key/value cache and the conversation
//! memory store. Tables are created on demand by each store's `migrate()`.

pub mod kv;
pub mod memory;

pub use kv::PgKvStore;
pub use memory::PgMemoryStore;

use threadline_common::StoreError;

pub(crate) fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}
