//! Durable session records and the atomic state-transition primitive.
//!
//! The session store is the single source of truth for session status and
//! the dedup index. All components mutate sessions exclusively through it.

pub mod db_entities;
pub mod memory_store;
pub mod sqlite_store;
pub mod store_trait;
pub mod types;

pub use memory_store::MemorySessionStore;
pub use sqlite_store::SqliteSessionStore;
pub use store_trait::SessionStore;
pub use types::{Session, SessionFilter, SessionStats, SessionStatus};
