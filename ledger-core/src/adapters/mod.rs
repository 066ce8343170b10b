//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - in-memory and DuckDB stores for the repository and unit-of-work ports
//! - Argon2id for the credential port
//! - system and manual clocks for the clock port

mod clock;
mod credentials;
pub mod duckdb;
mod locks;
pub mod memory;

pub use self::clock::{ManualClock, SystemClock};
pub use self::credentials::Argon2Hasher;
pub use self::duckdb::DuckDbStore;
pub use self::locks::{AccountLockGuard, AccountLocks};
pub use self::memory::MemoryStore;
