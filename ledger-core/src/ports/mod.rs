//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external dependencies. Services depend
//! only on these traits, not on concrete implementations.

mod clock;
mod credentials;
mod repository;
mod unit_of_work;

pub use clock::Clock;
pub use credentials::CredentialHasher;
pub use repository::{
    AccountRepository, SortOrder, TransactionPage, TransactionQuery, TransactionRepository,
};
pub use unit_of_work::{TxScope, TxState, UnitOfWork};
