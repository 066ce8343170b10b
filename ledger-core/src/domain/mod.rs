//! Core domain entities
//!
//! Pure value types and entities with their validation rules.
//! No I/O happens here.

mod account;
mod money;
pub mod result;
mod transaction;

pub use account::Account;
pub use money::{Currency, Money};
pub use result::{Error, ErrorKind, OperationResult, Result};
pub use transaction::{OperationKind, Transaction};
