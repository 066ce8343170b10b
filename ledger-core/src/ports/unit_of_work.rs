//! Unit of work port - atomic execution boundary

use std::fmt;

use uuid::Uuid;

use super::repository::{AccountRepository, TransactionRepository};
use crate::context::Context;
use crate::domain::Result;

/// Lifecycle of a transaction scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Pending,
    Committed,
    RolledBack,
}

impl TxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxState::Pending => "pending",
            TxState::Committed => "committed",
            TxState::RolledBack => "rolled back",
        }
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to an open transaction
///
/// Writes made through `accounts()` and `transactions()` stay invisible to
/// other callers until `commit`. Dropping a pending scope rolls it back.
pub trait TxScope: Send {
    fn accounts(&self) -> &dyn AccountRepository;

    fn transactions(&self) -> &dyn TransactionRepository;

    /// Take exclusive locks on the given accounts until the scope ends
    ///
    /// All ids are acquired together, so two scopes locking overlapping
    /// sets in different orders cannot deadlock.
    fn lock_accounts(&mut self, ctx: &Context, ids: &[Uuid]) -> Result<()>;

    fn state(&self) -> TxState;

    /// Make every write durable and visible. On failure the scope is
    /// rolled back before the error is returned.
    fn commit(&mut self, ctx: &Context) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;
}

/// Factory for transaction scopes
pub trait UnitOfWork: Send + Sync {
    /// Open a new scope in `TxState::Pending`
    fn begin(&self, ctx: &Context) -> Result<Box<dyn TxScope + '_>>;
}

impl<'u> dyn UnitOfWork + 'u {
    /// Run `f` atomically, committing only if it succeeds
    pub fn run_in_tx<F>(&self, ctx: &Context, f: F) -> Result<()>
    where
        F: FnOnce(&mut dyn TxScope) -> Result<()>,
    {
        self.run_in_tx_with_result(ctx, f)
    }

    /// Run `f` atomically and hand back its value after commit
    ///
    /// A begin failure returns before `f` is invoked. When `f` fails the
    /// scope is rolled back and `f`'s error returned, unless the rollback
    /// itself fails, in which case that failure is returned instead.
    pub fn run_in_tx_with_result<T, F>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn TxScope) -> Result<T>,
    {
        let mut scope = self.begin(ctx)?;

        let outcome = f(&mut *scope).and_then(|value| {
            ctx.check()?;
            Ok(value)
        });

        match outcome {
            Ok(value) => {
                scope.commit(ctx)?;
                Ok(value)
            }
            Err(err) => {
                tracing::debug!(error = %err, "rolling back unit of work");
                scope.rollback()?;
                Err(err)
            }
        }
    }
}
