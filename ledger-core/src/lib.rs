//! Ledger Core - currency-safe accounts and atomic movement history
//!
//! This crate implements the core domain logic following hexagonal architecture:
//!
//! - **domain**: Core entities and values (Money, Account, Transaction)
//! - **ports**: Trait definitions for external dependencies (repositories,
//!   unit of work, credentials, clock)
//! - **services**: Business logic orchestration
//! - **adapters**: Concrete implementations (in-memory, DuckDB, Argon2)

pub mod adapters;
pub mod config;
pub mod context;
pub mod domain;
pub mod log_migrations;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::Path;
use std::sync::Arc;

use adapters::{Argon2Hasher, DuckDbStore, MemoryStore, SystemClock};
use config::Config;
use ports::{AccountRepository, Clock, CredentialHasher, TransactionRepository, UnitOfWork};
use services::{AccountService, LoggingService, PageLimits, TransactionService};

// Re-export commonly used types at crate root
pub use context::Context;
pub use domain::{
    Account, Currency, Error, ErrorKind, Money, OperationKind, OperationResult, Result,
    Transaction,
};
pub use ports::{SortOrder, TransactionPage};
pub use services::{
    DepositParams, ListTransactionsParams, OpenAccountParams, TransferParams, WithdrawParams,
};

/// Main context for ledger operations
///
/// Wires one store into the account and transaction services.
pub struct LedgerContext {
    pub config: Config,
    pub account_service: AccountService,
    pub transaction_service: TransactionService,
    pub logging_service: Option<Arc<LoggingService>>,
}

impl LedgerContext {
    /// Open the durable ledger in `dir`
    ///
    /// Reads settings.json, opens (and migrates) the configured DuckDB file
    /// and the event log next to it.
    pub fn new(dir: &Path) -> Result<Self> {
        let config = Config::load(dir)?;
        let store = Arc::new(DuckDbStore::new(&dir.join(&config.db_file))?);
        let hasher = Arc::new(Argon2Hasher::new(&config.argon2)?);
        let logging = Arc::new(LoggingService::new(dir, env!("CARGO_PKG_VERSION"))?);

        let mut ctx = Self::with_store(config, store, hasher, Arc::new(SystemClock));
        ctx.transaction_service = ctx.transaction_service.with_logger(Arc::clone(&logging));
        ctx.logging_service = Some(logging);
        Ok(ctx)
    }

    /// Ledger held entirely in memory, without an event log
    pub fn in_memory(
        config: Config,
        clock: Arc<dyn Clock>,
        hasher: Arc<dyn CredentialHasher>,
    ) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()), hasher, clock)
    }

    /// Wire services around any store implementing all persistence ports
    pub fn with_store<S>(
        config: Config,
        store: Arc<S>,
        hasher: Arc<dyn CredentialHasher>,
        clock: Arc<dyn Clock>,
    ) -> Self
    where
        S: UnitOfWork + AccountRepository + TransactionRepository + 'static,
    {
        let account_service = AccountService::new(
            store.clone(),
            store.clone(),
            Arc::clone(&hasher),
            Arc::clone(&clock),
            config.max_accounts_per_owner,
        );
        let transaction_service = TransactionService::new(
            store.clone(),
            store.clone(),
            store,
            hasher,
            clock,
            PageLimits {
                default_size: config.default_page_size,
                max_size: config.max_page_size,
            },
        );

        Self {
            config,
            account_service,
            transaction_service,
            logging_service: None,
        }
    }
}
