//! DuckDB store implementation

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use duckdb::{params, Connection, ToSql};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::locks::{AccountLockGuard, AccountLocks};
use crate::context::Context;
use crate::domain::{Account, Currency, Error, Money, OperationKind, Result, Transaction};
use crate::ports::{
    AccountRepository, TransactionPage, TransactionQuery, TransactionRepository, TxScope, TxState,
    UnitOfWork,
};
use crate::services::{MigrationResult, MigrationService};

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

/// Durable ledger store
///
/// Autocommit reads and writes go through the shared connection. Each unit
/// of work gets its own cloned connection with an explicit transaction, so
/// its writes stay invisible to other connections until `COMMIT`.
pub struct DuckDbStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
    locks: Arc<AccountLocks>,
}

impl DuckDbStore {
    /// Open (or create) a database file and bring its schema up to date
    ///
    /// Retries with exponential backoff while another process holds the file.
    pub fn new(db_path: &Path) -> Result<Self> {
        let mut attempt = 0;
        let conn = loop {
            match Self::try_open_connection(db_path) {
                Ok(conn) => break conn,
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        tracing::warn!(
                            delay_ms = delay.as_millis() as u64,
                            attempt = attempt + 1,
                            max = MAX_RETRIES,
                            error = %err_msg,
                            "database busy, retrying"
                        );
                        thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    return Err(e);
                }
            }
        };

        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path.to_path_buf()),
            locks: AccountLocks::new(),
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Private in-memory database with the full schema
    pub fn open_in_memory() -> Result<Self> {
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_in_memory_with_flags(config)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
            locks: AccountLocks::new(),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Cached extensions can fail code signing checks, so never autoload
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Ok(Connection::open_with_flags(db_path, config)?)
    }

    /// Apply pending schema migrations
    pub fn run_migrations(&self) -> Result<MigrationResult> {
        let conn = self.conn.lock()?;
        MigrationService::new(&conn).run_pending()
    }

    /// Path of the backing file, `None` for in-memory databases
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Number of committed transaction records
    pub fn transaction_count(&self) -> Result<u64> {
        let conn = self.conn.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM ledger_transactions", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl AccountRepository for DuckDbStore {
    fn save(&self, ctx: &Context, account: &Account) -> Result<()> {
        ctx.check()?;
        upsert_account(&*self.conn.lock()?, account)
    }

    fn find_by_id(&self, ctx: &Context, id: Uuid) -> Result<Option<Account>> {
        ctx.check()?;
        select_account(&*self.conn.lock()?, id)
    }

    fn count_by_user_id(&self, ctx: &Context, owner_id: Uuid) -> Result<u64> {
        ctx.check()?;
        count_owner_accounts(&*self.conn.lock()?, owner_id)
    }
}

impl TransactionRepository for DuckDbStore {
    fn save(&self, ctx: &Context, transaction: &Transaction) -> Result<()> {
        ctx.check()?;
        insert_transaction(&*self.conn.lock()?, transaction)
    }

    fn list_with_total(&self, ctx: &Context, query: &TransactionQuery) -> Result<TransactionPage> {
        ctx.check()?;
        select_transactions(&*self.conn.lock()?, query)
    }
}

impl UnitOfWork for DuckDbStore {
    fn begin(&self, ctx: &Context) -> Result<Box<dyn TxScope + '_>> {
        ctx.check()?;
        let conn = self.conn.lock()?.try_clone()?;
        Ok(Box::new(DuckDbScope {
            conn: Mutex::new(ScopeConnection { conn, open: false }),
            locks: Arc::clone(&self.locks),
            guards: Vec::new(),
            status: TxState::Pending,
        }))
    }
}

struct ScopeConnection {
    conn: Connection,
    /// Whether `BEGIN TRANSACTION` has been issued
    open: bool,
}

/// A unit of work on its own connection
///
/// The database transaction starts with the first statement, so its
/// snapshot is taken after any account locks acquired before that. A scope
/// that never touched the database has nothing to commit or roll back.
struct DuckDbScope {
    conn: Mutex<ScopeConnection>,
    locks: Arc<AccountLocks>,
    guards: Vec<AccountLockGuard>,
    status: TxState,
}

impl DuckDbScope {
    fn ensure_pending(&self) -> Result<()> {
        match self.status {
            TxState::Pending => Ok(()),
            other => Err(Error::TransactionClosed(other.as_str())),
        }
    }

    fn with_conn<T>(&self, ctx: &Context, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        ctx.check()?;
        self.ensure_pending()?;
        let mut scope = self.conn.lock()?;
        if !scope.open {
            scope.conn.execute_batch("BEGIN TRANSACTION")?;
            scope.open = true;
        }
        f(&scope.conn)
    }

    fn finish(&mut self, status: TxState) {
        self.status = status;
        self.guards.clear();
    }

    /// Issue `COMMIT` or `ROLLBACK` if a transaction is open
    fn end_transaction(&self, sql: &str) -> Result<()> {
        let mut scope = self.conn.lock()?;
        if !scope.open {
            return Ok(());
        }
        let result = scope.conn.execute_batch(sql);
        // A rejected COMMIT may leave the transaction open for a ROLLBACK
        scope.open = result.is_err() && sql == "COMMIT";
        Ok(result?)
    }
}

impl AccountRepository for DuckDbScope {
    fn save(&self, ctx: &Context, account: &Account) -> Result<()> {
        self.with_conn(ctx, |conn| upsert_account(conn, account))
    }

    fn find_by_id(&self, ctx: &Context, id: Uuid) -> Result<Option<Account>> {
        self.with_conn(ctx, |conn| select_account(conn, id))
    }

    fn count_by_user_id(&self, ctx: &Context, owner_id: Uuid) -> Result<u64> {
        self.with_conn(ctx, |conn| count_owner_accounts(conn, owner_id))
    }
}

impl TransactionRepository for DuckDbScope {
    fn save(&self, ctx: &Context, transaction: &Transaction) -> Result<()> {
        self.with_conn(ctx, |conn| insert_transaction(conn, transaction))
    }

    fn list_with_total(&self, ctx: &Context, query: &TransactionQuery) -> Result<TransactionPage> {
        self.with_conn(ctx, |conn| select_transactions(conn, query))
    }
}

impl TxScope for DuckDbScope {
    fn accounts(&self) -> &dyn AccountRepository {
        self
    }

    fn transactions(&self) -> &dyn TransactionRepository {
        self
    }

    fn lock_accounts(&mut self, ctx: &Context, ids: &[Uuid]) -> Result<()> {
        self.ensure_pending()?;
        let guard = self.locks.acquire(ctx, ids)?;
        self.guards.push(guard);
        Ok(())
    }

    fn state(&self) -> TxState {
        self.status
    }

    fn commit(&mut self, ctx: &Context) -> Result<()> {
        self.ensure_pending()?;
        if let Err(err) = ctx.check().and_then(|_| self.end_transaction("COMMIT")) {
            if let Err(rollback_err) = self.end_transaction("ROLLBACK") {
                tracing::warn!(error = %rollback_err, "rollback after failed commit");
            }
            self.finish(TxState::RolledBack);
            return Err(err);
        }
        self.finish(TxState::Committed);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.ensure_pending()?;
        let result = self.end_transaction("ROLLBACK");
        self.finish(TxState::RolledBack);
        result
    }
}

impl Drop for DuckDbScope {
    fn drop(&mut self) {
        if self.status == TxState::Pending {
            if let Err(e) = self.end_transaction("ROLLBACK") {
                tracing::warn!(error = %e, "rollback of abandoned scope failed");
            }
        }
    }
}

// === Row mapping ===

fn upsert_account(conn: &Connection, account: &Account) -> Result<()> {
    conn.execute(
        "INSERT INTO ledger_accounts (account_id, owner_id, name, credential_hash,
                                      balance, currency, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (account_id) DO UPDATE SET
            name = EXCLUDED.name,
            credential_hash = EXCLUDED.credential_hash,
            balance = EXCLUDED.balance,
            updated_at = EXCLUDED.updated_at",
        params![
            account.id().to_string(),
            account.owner_id().to_string(),
            account.name(),
            account.credential_hash(),
            account.balance().amount().to_string(),
            account.currency().code(),
            account.created_at().timestamp_micros(),
            account.updated_at().timestamp_micros(),
        ],
    )?;
    Ok(())
}

struct AccountRow {
    id: String,
    owner_id: String,
    name: String,
    credential_hash: String,
    balance: String,
    currency: String,
    created_at: i64,
    updated_at: i64,
}

impl AccountRow {
    fn into_account(self) -> Result<Account> {
        let currency = Currency::from_str(&self.currency)?;
        Ok(Account::restore(
            parse_uuid(&self.id)?,
            parse_uuid(&self.owner_id)?,
            self.name,
            self.credential_hash,
            Money::new(parse_decimal(&self.balance)?, currency)?,
            parse_micros(self.created_at)?,
            parse_micros(self.updated_at)?,
        ))
    }
}

fn select_account(conn: &Connection, id: Uuid) -> Result<Option<Account>> {
    let row = conn.query_row(
        "SELECT account_id, owner_id, name, credential_hash, balance, currency,
                created_at, updated_at
         FROM ledger_accounts WHERE account_id = ?",
        [id.to_string()],
        |row| {
            Ok(AccountRow {
                id: row.get(0)?,
                owner_id: row.get(1)?,
                name: row.get(2)?,
                credential_hash: row.get(3)?,
                balance: row.get(4)?,
                currency: row.get(5)?,
                created_at: row.get(6)?,
                updated_at: row.get(7)?,
            })
        },
    );

    match row {
        Ok(row) => row.into_account().map(Some),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn count_owner_accounts(conn: &Connection, owner_id: Uuid) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM ledger_accounts WHERE owner_id = ?",
        [owner_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

fn insert_transaction(conn: &Connection, tx: &Transaction) -> Result<()> {
    // seq comes from the column default and fixes insertion order
    conn.execute(
        "INSERT INTO ledger_transactions (transaction_id, account_id, counterparty_account_id,
                                          operation_kind, amount, currency, occurred_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            tx.id().to_string(),
            tx.account_id().to_string(),
            tx.counterparty_account_id().map(|id| id.to_string()),
            tx.kind().as_str(),
            tx.amount().amount().to_string(),
            tx.amount().currency().code(),
            tx.occurred_at().timestamp_micros(),
        ],
    )?;
    Ok(())
}

struct TransactionRow {
    id: String,
    account_id: String,
    counterparty_account_id: Option<String>,
    kind: String,
    amount: String,
    currency: String,
    occurred_at: i64,
}

impl TransactionRow {
    fn into_transaction(self) -> Result<Transaction> {
        let currency = Currency::from_str(&self.currency)?;
        Transaction::restore(
            parse_uuid(&self.id)?,
            parse_uuid(&self.account_id)?,
            self.counterparty_account_id
                .as_deref()
                .map(parse_uuid)
                .transpose()?,
            OperationKind::from_str(&self.kind)?,
            Money::new(parse_decimal(&self.amount)?, currency)?,
            parse_micros(self.occurred_at)?,
        )
    }
}

fn select_transactions(conn: &Connection, query: &TransactionQuery) -> Result<TransactionPage> {
    let account_id = query.account_id.to_string();
    let mut filter = String::from("(account_id = ? OR counterparty_account_id = ?)");
    let mut params: Vec<Box<dyn ToSql>> =
        vec![Box::new(account_id.clone()), Box::new(account_id)];

    if let Some(from) = query.from {
        filter.push_str(" AND occurred_at >= ?");
        params.push(Box::new(from.timestamp_micros()));
    }
    if let Some(to) = query.to {
        filter.push_str(" AND occurred_at <= ?");
        params.push(Box::new(to.timestamp_micros()));
    }
    if !query.kinds.is_empty() {
        let placeholders = vec!["?"; query.kinds.len()].join(", ");
        filter.push_str(&format!(" AND operation_kind IN ({})", placeholders));
        for kind in &query.kinds {
            params.push(Box::new(kind.as_str()));
        }
    }
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|b| b.as_ref()).collect();

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM ledger_transactions WHERE {}", filter),
        param_refs.as_slice(),
        |row| row.get(0),
    )?;

    let direction = query.sort.as_sql();
    let sql = format!(
        "SELECT transaction_id, account_id, counterparty_account_id, operation_kind,
                amount, currency, occurred_at
         FROM ledger_transactions
         WHERE {}
         ORDER BY occurred_at {dir}, seq {dir}
         LIMIT {} OFFSET {}",
        filter,
        query.limit,
        query.offset,
        dir = direction,
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            Ok(TransactionRow {
                id: row.get(0)?,
                account_id: row.get(1)?,
                counterparty_account_id: row.get(2)?,
                kind: row.get(3)?,
                amount: row.get(4)?,
                currency: row.get(5)?,
                occurred_at: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let items = rows
        .into_iter()
        .map(TransactionRow::into_transaction)
        .collect::<Result<Vec<_>>>()?;

    Ok(TransactionPage {
        items,
        total: total as u64,
    })
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::database(format!("corrupt id '{}': {}", s, e)))
}

fn parse_decimal(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).map_err(|e| Error::database(format!("corrupt amount '{}': {}", s, e)))
}

fn parse_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| Error::database(format!("corrupt timestamp {}", micros)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tempfile::tempdir;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::seconds(secs)
    }

    fn usd(s: &str) -> Money {
        Money::new(Decimal::from_str(s).unwrap(), Currency::Usd).unwrap()
    }

    fn account(owner: Uuid, balance: &str) -> Account {
        Account::new(owner, "Checking", "$argon2id$stub", usd(balance), t(0)).unwrap()
    }

    #[test]
    fn test_account_round_trips_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.duckdb");
        let ctx = Context::background();
        let acc = account(Uuid::new_v4(), "10.50");

        {
            let store = DuckDbStore::new(&path).unwrap();
            AccountRepository::save(&store, &ctx, &acc).unwrap();
        }

        let store = DuckDbStore::new(&path).unwrap();
        let loaded = store.find_by_id(&ctx, acc.id()).unwrap().unwrap();
        assert_eq!(loaded, acc);
        assert_eq!(loaded.balance().to_string(), "10.50 USD");
        assert_eq!(store.db_path(), Some(path.as_path()));
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let again = store.run_migrations().unwrap();
        assert!(again.applied.is_empty());
    }

    #[test]
    fn test_uncommitted_writes_are_invisible() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let ctx = Context::background();
        let acc = account(Uuid::new_v4(), "1.00");

        let mut scope = store.begin(&ctx).unwrap();
        scope.accounts().save(&ctx, &acc).unwrap();
        assert!(scope.accounts().find_by_id(&ctx, acc.id()).unwrap().is_some());
        assert!(store.find_by_id(&ctx, acc.id()).unwrap().is_none());

        scope.commit(&ctx).unwrap();
        assert!(store.find_by_id(&ctx, acc.id()).unwrap().is_some());
    }

    #[test]
    fn test_dropped_scope_rolls_back() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let ctx = Context::background();
        let acc = account(Uuid::new_v4(), "1.00");
        {
            let scope = store.begin(&ctx).unwrap();
            scope.accounts().save(&ctx, &acc).unwrap();
        }
        assert!(store.find_by_id(&ctx, acc.id()).unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_balance() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let ctx = Context::background();
        let mut acc = account(Uuid::new_v4(), "1.00");
        AccountRepository::save(&store, &ctx, &acc).unwrap();

        acc.deposit(Decimal::from_str("2.25").unwrap(), Currency::Usd, t(5))
            .unwrap();
        AccountRepository::save(&store, &ctx, &acc).unwrap();

        let loaded = store.find_by_id(&ctx, acc.id()).unwrap().unwrap();
        assert_eq!(loaded.balance(), usd("3.25"));
        assert_eq!(loaded.updated_at(), t(5));
    }

    #[test]
    fn test_listing_filters_sorts_and_counts() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let ctx = Context::background();
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();

        let a = Transaction::deposit(id, usd("1"), t(10)).unwrap();
        let b = Transaction::deposit(id, usd("2"), t(10)).unwrap();
        let c = Transaction::withdraw(id, usd("3"), t(20)).unwrap();
        let d = Transaction::transfer(other, id, usd("4"), t(30)).unwrap();
        for tx in [&a, &b, &c, &d] {
            TransactionRepository::save(&store, &ctx, tx).unwrap();
        }
        assert_eq!(store.transaction_count().unwrap(), 4);

        let mut query = TransactionQuery {
            account_id: id,
            from: None,
            to: None,
            kinds: vec![OperationKind::Deposit, OperationKind::Transfer],
            sort: crate::ports::SortOrder::Desc,
            limit: 10,
            offset: 0,
        };
        let page = store.list_with_total(&ctx, &query).unwrap();
        let ids: Vec<Uuid> = page.items.iter().map(|tx| tx.id()).collect();
        assert_eq!(page.total, 3);
        assert_eq!(ids, vec![d.id(), b.id(), a.id()]);

        query.kinds.clear();
        query.from = Some(t(10));
        query.to = Some(t(20));
        query.sort = crate::ports::SortOrder::Asc;
        query.limit = 2;
        query.offset = 1;
        let page = store.list_with_total(&ctx, &query).unwrap();
        let ids: Vec<Uuid> = page.items.iter().map(|tx| tx.id()).collect();
        assert_eq!(page.total, 3);
        assert_eq!(ids, vec![b.id(), c.id()]);
    }

    #[test]
    fn test_retryable_error_detection() {
        assert!(is_retryable_error("IO Error: Database is locked"));
        assert!(is_retryable_error(
            "The process cannot access the file because it is being used by another process"
        ));
        assert!(!is_retryable_error("Catalog Error: Table does not exist"));
    }
}
