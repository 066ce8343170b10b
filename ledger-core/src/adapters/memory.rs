//! In-memory store
//!
//! Reference implementation of the repository and unit-of-work ports.
//! Committed data lives behind one mutex. Each scope stages its writes
//! privately and applies them in a single critical section on commit, so
//! readers never observe half of a unit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use super::locks::{AccountLockGuard, AccountLocks};
use crate::context::Context;
use crate::domain::{Account, Error, Result, Transaction};
use crate::ports::{
    AccountRepository, SortOrder, TransactionPage, TransactionQuery, TransactionRepository,
    TxScope, TxState, UnitOfWork,
};

#[derive(Debug, Default)]
struct MemoryState {
    accounts: HashMap<Uuid, Account>,
    /// Append-only; the index is the insertion sequence
    transactions: Vec<Transaction>,
}

/// Thread-safe in-memory ledger store
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    locks: Arc<AccountLocks>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            locks: AccountLocks::new(),
        }
    }

    /// Number of committed transaction records
    pub fn transaction_count(&self) -> Result<usize> {
        Ok(self.state.lock()?.transactions.len())
    }
}

impl AccountRepository for MemoryStore {
    fn save(&self, ctx: &Context, account: &Account) -> Result<()> {
        ctx.check()?;
        let mut state = self.state.lock()?;
        state.accounts.insert(account.id(), account.clone());
        Ok(())
    }

    fn find_by_id(&self, ctx: &Context, id: Uuid) -> Result<Option<Account>> {
        ctx.check()?;
        let state = self.state.lock()?;
        Ok(state.accounts.get(&id).cloned())
    }

    fn count_by_user_id(&self, ctx: &Context, owner_id: Uuid) -> Result<u64> {
        ctx.check()?;
        let state = self.state.lock()?;
        Ok(state
            .accounts
            .values()
            .filter(|a| a.owner_id() == owner_id)
            .count() as u64)
    }
}

impl TransactionRepository for MemoryStore {
    fn save(&self, ctx: &Context, transaction: &Transaction) -> Result<()> {
        ctx.check()?;
        let mut state = self.state.lock()?;
        state.transactions.push(transaction.clone());
        Ok(())
    }

    fn list_with_total(&self, ctx: &Context, query: &TransactionQuery) -> Result<TransactionPage> {
        ctx.check()?;
        let state = self.state.lock()?;
        Ok(paginate(state.transactions.iter(), query))
    }
}

impl UnitOfWork for MemoryStore {
    fn begin(&self, ctx: &Context) -> Result<Box<dyn TxScope + '_>> {
        ctx.check()?;
        Ok(Box::new(MemoryScope {
            state: Arc::clone(&self.state),
            locks: Arc::clone(&self.locks),
            staged: Mutex::new(Staged::default()),
            guards: Vec::new(),
            status: TxState::Pending,
        }))
    }
}

#[derive(Debug, Default)]
struct Staged {
    accounts: HashMap<Uuid, Account>,
    transactions: Vec<Transaction>,
}

struct MemoryScope {
    state: Arc<Mutex<MemoryState>>,
    locks: Arc<AccountLocks>,
    staged: Mutex<Staged>,
    guards: Vec<AccountLockGuard>,
    status: TxState,
}

impl MemoryScope {
    fn ensure_pending(&self) -> Result<()> {
        match self.status {
            TxState::Pending => Ok(()),
            other => Err(Error::TransactionClosed(other.as_str())),
        }
    }

    fn finish(&mut self, status: TxState) {
        self.status = status;
        // Releasing the guards hands the accounts to the next waiter.
        self.guards.clear();
    }

    fn apply(&self) -> Result<()> {
        let staged = std::mem::take(&mut *self.staged.lock()?);
        let mut state = self.state.lock()?;
        state.accounts.extend(staged.accounts);
        state.transactions.extend(staged.transactions);
        Ok(())
    }
}

impl AccountRepository for MemoryScope {
    fn save(&self, ctx: &Context, account: &Account) -> Result<()> {
        ctx.check()?;
        self.ensure_pending()?;
        self.staged
            .lock()?
            .accounts
            .insert(account.id(), account.clone());
        Ok(())
    }

    fn find_by_id(&self, ctx: &Context, id: Uuid) -> Result<Option<Account>> {
        ctx.check()?;
        self.ensure_pending()?;
        if let Some(account) = self.staged.lock()?.accounts.get(&id) {
            return Ok(Some(account.clone()));
        }
        Ok(self.state.lock()?.accounts.get(&id).cloned())
    }

    fn count_by_user_id(&self, ctx: &Context, owner_id: Uuid) -> Result<u64> {
        ctx.check()?;
        self.ensure_pending()?;
        let staged = self.staged.lock()?;
        let state = self.state.lock()?;
        let committed = state
            .accounts
            .values()
            .filter(|a| a.owner_id() == owner_id && !staged.accounts.contains_key(&a.id()))
            .count();
        let pending = staged
            .accounts
            .values()
            .filter(|a| a.owner_id() == owner_id)
            .count();
        Ok((committed + pending) as u64)
    }
}

impl TransactionRepository for MemoryScope {
    fn save(&self, ctx: &Context, transaction: &Transaction) -> Result<()> {
        ctx.check()?;
        self.ensure_pending()?;
        self.staged.lock()?.transactions.push(transaction.clone());
        Ok(())
    }

    fn list_with_total(&self, ctx: &Context, query: &TransactionQuery) -> Result<TransactionPage> {
        ctx.check()?;
        self.ensure_pending()?;
        let staged = self.staged.lock()?;
        let state = self.state.lock()?;
        Ok(paginate(
            state.transactions.iter().chain(staged.transactions.iter()),
            query,
        ))
    }
}

impl TxScope for MemoryScope {
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
        if let Err(err) = ctx.check().and_then(|_| self.apply()) {
            self.finish(TxState::RolledBack);
            return Err(err);
        }
        self.finish(TxState::Committed);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.ensure_pending()?;
        if let Ok(mut staged) = self.staged.lock() {
            *staged = Staged::default();
        }
        self.finish(TxState::RolledBack);
        Ok(())
    }
}

/// Filter, order and slice a history in insertion order
fn paginate<'a>(
    history: impl Iterator<Item = &'a Transaction>,
    query: &TransactionQuery,
) -> TransactionPage {
    let mut matching: Vec<(usize, &Transaction)> = history
        .enumerate()
        .filter(|(_, tx)| query.matches(tx))
        .collect();

    matching.sort_by_key(|(seq, tx)| (tx.occurred_at(), *seq));
    if query.sort == SortOrder::Desc {
        matching.reverse();
    }

    let total = matching.len() as u64;
    let items = matching
        .into_iter()
        .skip(usize::try_from(query.offset).unwrap_or(usize::MAX))
        .take(query.limit as usize)
        .map(|(_, tx)| tx.clone())
        .collect();

    TransactionPage { items, total }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Currency, Money, OperationKind};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn jpy(n: i64) -> Money {
        Money::new(Decimal::new(n, 0), Currency::Jpy).unwrap()
    }

    fn account(owner: Uuid, balance: i64) -> Account {
        Account::new(owner, "Main", "hash", jpy(balance), t(0)).unwrap()
    }

    fn query(account_id: Uuid) -> TransactionQuery {
        TransactionQuery {
            account_id,
            from: None,
            to: None,
            kinds: Vec::new(),
            sort: SortOrder::Desc,
            limit: 50,
            offset: 0,
        }
    }

    #[test]
    fn test_scope_writes_hidden_until_commit() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let acc = account(Uuid::new_v4(), 100);

        let mut scope = store.begin(&ctx).unwrap();
        scope.accounts().save(&ctx, &acc).unwrap();
        assert!(scope.accounts().find_by_id(&ctx, acc.id()).unwrap().is_some());
        assert!(store.find_by_id(&ctx, acc.id()).unwrap().is_none());

        scope.commit(&ctx).unwrap();
        assert_eq!(scope.state(), TxState::Committed);
        assert!(store.find_by_id(&ctx, acc.id()).unwrap().is_some());
    }

    #[test]
    fn test_rollback_discards_writes() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let acc = account(Uuid::new_v4(), 100);

        let mut scope = store.begin(&ctx).unwrap();
        scope.accounts().save(&ctx, &acc).unwrap();
        let tx = Transaction::deposit(acc.id(), jpy(5), t(1)).unwrap();
        TransactionRepository::save(scope.transactions(), &ctx, &tx).unwrap();
        scope.rollback().unwrap();

        assert_eq!(scope.state(), TxState::RolledBack);
        assert!(store.find_by_id(&ctx, acc.id()).unwrap().is_none());
        assert_eq!(store.transaction_count().unwrap(), 0);
    }

    #[test]
    fn test_closed_scope_rejects_writes() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let mut scope = store.begin(&ctx).unwrap();
        scope.commit(&ctx).unwrap();

        let result = scope.accounts().save(&ctx, &account(Uuid::new_v4(), 1));
        assert!(matches!(result, Err(Error::TransactionClosed("committed"))));
        assert!(scope.rollback().is_err());
    }

    #[test]
    fn test_dropping_scope_releases_locks() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let id = Uuid::new_v4();
        {
            let mut scope = store.begin(&ctx).unwrap();
            scope.lock_accounts(&ctx, &[id]).unwrap();
            assert!(store.locks.is_locked(id));
        }
        assert!(!store.locks.is_locked(id));
    }

    #[test]
    fn test_cancelled_commit_rolls_back() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let acc = account(Uuid::new_v4(), 1);

        let mut scope = store.begin(&ctx).unwrap();
        scope.accounts().save(&ctx, &acc).unwrap();
        ctx.cancel();
        assert!(matches!(scope.commit(&ctx), Err(Error::Cancelled)));
        assert_eq!(scope.state(), TxState::RolledBack);
        assert!(store
            .find_by_id(&Context::background(), acc.id())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_count_by_user_includes_staged() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let owner = Uuid::new_v4();
        AccountRepository::save(&store, &ctx, &account(owner, 1)).unwrap();
        AccountRepository::save(&store, &ctx, &account(Uuid::new_v4(), 1)).unwrap();

        let scope = store.begin(&ctx).unwrap();
        scope.accounts().save(&ctx, &account(owner, 2)).unwrap();
        assert_eq!(scope.accounts().count_by_user_id(&ctx, owner).unwrap(), 2);
        assert_eq!(store.count_by_user_id(&ctx, owner).unwrap(), 1);
    }

    #[test]
    fn test_listing_orders_ties_by_insertion() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let id = Uuid::new_v4();

        let first = Transaction::deposit(id, jpy(1), t(5)).unwrap();
        let second = Transaction::deposit(id, jpy(2), t(5)).unwrap();
        let earlier = Transaction::withdraw(id, jpy(3), t(1)).unwrap();
        for tx in [&first, &second, &earlier] {
            TransactionRepository::save(&store, &ctx, tx).unwrap();
        }

        let mut q = query(id);
        let desc = store.list_with_total(&ctx, &q).unwrap();
        let ids: Vec<Uuid> = desc.items.iter().map(|tx| tx.id()).collect();
        assert_eq!(ids, vec![second.id(), first.id(), earlier.id()]);

        q.sort = SortOrder::Asc;
        let asc = store.list_with_total(&ctx, &q).unwrap();
        let ids: Vec<Uuid> = asc.items.iter().map(|tx| tx.id()).collect();
        assert_eq!(ids, vec![earlier.id(), first.id(), second.id()]);
    }

    #[test]
    fn test_listing_filters_and_pages() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();

        for i in 0..5 {
            let tx = Transaction::deposit(id, jpy(10 + i), t(i)).unwrap();
            TransactionRepository::save(&store, &ctx, &tx).unwrap();
        }
        let incoming = Transaction::transfer(other, id, jpy(7), t(10)).unwrap();
        TransactionRepository::save(&store, &ctx, &incoming).unwrap();
        let unrelated = Transaction::deposit(other, jpy(1), t(11)).unwrap();
        TransactionRepository::save(&store, &ctx, &unrelated).unwrap();

        let mut q = query(id);
        q.kinds = vec![OperationKind::Deposit];
        q.limit = 2;
        q.offset = 2;
        let page = store.list_with_total(&ctx, &q).unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].amount(), jpy(12));

        let mut q = query(id);
        q.from = Some(t(3));
        q.to = Some(t(10));
        let page = store.list_with_total(&ctx, &q).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items[0].kind(), OperationKind::Transfer);
    }
}
