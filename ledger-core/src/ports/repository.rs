//! Repository ports - persistence abstraction

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::context::Context;
use crate::domain::{Account, OperationKind, Result, Transaction};

/// Account persistence
///
/// `save` inserts or replaces the whole account record.
pub trait AccountRepository: Send + Sync {
    fn save(&self, ctx: &Context, account: &Account) -> Result<()>;

    fn find_by_id(&self, ctx: &Context, id: Uuid) -> Result<Option<Account>>;

    /// Number of accounts held by an owner
    fn count_by_user_id(&self, ctx: &Context, owner_id: Uuid) -> Result<u64>;
}

/// Transaction record persistence
///
/// Records are append-only. Implementations assign each saved record a
/// stable insertion sequence used to break ties on `occurred_at`.
pub trait TransactionRepository: Send + Sync {
    fn save(&self, ctx: &Context, transaction: &Transaction) -> Result<()>;

    fn list_with_total(&self, ctx: &Context, query: &TransactionQuery) -> Result<TransactionPage>;
}

/// Direction of the history listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// `ASC` in any case selects ascending order; anything else, including
    /// no value, means descending
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("asc") => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Fully resolved history query as handed to a repository
#[derive(Debug, Clone)]
pub struct TransactionQuery {
    pub account_id: Uuid,
    /// Inclusive lower bound on `occurred_at`
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `occurred_at`
    pub to: Option<DateTime<Utc>>,
    /// Allowed kinds; empty means all
    pub kinds: Vec<OperationKind>,
    pub sort: SortOrder,
    pub limit: u32,
    pub offset: u64,
}

impl TransactionQuery {
    /// Filter predicate shared by in-process implementations
    pub fn matches(&self, tx: &Transaction) -> bool {
        tx.involves(self.account_id)
            && self.from.map_or(true, |from| tx.occurred_at() >= from)
            && self.to.map_or(true, |to| tx.occurred_at() <= to)
            && (self.kinds.is_empty() || self.kinds.contains(&tx.kind()))
    }
}

/// One page of history plus the number of records matching the filters
#[derive(Debug, Clone, Serialize)]
pub struct TransactionPage {
    pub items: Vec<Transaction>,
    pub total: u64,
}
