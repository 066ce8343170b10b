//! Transaction service - deposits, withdrawals, transfers and history
//!
//! Every mutation runs inside one unit of work: the touched accounts are
//! locked, loaded, mutated in memory, saved together with the new
//! transaction record, and committed. Any failure rolls the whole unit back.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::Context;
use crate::domain::{Account, Currency, Error, Money, OperationKind, Result, Transaction};
use crate::ports::{
    AccountRepository, Clock, CredentialHasher, SortOrder, TransactionPage, TransactionQuery,
    TransactionRepository, TxScope, UnitOfWork,
};
use crate::services::logging::{LogEvent, LoggingService};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositParams {
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawParams {
    pub account_id: Uuid,
    pub password: String,
    pub amount: Decimal,
    pub currency: String,
}

/// Move money from `from_account_id` to `to_account_id`
///
/// `password` authorizes the sending account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferParams {
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    pub password: String,
    pub amount: Decimal,
    pub currency: String,
}

/// History query as received from the presentation layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTransactionsParams {
    pub account_id: Uuid,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    /// Empty means every kind
    #[serde(default)]
    pub operation_kinds: Vec<OperationKind>,
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    /// 1-based
    #[serde(default)]
    pub page: Option<u32>,
}

/// Page size bounds applied to history queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_size: u32,
    pub max_size: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_size: 20,
            max_size: 100,
        }
    }
}

pub struct TransactionService {
    uow: Arc<dyn UnitOfWork>,
    accounts: Arc<dyn AccountRepository>,
    transactions: Arc<dyn TransactionRepository>,
    hasher: Arc<dyn CredentialHasher>,
    clock: Arc<dyn Clock>,
    limits: PageLimits,
    logger: Option<Arc<LoggingService>>,
}

impl TransactionService {
    pub fn new(
        uow: Arc<dyn UnitOfWork>,
        accounts: Arc<dyn AccountRepository>,
        transactions: Arc<dyn TransactionRepository>,
        hasher: Arc<dyn CredentialHasher>,
        clock: Arc<dyn Clock>,
        limits: PageLimits,
    ) -> Self {
        Self {
            uow,
            accounts,
            transactions,
            hasher,
            clock,
            limits,
            logger: None,
        }
    }

    /// Also record each operation's outcome in the event log
    pub fn with_logger(mut self, logger: Arc<LoggingService>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn deposit(&self, ctx: &Context, params: &DepositParams) -> Result<Transaction> {
        let result = parse_amount(params.amount, &params.currency).and_then(|amount| {
            self.uow.run_in_tx_with_result(ctx, |scope| {
                scope.lock_accounts(ctx, &[params.account_id])?;
                let mut account = load_account(scope, ctx, params.account_id)?;

                let now = self.clock.now();
                account.deposit(amount.amount(), amount.currency(), now)?;
                scope.accounts().save(ctx, &account)?;

                let tx = Transaction::deposit(account.id(), amount, now)?;
                scope.transactions().save(ctx, &tx)?;
                Ok(tx)
            })
        });
        self.record(OperationKind::Deposit, &result);
        result
    }

    pub fn withdraw(&self, ctx: &Context, params: &WithdrawParams) -> Result<Transaction> {
        let result = parse_amount(params.amount, &params.currency).and_then(|amount| {
            self.uow.run_in_tx_with_result(ctx, |scope| {
                scope.lock_accounts(ctx, &[params.account_id])?;
                let mut account = load_account(scope, ctx, params.account_id)?;
                account.compare_password(&*self.hasher, &params.password)?;

                let now = self.clock.now();
                account.withdraw(amount.amount(), amount.currency(), now)?;
                scope.accounts().save(ctx, &account)?;

                let tx = Transaction::withdraw(account.id(), amount, now)?;
                scope.transactions().save(ctx, &tx)?;
                Ok(tx)
            })
        });
        self.record(OperationKind::Withdraw, &result);
        result
    }

    /// Debit the sender and credit the receiver as one unit
    ///
    /// The sender side is computed first; if the receiver side fails (for
    /// example on a currency mismatch) nothing has been written yet and the
    /// unit is simply rolled back.
    pub fn transfer(&self, ctx: &Context, params: &TransferParams) -> Result<Transaction> {
        let result = self.transfer_inner(ctx, params);
        self.record(OperationKind::Transfer, &result);
        result
    }

    fn transfer_inner(&self, ctx: &Context, params: &TransferParams) -> Result<Transaction> {
        if params.from_account_id == params.to_account_id {
            return Err(Error::validation("cannot transfer to the same account"));
        }
        let amount = parse_amount(params.amount, &params.currency)?;

        self.uow.run_in_tx_with_result(ctx, |scope| {
            scope.lock_accounts(ctx, &[params.from_account_id, params.to_account_id])?;
            let mut sender = load_account(scope, ctx, params.from_account_id)?;
            let mut receiver = load_account(scope, ctx, params.to_account_id)?;
            sender.compare_password(&*self.hasher, &params.password)?;

            let now = self.clock.now();
            sender.withdraw(amount.amount(), amount.currency(), now)?;
            receiver.deposit(amount.amount(), amount.currency(), now)?;

            scope.accounts().save(ctx, &sender)?;
            scope.accounts().save(ctx, &receiver)?;

            let tx = Transaction::transfer(sender.id(), receiver.id(), amount, now)?;
            scope.transactions().save(ctx, &tx)?;
            Ok(tx)
        })
    }

    /// One page of an account's history, newest first unless asked otherwise
    ///
    /// Transfers received by the account are part of its history.
    pub fn list_transactions(
        &self,
        ctx: &Context,
        params: &ListTransactionsParams,
    ) -> Result<TransactionPage> {
        if self.accounts.find_by_id(ctx, params.account_id)?.is_none() {
            return Err(Error::not_found(format!("account {}", params.account_id)));
        }
        if let (Some(from), Some(to)) = (params.from, params.to) {
            if from > to {
                return Err(Error::validation("'from' must not be after 'to'"));
            }
        }

        let limit = params
            .limit
            .unwrap_or(self.limits.default_size)
            .clamp(1, self.limits.max_size.max(1));
        let page = params.page.filter(|p| *p > 0).unwrap_or(1);

        let query = TransactionQuery {
            account_id: params.account_id,
            from: params.from,
            to: params.to,
            kinds: params.operation_kinds.clone(),
            sort: SortOrder::parse(params.sort.as_deref()),
            limit,
            offset: u64::from(page - 1) * u64::from(limit),
        };
        self.transactions.list_with_total(ctx, &query)
    }

    fn record<T>(&self, kind: OperationKind, result: &Result<T>) {
        match result {
            Ok(_) => tracing::debug!(operation = %kind, "ledger operation committed"),
            Err(e) => tracing::warn!(operation = %kind, error_kind = e.kind().code(), "ledger operation failed"),
        }

        let Some(logger) = &self.logger else {
            return;
        };
        let event = match result {
            Ok(_) => LogEvent::new("ledger_operation").with_operation(kind),
            Err(e) => LogEvent::new("ledger_operation_failed")
                .with_operation(kind)
                .with_error(e),
        };
        if let Err(e) = logger.log(event) {
            tracing::warn!(error = %e, "failed to write event log");
        }
    }
}

/// Turn presentation input into a positive, validated amount
fn parse_amount(amount: Decimal, currency: &str) -> Result<Money> {
    let money = Money::new(amount, Currency::from_str(currency)?)?;
    if money.is_zero() {
        return Err(Error::ZeroAmount);
    }
    Ok(money)
}

fn load_account(scope: &dyn TxScope, ctx: &Context, id: Uuid) -> Result<Account> {
    scope
        .accounts()
        .find_by_id(ctx, id)?
        .ok_or_else(|| Error::not_found(format!("account {}", id)))
}
