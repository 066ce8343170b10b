//! Transaction domain model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::money::Money;
use super::result::{Error, Result};

/// Kind of balance movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Deposit,
    Withdraw,
    Transfer,
}

impl OperationKind {
    pub const ALL: [OperationKind; 3] = [
        OperationKind::Deposit,
        OperationKind::Withdraw,
        OperationKind::Transfer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Deposit => "deposit",
            OperationKind::Withdraw => "withdraw",
            OperationKind::Transfer => "transfer",
        }
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        OperationKind::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| Error::validation(format!("unknown operation kind: {}", s.trim())))
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one completed balance movement
///
/// `counterparty_account_id` is set for transfers only and names the
/// receiving account. `amount` is always the positive magnitude moved.
/// There are no setters; a recorded movement is never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    id: Uuid,
    account_id: Uuid,
    counterparty_account_id: Option<Uuid>,
    kind: OperationKind,
    amount: Money,
    occurred_at: DateTime<Utc>,
}

impl Transaction {
    /// Record a deposit into `account_id`
    pub fn deposit(account_id: Uuid, amount: Money, occurred_at: DateTime<Utc>) -> Result<Self> {
        Self::build(account_id, None, OperationKind::Deposit, amount, occurred_at)
    }

    /// Record a withdrawal from `account_id`
    pub fn withdraw(account_id: Uuid, amount: Money, occurred_at: DateTime<Utc>) -> Result<Self> {
        Self::build(account_id, None, OperationKind::Withdraw, amount, occurred_at)
    }

    /// Record a transfer from `sender_id` to `receiver_id`
    pub fn transfer(
        sender_id: Uuid,
        receiver_id: Uuid,
        amount: Money,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self> {
        Self::build(
            sender_id,
            Some(receiver_id),
            OperationKind::Transfer,
            amount,
            occurred_at,
        )
    }

    fn build(
        account_id: Uuid,
        counterparty_account_id: Option<Uuid>,
        kind: OperationKind,
        amount: Money,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self> {
        Self::restore(
            Uuid::new_v4(),
            account_id,
            counterparty_account_id,
            kind,
            amount,
            occurred_at,
        )
    }

    /// Rebuild a stored record, re-checking the shape invariants
    pub fn restore(
        id: Uuid,
        account_id: Uuid,
        counterparty_account_id: Option<Uuid>,
        kind: OperationKind,
        amount: Money,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self> {
        match (kind, counterparty_account_id) {
            (OperationKind::Transfer, None) => {
                return Err(Error::validation("transfer requires a counterparty account"));
            }
            (OperationKind::Transfer, Some(counterparty)) if counterparty == account_id => {
                return Err(Error::validation("cannot transfer to the same account"));
            }
            (OperationKind::Deposit | OperationKind::Withdraw, Some(_)) => {
                return Err(Error::validation(format!(
                    "{} cannot have a counterparty account",
                    kind
                )));
            }
            _ => {}
        }
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }

        Ok(Self {
            id,
            account_id,
            counterparty_account_id,
            kind,
            amount,
            occurred_at,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn account_id(&self) -> Uuid {
        self.account_id
    }

    pub fn counterparty_account_id(&self) -> Option<Uuid> {
        self.counterparty_account_id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// True when the movement touched `account_id` on either side
    pub fn involves(&self, account_id: Uuid) -> bool {
        self.account_id == account_id || self.counterparty_account_id == Some(account_id)
    }
}
