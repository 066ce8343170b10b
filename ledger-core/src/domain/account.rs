//! Account domain model

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::money::{Currency, Money};
use super::result::{Error, Result};
use crate::ports::CredentialHasher;

/// A balance-holding account owned by a user
///
/// # Invariants
///
/// - The balance currency is fixed at creation
/// - The balance is never negative (guaranteed by [`Money`])
/// - `updated_at` strictly increases on every balance or credential change
///
/// Mutators only change the in-memory value. Persisting it is the caller's
/// job, so a failed later step can be discarded without touching storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    id: Uuid,
    owner_id: Uuid,
    name: String,
    #[serde(skip_serializing)]
    credential_hash: String,
    balance: Money,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with a fresh id
    pub fn new(
        owner_id: Uuid,
        name: impl Into<String>,
        credential_hash: impl Into<String>,
        initial_balance: Money,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(Error::validation("account name cannot be empty"));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            owner_id,
            name,
            credential_hash: credential_hash.into(),
            balance: initial_balance,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuild an account from stored fields
    pub fn restore(
        id: Uuid,
        owner_id: Uuid,
        name: String,
        credential_hash: String,
        balance: Money,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner_id,
            name,
            credential_hash,
            balance,
            created_at,
            updated_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn credential_hash(&self) -> &str {
        &self.credential_hash
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    pub fn currency(&self) -> Currency {
        self.balance.currency()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Credit the account
    ///
    /// Returns the validated amount that was added.
    pub fn deposit(
        &mut self,
        amount: Decimal,
        currency: Currency,
        now: DateTime<Utc>,
    ) -> Result<Money> {
        let money = Money::new(amount, currency)?;
        self.balance = self.balance.add(&money)?;
        self.touch(now);
        Ok(money)
    }

    /// Debit the account
    ///
    /// The balance is left untouched when funds are insufficient.
    pub fn withdraw(
        &mut self,
        amount: Decimal,
        currency: Currency,
        now: DateTime<Utc>,
    ) -> Result<Money> {
        let money = Money::new(amount, currency)?;
        self.balance = self.balance.subtract(&money)?;
        self.touch(now);
        Ok(money)
    }

    /// Check a candidate password against the stored hash
    pub fn compare_password(&self, hasher: &dyn CredentialHasher, candidate: &str) -> Result<()> {
        hasher.compare(&self.credential_hash, candidate)
    }

    /// Replace the credential hash
    pub fn set_credential_hash(&mut self, hash: impl Into<String>, now: DateTime<Utc>) {
        self.credential_hash = hash.into();
        self.touch(now);
    }

    /// Refresh the mutation timestamp, never moving it backwards or
    /// leaving it unchanged
    fn touch(&mut self, now: DateTime<Utc>) {
        let floor = self.updated_at + Duration::microseconds(1);
        self.updated_at = if now > self.updated_at { now } else { floor };
    }
}
