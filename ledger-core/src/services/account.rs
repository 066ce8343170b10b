//! Account service - opening accounts and managing their credentials

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::Context;
use crate::domain::{Account, Error, Money, Result};
use crate::ports::{AccountRepository, Clock, CredentialHasher, UnitOfWork};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAccountParams {
    pub owner_id: Uuid,
    pub name: String,
    pub password: String,
    pub currency: String,
    #[serde(default)]
    pub initial_balance: Decimal,
}

pub struct AccountService {
    uow: Arc<dyn UnitOfWork>,
    accounts: Arc<dyn AccountRepository>,
    hasher: Arc<dyn CredentialHasher>,
    clock: Arc<dyn Clock>,
    max_accounts_per_owner: u32,
}

impl AccountService {
    pub fn new(
        uow: Arc<dyn UnitOfWork>,
        accounts: Arc<dyn AccountRepository>,
        hasher: Arc<dyn CredentialHasher>,
        clock: Arc<dyn Clock>,
        max_accounts_per_owner: u32,
    ) -> Self {
        Self {
            uow,
            accounts,
            hasher,
            clock,
            max_accounts_per_owner,
        }
    }

    /// Open a new account for an owner
    ///
    /// The owner's id is locked for the duration of the unit so that two
    /// concurrent openings cannot both pass the limit check.
    pub fn open_account(&self, ctx: &Context, params: &OpenAccountParams) -> Result<Account> {
        if params.name.trim().is_empty() {
            return Err(Error::validation("account name cannot be empty"));
        }
        if params.password.is_empty() {
            return Err(Error::validation("password cannot be empty"));
        }
        let initial_balance = Money::from_code(params.initial_balance, &params.currency)?;
        let credential_hash = self.hasher.hash(&params.password)?;

        let account = self.uow.run_in_tx_with_result(ctx, |scope| {
            scope.lock_accounts(ctx, &[params.owner_id])?;
            let held = scope.accounts().count_by_user_id(ctx, params.owner_id)?;
            if held >= u64::from(self.max_accounts_per_owner) {
                return Err(Error::AccountLimitReached {
                    owner_id: params.owner_id,
                    limit: self.max_accounts_per_owner,
                });
            }

            let account = Account::new(
                params.owner_id,
                params.name.as_str(),
                credential_hash,
                initial_balance,
                self.clock.now(),
            )?;
            scope.accounts().save(ctx, &account)?;
            Ok(account)
        })?;

        tracing::debug!(currency = %account.currency(), "account opened");
        Ok(account)
    }

    pub fn get_account(&self, ctx: &Context, id: Uuid) -> Result<Account> {
        self.accounts
            .find_by_id(ctx, id)?
            .ok_or_else(|| Error::not_found(format!("account {}", id)))
    }

    pub fn verify_password(&self, ctx: &Context, id: Uuid, candidate: &str) -> Result<()> {
        self.get_account(ctx, id)?
            .compare_password(&*self.hasher, candidate)
    }

    /// Replace the account password after checking the current one
    pub fn change_password(
        &self,
        ctx: &Context,
        id: Uuid,
        current: &str,
        new_password: &str,
    ) -> Result<Account> {
        if new_password.is_empty() {
            return Err(Error::validation("password cannot be empty"));
        }

        self.uow.run_in_tx_with_result(ctx, |scope| {
            scope.lock_accounts(ctx, &[id])?;
            let mut account = scope
                .accounts()
                .find_by_id(ctx, id)?
                .ok_or_else(|| Error::not_found(format!("account {}", id)))?;
            account.compare_password(&*self.hasher, current)?;

            let hash = self.hasher.hash(new_password)?;
            account.set_credential_hash(hash, self.clock.now());
            scope.accounts().save(ctx, &account)?;
            Ok(account)
        })
    }
}
