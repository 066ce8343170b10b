//! Money value type and currency precision rules

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::result::{Error, Result};

/// Supported currencies
///
/// Adding a currency means adding a variant plus its row in
/// [`Currency::fraction_digits`] and [`Currency::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Jpy,
    Usd,
}

impl Currency {
    pub const ALL: [Currency; 2] = [Currency::Jpy, Currency::Usd];

    /// Maximum number of fractional digits an amount may carry
    pub const fn fraction_digits(self) -> u32 {
        match self {
            Currency::Jpy => 0,
            Currency::Usd => 2,
        }
    }

    /// ISO 4217 code
    pub const fn code(self) -> &'static str {
        match self {
            Currency::Jpy => "JPY",
            Currency::Usd => "USD",
        }
    }
}

impl FromStr for Currency {
    type Err = Error;

    /// Parses an ISO code, ignoring surrounding whitespace and case
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_uppercase();
        Currency::ALL
            .into_iter()
            .find(|c| c.code() == normalized)
            .ok_or_else(|| Error::UnsupportedCurrency(s.trim().to_string()))
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A non-negative amount tagged with its currency.
///
/// Values are immutable; arithmetic always returns a fresh `Money`.
/// The stored amount is rescaled to the currency's fraction digits,
/// so `10.5 USD` and `10.50 USD` compare equal and print the same.
///
/// # Examples
///
/// ```
/// use ledger_core::domain::{Currency, Money};
/// use rust_decimal::Decimal;
///
/// let a = Money::new(Decimal::new(1050, 2), Currency::Usd).unwrap();
/// let b = Money::new(Decimal::new(5, 0), Currency::Usd).unwrap();
/// assert_eq!(a.add(&b).unwrap().to_string(), "15.50 USD");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawMoney", into = "RawMoney")]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

impl Money {
    /// Create a validated amount
    ///
    /// Fails with `NegativeAmount` below zero and `InvalidPrecision` when
    /// the amount has more fractional digits than the currency allows.
    /// Trailing zeros do not count (`5.00 JPY` is valid).
    pub fn new(amount: Decimal, currency: Currency) -> Result<Self> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(Error::NegativeAmount(amount));
        }

        let allowed = currency.fraction_digits();
        if amount.normalize().scale() > allowed {
            return Err(Error::InvalidPrecision {
                amount,
                currency,
                allowed,
            });
        }

        let mut amount = amount.abs();
        amount.rescale(allowed);
        Ok(Self { amount, currency })
    }

    /// Create from a raw currency code, failing `UnsupportedCurrency` on
    /// unknown codes
    pub fn from_code(amount: Decimal, currency: &str) -> Result<Self> {
        Self::new(amount, currency.parse()?)
    }

    /// Zero in the given currency
    pub fn zero(currency: Currency) -> Self {
        let mut amount = Decimal::ZERO;
        amount.rescale(currency.fraction_digits());
        Self { amount, currency }
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Sum of two amounts in the same currency
    pub fn add(&self, other: &Money) -> Result<Money> {
        self.ensure_same_currency(other)?;
        let sum = self
            .amount
            .checked_add(other.amount)
            .ok_or_else(|| Error::validation("amount overflow"))?;
        Money::new(sum, self.currency)
    }

    /// Difference of two amounts in the same currency
    ///
    /// Fails with `InsufficientFunds` when `other` is larger than `self`.
    pub fn subtract(&self, other: &Money) -> Result<Money> {
        self.ensure_same_currency(other)?;
        if other.amount > self.amount {
            return Err(Error::InsufficientFunds {
                available: *self,
                requested: *other,
            });
        }
        Money::new(self.amount - other.amount, self.currency)
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<()> {
        if self.currency != other.currency {
            return Err(Error::CurrencyMismatch {
                expected: self.currency,
                actual: other.currency,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.*} {}",
            self.currency.fraction_digits() as usize,
            self.amount,
            self.currency
        )
    }
}

/// Wire form: amount as a decimal string plus currency code
#[derive(Serialize, Deserialize)]
struct RawMoney {
    amount: Decimal,
    currency: Currency,
}

impl TryFrom<RawMoney> for Money {
    type Error = Error;

    fn try_from(raw: RawMoney) -> Result<Self> {
        Money::new(raw.amount, raw.currency)
    }
}

impl From<Money> for RawMoney {
    fn from(money: Money) -> Self {
        RawMoney {
            amount: money.amount,
            currency: money.currency,
        }
    }
}
