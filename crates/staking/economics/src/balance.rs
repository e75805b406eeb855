//! Move-only token balances.
//!
//! A [`Balance`] cannot be cloned or defaulted. Value only changes hands through
//! [`Balance::split`], [`Balance::join`] and the crate-internal custody conversions, so tokens
//! are never duplicated.

use crate::error::BalanceError;
use staking_primitives::SafeArith;

/// An amount of the native token held by its owner.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "dropping a balance destroys the tokens it holds"]
pub struct Balance {
    value: u64,
}

impl Balance {
    /// Creates an empty balance.
    pub const fn zero() -> Self {
        Self { value: 0 }
    }

    /// Returns the amount held.
    pub const fn value(&self) -> u64 {
        self.value
    }

    /// Splits `amount` off into a new balance.
    pub fn split(&mut self, amount: u64) -> Result<Self, BalanceError> {
        if amount > self.value {
            return Err(BalanceError::Insufficient { requested: amount, available: self.value })
        }
        self.value -= amount;
        Ok(Self { value: amount })
    }

    /// Merges `other` into this balance and returns the new value.
    pub fn join(&mut self, other: Self) -> Result<u64, BalanceError> {
        self.value.safe_add_assign(other.value)?;
        Ok(self.value)
    }

    /// Moves the whole amount into a new balance, leaving this one empty.
    pub fn withdraw_all(&mut self) -> Self {
        Self { value: core::mem::take(&mut self.value) }
    }

    /// Consumes an empty balance.
    pub fn destroy_zero(self) -> Result<(), BalanceError> {
        if self.value != 0 {
            return Err(BalanceError::NonZero(self.value))
        }
        Ok(())
    }

    /// Releases `value` tokens out of engine custody.
    pub(crate) const fn from_custody(value: u64) -> Self {
        Self { value }
    }

    /// Takes the tokens into engine custody.
    pub(crate) const fn into_custody(self) -> u64 {
        self.value
    }
}

/// Issuer of the native token.
///
/// Only the holder of the supply can create new balances; the host owns it and lends it to
/// the epoch transition to materialize the gas charges collected during the epoch.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Supply {
    total: u64,
}

impl Supply {
    /// Creates a supply with nothing issued.
    pub const fn new() -> Self {
        Self { total: 0 }
    }

    /// Returns the total amount in circulation.
    pub const fn total(&self) -> u64 {
        self.total
    }

    /// Issues `amount` new tokens.
    pub fn increase_supply(&mut self, amount: u64) -> Result<Balance, BalanceError> {
        self.total.safe_add_assign(amount)?;
        Ok(Balance { value: amount })
    }

    /// Burns `balance` and returns the amount removed from circulation.
    pub fn decrease_supply(&mut self, balance: Balance) -> Result<u64, BalanceError> {
        let amount = balance.value;
        self.total.safe_sub_assign(amount)?;
        Ok(amount)
    }
}
