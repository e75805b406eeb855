use crate::{balance::Balance, error::StorageFundError};
use staking_primitives::SafeArith;

/// Funds collected for object storage.
///
/// `total_object_storage_rebates` backs the rebates owed for stored objects and is returned
/// when objects are deleted. `non_refundable_balance` only grows, from reinvested storage fund
/// rewards and leftover epoch rewards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageFund {
    total_object_storage_rebates: u64,
    non_refundable_balance: u64,
}

impl StorageFund {
    /// Creates a fund whose initial balance is non-refundable.
    pub fn new(initial_fund: Balance) -> Self {
        Self { total_object_storage_rebates: 0, non_refundable_balance: initial_fund.into_custody() }
    }

    pub const fn total_object_storage_rebates(&self) -> u64 {
        self.total_object_storage_rebates
    }

    pub const fn non_refundable_balance(&self) -> u64 {
        self.non_refundable_balance
    }

    /// Sum of both parts of the fund.
    pub fn total_balance(&self) -> Result<u64, StorageFundError> {
        Ok(self.total_object_storage_rebates.safe_add(self.non_refundable_balance)?)
    }

    /// Books one epoch of storage activity and returns the rebate to pay out.
    pub(crate) fn advance_epoch(
        &mut self,
        storage_charges: u64,
        storage_fund_reinvestment: u64,
        leftover_staking_rewards: u64,
        storage_rebate_amount: u64,
    ) -> Result<Balance, StorageFundError> {
        self.total_object_storage_rebates.safe_add_assign(storage_charges)?;
        self.non_refundable_balance
            .safe_add_assign(storage_fund_reinvestment.safe_add(leftover_staking_rewards)?)?;

        if storage_rebate_amount > self.total_object_storage_rebates {
            return Err(StorageFundError::InsufficientRebates {
                requested: storage_rebate_amount,
                available: self.total_object_storage_rebates,
            })
        }
        self.total_object_storage_rebates -= storage_rebate_amount;
        Ok(Balance::from_custody(storage_rebate_amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn books_charges_and_rebates() {
        let mut fund = StorageFund::new(Balance::from_custody(1_000));
        let rebate = fund.advance_epoch(300, 20, 5, 100).unwrap();
        assert_eq!(rebate.value(), 100);
        assert_eq!(fund.total_object_storage_rebates(), 200);
        assert_eq!(fund.non_refundable_balance(), 1_025);
        assert_eq!(fund.total_balance().unwrap(), 1_225);
    }

    #[test]
    fn rebate_cannot_exceed_collected_charges() {
        let mut fund = StorageFund::new(Balance::from_custody(1_000));
        assert_matches!(
            fund.advance_epoch(10, 0, 0, 11),
            Err(StorageFundError::InsufficientRebates { requested: 11, available: 10 })
        );
    }
}
