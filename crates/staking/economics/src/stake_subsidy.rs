use crate::{balance::Balance, error::StakeSubsidyError};
use serde::{Deserialize, Serialize};
use staking_primitives::{mul_div, SafeArith, BASIS_POINT_DENOMINATOR};
use tracing::debug;

/// Number of distributions between two decreases of the subsidy.
pub const STAKE_SUBSIDY_PERIOD_LENGTH: u64 = 30;

/// Initial schedule of a [`StakeSubsidy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StakeSubsidySchedule {
    /// Amount paid per epoch before the first decrease.
    pub initial_distribution_amount: u64,
    /// Distributions per period.
    #[serde(default = "default_period_length")]
    pub period_length: u64,
    /// Decrease applied at the end of every period, in basis points.
    #[serde(default = "default_decrease_rate")]
    pub decrease_rate: u16,
}

const fn default_period_length() -> u64 {
    STAKE_SUBSIDY_PERIOD_LENGTH
}

const fn default_decrease_rate() -> u16 {
    1_000
}

/// Reserve-funded per-epoch emission with a step-wise geometric decay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeSubsidy {
    balance: u64,
    distribution_counter: u64,
    current_distribution_amount: u64,
    period_length: u64,
    decrease_rate: u16,
}

impl StakeSubsidy {
    /// Creates a subsidy drawing from `fund`.
    pub fn new(fund: Balance, schedule: StakeSubsidySchedule) -> Result<Self, StakeSubsidyError> {
        if u64::from(schedule.decrease_rate) > BASIS_POINT_DENOMINATOR {
            return Err(StakeSubsidyError::InvalidDecreaseRate(schedule.decrease_rate.into()))
        }
        if schedule.period_length == 0 {
            return Err(StakeSubsidyError::ZeroPeriodLength)
        }
        Ok(Self {
            balance: fund.into_custody(),
            distribution_counter: 0,
            current_distribution_amount: schedule.initial_distribution_amount,
            period_length: schedule.period_length,
            decrease_rate: schedule.decrease_rate,
        })
    }

    /// Remaining reserve.
    pub const fn balance(&self) -> u64 {
        self.balance
    }

    /// Distributions made so far.
    pub const fn distribution_counter(&self) -> u64 {
        self.distribution_counter
    }

    /// Amount the next distribution pays, before capping by the reserve.
    pub const fn current_distribution_amount(&self) -> u64 {
        self.current_distribution_amount
    }

    /// Pays this epoch's subsidy, never more than the reserve holds.
    pub fn advance(&mut self) -> Result<Balance, StakeSubsidyError> {
        let amount = self.current_distribution_amount.min(self.balance);
        self.balance.safe_sub_assign(amount)?;
        self.distribution_counter.safe_add_assign(1)?;

        if self.distribution_counter % self.period_length == 0 {
            let decreased = mul_div(
                self.current_distribution_amount,
                BASIS_POINT_DENOMINATOR - u64::from(self.decrease_rate),
                BASIS_POINT_DENOMINATOR,
            )?;
            debug!(
                target: "staking::subsidy",
                counter = self.distribution_counter,
                from = self.current_distribution_amount,
                to = decreased,
                "subsidy decreased"
            );
            self.current_distribution_amount = decreased;
        }
        Ok(Balance::from_custody(amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn subsidy(fund: u64, initial: u64) -> StakeSubsidy {
        let schedule = StakeSubsidySchedule {
            initial_distribution_amount: initial,
            period_length: STAKE_SUBSIDY_PERIOD_LENGTH,
            decrease_rate: 1_000,
        };
        StakeSubsidy::new(Balance::from_custody(fund), schedule).unwrap()
    }

    #[test]
    fn decays_once_per_period() {
        let initial = 1_000_000_007;
        let mut subsidy = subsidy(u64::MAX, initial);
        for _ in 0..29 {
            assert_eq!(subsidy.advance().unwrap().value(), initial);
        }
        assert_eq!(subsidy.current_distribution_amount(), initial);
        subsidy.advance().unwrap().into_custody();
        assert_eq!(subsidy.current_distribution_amount(), initial * 9 / 10);
        assert_eq!(subsidy.distribution_counter(), 30);

        for _ in 0..30 {
            subsidy.advance().unwrap().into_custody();
        }
        assert_eq!(subsidy.current_distribution_amount(), initial * 9 / 10 * 9 / 10);
    }

    #[test]
    fn never_pays_beyond_reserve() {
        let mut subsidy = subsidy(250, 100);
        let paid: Vec<u64> = (0..4).map(|_| subsidy.advance().unwrap().value()).collect();
        assert_eq!(paid, vec![100, 100, 50, 0]);
        assert_eq!(subsidy.balance(), 0);
    }

    #[test]
    fn rejects_invalid_schedule() {
        let schedule =
            StakeSubsidySchedule { initial_distribution_amount: 1, period_length: 0, decrease_rate: 0 };
        assert_matches!(
            StakeSubsidy::new(Balance::zero(), schedule),
            Err(StakeSubsidyError::ZeroPeriodLength)
        );
        let schedule = StakeSubsidySchedule { period_length: 1, decrease_rate: 10_001, ..schedule };
        assert_matches!(
            StakeSubsidy::new(Balance::zero(), schedule),
            Err(StakeSubsidyError::InvalidDecreaseRate(10_001))
        );
    }
}
