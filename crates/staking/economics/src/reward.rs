//! Reward distribution and the tallying rule.
//!
//! All functions here are pure over slices indexed like the active validator list, so the
//! validator set can compute the whole distribution before touching any validator.

use crate::voting_power::QUORUM_THRESHOLD;
use itertools::izip;
use staking_primitives::{
    apply_bps, mul_div_or_zero, Address, ArithError, SafeArith, SafeArithIter,
};
use std::collections::{BTreeMap, BTreeSet};

/// Per-validator amounts of the two reward types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardAmounts {
    /// Share of the staking reward.
    pub staking: Vec<u64>,
    /// Share of the storage fund reward.
    pub storage_fund: Vec<u64>,
}

impl RewardAmounts {
    /// Sum over both reward types.
    pub fn total(&self) -> Result<u64, ArithError> {
        self.staking.iter().chain(&self.storage_fund).copied().safe_sum()
    }
}

/// Amounts taken from slashed validators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardAdjustments {
    pub total_staking_adjustment: u64,
    pub individual_staking_adjustments: BTreeMap<usize, u64>,
    pub total_storage_fund_adjustment: u64,
    pub individual_storage_fund_adjustments: BTreeMap<usize, u64>,
}

/// How one validator's staking reward is split between itself and its pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StakingRewardSplit {
    /// Self-stake share plus commission.
    pub validator: u64,
    /// Commission charged on the delegators' share, included in `validator`.
    pub commission: u64,
    /// Delegators' share net of commission.
    pub pool: u64,
}

/// Splits the rewards in proportion to stake, and the storage fund reward equally.
pub fn compute_unadjusted_reward_distribution(
    stakes: &[u64],
    total_stake: u64,
    total_staking_reward: u64,
    total_storage_fund_reward: u64,
) -> Result<RewardAmounts, ArithError> {
    let storage_share = match stakes.len() as u64 {
        0 => 0,
        count => total_storage_fund_reward / count,
    };
    let staking = stakes
        .iter()
        .map(|&stake| mul_div_or_zero(stake, total_staking_reward, total_stake))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RewardAmounts { staking, storage_fund: vec![storage_share; stakes.len()] })
}

/// Returns the positions of validators whose reporters reach the quorum.
///
/// `validators` pairs each active validator's address with its voting power. Reports by or
/// against addresses outside the list are ignored.
pub fn compute_slashed_validators(
    validators: &[(Address, u64)],
    report_records: &BTreeMap<Address, BTreeSet<Address>>,
) -> Result<BTreeSet<usize>, ArithError> {
    let power: BTreeMap<Address, u64> = validators.iter().copied().collect();
    let mut slashed = BTreeSet::new();
    for (position, (address, _)) in validators.iter().enumerate() {
        let Some(reporters) = report_records.get(address) else { continue };
        let reported_power =
            reporters.iter().filter_map(|reporter| power.get(reporter).copied()).safe_sum()?;
        if reported_power >= QUORUM_THRESHOLD {
            slashed.insert(position);
        }
    }
    Ok(slashed)
}

/// Computes how much of each slashed validator's reward is withheld.
pub fn compute_reward_adjustments(
    slashed: &BTreeSet<usize>,
    reward_slashing_rate: u64,
    unadjusted: &RewardAmounts,
) -> Result<RewardAdjustments, ArithError> {
    let mut adjustments = RewardAdjustments::default();
    for &position in slashed {
        let staking = apply_bps(unadjusted.staking[position], reward_slashing_rate)?;
        let storage_fund = apply_bps(unadjusted.storage_fund[position], reward_slashing_rate)?;
        adjustments.total_staking_adjustment.safe_add_assign(staking)?;
        adjustments.total_storage_fund_adjustment.safe_add_assign(storage_fund)?;
        adjustments.individual_staking_adjustments.insert(position, staking);
        adjustments.individual_storage_fund_adjustments.insert(position, storage_fund);
    }
    Ok(adjustments)
}

/// Applies the adjustments: slashed validators lose theirs, the others share the withheld
/// staking reward by stake and the withheld storage fund reward equally.
pub fn compute_adjusted_reward_distribution(
    stakes: &[u64],
    total_stake: u64,
    total_slashed_validator_stake: u64,
    unadjusted: &RewardAmounts,
    adjustments: &RewardAdjustments,
) -> Result<RewardAmounts, ArithError> {
    let total_unslashed_stake = total_stake.safe_sub(total_slashed_validator_stake)?;
    let unslashed_count =
        (stakes.len() as u64).safe_sub(adjustments.individual_staking_adjustments.len() as u64)?;
    let storage_bonus = match unslashed_count {
        0 => 0,
        count => adjustments.total_storage_fund_adjustment / count,
    };

    let mut adjusted = RewardAmounts::default();
    for (position, (&stake, &staking, &storage_fund)) in
        izip!(stakes, &unadjusted.staking, &unadjusted.storage_fund).enumerate()
    {
        let (staking, storage_fund) =
            match adjustments.individual_staking_adjustments.get(&position) {
                Some(&staking_adjustment) => {
                    let storage_adjustment = adjustments
                        .individual_storage_fund_adjustments
                        .get(&position)
                        .copied()
                        .unwrap_or_default();
                    (staking.safe_sub(staking_adjustment)?, storage_fund.safe_sub(storage_adjustment)?)
                }
                None => {
                    let bonus = mul_div_or_zero(
                        stake,
                        adjustments.total_staking_adjustment,
                        total_unslashed_stake,
                    )?;
                    (staking.safe_add(bonus)?, storage_fund.safe_add(storage_bonus)?)
                }
            };
        adjusted.staking.push(staking);
        adjusted.storage_fund.push(storage_fund);
    }
    Ok(adjusted)
}

/// Splits a validator's staking reward between its self-stake and its pool, charging
/// `commission_rate` on the pool's share.
pub fn split_staking_reward(
    self_stake: u64,
    pool_stake: u64,
    staking_reward: u64,
    commission_rate: u64,
) -> Result<StakingRewardSplit, ArithError> {
    let total_stake = self_stake.safe_add(pool_stake)?;
    let delegator_reward = mul_div_or_zero(staking_reward, pool_stake, total_stake)?;
    let commission = apply_bps(delegator_reward, commission_rate)?;
    Ok(StakingRewardSplit {
        validator: staking_reward.safe_sub(delegator_reward)?.safe_add(commission)?,
        commission,
        pool: delegator_reward.safe_sub(commission)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr(seed: u8) -> Address {
        Address::repeat_byte(seed)
    }

    #[test]
    fn unadjusted_rewards_follow_stake() {
        let rewards = compute_unadjusted_reward_distribution(&[100, 200, 300, 400], 1_000, 1_000, 10)
            .unwrap();
        assert_eq!(rewards.staking, vec![100, 200, 300, 400]);
        assert_eq!(rewards.storage_fund, vec![2, 2, 2, 2]);

        let empty = compute_unadjusted_reward_distribution(&[0, 0], 0, 1_000, 0).unwrap();
        assert_eq!(empty.staking, vec![0, 0]);
    }

    #[test]
    fn slashing_requires_quorum_of_reporters() {
        let validators = [(addr(1), 2_500), (addr(2), 2_500), (addr(3), 2_500), (addr(4), 2_500)];
        let mut records = BTreeMap::new();
        records.insert(addr(4), BTreeSet::from([addr(1), addr(2)]));
        assert!(compute_slashed_validators(&validators, &records).unwrap().is_empty());

        records.insert(addr(4), BTreeSet::from([addr(1), addr(2), addr(3)]));
        // Reports from unknown addresses carry no weight.
        records.insert(addr(1), BTreeSet::from([addr(9), addr(2)]));
        assert_eq!(compute_slashed_validators(&validators, &records).unwrap(), BTreeSet::from([3]));
    }

    #[test]
    fn slashed_rewards_move_to_others() {
        let stakes = [100, 100, 200];
        let unadjusted = compute_unadjusted_reward_distribution(&stakes, 400, 400, 30).unwrap();
        let slashed = BTreeSet::from([0]);
        let adjustments = compute_reward_adjustments(&slashed, 5_000, &unadjusted).unwrap();
        assert_eq!(adjustments.total_staking_adjustment, 50);
        assert_eq!(adjustments.total_storage_fund_adjustment, 5);

        let adjusted =
            compute_adjusted_reward_distribution(&stakes, 400, 100, &unadjusted, &adjustments)
                .unwrap();
        assert_eq!(adjusted.staking, vec![50, 116, 233]);
        assert_eq!(adjusted.storage_fund, vec![5, 12, 12]);
        assert!(adjusted.staking[0] < unadjusted.staking[0]);
        assert!(adjusted.total().unwrap() <= unadjusted.total().unwrap());
    }

    #[test]
    fn without_slashing_rewards_are_unchanged() {
        let stakes = [10, 20];
        let unadjusted = compute_unadjusted_reward_distribution(&stakes, 30, 300, 8).unwrap();
        let adjustments = compute_reward_adjustments(&BTreeSet::new(), 10_000, &unadjusted).unwrap();
        let adjusted =
            compute_adjusted_reward_distribution(&stakes, 30, 0, &unadjusted, &adjustments).unwrap();
        assert_eq!(adjusted, unadjusted);
    }

    #[test]
    fn commission_is_charged_on_pool_share() {
        let split = split_staking_reward(100, 300, 400, 1_000).unwrap();
        assert_eq!(split, StakingRewardSplit { validator: 130, commission: 30, pool: 270 });

        let no_pool = split_staking_reward(100, 0, 50, 2_000).unwrap();
        assert_eq!(no_pool, StakingRewardSplit { validator: 50, commission: 0, pool: 0 });
    }

    proptest! {
        #[test]
        fn distribution_conserves_rewards(
            stakes in prop::collection::vec(1u64..1_000_000_000, 1..40),
            staking_reward in 0u64..1_000_000_000_000,
            storage_reward in 0u64..1_000_000_000,
            slashing_rate in 0u64..=10_000,
            slashed_mask in any::<u64>(),
        ) {
            let total: u64 = stakes.iter().sum();
            let n = stakes.len() as u64;
            let unadjusted =
                compute_unadjusted_reward_distribution(&stakes, total, staking_reward, storage_reward)
                    .unwrap();
            let slashed: BTreeSet<usize> =
                (0..stakes.len()).filter(|i| slashed_mask & (1 << i) != 0).collect();
            let slashed_stake = slashed.iter().map(|&i| stakes[i]).sum();
            let adjustments = compute_reward_adjustments(&slashed, slashing_rate, &unadjusted).unwrap();
            let adjusted = compute_adjusted_reward_distribution(
                &stakes, total, slashed_stake, &unadjusted, &adjustments,
            )
            .unwrap();

            let paid = adjusted.total().unwrap();
            let available = staking_reward + storage_reward;
            prop_assert!(paid <= available);
            if slashed.len() < stakes.len() {
                // Each of the four rounding steps loses less than one unit per validator.
                prop_assert!(available - paid < 4 * n);
            }
            for &i in &slashed {
                prop_assert!(adjusted.staking[i] <= unadjusted.staking[i]);
            }
        }
    }
}
