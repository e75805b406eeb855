//! Normalization of stake into bounded voting power.
//!
//! Voting power always sums to [`TOTAL_VOTING_POWER`]. A single validator is capped at
//! [`MAX_VOTING_POWER`] unless the set is too small to place all power under the cap, in which
//! case the leftover is spread over everyone.

use crate::error::VotingPowerError;
use itertools::Itertools;
use serde::Serialize;
use staking_primitives::{ArithError, SafeArith, SafeArithIter};

/// Sum of the voting power of all active validators.
pub const TOTAL_VOTING_POWER: u64 = 10_000;

/// Nominal voting power cap of a single validator.
pub const MAX_VOTING_POWER: u64 = 1_000;

/// Voting power needed for a two-thirds quorum.
pub const QUORUM_THRESHOLD: u64 = quorum_threshold(TOTAL_VOTING_POWER);

/// Returns the two-thirds quorum of `total_power`, computed as `(total + 1) * 2 / 3`.
pub const fn quorum_threshold(total_power: u64) -> u64 {
    (total_power + 1) * 2 / 3
}

/// Voting power assigned to the validator at `index` of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VotingPowerInfo {
    /// Position of the validator in the input slice.
    pub index: usize,
    /// Stake the power was derived from.
    pub stake: u64,
    /// Assigned voting power.
    pub power: u64,
}

/// Derives voting power for `stakes`, returned in input order.
pub fn derive_voting_power(stakes: &[u64]) -> Result<Vec<u64>, VotingPowerError> {
    let infos = derive_voting_power_info(stakes)?;
    let mut powers = vec![0; stakes.len()];
    for info in infos {
        powers[info.index] = info.power;
    }
    Ok(powers)
}

/// Derives voting power for `stakes`, ordered by stake descending with ties in input order.
pub fn derive_voting_power_info(stakes: &[u64]) -> Result<Vec<VotingPowerInfo>, VotingPowerError> {
    if stakes.is_empty() {
        return Err(VotingPowerError::NoValidators)
    }
    let mut infos = stakes
        .iter()
        .enumerate()
        .map(|(index, &stake)| VotingPowerInfo { index, stake, power: 0 })
        .sorted_by(|a, b| b.stake.cmp(&a.stake))
        .collect::<Vec<_>>();

    let remaining = distribute_proportionally(&mut infos, TOTAL_VOTING_POWER)?;
    distribute_leftover(&mut infos, remaining)?;
    check_invariants(&infos)?;
    Ok(infos)
}

/// Hands out `remaining` in proportion to stake among validators below the cap, repeating
/// with whatever the capped validators could not absorb. Returns the undistributed rest.
fn distribute_proportionally(
    infos: &mut [VotingPowerInfo],
    mut remaining: u64,
) -> Result<u64, ArithError> {
    while remaining > 0 {
        let uncapped_stake = infos
            .iter()
            .filter(|info| info.power < MAX_VOTING_POWER)
            .map(|info| info.stake as u128)
            .safe_sum()?;
        if uncapped_stake == 0 {
            break
        }

        let mut distributed = 0u64;
        for info in infos.iter_mut().filter(|info| info.power < MAX_VOTING_POWER) {
            let share = (remaining as u128).safe_mul(info.stake as u128)?.safe_div(uncapped_stake)?;
            let share = u64::try_from(share).map_err(|_| ArithError::Overflow)?;
            let absorbed = share.min(MAX_VOTING_POWER - info.power);
            info.power += absorbed;
            distributed.safe_add_assign(absorbed)?;
        }
        if distributed == 0 {
            break
        }
        remaining.safe_sub_assign(distributed)?;
    }
    Ok(remaining)
}

/// Hands out the rest one unit at a time in sorted order, to uncapped validators first and to
/// everyone once all of them sit at the cap.
fn distribute_leftover(infos: &mut [VotingPowerInfo], mut remaining: u64) -> Result<(), ArithError> {
    while remaining > 0 {
        let mut any_uncapped = false;
        for info in infos.iter_mut().filter(|info| info.power < MAX_VOTING_POWER) {
            if remaining == 0 {
                break
            }
            any_uncapped = true;
            info.power += 1;
            remaining -= 1;
        }
        if any_uncapped {
            continue
        }

        let count = infos.len() as u64;
        let (each, extra) = (remaining.safe_div(count)?, remaining.safe_rem(count)?);
        for (position, info) in infos.iter_mut().enumerate() {
            info.power.safe_add_assign(each + u64::from((position as u64) < extra))?;
        }
        remaining = 0;
    }
    Ok(())
}

/// Verifies the invariants of a voting power assignment ordered by stake descending.
pub fn check_invariants(infos: &[VotingPowerInfo]) -> Result<(), VotingPowerError> {
    let total = infos.iter().map(|info| info.power).safe_sum()?;
    if total != TOTAL_VOTING_POWER {
        return Err(VotingPowerError::TotalPowerMismatch {
            expected: TOTAL_VOTING_POWER,
            actual: total,
        })
    }

    let cap_binding = (infos.len() as u64).saturating_mul(MAX_VOTING_POWER) >= TOTAL_VOTING_POWER;
    for (position, info) in infos.iter().enumerate() {
        if cap_binding && info.power > MAX_VOTING_POWER {
            return Err(VotingPowerError::PowerTooHigh { position, power: info.power })
        }
    }

    for (position, (higher, lower)) in infos.iter().tuple_windows().enumerate() {
        if higher.stake < lower.stake || higher.power < lower.power {
            return Err(VotingPowerError::RelativePowerMismatch { position: position + 1 })
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test]
    fn quorum_is_two_thirds_rounded_up() {
        assert_eq!(QUORUM_THRESHOLD, 6_667);
        assert_eq!(quorum_threshold(3), 2);
    }

    #[test_case(&[100, 100, 100, 100], &[2_500, 2_500, 2_500, 2_500]; "small set exceeds cap")]
    #[test_case(&[1; 10], &[1_000; 10]; "ten equal validators sit at the cap")]
    #[test_case(&[5], &[10_000]; "single validator")]
    #[test_case(&[100, 0, 0], &[3_334, 3_333, 3_333]; "zero stake validators")]
    fn derives_expected_power(stakes: &[u64], expected: &[u64]) {
        assert_eq!(derive_voting_power(stakes).unwrap(), expected);
    }

    #[test]
    fn caps_large_validators_and_redistributes() {
        let mut stakes = vec![10_000];
        stakes.extend([100; 20]);
        let powers = derive_voting_power(&stakes).unwrap();
        assert_eq!(powers[0], MAX_VOTING_POWER);
        assert!(powers[1..].iter().all(|&p| p == 450));
        assert_eq!(powers.iter().sum::<u64>(), TOTAL_VOTING_POWER);
    }

    #[test]
    fn keeps_input_positions() {
        let powers = derive_voting_power(&[1, 3, 2, 4]).unwrap();
        assert!(powers[3] >= powers[1] && powers[1] >= powers[2] && powers[2] >= powers[0]);
        assert_eq!(powers.iter().sum::<u64>(), TOTAL_VOTING_POWER);
    }

    #[test]
    fn empty_set_is_rejected() {
        assert_matches!(derive_voting_power(&[]), Err(VotingPowerError::NoValidators));
    }

    #[test]
    fn detects_broken_assignments() {
        let infos = [
            VotingPowerInfo { index: 0, stake: 10, power: 4_000 },
            VotingPowerInfo { index: 1, stake: 5, power: 6_000 },
        ];
        assert_matches!(
            check_invariants(&infos),
            Err(VotingPowerError::RelativePowerMismatch { position: 1 })
        );
        let infos = [VotingPowerInfo { index: 0, stake: 10, power: 9_999 }];
        assert_matches!(check_invariants(&infos), Err(VotingPowerError::TotalPowerMismatch { .. }));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn power_is_conserved_and_monotone(stakes in prop::collection::vec(0u64..1_000_000_000_000, 1..150)) {
            let powers = derive_voting_power(&stakes).unwrap();
            prop_assert_eq!(powers.iter().sum::<u64>(), TOTAL_VOTING_POWER);
            if stakes.len() as u64 * MAX_VOTING_POWER >= TOTAL_VOTING_POWER {
                prop_assert!(powers.iter().all(|&p| p <= MAX_VOTING_POWER));
            }
            for i in 0..stakes.len() {
                for j in 0..stakes.len() {
                    if stakes[i] >= stakes[j] && (stakes[i] > stakes[j] || i < j) {
                        prop_assert!(powers[i] >= powers[j]);
                    }
                }
            }
        }
    }
}
