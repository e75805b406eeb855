//! The active validator set and its epoch transition.
//!
//! At an epoch boundary the set, in order:
//! 1. computes each validator's unadjusted reward from its stake,
//! 2. determines the validators slashed by the tallying rule and adjusts the rewards,
//! 3. deposits the rewards, compounding the validator's take into its pending self-stake and
//!    recording the new exchange rate of every pool,
//! 4. commits pending self-stake and quotes, then pending delegations and withdrawals,
//! 5. admits pending validators and evicts requested removals and low-stake validators,
//! 6. recomputes total stake and voting power.

use crate::{
    balance::Balance,
    error::ValidatorSetError,
    events::ValidatorEpochInfo,
    params::{ReportRecordsPolicy, SystemParameters},
    reward::{
        compute_adjusted_reward_distribution, compute_reward_adjustments,
        compute_slashed_validators, compute_unadjusted_reward_distribution, split_staking_reward,
        RewardAmounts,
    },
    staking_pool::{DelegationWithdrawal, PoolId, StakedSui, StakingPool},
    validator::Validator,
    voting_power::{derive_voting_power, quorum_threshold},
};
use itertools::izip;
use serde::{Deserialize, Serialize};
use staking_primitives::{Address, EpochId, SafeArith, SafeArithIter};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use tracing::{debug, info, warn};

/// Why tokens left engine custody at an epoch boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum PayoutKind {
    /// Self-stake a validator asked to withdraw.
    #[display("validator_stake_withdrawal")]
    ValidatorStakeWithdrawal,
    /// Reward of a delegation withdrawn during the ending epoch.
    #[display("delegation_reward")]
    DelegationReward,
    /// Self-stake of a validator that left the set.
    #[display("removed_validator_stake")]
    RemovedValidatorStake,
}

/// Tokens owed to `recipient`.
#[derive(Debug, PartialEq, Eq)]
pub struct Payout {
    pub recipient: Address,
    pub kind: PayoutKind,
    pub amount: Balance,
}

/// Rewards handed to the validator set for the ending epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EpochRewards {
    pub(crate) staking: u64,
    pub(crate) storage_fund: u64,
    pub(crate) reward_slashing_rate: u64,
}

/// Result of [`ValidatorSet::advance_epoch`].
#[derive(Debug)]
pub(crate) struct ValidatorSetAdvance {
    pub(crate) validator_infos: Vec<ValidatorEpochInfo>,
    pub(crate) payouts: Vec<Payout>,
    /// Rewards credited to validators and pools.
    pub(crate) distributed: u64,
    /// Rewards that could not be distributed.
    pub(crate) leftover: u64,
}

/// Active validators, pending membership changes and peer reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    total_stake: u64,
    quorum_threshold: u64,
    active_validators: Vec<Validator>,
    pending_validators: Vec<Validator>,
    pending_removals: BTreeSet<Address>,
    inactive_pools: BTreeMap<PoolId, StakingPool>,
    /// Validators below the low stake threshold and the number of epochs they have been there.
    at_risk_validators: BTreeMap<Address, u64>,
    /// Reportee to the set of its reporters.
    validator_report_records: BTreeMap<Address, BTreeSet<Address>>,
}

impl ValidatorSet {
    /// Creates the genesis set with every validator active from `epoch`.
    pub fn new(validators: Vec<Validator>, epoch: EpochId) -> Result<Self, ValidatorSetError> {
        for (i, validator) in validators.iter().enumerate() {
            if validators[..i].iter().any(|other| other.is_duplicate(validator)) {
                return Err(ValidatorSetError::DuplicateValidator(validator.sui_address()))
            }
        }
        let mut set = Self {
            total_stake: 0,
            quorum_threshold: 0,
            active_validators: Vec::with_capacity(validators.len()),
            pending_validators: Vec::new(),
            pending_removals: BTreeSet::new(),
            inactive_pools: BTreeMap::new(),
            at_risk_validators: BTreeMap::new(),
            validator_report_records: BTreeMap::new(),
        };
        for validator in validators {
            set.activate(validator, epoch)?;
        }
        set.refresh_stake_and_voting_power()?;
        Ok(set)
    }

    /// Active stake as of the start of the current epoch.
    pub const fn total_stake(&self) -> u64 {
        self.total_stake
    }

    /// Voting power needed for a quorum of the current set.
    pub const fn quorum_threshold(&self) -> u64 {
        self.quorum_threshold
    }

    pub fn active_validators(&self) -> &[Validator] {
        &self.active_validators
    }

    pub fn pending_validators(&self) -> &[Validator] {
        &self.pending_validators
    }

    pub const fn pending_removals(&self) -> &BTreeSet<Address> {
        &self.pending_removals
    }

    pub const fn inactive_pools(&self) -> &BTreeMap<PoolId, StakingPool> {
        &self.inactive_pools
    }

    pub const fn at_risk_validators(&self) -> &BTreeMap<Address, u64> {
        &self.at_risk_validators
    }

    pub const fn validator_report_records(&self) -> &BTreeMap<Address, BTreeSet<Address>> {
        &self.validator_report_records
    }

    /// Returns the active validator with `address`.
    pub fn active_validator(&self, address: Address) -> Option<&Validator> {
        self.active_validators.iter().find(|v| v.sui_address() == address)
    }

    /// Returns `true` if `address` is an active validator.
    pub fn is_active_validator(&self, address: Address) -> bool {
        self.active_validator(address).is_some()
    }

    /// Validators currently reporting `reportee`.
    pub fn reporters_of(&self, reportee: Address) -> BTreeSet<Address> {
        self.validator_report_records.get(&reportee).cloned().unwrap_or_default()
    }

    fn active_position(&self, address: Address) -> Result<usize, ValidatorSetError> {
        self.active_validators
            .iter()
            .position(|v| v.sui_address() == address)
            .ok_or(ValidatorSetError::NotActiveValidator(address))
    }

    fn active_mut(&mut self, address: Address) -> Result<&mut Validator, ValidatorSetError> {
        let position = self.active_position(address)?;
        Ok(&mut self.active_validators[position])
    }

    /// Finds an active or pending validator.
    fn validator_mut(&mut self, address: Address) -> Result<&mut Validator, ValidatorSetError> {
        self.active_validators
            .iter_mut()
            .chain(self.pending_validators.iter_mut())
            .find(|v| v.sui_address() == address)
            .ok_or(ValidatorSetError::ValidatorNotFound(address))
    }

    /// Queues a validator candidate for admission at the next epoch boundary.
    pub fn request_add_validator(
        &mut self,
        validator: Validator,
        params: &SystemParameters,
    ) -> Result<(), ValidatorSetError> {
        let address = validator.sui_address();
        if self
            .active_validators
            .iter()
            .chain(&self.pending_validators)
            .any(|existing| existing.is_duplicate(&validator))
        {
            return Err(ValidatorSetError::DuplicateValidator(address))
        }
        let pool_id = validator.staking_pool().id();
        if self.inactive_pools.contains_key(&pool_id) {
            return Err(ValidatorSetError::DuplicatePool(pool_id))
        }
        let stake = validator.total_stake()?;
        if stake < params.min_validator_joining_stake {
            return Err(ValidatorSetError::BelowJoiningStake {
                stake,
                minimum: params.min_validator_joining_stake,
            })
        }
        let count = self.active_validators.len().safe_add(self.pending_validators.len())?;
        if count as u64 >= params.max_validator_count {
            return Err(ValidatorSetError::TooManyValidators(params.max_validator_count))
        }
        info!(target: "staking::validator_set", %address, stake, "validator requested to join");
        self.pending_validators.push(validator);
        Ok(())
    }

    /// Marks an active validator for removal at the next epoch boundary.
    pub fn request_remove_validator(&mut self, address: Address) -> Result<(), ValidatorSetError> {
        self.active_position(address)?;
        if self.pending_removals.contains(&address) {
            return Err(ValidatorSetError::AlreadyPendingRemoval(address))
        }
        if self.pending_removals.len() + 1 >= self.active_validators.len() {
            return Err(ValidatorSetError::EmptyValidatorSet)
        }
        self.pending_removals.insert(address);
        info!(target: "staking::validator_set", %address, "validator requested to leave");
        Ok(())
    }

    /// Adds self-stake to an active validator.
    pub fn request_add_stake(
        &mut self,
        address: Address,
        stake: Balance,
    ) -> Result<(), ValidatorSetError> {
        Ok(self.active_mut(address)?.request_add_stake(stake)?)
    }

    /// Requests a self-stake withdrawal from an active validator.
    pub fn request_withdraw_stake(
        &mut self,
        address: Address,
        amount: u64,
        params: &SystemParameters,
    ) -> Result<(), ValidatorSetError> {
        Ok(self.active_mut(address)?.request_withdraw_stake(amount, params.min_validator_stake)?)
    }

    pub fn request_set_gas_price(
        &mut self,
        address: Address,
        gas_price: u64,
    ) -> Result<(), ValidatorSetError> {
        self.validator_mut(address)?.request_set_gas_price(gas_price);
        Ok(())
    }

    pub fn request_set_commission_rate(
        &mut self,
        address: Address,
        rate: u64,
    ) -> Result<(), ValidatorSetError> {
        Ok(self.validator_mut(address)?.request_set_commission_rate(rate)?)
    }

    /// Delegates `stake` to an active or pending validator.
    pub fn request_add_delegation(
        &mut self,
        validator_address: Address,
        stake: Balance,
        current_epoch: EpochId,
    ) -> Result<StakedSui, ValidatorSetError> {
        Ok(self.validator_mut(validator_address)?.request_add_delegation(stake, current_epoch)?)
    }

    /// Withdraws delegated stake from whichever pool issued the receipt, inactive ones included.
    pub fn request_withdraw_delegation(
        &mut self,
        staked: StakedSui,
        pool_token_amount: u64,
        delegator: Address,
    ) -> Result<DelegationWithdrawal, ValidatorSetError> {
        let pool_id = staked.pool_id();
        if let Some(validator) = self
            .active_validators
            .iter_mut()
            .chain(self.pending_validators.iter_mut())
            .find(|v| v.staking_pool().id() == pool_id)
        {
            return Ok(validator.request_withdraw_delegation(staked, pool_token_amount, delegator)?)
        }
        let pool =
            self.inactive_pools.get_mut(&pool_id).ok_or(ValidatorSetError::PoolNotFound(pool_id))?;
        Ok(pool.request_withdraw_delegation(staked, pool_token_amount, delegator)?)
    }

    /// Records that `reporter` considers `reportee` non-performant. Repeated reports are no-ops.
    pub fn report_validator(
        &mut self,
        reporter: Address,
        reportee: Address,
    ) -> Result<(), ValidatorSetError> {
        if reporter == reportee {
            return Err(ValidatorSetError::SelfReport(reporter))
        }
        self.active_position(reporter)?;
        self.active_position(reportee)?;
        if self.validator_report_records.entry(reportee).or_default().insert(reporter) {
            debug!(target: "staking::validator_set", %reporter, %reportee, "validator reported");
        }
        Ok(())
    }

    /// Withdraws a report previously made by `reporter`.
    pub fn undo_report_validator(
        &mut self,
        reporter: Address,
        reportee: Address,
    ) -> Result<(), ValidatorSetError> {
        let Some(reporters) = self
            .validator_report_records
            .get_mut(&reportee)
            .filter(|reporters| reporters.contains(&reporter))
        else {
            return Err(ValidatorSetError::ReportRecordNotFound { reporter, reportee })
        };
        reporters.remove(&reporter);
        if reporters.is_empty() {
            self.validator_report_records.remove(&reportee);
        }
        Ok(())
    }

    /// Highest gas price quoted by validators holding a quorum of voting power.
    ///
    /// Quotes are scanned from the highest price down, accumulating voting power until the
    /// quorum is reached.
    pub fn derive_reference_gas_price(&self) -> Result<u64, ValidatorSetError> {
        let mut quotes: BinaryHeap<(u64, u64)> = self
            .active_validators
            .iter()
            .map(|v| (v.next_epoch_gas_price(), v.voting_power()))
            .collect();
        let (mut power, mut price) = (0u64, 0u64);
        while power < self.quorum_threshold {
            let Some((quote, voting_power)) = quotes.pop() else { break };
            power.safe_add_assign(voting_power)?;
            price = quote;
        }
        Ok(price)
    }

    /// Tokens held in custody for validators and pools.
    pub(crate) fn custody(&self) -> Result<u64, ValidatorSetError> {
        let mut total = 0u64;
        for validator in self.active_validators.iter().chain(&self.pending_validators) {
            total.safe_add_assign(validator.self_custody()?)?;
            total.safe_add_assign(validator.staking_pool().rewards_pool())?;
        }
        let inactive = self.inactive_pools.values().map(StakingPool::rewards_pool).safe_sum()?;
        Ok(total.safe_add(inactive)?)
    }

    /// Runs the epoch boundary into `new_epoch`.
    pub(crate) fn advance_epoch(
        &mut self,
        new_epoch: EpochId,
        rewards: EpochRewards,
        params: &SystemParameters,
    ) -> Result<ValidatorSetAdvance, ValidatorSetError> {
        let stakes = self
            .active_validators
            .iter()
            .map(Validator::total_stake)
            .collect::<Result<Vec<_>, _>>()?;
        let total_stake = stakes.iter().copied().safe_sum()?;

        let unadjusted = compute_unadjusted_reward_distribution(
            &stakes,
            total_stake,
            rewards.staking,
            rewards.storage_fund,
        )?;
        let voting_powers = self
            .active_validators
            .iter()
            .map(|v| (v.sui_address(), v.voting_power()))
            .collect::<Vec<_>>();
        let slashed = compute_slashed_validators(&voting_powers, &self.validator_report_records)?;
        let slashed_stake = slashed.iter().map(|&position| stakes[position]).safe_sum()?;
        let adjustments =
            compute_reward_adjustments(&slashed, rewards.reward_slashing_rate, &unadjusted)?;
        let adjusted = compute_adjusted_reward_distribution(
            &stakes,
            total_stake,
            slashed_stake,
            &unadjusted,
            &adjustments,
        )?;
        if !slashed.is_empty() {
            warn!(
                target: "staking::validator_set",
                epoch = new_epoch,
                slashed = slashed.len(),
                withheld = adjustments.total_staking_adjustment,
                "slashing validator rewards"
            );
        }

        let validator_infos = self.distribute_rewards(&adjusted, &slashed, new_epoch)?;
        let distributed = adjusted.total()?;
        let leftover = rewards.staking.safe_add(rewards.storage_fund)?.safe_sub(distributed)?;

        let mut payouts = Vec::new();
        self.process_pending_stakes_and_withdraws(new_epoch, &mut payouts)?;
        self.process_pending_validators(new_epoch)?;
        self.process_pending_removals(new_epoch, &mut payouts)?;
        self.process_low_stake_departures(new_epoch, params, &mut payouts)?;
        if params.report_records_policy == ReportRecordsPolicy::Reset {
            self.validator_report_records.clear();
        }
        self.refresh_stake_and_voting_power()?;

        info!(
            target: "staking::validator_set",
            epoch = new_epoch,
            validators = self.active_validators.len(),
            total_stake = self.total_stake,
            distributed,
            leftover,
            "validator set advanced"
        );
        Ok(ValidatorSetAdvance { validator_infos, payouts, distributed, leftover })
    }

    /// Credits the adjusted rewards and records the per-validator epoch info.
    fn distribute_rewards(
        &mut self,
        adjusted: &RewardAmounts,
        slashed: &BTreeSet<usize>,
        new_epoch: EpochId,
    ) -> Result<Vec<ValidatorEpochInfo>, ValidatorSetError> {
        let mut infos = Vec::with_capacity(self.active_validators.len());
        for (position, (validator, &staking, &storage_fund)) in
            izip!(&mut self.active_validators, &adjusted.staking, &adjusted.storage_fund).enumerate()
        {
            let split = split_staking_reward(
                validator.stake_amount(),
                validator.delegation_amount(),
                staking,
                validator.commission_rate(),
            )?;
            validator.deposit_stake_rewards(split.validator.safe_add(storage_fund)?)?;
            validator.staking_pool_mut().deposit_rewards(split.pool, new_epoch)?;

            let address = validator.sui_address();
            infos.push(ValidatorEpochInfo {
                epoch: new_epoch,
                validator_address: address,
                reference_gas_survey_quote: validator.next_epoch_gas_price(),
                stake: validator.total_stake()?,
                commission_rate: validator.commission_rate(),
                pool_staking_reward: split.pool,
                validator_staking_reward: split.validator,
                storage_fund_staking_reward: storage_fund,
                pool_token_exchange_rate: validator.staking_pool().exchange_rate_at(new_epoch)?,
                tallying_rule_reporters: self
                    .validator_report_records
                    .get(&address)
                    .map(|reporters| reporters.iter().copied().collect())
                    .unwrap_or_default(),
                tallying_rule_global_score: u64::from(!slashed.contains(&position)),
            });
        }
        Ok(infos)
    }

    fn process_pending_stakes_and_withdraws(
        &mut self,
        new_epoch: EpochId,
        payouts: &mut Vec<Payout>,
    ) -> Result<(), ValidatorSetError> {
        for validator in &mut self.active_validators {
            let recipient = validator.sui_address();
            let withdrawn = validator.adjust_stake_and_gas_price()?;
            if withdrawn.value() > 0 {
                payouts.push(Payout {
                    recipient,
                    kind: PayoutKind::ValidatorStakeWithdrawal,
                    amount: withdrawn,
                });
            }
            let settlements =
                validator.staking_pool_mut().process_pending_delegations_and_withdraws(new_epoch)?;
            payouts.extend(settlements.into_iter().filter(|s| s.amount > 0).map(|s| Payout {
                recipient: s.delegator,
                kind: PayoutKind::DelegationReward,
                amount: Balance::from_custody(s.amount),
            }));
        }
        Ok(())
    }

    fn process_pending_validators(&mut self, new_epoch: EpochId) -> Result<(), ValidatorSetError> {
        for validator in core::mem::take(&mut self.pending_validators) {
            info!(
                target: "staking::validator_set",
                address = %validator.sui_address(),
                epoch = new_epoch,
                "validator joined"
            );
            self.activate(validator, new_epoch)?;
        }
        Ok(())
    }

    fn activate(&mut self, mut validator: Validator, epoch: EpochId) -> Result<(), ValidatorSetError> {
        let pool = validator.staking_pool_mut();
        pool.activate(epoch)?;
        // Withdrawals from a preactive pool are always cancellations, so nothing settles here.
        pool.process_pending_delegations_and_withdraws(epoch)?;
        self.active_validators.push(validator);
        Ok(())
    }

    fn process_pending_removals(
        &mut self,
        new_epoch: EpochId,
        payouts: &mut Vec<Payout>,
    ) -> Result<(), ValidatorSetError> {
        for address in core::mem::take(&mut self.pending_removals) {
            self.remove_validator(address, new_epoch, payouts)?;
        }
        Ok(())
    }

    fn process_low_stake_departures(
        &mut self,
        new_epoch: EpochId,
        params: &SystemParameters,
        payouts: &mut Vec<Payout>,
    ) -> Result<(), ValidatorSetError> {
        let mut departures = Vec::new();
        for validator in &self.active_validators {
            let address = validator.sui_address();
            let stake = validator.total_stake()?;
            if stake >= params.validator_low_stake_threshold {
                self.at_risk_validators.remove(&address);
            } else if stake >= params.validator_very_low_stake_threshold {
                let epochs = self.at_risk_validators.get(&address).map_or(Ok(1), |e| e.safe_add(1))?;
                self.at_risk_validators.insert(address, epochs);
                if epochs > params.validator_low_stake_grace_period {
                    departures.push(address);
                }
            } else {
                departures.push(address);
            }
        }
        for address in departures {
            // The last active validator stays regardless of stake.
            if self.active_validators.len() <= 1 {
                warn!(target: "staking::validator_set", %address, epoch = new_epoch, "keeping last low stake validator");
                break
            }
            warn!(target: "staking::validator_set", %address, epoch = new_epoch, "removing low stake validator");
            self.remove_validator(address, new_epoch, payouts)?;
        }
        Ok(())
    }

    /// Removes an active validator, freezing its pool and paying out its self-stake.
    fn remove_validator(
        &mut self,
        address: Address,
        new_epoch: EpochId,
        payouts: &mut Vec<Payout>,
    ) -> Result<(), ValidatorSetError> {
        let position = self.active_position(address)?;
        let validator = self.active_validators.remove(position);
        self.clean_report_records(address);
        self.at_risk_validators.remove(&address);

        let (mut pool, stake) = validator.into_parts()?;
        pool.deactivate(new_epoch)?;
        let pool_id = pool.id();
        if self.inactive_pools.contains_key(&pool_id) {
            return Err(ValidatorSetError::DuplicatePool(pool_id))
        }
        self.inactive_pools.insert(pool_id, pool);
        if stake.value() > 0 {
            payouts.push(Payout {
                recipient: address,
                kind: PayoutKind::RemovedValidatorStake,
                amount: stake,
            });
        }
        info!(target: "staking::validator_set", %address, epoch = new_epoch, %pool_id, "validator left");
        Ok(())
    }

    /// Drops every report made by or against `address`.
    fn clean_report_records(&mut self, address: Address) {
        self.validator_report_records.remove(&address);
        self.validator_report_records.retain(|_, reporters| {
            reporters.remove(&address);
            !reporters.is_empty()
        });
    }

    fn refresh_stake_and_voting_power(&mut self) -> Result<(), ValidatorSetError> {
        if self.active_validators.is_empty() {
            return Err(ValidatorSetError::EmptyValidatorSet)
        }
        let stakes = self
            .active_validators
            .iter()
            .map(Validator::total_stake)
            .collect::<Result<Vec<_>, _>>()?;
        self.total_stake = stakes.iter().copied().safe_sum()?;
        let powers = derive_voting_power(&stakes)?;
        for (validator, &power) in self.active_validators.iter_mut().zip(&powers) {
            validator.set_voting_power(power);
        }
        self.quorum_threshold = quorum_threshold(powers.iter().copied().safe_sum()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        validator::tests::{metadata, validator},
        voting_power::{QUORUM_THRESHOLD, TOTAL_VOTING_POWER},
    };
    use assert_matches::assert_matches;

    fn addr(seed: u8) -> Address {
        Address::repeat_byte(seed)
    }

    fn params() -> SystemParameters {
        SystemParameters {
            min_validator_joining_stake: 100,
            min_validator_stake: 10,
            max_validator_count: 6,
            validator_low_stake_threshold: 50,
            validator_very_low_stake_threshold: 20,
            validator_low_stake_grace_period: 2,
            ..Default::default()
        }
    }

    fn set_of(stakes: &[u64]) -> ValidatorSet {
        let validators =
            stakes.iter().enumerate().map(|(i, &stake)| validator(i as u8 + 1, stake)).collect();
        ValidatorSet::new(validators, 0).unwrap()
    }

    fn rewards(staking: u64) -> EpochRewards {
        EpochRewards { staking, storage_fund: 0, reward_slashing_rate: 10_000 }
    }

    #[test]
    fn genesis_derives_voting_power() {
        let set = set_of(&[100, 100, 100, 100]);
        assert_eq!(set.total_stake(), 400);
        assert_eq!(set.quorum_threshold(), QUORUM_THRESHOLD);
        assert!(set.active_validators().iter().all(|v| v.voting_power() == 2_500));
        let total: u64 = set.active_validators().iter().map(Validator::voting_power).sum();
        assert_eq!(total, TOTAL_VOTING_POWER);
        assert!(set.active_validators().iter().all(|v| v.staking_pool().activation_epoch() == Some(0)));
    }

    #[test]
    fn genesis_rejects_duplicates_and_empty_sets() {
        assert_matches!(
            ValidatorSet::new(vec![validator(1, 1), validator(1, 1)], 0),
            Err(ValidatorSetError::DuplicateValidator(_))
        );
        assert_matches!(ValidatorSet::new(vec![], 0), Err(ValidatorSetError::EmptyValidatorSet));
    }

    #[test]
    fn reports_are_idempotent() {
        let mut set = set_of(&[100, 100, 100]);
        set.report_validator(addr(1), addr(2)).unwrap();
        set.report_validator(addr(1), addr(2)).unwrap();
        assert_eq!(set.reporters_of(addr(2)), BTreeSet::from([addr(1)]));

        assert_matches!(set.report_validator(addr(1), addr(1)), Err(ValidatorSetError::SelfReport(_)));
        assert_matches!(
            set.report_validator(addr(9), addr(1)),
            Err(ValidatorSetError::NotActiveValidator(_))
        );

        set.undo_report_validator(addr(1), addr(2)).unwrap();
        assert!(set.validator_report_records().is_empty());
        assert_matches!(
            set.undo_report_validator(addr(1), addr(2)),
            Err(ValidatorSetError::ReportRecordNotFound { .. })
        );
    }

    #[test]
    fn admission_checks() {
        let mut set = set_of(&[100, 100, 100]);
        let params = params();

        let mut clashing_metadata = metadata(7);
        clashing_metadata.net_address = metadata(1).net_address;
        let clash =
            Validator::new(clashing_metadata, Balance::from_custody(100), 1, 0, 0).unwrap();
        assert_matches!(
            set.request_add_validator(clash, &params),
            Err(ValidatorSetError::DuplicateValidator(_))
        );
        assert_matches!(
            set.request_add_validator(validator(7, 99), &params),
            Err(ValidatorSetError::BelowJoiningStake { stake: 99, minimum: 100 })
        );
        set.request_add_validator(validator(7, 100), &params).unwrap();
        assert_matches!(
            set.request_add_validator(validator(7, 100), &params),
            Err(ValidatorSetError::DuplicateValidator(_))
        );
        set.request_add_validator(validator(8, 100), &params).unwrap();
        set.request_add_validator(validator(9, 100), &params).unwrap();
        assert_matches!(
            set.request_add_validator(validator(10, 100), &params),
            Err(ValidatorSetError::TooManyValidators(6))
        );
    }

    #[test]
    fn removal_requests() {
        let mut set = set_of(&[100, 100]);
        assert_matches!(
            set.request_remove_validator(addr(9)),
            Err(ValidatorSetError::NotActiveValidator(_))
        );
        set.request_remove_validator(addr(1)).unwrap();
        assert_matches!(
            set.request_remove_validator(addr(1)),
            Err(ValidatorSetError::AlreadyPendingRemoval(_))
        );
        assert_matches!(
            set.request_remove_validator(addr(2)),
            Err(ValidatorSetError::EmptyValidatorSet)
        );
    }

    #[test]
    fn reference_gas_price_needs_quorum() {
        let mut set = set_of(&[100, 100, 100, 100]);
        for (seed, price) in [(1, 10), (2, 40), (3, 30), (4, 20)] {
            set.request_set_gas_price(addr(seed), price).unwrap();
        }
        // 40 and 30 only cover 5000 of the 6667 needed.
        assert_eq!(set.derive_reference_gas_price().unwrap(), 20);
    }

    #[test]
    fn advance_distributes_and_commits() {
        let mut set = set_of(&[100, 300]);
        let params = params();
        let outcome = set.advance_epoch(1, rewards(400), &params).unwrap();
        assert_eq!((outcome.distributed, outcome.leftover), (400, 0));
        assert!(outcome.payouts.is_empty());
        assert_eq!(set.active_validators()[0].stake_amount(), 200);
        assert_eq!(set.active_validators()[1].stake_amount(), 600);
        assert_eq!(set.total_stake(), 800);
        assert_eq!(outcome.validator_infos.len(), 2);
        assert_eq!(outcome.validator_infos[1].validator_staking_reward, 300);
        assert!(set.active_validators().iter().all(|v| v.staking_pool().exchange_rate_at(1).is_ok()));
    }

    #[test]
    fn slashed_validator_loses_rewards_to_peers() {
        let mut set = set_of(&[100, 100, 100, 100]);
        for reporter in 1..=3 {
            set.report_validator(addr(reporter), addr(4)).unwrap();
        }
        let outcome = set.advance_epoch(1, rewards(400), &params()).unwrap();
        let info = &outcome.validator_infos[3];
        assert_eq!(info.tallying_rule_global_score, 0);
        assert_eq!(info.tallying_rule_reporters, vec![addr(1), addr(2), addr(3)]);
        assert_eq!(info.validator_staking_reward, 0);
        assert!(outcome.validator_infos[..3].iter().all(|i| i.validator_staking_reward == 133));
        assert_eq!(outcome.leftover, 1);
        // Reports persist by default.
        assert_eq!(set.reporters_of(addr(4)).len(), 3);
    }

    #[test]
    fn reset_policy_clears_reports() {
        let mut set = set_of(&[100, 100, 100]);
        set.report_validator(addr(1), addr(2)).unwrap();
        let params = SystemParameters { report_records_policy: ReportRecordsPolicy::Reset, ..params() };
        set.advance_epoch(1, rewards(0), &params).unwrap();
        assert!(set.validator_report_records().is_empty());
    }

    #[test]
    fn admits_pending_and_evicts_removed() {
        let mut set = set_of(&[100, 100, 100]);
        let params = params();
        set.request_add_validator(validator(7, 100), &params).unwrap();
        set.request_remove_validator(addr(2)).unwrap();
        set.report_validator(addr(2), addr(1)).unwrap();
        set.report_validator(addr(1), addr(2)).unwrap();

        let outcome = set.advance_epoch(1, rewards(0), &params).unwrap();
        let active: Vec<_> = set.active_validators().iter().map(Validator::sui_address).collect();
        assert_eq!(active, vec![addr(1), addr(3), addr(7)]);
        assert_eq!(set.active_validators()[2].staking_pool().activation_epoch(), Some(1));
        assert!(set.validator_report_records().is_empty());

        let removed = &outcome.payouts[0];
        assert_eq!(
            (removed.recipient, removed.kind, removed.amount.value()),
            (addr(2), PayoutKind::RemovedValidatorStake, 100)
        );
        let pool = set.inactive_pools().values().next().unwrap();
        assert_eq!(pool.validator_address(), addr(2));
        assert_eq!(pool.deactivation_epoch(), Some(1));
    }

    #[test]
    fn low_stake_validators_leave_after_grace_period() {
        let mut set = set_of(&[100, 100, 100, 30]);
        let params = params();
        set.advance_epoch(1, rewards(0), &params).unwrap();
        assert_eq!(set.at_risk_validators().get(&addr(4)), Some(&1));
        set.advance_epoch(2, rewards(0), &params).unwrap();
        assert_eq!(set.at_risk_validators().get(&addr(4)), Some(&2));
        set.advance_epoch(3, rewards(0), &params).unwrap();
        assert!(!set.is_active_validator(addr(4)));
        assert!(set.at_risk_validators().is_empty());

        let mut set = set_of(&[100, 100, 100, 10]);
        set.advance_epoch(1, rewards(0), &params).unwrap();
        assert!(!set.is_active_validator(addr(4)));
    }

    #[test]
    fn low_stake_departure_never_empties_the_set() {
        let mut set = set_of(&[100, 10]);
        let params = params();
        set.request_remove_validator(addr(1)).unwrap();

        set.advance_epoch(1, rewards(0), &params).unwrap();
        assert!(!set.is_active_validator(addr(1)));
        assert!(set.is_active_validator(addr(2)));
        assert!(set.pending_removals().is_empty());
        assert_eq!(set.total_stake(), 10);

        set.advance_epoch(2, rewards(0), &params).unwrap();
        set.advance_epoch(3, rewards(0), &params).unwrap();
        assert_eq!(set.active_validators().len(), 1);
        assert_eq!(set.active_validators()[0].voting_power(), TOTAL_VOTING_POWER);
    }
}
