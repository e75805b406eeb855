//! Top-level system state and the epoch transition entry point.

use crate::{
    balance::{Balance, Supply},
    error::SystemStateError,
    events::{SystemEpochInfo, ValidatorEpochInfo},
    params::SystemParameters,
    stake_subsidy::StakeSubsidy,
    staking_pool::{DelegationWithdrawal, StakedSui},
    storage_fund::StorageFund,
    validator::Validator,
    validator_set::{EpochRewards, Payout, ValidatorSet},
};
use serde::{Deserialize, Serialize};
use staking_primitives::{
    apply_bps, is_valid_bps, mul_div_or_zero, Address, EpochId, ProtocolVersion, SafeArith,
};
use tracing::{debug, info, warn};

/// Sender allowed to advance the epoch.
pub const SYSTEM_ADDRESS: Address = Address::ZERO;

/// Sender and epoch of the transaction issuing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxContext {
    pub sender: Address,
    pub epoch: EpochId,
}

impl TxContext {
    pub const fn new(sender: Address, epoch: EpochId) -> Self {
        Self { sender, epoch }
    }

    /// Context of a system transaction at `epoch`.
    pub const fn system(epoch: EpochId) -> Self {
        Self::new(SYSTEM_ADDRESS, epoch)
    }
}

/// Inputs of one epoch transition, supplied by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceEpochParams {
    /// Epoch being entered. Must follow the current epoch.
    pub new_epoch: EpochId,
    pub next_protocol_version: ProtocolVersion,
    /// Storage charges collected during the ending epoch.
    pub storage_charge: u64,
    /// Computation charges collected during the ending epoch.
    pub computation_charge: u64,
    /// Storage rebates owed for objects deleted during the ending epoch.
    pub storage_rebate: u64,
    /// Share of the storage fund reward reinvested into the fund, in basis points.
    pub storage_fund_reinvest_rate: u64,
    /// Share of a slashed validator's reward withheld, in basis points.
    pub reward_slashing_rate: u64,
    pub epoch_start_timestamp_ms: u64,
}

/// Everything produced by a successful epoch transition.
#[derive(Debug)]
pub struct EpochOutcome {
    pub summary: SystemEpochInfo,
    /// One record per validator active during the ended epoch.
    pub validator_infos: Vec<ValidatorEpochInfo>,
    pub payouts: Vec<Payout>,
    /// Rebate to return to the owners of deleted objects.
    pub storage_rebate: Balance,
}

/// The staking system: epoch clock, validator set and the funds feeding rewards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemState {
    epoch: EpochId,
    protocol_version: ProtocolVersion,
    epoch_start_timestamp_ms: u64,
    reference_gas_price: u64,
    validators: ValidatorSet,
    storage_fund: StorageFund,
    stake_subsidy: StakeSubsidy,
    parameters: SystemParameters,
    /// Whether the last transition ran in safe mode.
    safe_mode: bool,
    safe_mode_storage_charges: u64,
    safe_mode_computation_rewards: u64,
    safe_mode_storage_rebates: u64,
}

impl SystemState {
    /// Creates the genesis state at epoch zero.
    pub fn new(
        validators: Vec<Validator>,
        storage_fund: Balance,
        stake_subsidy: StakeSubsidy,
        parameters: SystemParameters,
        protocol_version: ProtocolVersion,
        epoch_start_timestamp_ms: u64,
    ) -> Result<Self, SystemStateError> {
        parameters.validate()?;
        let validators = ValidatorSet::new(validators, 0)?;
        let reference_gas_price = validators.derive_reference_gas_price()?;
        info!(
            target: "staking::system",
            validators = validators.active_validators().len(),
            total_stake = validators.total_stake(),
            reference_gas_price,
            "created genesis state"
        );
        Ok(Self {
            epoch: 0,
            protocol_version,
            epoch_start_timestamp_ms,
            reference_gas_price,
            validators,
            storage_fund: StorageFund::new(storage_fund),
            stake_subsidy,
            parameters,
            safe_mode: false,
            safe_mode_storage_charges: 0,
            safe_mode_computation_rewards: 0,
            safe_mode_storage_rebates: 0,
        })
    }

    pub const fn epoch(&self) -> EpochId {
        self.epoch
    }

    pub const fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    pub const fn epoch_start_timestamp_ms(&self) -> u64 {
        self.epoch_start_timestamp_ms
    }

    pub const fn reference_gas_price(&self) -> u64 {
        self.reference_gas_price
    }

    pub const fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    pub const fn storage_fund(&self) -> &StorageFund {
        &self.storage_fund
    }

    pub const fn stake_subsidy(&self) -> &StakeSubsidy {
        &self.stake_subsidy
    }

    pub const fn parameters(&self) -> &SystemParameters {
        &self.parameters
    }

    pub const fn is_safe_mode(&self) -> bool {
        self.safe_mode
    }

    /// Gas inputs accumulated by safe-mode epochs as `(storage, computation, rebates)`.
    pub const fn safe_mode_accumulators(&self) -> (u64, u64, u64) {
        (
            self.safe_mode_storage_charges,
            self.safe_mode_computation_rewards,
            self.safe_mode_storage_rebates,
        )
    }

    /// Total tokens held by the system.
    pub fn custody_total(&self) -> Result<u64, SystemStateError> {
        Ok(self
            .validators
            .custody()?
            .safe_add(self.storage_fund.total_balance()?)?
            .safe_add(self.stake_subsidy.balance())?
            .safe_add(self.safe_mode_storage_charges)?
            .safe_add(self.safe_mode_computation_rewards)?)
    }

    /// Advances to `params.new_epoch`, distributing the ending epoch's rewards.
    ///
    /// The gas charges are minted from `supply`. On error the state is left untouched.
    pub fn advance_epoch(
        &mut self,
        params: AdvanceEpochParams,
        supply: &mut Supply,
        ctx: &TxContext,
    ) -> Result<EpochOutcome, SystemStateError> {
        self.check_epoch_transition(params.new_epoch, ctx)?;
        for (name, rate) in [
            ("storage_fund_reinvest_rate", params.storage_fund_reinvest_rate),
            ("reward_slashing_rate", params.reward_slashing_rate),
        ] {
            if !is_valid_bps(rate) {
                return Err(SystemStateError::RateOutOfRange { name, rate })
            }
        }

        let mut next = self.clone();
        let outcome = next.apply_epoch_transition(params)?;
        let charges = params.storage_charge.safe_add(params.computation_charge)?;
        // The charges are now accounted for by the storage fund and the validator set.
        supply.increase_supply(charges)?.into_custody();
        *self = next;

        info!(
            target: "staking::system",
            epoch = self.epoch,
            reference_gas_price = self.reference_gas_price,
            total_stake = outcome.summary.total_stake,
            distributed = outcome.summary.total_stake_rewards_distributed,
            subsidy = outcome.summary.stake_subsidy_amount,
            "advanced epoch"
        );
        Ok(outcome)
    }

    /// Advances the epoch clock only, keeping the gas inputs for the next regular transition.
    pub fn advance_epoch_safe_mode(
        &mut self,
        params: AdvanceEpochParams,
        supply: &mut Supply,
        ctx: &TxContext,
    ) -> Result<(), SystemStateError> {
        self.check_epoch_transition(params.new_epoch, ctx)?;
        let storage = self.safe_mode_storage_charges.safe_add(params.storage_charge)?;
        let computation = self.safe_mode_computation_rewards.safe_add(params.computation_charge)?;
        let rebates = self.safe_mode_storage_rebates.safe_add(params.storage_rebate)?;
        supply.increase_supply(params.storage_charge.safe_add(params.computation_charge)?)?.into_custody();

        self.safe_mode_storage_charges = storage;
        self.safe_mode_computation_rewards = computation;
        self.safe_mode_storage_rebates = rebates;
        self.epoch = params.new_epoch;
        self.protocol_version = params.next_protocol_version;
        self.epoch_start_timestamp_ms = params.epoch_start_timestamp_ms;
        self.safe_mode = true;
        warn!(target: "staking::system", epoch = self.epoch, "advanced epoch in safe mode");
        Ok(())
    }

    fn check_epoch_transition(
        &self,
        new_epoch: EpochId,
        ctx: &TxContext,
    ) -> Result<(), SystemStateError> {
        if ctx.sender != SYSTEM_ADDRESS {
            return Err(SystemStateError::NotSystemCaller(ctx.sender))
        }
        self.check_context(ctx)?;
        let expected = self.epoch.safe_add(1)?;
        if new_epoch != expected {
            return Err(SystemStateError::EpochMismatch { expected, actual: new_epoch })
        }
        Ok(())
    }

    /// Runs the regular transition in place. Callers discard `self` on error.
    fn apply_epoch_transition(
        &mut self,
        params: AdvanceEpochParams,
    ) -> Result<EpochOutcome, SystemStateError> {
        let storage_charge =
            params.storage_charge.safe_add(core::mem::take(&mut self.safe_mode_storage_charges))?;
        let computation_charge = params
            .computation_charge
            .safe_add(core::mem::take(&mut self.safe_mode_computation_rewards))?;
        let storage_rebate =
            params.storage_rebate.safe_add(core::mem::take(&mut self.safe_mode_storage_rebates))?;

        let total_stake = self.validators.total_stake();
        let storage_fund_balance = self.storage_fund.total_balance()?;
        let storage_fund_reward = mul_div_or_zero(
            computation_charge,
            storage_fund_balance,
            total_stake.safe_add(storage_fund_balance)?,
        )?;
        let storage_fund_reinvestment =
            apply_bps(storage_fund_reward, params.storage_fund_reinvest_rate)?;
        let storage_fund_validator_reward = storage_fund_reward.safe_sub(storage_fund_reinvestment)?;

        let subsidy_due = self.epoch >= self.parameters.stake_subsidy_start_epoch &&
            params.epoch_start_timestamp_ms >=
                self.epoch_start_timestamp_ms.safe_add(self.parameters.epoch_duration_ms)?;
        let stake_subsidy_amount =
            if subsidy_due { self.stake_subsidy.advance()?.into_custody() } else { 0 };
        let staking_reward =
            computation_charge.safe_sub(storage_fund_reward)?.safe_add(stake_subsidy_amount)?;
        debug!(
            target: "staking::system",
            epoch = params.new_epoch,
            staking_reward,
            storage_fund_reward = storage_fund_validator_reward,
            storage_fund_reinvestment,
            stake_subsidy_amount,
            "computed epoch rewards"
        );

        let advance = self.validators.advance_epoch(
            params.new_epoch,
            EpochRewards {
                staking: staking_reward,
                storage_fund: storage_fund_validator_reward,
                reward_slashing_rate: params.reward_slashing_rate,
            },
            &self.parameters,
        )?;

        self.epoch = params.new_epoch;
        self.protocol_version = params.next_protocol_version;
        self.epoch_start_timestamp_ms = params.epoch_start_timestamp_ms;
        self.safe_mode = false;

        let storage_rebate_balance = self.storage_fund.advance_epoch(
            storage_charge,
            storage_fund_reinvestment,
            advance.leftover,
            storage_rebate,
        )?;
        self.reference_gas_price = self.validators.derive_reference_gas_price()?;

        let summary = SystemEpochInfo {
            epoch: self.epoch,
            protocol_version: self.protocol_version,
            reference_gas_price: self.reference_gas_price,
            total_stake: self.validators.total_stake(),
            storage_charge,
            storage_fund_reinvestment,
            storage_rebate,
            storage_fund_balance: self.storage_fund.total_balance()?,
            stake_subsidy_amount,
            total_gas_fees: computation_charge,
            total_stake_rewards_distributed: advance.distributed,
            leftover_storage_fund_inflow: advance.leftover,
        };
        Ok(EpochOutcome {
            summary,
            validator_infos: advance.validator_infos,
            payouts: advance.payouts,
            storage_rebate: storage_rebate_balance,
        })
    }

    fn check_context(&self, ctx: &TxContext) -> Result<(), SystemStateError> {
        if ctx.epoch != self.epoch {
            return Err(SystemStateError::StaleContext { expected: self.epoch, actual: ctx.epoch })
        }
        Ok(())
    }

    /// Asks to join the validator set at the next epoch. The sender must be the candidate.
    pub fn request_add_validator(
        &mut self,
        validator: Validator,
        ctx: &TxContext,
    ) -> Result<(), SystemStateError> {
        self.check_context(ctx)?;
        if ctx.sender != validator.sui_address() {
            return Err(SystemStateError::NotValidatorSender {
                sender: ctx.sender,
                validator: validator.sui_address(),
            })
        }
        Ok(self.validators.request_add_validator(validator, &self.parameters)?)
    }

    /// Asks to leave the validator set at the next epoch.
    pub fn request_remove_validator(&mut self, ctx: &TxContext) -> Result<(), SystemStateError> {
        self.check_context(ctx)?;
        Ok(self.validators.request_remove_validator(ctx.sender)?)
    }

    pub fn request_add_stake(
        &mut self,
        stake: Balance,
        ctx: &TxContext,
    ) -> Result<(), SystemStateError> {
        self.check_context(ctx)?;
        Ok(self.validators.request_add_stake(ctx.sender, stake)?)
    }

    pub fn request_withdraw_stake(
        &mut self,
        amount: u64,
        ctx: &TxContext,
    ) -> Result<(), SystemStateError> {
        self.check_context(ctx)?;
        Ok(self.validators.request_withdraw_stake(ctx.sender, amount, &self.parameters)?)
    }

    pub fn request_set_gas_price(
        &mut self,
        gas_price: u64,
        ctx: &TxContext,
    ) -> Result<(), SystemStateError> {
        self.check_context(ctx)?;
        Ok(self.validators.request_set_gas_price(ctx.sender, gas_price)?)
    }

    pub fn request_set_commission_rate(
        &mut self,
        rate: u64,
        ctx: &TxContext,
    ) -> Result<(), SystemStateError> {
        self.check_context(ctx)?;
        Ok(self.validators.request_set_commission_rate(ctx.sender, rate)?)
    }

    /// Delegates `stake` to `validator_address`, returning the receipt.
    pub fn request_add_delegation(
        &mut self,
        validator_address: Address,
        stake: Balance,
        ctx: &TxContext,
    ) -> Result<StakedSui, SystemStateError> {
        self.check_context(ctx)?;
        Ok(self.validators.request_add_delegation(validator_address, stake, self.epoch)?)
    }

    /// Withdraws `pool_token_amount` tokens worth of `staked` on behalf of the sender.
    pub fn request_withdraw_delegation(
        &mut self,
        staked: StakedSui,
        pool_token_amount: u64,
        ctx: &TxContext,
    ) -> Result<DelegationWithdrawal, SystemStateError> {
        self.check_context(ctx)?;
        Ok(self.validators.request_withdraw_delegation(staked, pool_token_amount, ctx.sender)?)
    }

    pub fn report_validator(
        &mut self,
        reportee: Address,
        ctx: &TxContext,
    ) -> Result<(), SystemStateError> {
        self.check_context(ctx)?;
        Ok(self.validators.report_validator(ctx.sender, reportee)?)
    }

    pub fn undo_report_validator(
        &mut self,
        reportee: Address,
        ctx: &TxContext,
    ) -> Result<(), SystemStateError> {
        self.check_context(ctx)?;
        Ok(self.validators.undo_report_validator(ctx.sender, reportee)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ValidatorSetError, stake_subsidy::StakeSubsidySchedule,
        validator::tests::validator,
    };
    use assert_matches::assert_matches;

    fn state() -> SystemState {
        let subsidy = StakeSubsidy::new(
            Balance::from_custody(1_000),
            StakeSubsidySchedule {
                initial_distribution_amount: 10,
                period_length: 30,
                decrease_rate: 1_000,
            },
        )
        .unwrap();
        let parameters = SystemParameters {
            epoch_duration_ms: 0,
            min_validator_joining_stake: 100,
            validator_low_stake_threshold: 10,
            validator_very_low_stake_threshold: 5,
            ..Default::default()
        };
        let validators = (1..=4).map(|seed| validator(seed, 100)).collect();
        SystemState::new(validators, Balance::from_custody(0), subsidy, parameters, 1, 0).unwrap()
    }

    fn params(new_epoch: EpochId) -> AdvanceEpochParams {
        AdvanceEpochParams {
            new_epoch,
            next_protocol_version: 1,
            computation_charge: 390,
            reward_slashing_rate: 10_000,
            ..Default::default()
        }
    }

    #[test]
    fn advance_pays_subsidy_and_computation() {
        let mut state = state();
        let mut supply = Supply::new();
        let outcome = state.advance_epoch(params(1), &mut supply, &TxContext::system(0)).unwrap();
        assert_eq!(state.epoch(), 1);
        assert_eq!(outcome.summary.stake_subsidy_amount, 10);
        assert_eq!(outcome.summary.total_stake_rewards_distributed, 400);
        assert_eq!(outcome.summary.total_stake, 800);
        assert_eq!(supply.total(), 390);
        assert_eq!(state.custody_total().unwrap(), 400 + 1_000 + 390);
        assert_eq!(outcome.storage_rebate.value(), 0);
    }

    #[test]
    fn rejected_transition_leaves_state_untouched() {
        let mut state = state();
        let before = state.clone();
        let mut supply = Supply::new();

        assert_matches!(
            state.advance_epoch(params(1), &mut supply, &TxContext::new(Address::repeat_byte(1), 0)),
            Err(SystemStateError::NotSystemCaller(_))
        );
        assert_matches!(
            state.advance_epoch(params(2), &mut supply, &TxContext::system(0)),
            Err(SystemStateError::EpochMismatch { expected: 1, actual: 2 })
        );
        let bad_rate = AdvanceEpochParams { storage_fund_reinvest_rate: 10_001, ..params(1) };
        assert_matches!(
            state.advance_epoch(bad_rate, &mut supply, &TxContext::system(0)),
            Err(SystemStateError::RateOutOfRange { name: "storage_fund_reinvest_rate", .. })
        );
        let bad_rebate = AdvanceEpochParams { storage_rebate: 1, ..params(1) };
        assert_matches!(
            state.advance_epoch(bad_rebate, &mut supply, &TxContext::system(0)),
            Err(SystemStateError::StorageFund(_))
        );
        assert_eq!(state, before);
        assert_eq!(supply.total(), 0);
    }

    #[test]
    fn safe_mode_defers_rewards() {
        let mut state = state();
        let mut supply = Supply::new();
        state.advance_epoch_safe_mode(params(1), &mut supply, &TxContext::system(0)).unwrap();
        assert!(state.is_safe_mode());
        assert_eq!(state.epoch(), 1);
        assert_eq!(state.safe_mode_accumulators(), (0, 390, 0));
        assert_eq!(state.validators().total_stake(), 400);

        let outcome = state.advance_epoch(params(2), &mut supply, &TxContext::system(1)).unwrap();
        assert!(!state.is_safe_mode());
        assert_eq!(outcome.summary.total_gas_fees, 780);
        assert_eq!(state.safe_mode_accumulators(), (0, 0, 0));
        assert_eq!(state.custody_total().unwrap(), 400 + 1_000 + supply.total());
    }

    #[test]
    fn requests_check_sender_and_epoch() {
        let mut state = state();
        let sender = Address::repeat_byte(1);
        assert_matches!(
            state.request_set_gas_price(5, &TxContext::new(sender, 3)),
            Err(SystemStateError::StaleContext { expected: 0, actual: 3 })
        );
        assert_matches!(
            state.request_add_validator(validator(9, 100), &TxContext::new(sender, 0)),
            Err(SystemStateError::NotValidatorSender { .. })
        );
        assert_matches!(
            state.report_validator(sender, &TxContext::new(sender, 0)),
            Err(SystemStateError::ValidatorSet(ValidatorSetError::SelfReport(_)))
        );
        state.request_set_gas_price(5, &TxContext::new(sender, 0)).unwrap();
        assert_eq!(state.validators().active_validator(sender).unwrap().next_epoch_gas_price(), 5);
    }
}
