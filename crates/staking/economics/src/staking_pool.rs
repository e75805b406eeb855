//! Pooled delegation with a historical exchange rate.
//!
//! Delegators never hold per-epoch reward entries. Their claim is a number of pool tokens,
//! fixed at the exchange rate of the epoch their stake was processed in. Rewards raise the
//! amount of stake behind each token, so converting the same tokens back at a later rate
//! yields principal plus the rewards earned in between.
//!
//! Lifecycle of a pool: preactive while its validator is a candidate, active from the epoch
//! the validator joins, inactive once the validator leaves. Inactive pools receive no more
//! rewards but keep honouring withdrawals at the rate of their deactivation epoch.

use crate::{
    balance::Balance,
    error::{BalanceError, StakingPoolError},
};
use serde::{Deserialize, Serialize};
use staking_primitives::{
    keccak256, mul_div, Address, EpochId, SafeArith, SafeArithIter, B256, MIST_PER_SUI,
};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Minimum principal of a [`StakedSui`] receipt after a split.
pub const MIN_STAKING_THRESHOLD: u64 = MIST_PER_SUI;

/// Stable identifier of a staking pool.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, derive_more::Display,
)]
pub struct PoolId(B256);

impl PoolId {
    /// Derives the id of the pool created by `validator` at `epoch`.
    pub fn derive(validator: Address, epoch: EpochId) -> Self {
        let mut preimage = [0u8; 28];
        preimage[..20].copy_from_slice(validator.as_slice());
        preimage[20..].copy_from_slice(&epoch.to_be_bytes());
        Self(keccak256(preimage))
    }
}

/// Stake backing `pool_token_amount` pool tokens at some epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolTokenExchangeRate {
    /// Stake held by the pool.
    pub sui_amount: u64,
    /// Pool tokens outstanding.
    pub pool_token_amount: u64,
}

impl PoolTokenExchangeRate {
    /// Creates a rate from the pool's stake and token supply.
    pub const fn new(sui_amount: u64, pool_token_amount: u64) -> Self {
        Self { sui_amount, pool_token_amount }
    }

    /// Returns `true` while either side is zero, in which case conversions are 1:1.
    pub const fn is_identity(&self) -> bool {
        self.sui_amount == 0 || self.pool_token_amount == 0
    }

    /// Converts pool tokens to stake, rounding down.
    pub fn get_sui_amount(&self, token_amount: u64) -> Result<u64, StakingPoolError> {
        if self.is_identity() {
            return Ok(token_amount)
        }
        Ok(mul_div(token_amount, self.sui_amount, self.pool_token_amount)?)
    }

    /// Converts stake to pool tokens, rounding down.
    pub fn get_token_amount(&self, sui_amount: u64) -> Result<u64, StakingPoolError> {
        if self.is_identity() {
            return Ok(sui_amount)
        }
        Ok(mul_div(sui_amount, self.pool_token_amount, self.sui_amount)?)
    }
}

/// A delegator's receipt for stake deposited into a pool.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "the receipt is the only claim on the staked principal"]
pub struct StakedSui {
    pool_id: PoolId,
    validator_address: Address,
    stake_activation_epoch: EpochId,
    principal: Balance,
}

impl StakedSui {
    /// Pool this receipt belongs to.
    pub const fn pool_id(&self) -> PoolId {
        self.pool_id
    }

    /// Validator operating the pool at the time of staking.
    pub const fn validator_address(&self) -> Address {
        self.validator_address
    }

    /// First epoch in which the stake earns rewards.
    pub const fn stake_activation_epoch(&self) -> EpochId {
        self.stake_activation_epoch
    }

    /// Principal held by the receipt.
    pub const fn principal(&self) -> u64 {
        self.principal.value()
    }

    /// Returns `true` if both receipts can be joined.
    pub fn is_equal_staking_metadata(&self, other: &Self) -> bool {
        self.pool_id == other.pool_id && self.stake_activation_epoch == other.stake_activation_epoch
    }

    /// Splits `amount` of principal into a new receipt.
    ///
    /// Both resulting receipts must hold at least [`MIN_STAKING_THRESHOLD`].
    pub fn split(&mut self, amount: u64) -> Result<Self, StakingPoolError> {
        let remaining = self.principal().checked_sub(amount).ok_or(BalanceError::Insufficient {
            requested: amount,
            available: self.principal(),
        })?;
        for part in [amount, remaining] {
            if part < MIN_STAKING_THRESHOLD {
                return Err(StakingPoolError::BelowStakingThreshold {
                    amount: part,
                    minimum: MIN_STAKING_THRESHOLD,
                })
            }
        }
        Ok(Self {
            pool_id: self.pool_id,
            validator_address: self.validator_address,
            stake_activation_epoch: self.stake_activation_epoch,
            principal: self.principal.split(amount)?,
        })
    }

    /// Merges `other` into this receipt.
    ///
    /// Receipts of different pools or activation epochs are handed back unchanged.
    pub fn join(&mut self, other: Self) -> Result<(), Self> {
        let Some(total) = self
            .principal()
            .checked_add(other.principal())
            .filter(|_| self.is_equal_staking_metadata(&other))
        else {
            return Err(other)
        };
        self.principal = Balance::from_custody(total);
        Ok(())
    }

    fn into_principal(self) -> Balance {
        self.principal
    }
}

/// A withdrawal whose reward is settled at the next epoch boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWithdraw {
    /// Recipient of the reward.
    pub delegator: Address,
    /// Principal already returned to the delegator.
    pub principal_withdraw_amount: u64,
    /// Pool tokens burned by the withdrawal.
    pub pool_token_withdraw_amount: u64,
}

/// Result of a delegation withdrawal request.
#[derive(Debug)]
pub struct DelegationWithdrawal {
    /// Principal returned immediately.
    pub principal: Balance,
    /// Rewards paid immediately. Always zero for active pools, whose rewards settle at the
    /// next epoch boundary.
    pub rewards: Balance,
    /// Part of the receipt left staked after a partial withdrawal.
    pub remaining: Option<StakedSui>,
}

/// A reward settled at an epoch boundary for a queued withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RewardSettlement {
    pub(crate) delegator: Address,
    pub(crate) amount: u64,
}

/// Per-validator delegation pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakingPool {
    id: PoolId,
    validator_address: Address,
    activation_epoch: Option<EpochId>,
    deactivation_epoch: Option<EpochId>,
    /// Principal plus rewards attributed to pool token holders.
    sui_balance: u64,
    /// Reward tokens held in custody until claimed.
    rewards_pool: u64,
    pool_token_balance: u64,
    exchange_rates: BTreeMap<EpochId, PoolTokenExchangeRate>,
    pending_delegation: u64,
    pending_withdraws: Vec<PendingWithdraw>,
}

impl StakingPool {
    /// Creates a preactive pool for `validator_address`.
    pub fn new(validator_address: Address, created_epoch: EpochId) -> Self {
        Self {
            id: PoolId::derive(validator_address, created_epoch),
            validator_address,
            activation_epoch: None,
            deactivation_epoch: None,
            sui_balance: 0,
            rewards_pool: 0,
            pool_token_balance: 0,
            exchange_rates: BTreeMap::new(),
            pending_delegation: 0,
            pending_withdraws: Vec::new(),
        }
    }

    /// Pool identifier.
    pub const fn id(&self) -> PoolId {
        self.id
    }

    /// Validator operating the pool.
    pub const fn validator_address(&self) -> Address {
        self.validator_address
    }

    /// Epoch the pool became active, if it did.
    pub const fn activation_epoch(&self) -> Option<EpochId> {
        self.activation_epoch
    }

    /// Epoch the pool was deactivated, if it was.
    pub const fn deactivation_epoch(&self) -> Option<EpochId> {
        self.deactivation_epoch
    }

    /// Returns `true` before the pool's validator joins the active set.
    pub const fn is_preactive(&self) -> bool {
        self.activation_epoch.is_none()
    }

    /// Returns `true` once the pool's validator has left the active set.
    pub const fn is_inactive(&self) -> bool {
        self.deactivation_epoch.is_some()
    }

    /// Principal plus rewards attributed to pool token holders.
    pub const fn sui_balance(&self) -> u64 {
        self.sui_balance
    }

    /// Unclaimed rewards held by the pool.
    pub const fn rewards_pool(&self) -> u64 {
        self.rewards_pool
    }

    /// Pool tokens outstanding.
    pub const fn pool_token_balance(&self) -> u64 {
        self.pool_token_balance
    }

    /// Stake waiting to be added at the next epoch boundary.
    pub const fn pending_delegation(&self) -> u64 {
        self.pending_delegation
    }

    /// Withdrawals waiting for their reward.
    pub fn pending_withdraws(&self) -> &[PendingWithdraw] {
        &self.pending_withdraws
    }

    /// Full exchange-rate history.
    pub const fn exchange_rates(&self) -> &BTreeMap<EpochId, PoolTokenExchangeRate> {
        &self.exchange_rates
    }

    /// Exchange rate recorded for `epoch`.
    pub fn exchange_rate_at(&self, epoch: EpochId) -> Result<PoolTokenExchangeRate, StakingPoolError> {
        self.exchange_rates
            .get(&epoch)
            .copied()
            .ok_or(StakingPoolError::MissingExchangeRate(epoch))
    }

    /// Exchange rate the pool would record right now.
    pub const fn current_exchange_rate(&self) -> PoolTokenExchangeRate {
        PoolTokenExchangeRate::new(self.sui_balance, self.pool_token_balance)
    }

    /// Rate a receipt activating at `stake_activation_epoch` was converted at.
    ///
    /// This is the first rate recorded at or after the activation epoch: pending delegations
    /// are folded in at the first regular epoch boundary that reaches it.
    fn processed_exchange_rate(
        &self,
        stake_activation_epoch: EpochId,
    ) -> Result<PoolTokenExchangeRate, StakingPoolError> {
        self.exchange_rates
            .range(stake_activation_epoch..)
            .next()
            .map(|(_, rate)| *rate)
            .ok_or(StakingPoolError::MissingExchangeRate(stake_activation_epoch))
    }

    /// Returns `true` if the receipt's principal is still waiting in `pending_delegation`.
    fn is_pending_receipt(&self, staked: &StakedSui) -> bool {
        self.exchange_rates
            .last_key_value()
            .is_none_or(|(latest, _)| staked.stake_activation_epoch > *latest)
    }

    /// Pool tokens the receipt currently represents.
    pub fn pool_token_amount(&self, staked: &StakedSui) -> Result<u64, StakingPoolError> {
        self.check_pool(staked)?;
        if self.is_pending_receipt(staked) {
            return Ok(0)
        }
        self.processed_exchange_rate(staked.stake_activation_epoch)?
            .get_token_amount(staked.principal())
    }

    /// Records a delegation that becomes active at the next epoch.
    pub fn request_add_delegation(
        &mut self,
        stake: Balance,
        current_epoch: EpochId,
    ) -> Result<StakedSui, StakingPoolError> {
        if self.is_inactive() {
            return Err(StakingPoolError::Inactive)
        }
        if stake.value() == 0 {
            return Err(StakingPoolError::ZeroDelegation)
        }
        self.pending_delegation.safe_add_assign(stake.value())?;
        debug!(
            target: "staking::pool",
            pool = %self.id,
            amount = stake.value(),
            "delegation requested"
        );
        Ok(StakedSui {
            pool_id: self.id,
            validator_address: self.validator_address,
            stake_activation_epoch: current_epoch.safe_add(1)?,
            principal: stake,
        })
    }

    /// Withdraws `pool_token_amount` tokens worth of the receipt.
    ///
    /// * Stake that has not been processed yet is cancelled 1:1.
    /// * Inactive pools pay principal and rewards immediately at the deactivation rate.
    /// * Active pools return the principal immediately and queue the reward, which is settled
    ///   at the next epoch boundary once the rate of the ending epoch is known.
    pub fn request_withdraw_delegation(
        &mut self,
        staked: StakedSui,
        pool_token_amount: u64,
        delegator: Address,
    ) -> Result<DelegationWithdrawal, StakingPoolError> {
        self.check_pool(&staked)?;

        if self.is_pending_receipt(&staked) {
            let total = staked.principal();
            let (principal, remaining) = split_receipt(staked, pool_token_amount, total)?;
            self.pending_delegation.safe_sub_assign(principal.value())?;
            debug!(
                target: "staking::pool",
                pool = %self.id,
                amount = principal.value(),
                "pending delegation cancelled"
            );
            return Ok(DelegationWithdrawal { principal, rewards: Balance::zero(), remaining })
        }

        let total_tokens = self
            .processed_exchange_rate(staked.stake_activation_epoch)?
            .get_token_amount(staked.principal())?;
        let (principal, remaining) = split_receipt(staked, pool_token_amount, total_tokens)?;

        let rewards = if let Some(deactivation_epoch) = self.deactivation_epoch {
            let rate = self.exchange_rate_at(deactivation_epoch)?;
            Balance::from_custody(self.settle_withdraw(principal.value(), pool_token_amount, rate)?)
        } else {
            self.pending_withdraws.push(PendingWithdraw {
                delegator,
                principal_withdraw_amount: principal.value(),
                pool_token_withdraw_amount: pool_token_amount,
            });
            Balance::zero()
        };
        debug!(
            target: "staking::pool",
            pool = %self.id,
            principal = principal.value(),
            rewards = rewards.value(),
            tokens = pool_token_amount,
            "delegation withdrawn"
        );
        Ok(DelegationWithdrawal { principal, rewards, remaining })
    }

    /// Burns the withdrawn tokens and takes the reward out of custody.
    fn settle_withdraw(
        &mut self,
        principal_amount: u64,
        pool_token_amount: u64,
        rate: PoolTokenExchangeRate,
    ) -> Result<u64, StakingPoolError> {
        let total = rate.get_sui_amount(pool_token_amount)?;
        let reward = total.saturating_sub(principal_amount).min(self.rewards_pool);
        self.sui_balance.safe_sub_assign(principal_amount.safe_add(reward)?)?;
        self.pool_token_balance.safe_sub_assign(pool_token_amount)?;
        self.rewards_pool.safe_sub_assign(reward)?;
        Ok(reward)
    }

    /// Adds the rewards earned in the ending epoch and records the rate for `new_epoch`.
    pub fn deposit_rewards(&mut self, amount: u64, new_epoch: EpochId) -> Result<(), StakingPoolError> {
        if self.is_preactive() {
            return Err(StakingPoolError::NotActive)
        }
        if self.is_inactive() {
            return Err(StakingPoolError::Inactive)
        }
        if self.exchange_rates.contains_key(&new_epoch) {
            return Err(StakingPoolError::ExchangeRateAlreadyRecorded(new_epoch))
        }
        self.sui_balance.safe_add_assign(amount)?;
        self.rewards_pool.safe_add_assign(amount)?;
        let rate = self.current_exchange_rate();
        self.exchange_rates.insert(new_epoch, rate);
        trace!(
            target: "staking::pool",
            pool = %self.id,
            amount,
            epoch = new_epoch,
            sui = rate.sui_amount,
            tokens = rate.pool_token_amount,
            "rewards deposited"
        );
        Ok(())
    }

    /// Marks the pool active from `epoch` and records its opening rate.
    pub(crate) fn activate(&mut self, epoch: EpochId) -> Result<(), StakingPoolError> {
        if !self.is_preactive() {
            return Err(StakingPoolError::AlreadyActive)
        }
        if self.exchange_rates.contains_key(&epoch) {
            return Err(StakingPoolError::ExchangeRateAlreadyRecorded(epoch))
        }
        self.activation_epoch = Some(epoch);
        self.exchange_rates.insert(epoch, self.current_exchange_rate());
        Ok(())
    }

    /// Freezes the pool at `epoch`.
    pub(crate) fn deactivate(&mut self, epoch: EpochId) -> Result<(), StakingPoolError> {
        if self.is_preactive() {
            return Err(StakingPoolError::NotActive)
        }
        if self.is_inactive() {
            return Err(StakingPoolError::Inactive)
        }
        self.deactivation_epoch = Some(epoch);
        Ok(())
    }

    /// Settles queued withdrawals and folds in pending delegations at the rate of `new_epoch`.
    ///
    /// Returns the rewards owed to each withdrawing delegator.
    pub(crate) fn process_pending_delegations_and_withdraws(
        &mut self,
        new_epoch: EpochId,
    ) -> Result<Vec<RewardSettlement>, StakingPoolError> {
        let rate = self.exchange_rate_at(new_epoch)?;
        let mut settlements = Vec::with_capacity(self.pending_withdraws.len());
        for withdraw in core::mem::take(&mut self.pending_withdraws) {
            let amount = self.settle_withdraw(
                withdraw.principal_withdraw_amount,
                withdraw.pool_token_withdraw_amount,
                rate,
            )?;
            settlements.push(RewardSettlement { delegator: withdraw.delegator, amount });
        }

        self.sui_balance.safe_add_assign(core::mem::take(&mut self.pending_delegation))?;
        self.pool_token_balance = rate.get_token_amount(self.sui_balance)?;
        self.check_balance_invariants(new_epoch)?;
        Ok(settlements)
    }

    /// Checks the pool's accounting against the rate of `epoch`.
    ///
    /// The rewards pool is part of the pool balance, queued withdrawals are covered by the token
    /// supply, and the token supply matches the balance under the rate.
    pub fn check_balance_invariants(&self, epoch: EpochId) -> Result<(), StakingPoolError> {
        if self.rewards_pool > self.sui_balance {
            return Err(StakingPoolError::RewardsExceedBalance {
                rewards: self.rewards_pool,
                balance: self.sui_balance,
            })
        }
        let pending = self
            .pending_withdraws
            .iter()
            .map(|withdraw| withdraw.pool_token_withdraw_amount)
            .safe_sum()?;
        if pending > self.pool_token_balance {
            return Err(StakingPoolError::PendingWithdrawsExceedSupply {
                pending,
                supply: self.pool_token_balance,
            })
        }
        let expected = self.exchange_rate_at(epoch)?.get_token_amount(self.sui_balance)?;
        if expected != self.pool_token_balance {
            return Err(StakingPoolError::PoolTokenBalanceMismatch {
                expected,
                actual: self.pool_token_balance,
            })
        }
        Ok(())
    }

    fn check_pool(&self, staked: &StakedSui) -> Result<(), StakingPoolError> {
        if staked.pool_id != self.id {
            return Err(StakingPoolError::WrongPool { expected: self.id, actual: staked.pool_id })
        }
        Ok(())
    }
}

/// Takes the principal behind `pool_token_amount` of the receipt's `total_tokens`, returning it
/// together with what remains of the receipt.
fn split_receipt(
    mut staked: StakedSui,
    pool_token_amount: u64,
    total_tokens: u64,
) -> Result<(Balance, Option<StakedSui>), StakingPoolError> {
    if pool_token_amount > total_tokens || (pool_token_amount == 0 && total_tokens != 0) {
        return Err(StakingPoolError::InvalidPoolTokenAmount {
            requested: pool_token_amount,
            available: total_tokens,
        })
    }
    if pool_token_amount == total_tokens {
        return Ok((staked.into_principal(), None))
    }
    let amount = mul_div(staked.principal(), pool_token_amount, total_tokens)?;
    let principal = staked.principal.split(amount)?;
    Ok((principal, Some(staked)))
}
