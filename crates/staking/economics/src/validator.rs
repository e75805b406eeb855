//! A single validator: self-stake, staged quotes and its staking pool.

use crate::{
    balance::Balance,
    error::ValidatorError,
    staking_pool::{DelegationWithdrawal, StakedSui, StakingPool},
};
use serde::{Deserialize, Serialize};
use staking_primitives::{Address, EpochId, SafeArith};
use tracing::debug;

/// Highest commission a validator may charge, in basis points.
pub const MAX_COMMISSION_RATE: u64 = 2_000;

/// Longest accepted metadata string, in bytes.
pub const MAX_VALIDATOR_METADATA_LENGTH: usize = 256;

/// Identity and endpoints of a validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorMetadata {
    /// Account receiving the validator's stake and rewards.
    pub sui_address: Address,
    /// Human readable name, unique across the validator set.
    pub name: String,
    /// Free form description.
    #[serde(default)]
    pub description: String,
    /// Consensus network endpoint.
    pub net_address: String,
    /// Peer to peer endpoint.
    pub p2p_address: String,
}

impl ValidatorMetadata {
    /// Checks that the metadata is well formed.
    pub fn validate(&self) -> Result<(), ValidatorError> {
        if self.name.is_empty() {
            return Err(ValidatorError::InvalidMetadata("name is empty"))
        }
        if self.net_address.is_empty() || self.p2p_address.is_empty() {
            return Err(ValidatorError::InvalidMetadata("network address is empty"))
        }
        let fields = [&self.name, &self.description, &self.net_address, &self.p2p_address];
        if fields.iter().any(|field| field.len() > MAX_VALIDATOR_METADATA_LENGTH) {
            return Err(ValidatorError::InvalidMetadata("field too long"))
        }
        Ok(())
    }
}

/// One validator and its delegation pool.
///
/// Committed fields (`stake_amount`, `gas_price`, `commission_rate`) only change at epoch
/// boundaries. Requests during an epoch stage their effect in the pending fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validator {
    metadata: ValidatorMetadata,
    voting_power: u64,
    stake_amount: u64,
    pending_stake: u64,
    pending_withdraw: u64,
    gas_price: u64,
    next_epoch_gas_price: u64,
    commission_rate: u64,
    next_epoch_commission_rate: u64,
    staking_pool: StakingPool,
}

impl Validator {
    /// Creates a validator candidate holding `stake` as its self-stake.
    pub fn new(
        metadata: ValidatorMetadata,
        stake: Balance,
        gas_price: u64,
        commission_rate: u64,
        created_epoch: EpochId,
    ) -> Result<Self, ValidatorError> {
        metadata.validate()?;
        check_commission_rate(commission_rate)?;
        let staking_pool = StakingPool::new(metadata.sui_address, created_epoch);
        Ok(Self {
            metadata,
            voting_power: 0,
            stake_amount: stake.into_custody(),
            pending_stake: 0,
            pending_withdraw: 0,
            gas_price,
            next_epoch_gas_price: gas_price,
            commission_rate,
            next_epoch_commission_rate: commission_rate,
            staking_pool,
        })
    }

    pub const fn metadata(&self) -> &ValidatorMetadata {
        &self.metadata
    }

    pub const fn sui_address(&self) -> Address {
        self.metadata.sui_address
    }

    pub const fn voting_power(&self) -> u64 {
        self.voting_power
    }

    pub(crate) const fn set_voting_power(&mut self, voting_power: u64) {
        self.voting_power = voting_power;
    }

    /// Committed self-stake.
    pub const fn stake_amount(&self) -> u64 {
        self.stake_amount
    }

    pub const fn pending_stake(&self) -> u64 {
        self.pending_stake
    }

    pub const fn pending_withdraw(&self) -> u64 {
        self.pending_withdraw
    }

    pub const fn gas_price(&self) -> u64 {
        self.gas_price
    }

    pub const fn next_epoch_gas_price(&self) -> u64 {
        self.next_epoch_gas_price
    }

    pub const fn commission_rate(&self) -> u64 {
        self.commission_rate
    }

    pub const fn next_epoch_commission_rate(&self) -> u64 {
        self.next_epoch_commission_rate
    }

    pub const fn staking_pool(&self) -> &StakingPool {
        &self.staking_pool
    }

    pub(crate) const fn staking_pool_mut(&mut self) -> &mut StakingPool {
        &mut self.staking_pool
    }

    /// Stake delegated through the pool, rewards included.
    pub const fn delegation_amount(&self) -> u64 {
        self.staking_pool.sui_balance()
    }

    /// Self-stake plus delegated stake.
    pub fn total_stake(&self) -> Result<u64, ValidatorError> {
        Ok(self.stake_amount.safe_add(self.delegation_amount())?)
    }

    /// Self-stake and pending self-stake, the amount held in custody for the validator.
    pub(crate) fn self_custody(&self) -> Result<u64, ValidatorError> {
        Ok(self.stake_amount.safe_add(self.pending_stake)?)
    }

    /// Returns `true` if `other` shares an address, name or network endpoint.
    pub fn is_duplicate(&self, other: &Self) -> bool {
        let (a, b) = (&self.metadata, &other.metadata);
        a.sui_address == b.sui_address ||
            a.name == b.name ||
            a.net_address == b.net_address ||
            a.p2p_address == b.p2p_address
    }

    /// Stages additional self-stake for the next epoch.
    pub fn request_add_stake(&mut self, stake: Balance) -> Result<(), ValidatorError> {
        if stake.value() == 0 {
            return Err(ValidatorError::ZeroStake)
        }
        self.pending_stake.safe_add_assign(stake.into_custody())?;
        Ok(())
    }

    /// Stages a self-stake withdrawal paid out at the next epoch boundary.
    ///
    /// Committed plus pending self-stake must stay at or above `min_validator_stake`.
    pub fn request_withdraw_stake(
        &mut self,
        amount: u64,
        min_validator_stake: u64,
    ) -> Result<(), ValidatorError> {
        if amount == 0 {
            return Err(ValidatorError::ZeroStake)
        }
        let below_minimum =
            ValidatorError::StakeBelowMinimum { requested: amount, minimum: min_validator_stake };
        let remaining = self
            .self_custody()?
            .checked_sub(self.pending_withdraw)
            .and_then(|stake| stake.checked_sub(amount))
            .ok_or_else(|| below_minimum.clone())?;
        if remaining < min_validator_stake {
            return Err(below_minimum)
        }
        self.pending_withdraw.safe_add_assign(amount)?;
        Ok(())
    }

    /// Stages the gas price quoted for the next epoch.
    pub const fn request_set_gas_price(&mut self, gas_price: u64) {
        self.next_epoch_gas_price = gas_price;
    }

    /// Stages the commission rate charged from the next epoch.
    pub fn request_set_commission_rate(&mut self, rate: u64) -> Result<(), ValidatorError> {
        check_commission_rate(rate)?;
        self.next_epoch_commission_rate = rate;
        Ok(())
    }

    /// Delegates `stake` to this validator's pool.
    pub fn request_add_delegation(
        &mut self,
        stake: Balance,
        current_epoch: EpochId,
    ) -> Result<StakedSui, ValidatorError> {
        Ok(self.staking_pool.request_add_delegation(stake, current_epoch)?)
    }

    /// Withdraws delegated stake from this validator's pool.
    pub fn request_withdraw_delegation(
        &mut self,
        staked: StakedSui,
        pool_token_amount: u64,
        delegator: Address,
    ) -> Result<DelegationWithdrawal, ValidatorError> {
        Ok(self.staking_pool.request_withdraw_delegation(staked, pool_token_amount, delegator)?)
    }

    /// Compounds the validator's own share of the epoch reward into pending self-stake.
    pub(crate) fn deposit_stake_rewards(&mut self, amount: u64) -> Result<(), ValidatorError> {
        self.pending_stake.safe_add_assign(amount)?;
        Ok(())
    }

    /// Commits staged self-stake changes and quotes for the new epoch.
    ///
    /// Returns the self-stake withdrawn, to be paid out to the validator.
    pub(crate) fn adjust_stake_and_gas_price(&mut self) -> Result<Balance, ValidatorError> {
        let withdrawn = core::mem::take(&mut self.pending_withdraw);
        self.stake_amount = self
            .stake_amount
            .safe_add(core::mem::take(&mut self.pending_stake))?
            .safe_sub(withdrawn)?;
        self.gas_price = self.next_epoch_gas_price;
        self.commission_rate = self.next_epoch_commission_rate;
        debug!(
            target: "staking::validator",
            validator = %self.sui_address(),
            stake = self.stake_amount,
            withdrawn,
            gas_price = self.gas_price,
            commission_rate = self.commission_rate,
            "committed pending stake"
        );
        Ok(Balance::from_custody(withdrawn))
    }

    /// Consumes a removed validator, returning its pool and all self-stake in custody.
    pub(crate) fn into_parts(self) -> Result<(StakingPool, Balance), ValidatorError> {
        let stake = self.self_custody()?;
        Ok((self.staking_pool, Balance::from_custody(stake)))
    }
}

const fn check_commission_rate(rate: u64) -> Result<(), ValidatorError> {
    if rate > MAX_COMMISSION_RATE {
        return Err(ValidatorError::CommissionRateTooHigh { rate, max: MAX_COMMISSION_RATE })
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;

    pub(crate) fn metadata(seed: u8) -> ValidatorMetadata {
        ValidatorMetadata {
            sui_address: Address::repeat_byte(seed),
            name: format!("validator-{seed}"),
            description: String::new(),
            net_address: format!("/ip4/10.0.0.{seed}/tcp/8080"),
            p2p_address: format!("/ip4/10.0.0.{seed}/udp/8084"),
        }
    }

    pub(crate) fn validator(seed: u8, stake: u64) -> Validator {
        Validator::new(metadata(seed), Balance::from_custody(stake), 1_000, 0, 0).unwrap()
    }

    #[test]
    fn rejects_bad_metadata_and_commission() {
        let mut bad = metadata(1);
        bad.name.clear();
        assert_matches!(
            Validator::new(bad, Balance::zero(), 1, 0, 0),
            Err(ValidatorError::InvalidMetadata(_))
        );

        let mut long = metadata(1);
        long.description = "x".repeat(MAX_VALIDATOR_METADATA_LENGTH + 1);
        assert!(long.validate().is_err());

        assert_matches!(
            Validator::new(metadata(1), Balance::zero(), 1, MAX_COMMISSION_RATE + 1, 0),
            Err(ValidatorError::CommissionRateTooHigh { .. })
        );
    }

    #[test]
    fn stake_changes_commit_at_boundary() {
        let mut v = validator(1, 100);
        v.request_add_stake(Balance::from_custody(50)).unwrap();
        v.request_withdraw_stake(30, 100).unwrap();
        assert_eq!(v.stake_amount(), 100);

        assert_matches!(
            v.request_withdraw_stake(21, 100),
            Err(ValidatorError::StakeBelowMinimum { requested: 21, minimum: 100 })
        );

        v.request_set_gas_price(7);
        v.request_set_commission_rate(500).unwrap();
        assert_eq!((v.gas_price(), v.commission_rate()), (1_000, 0));

        let withdrawn = v.adjust_stake_and_gas_price().unwrap();
        assert_eq!(withdrawn.value(), 30);
        assert_eq!(v.stake_amount(), 120);
        assert_eq!((v.pending_stake(), v.pending_withdraw()), (0, 0));
        assert_eq!((v.gas_price(), v.commission_rate()), (7, 500));
    }

    #[test]
    fn duplicates_match_any_identity_field() {
        let a = validator(1, 1);
        let mut b = validator(2, 1);
        assert!(!a.is_duplicate(&b));
        b.metadata.p2p_address = a.metadata.p2p_address.clone();
        assert!(a.is_duplicate(&b));
        let mut c = validator(3, 1);
        c.metadata.name = a.metadata.name.clone();
        assert!(c.is_duplicate(&a));
    }
}
