//! Epoch-transition economics of a proof-of-stake validator set.
//!
//! [`SystemState::advance_epoch`] is the single entry point run at every epoch boundary. It
//! sources the epoch's rewards from gas charges, the storage fund and the stake subsidy, hands
//! them to the [`ValidatorSet`] for distribution and slashing, and commits the membership and
//! stake changes requested during the epoch.
//!
//! Token amounts move between callers and the engine as [`Balance`] values, which cannot be
//! copied. Everything the engine holds is accounted for by [`SystemState::custody_total`].
#![allow(missing_docs)]

pub mod balance;
pub mod error;
pub mod events;
pub mod params;
pub mod reward;
pub mod stake_subsidy;
pub mod staking_pool;
pub mod storage_fund;
pub mod system_state;
pub mod validator;
pub mod validator_set;
pub mod voting_power;

pub use balance::{Balance, Supply};
pub use error::{
    BalanceError, ConfigError, ErrorKind, StakeSubsidyError, StakingPoolError, StorageFundError,
    SystemStateError, ValidatorError, ValidatorSetError, VotingPowerError,
};
pub use events::{SystemEpochInfo, ValidatorEpochInfo};
pub use params::{ReportRecordsPolicy, SystemParameters};
pub use stake_subsidy::{StakeSubsidy, StakeSubsidySchedule, STAKE_SUBSIDY_PERIOD_LENGTH};
pub use staking_pool::{
    DelegationWithdrawal, PendingWithdraw, PoolId, PoolTokenExchangeRate, StakedSui, StakingPool,
    MIN_STAKING_THRESHOLD,
};
pub use storage_fund::StorageFund;
pub use system_state::{AdvanceEpochParams, EpochOutcome, SystemState, TxContext, SYSTEM_ADDRESS};
pub use validator::{Validator, ValidatorMetadata, MAX_COMMISSION_RATE};
pub use validator_set::{Payout, PayoutKind, ValidatorSet};
pub use voting_power::{
    derive_voting_power, derive_voting_power_info, VotingPowerInfo, MAX_VOTING_POWER,
    QUORUM_THRESHOLD, TOTAL_VOTING_POWER,
};
