//! Error types of the economics engine.
//!
//! Every component surfaces its own error enum; [`ErrorKind`] folds them into the abort
//! classes the host reacts to.

use crate::staking_pool::PoolId;
use staking_primitives::{Address, ArithError, EpochId};

/// Coarse classification of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input parameters, such as an out of range rate or an unexpected epoch.
    Configuration,
    /// The operation referenced a validator, pool or record that does not exist.
    NotFound,
    /// The operation would create a second copy of a unique identity.
    Duplicate,
    /// The request is invalid for the caller, such as a self report.
    User,
    /// A post-condition failed. This always indicates a logic defect.
    InvariantViolation,
}

/// Failure of a [`Balance`](crate::Balance) or [`Supply`](crate::Supply) operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BalanceError {
    /// Tried to take more than the balance holds.
    #[error("insufficient balance: requested {requested}, available {available}")]
    Insufficient {
        /// Requested amount.
        requested: u64,
        /// Available amount.
        available: u64,
    },
    /// `destroy_zero` was called on a non-empty balance.
    #[error("balance of {0} is not zero")]
    NonZero(u64),
    /// Arithmetic failure.
    #[error(transparent)]
    Arith(#[from] ArithError),
}

impl BalanceError {
    /// Returns the abort class of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Insufficient { .. } | Self::NonZero(_) => ErrorKind::User,
            Self::Arith(_) => ErrorKind::InvariantViolation,
        }
    }
}

/// Failure of a staking pool operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StakingPoolError {
    #[error("no exchange rate recorded for epoch {0}")]
    MissingExchangeRate(EpochId),
    #[error("exchange rate for epoch {0} already recorded")]
    ExchangeRateAlreadyRecorded(EpochId),
    #[error("staked receipt belongs to pool {actual}, not {expected}")]
    WrongPool { expected: PoolId, actual: PoolId },
    #[error("pool is already active")]
    AlreadyActive,
    #[error("pool is not active")]
    NotActive,
    #[error("pool is inactive")]
    Inactive,
    #[error("delegation amount must be positive")]
    ZeroDelegation,
    #[error("stake of {amount} is below the minimum of {minimum}")]
    BelowStakingThreshold { amount: u64, minimum: u64 },
    #[error("cannot withdraw {requested} pool tokens out of {available}")]
    InvalidPoolTokenAmount { requested: u64, available: u64 },
    #[error("pool token balance {actual} does not match {expected} derived from the exchange rate")]
    PoolTokenBalanceMismatch { expected: u64, actual: u64 },
    #[error("rewards pool {rewards} exceeds pool balance {balance}")]
    RewardsExceedBalance { rewards: u64, balance: u64 },
    #[error("{pending} pool tokens queued for withdrawal exceed the supply of {supply}")]
    PendingWithdrawsExceedSupply { pending: u64, supply: u64 },
    #[error(transparent)]
    Balance(#[from] BalanceError),
    #[error(transparent)]
    Arith(#[from] ArithError),
}

impl StakingPoolError {
    /// Returns the abort class of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingExchangeRate(_) |
            Self::ExchangeRateAlreadyRecorded(_) |
            Self::PoolTokenBalanceMismatch { .. } |
            Self::RewardsExceedBalance { .. } |
            Self::PendingWithdrawsExceedSupply { .. } |
            Self::Arith(_) => ErrorKind::InvariantViolation,
            Self::AlreadyActive | Self::NotActive | Self::Inactive => ErrorKind::Configuration,
            Self::WrongPool { .. } |
            Self::ZeroDelegation |
            Self::BelowStakingThreshold { .. } |
            Self::InvalidPoolTokenAmount { .. } => ErrorKind::User,
            Self::Balance(err) => err.kind(),
        }
    }
}

/// Failure of a single validator operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidatorError {
    #[error("invalid validator metadata: {0}")]
    InvalidMetadata(&'static str),
    #[error("commission rate {rate} exceeds the maximum of {max}")]
    CommissionRateTooHigh { rate: u64, max: u64 },
    #[error("stake amount must be positive")]
    ZeroStake,
    #[error("withdrawing {requested} would leave self-stake below the minimum of {minimum}")]
    StakeBelowMinimum { requested: u64, minimum: u64 },
    #[error(transparent)]
    Pool(#[from] StakingPoolError),
    #[error(transparent)]
    Balance(#[from] BalanceError),
    #[error(transparent)]
    Arith(#[from] ArithError),
}

impl ValidatorError {
    /// Returns the abort class of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidMetadata(_) |
            Self::CommissionRateTooHigh { .. } |
            Self::ZeroStake |
            Self::StakeBelowMinimum { .. } => ErrorKind::User,
            Self::Pool(err) => err.kind(),
            Self::Balance(err) => err.kind(),
            Self::Arith(_) => ErrorKind::InvariantViolation,
        }
    }
}

/// Failure while deriving or checking voting power.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VotingPowerError {
    #[error("cannot derive voting power for an empty validator set")]
    NoValidators,
    #[error("voting power sums to {actual}, expected {expected}")]
    TotalPowerMismatch { expected: u64, actual: u64 },
    #[error("validator at position {position} has voting power {power} above the cap")]
    PowerTooHigh { position: usize, power: u64 },
    #[error("voting power at position {position} is not ordered by stake")]
    RelativePowerMismatch { position: usize },
    #[error(transparent)]
    Arith(#[from] ArithError),
}

impl VotingPowerError {
    /// Returns the abort class of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NoValidators => ErrorKind::Configuration,
            _ => ErrorKind::InvariantViolation,
        }
    }
}

/// Failure of a validator-set operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidatorSetError {
    #[error("{0} is not an active validator")]
    NotActiveValidator(Address),
    #[error("{0} is neither an active nor a pending validator")]
    ValidatorNotFound(Address),
    #[error("no validator or inactive pool owns pool {0}")]
    PoolNotFound(PoolId),
    #[error("validator {0} collides with an active or pending validator")]
    DuplicateValidator(Address),
    #[error("pool {0} already exists")]
    DuplicatePool(PoolId),
    #[error("validator {0} already requested removal")]
    AlreadyPendingRemoval(Address),
    #[error("joining stake {stake} is below the minimum of {minimum}")]
    BelowJoiningStake { stake: u64, minimum: u64 },
    #[error("validator count limit of {0} reached")]
    TooManyValidators(u64),
    #[error("the active validator set would become empty")]
    EmptyValidatorSet,
    #[error("validator {0} cannot report itself")]
    SelfReport(Address),
    #[error("{reporter} has no report on record against {reportee}")]
    ReportRecordNotFound { reporter: Address, reportee: Address },
    #[error(transparent)]
    Validator(#[from] ValidatorError),
    #[error(transparent)]
    Pool(#[from] StakingPoolError),
    #[error(transparent)]
    VotingPower(#[from] VotingPowerError),
    #[error(transparent)]
    Balance(#[from] BalanceError),
    #[error(transparent)]
    Arith(#[from] ArithError),
}

impl ValidatorSetError {
    /// Returns the abort class of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotActiveValidator(_) | Self::ValidatorNotFound(_) | Self::PoolNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::DuplicateValidator(_) | Self::DuplicatePool(_) | Self::AlreadyPendingRemoval(_) => {
                ErrorKind::Duplicate
            }
            Self::BelowJoiningStake { .. } |
            Self::SelfReport(_) |
            Self::ReportRecordNotFound { .. } => ErrorKind::User,
            Self::TooManyValidators(_) | Self::EmptyValidatorSet => ErrorKind::Configuration,
            Self::Validator(err) => err.kind(),
            Self::Pool(err) => err.kind(),
            Self::VotingPower(err) => err.kind(),
            Self::Balance(err) => err.kind(),
            Self::Arith(_) => ErrorKind::InvariantViolation,
        }
    }
}

/// Failure of a stake subsidy operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StakeSubsidyError {
    #[error("decrease rate {0} exceeds 10000 basis points")]
    InvalidDecreaseRate(u64),
    #[error("subsidy period length must be positive")]
    ZeroPeriodLength,
    #[error(transparent)]
    Arith(#[from] ArithError),
}

impl StakeSubsidyError {
    /// Returns the abort class of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidDecreaseRate(_) | Self::ZeroPeriodLength => ErrorKind::Configuration,
            Self::Arith(_) => ErrorKind::InvariantViolation,
        }
    }
}

/// Failure of a storage fund operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageFundError {
    #[error("storage rebate {requested} exceeds the {available} held for rebates")]
    InsufficientRebates { requested: u64, available: u64 },
    #[error(transparent)]
    Arith(#[from] ArithError),
}

impl StorageFundError {
    /// Returns the abort class of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InsufficientRebates { .. } => ErrorKind::Configuration,
            Self::Arith(_) => ErrorKind::InvariantViolation,
        }
    }
}

/// Invalid [`SystemParameters`](crate::SystemParameters).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse parameters: {0}")]
    Parse(String),
    #[error("invalid parameters: {0}")]
    Invalid(&'static str),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Failure of a system-state operation, including the epoch transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SystemStateError {
    #[error("epoch transition must be sent by the system address, not {0}")]
    NotSystemCaller(Address),
    #[error("sender {sender} is not the validator {validator}")]
    NotValidatorSender { sender: Address, validator: Address },
    #[error("{name} of {rate} exceeds 10000 basis points")]
    RateOutOfRange { name: &'static str, rate: u64 },
    #[error("expected epoch {expected}, got {actual}")]
    EpochMismatch { expected: EpochId, actual: EpochId },
    #[error("transaction context is at epoch {actual}, state is at epoch {expected}")]
    StaleContext { expected: EpochId, actual: EpochId },
    #[error(transparent)]
    ValidatorSet(#[from] ValidatorSetError),
    #[error(transparent)]
    StorageFund(#[from] StorageFundError),
    #[error(transparent)]
    StakeSubsidy(#[from] StakeSubsidyError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Balance(#[from] BalanceError),
    #[error(transparent)]
    Arith(#[from] ArithError),
}

impl SystemStateError {
    /// Returns the abort class of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotSystemCaller(_) |
            Self::RateOutOfRange { .. } |
            Self::EpochMismatch { .. } |
            Self::StaleContext { .. } |
            Self::Config(_) => ErrorKind::Configuration,
            Self::NotValidatorSender { .. } => ErrorKind::User,
            Self::ValidatorSet(err) => err.kind(),
            Self::StorageFund(err) => err.kind(),
            Self::StakeSubsidy(err) => err.kind(),
            Self::Balance(err) => err.kind(),
            Self::Arith(_) => ErrorKind::InvariantViolation,
        }
    }
}

impl From<ValidatorError> for SystemStateError {
    fn from(err: ValidatorError) -> Self {
        Self::ValidatorSet(err.into())
    }
}

impl From<StakingPoolError> for SystemStateError {
    fn from(err: StakingPoolError) -> Self {
        Self::ValidatorSet(err.into())
    }
}
