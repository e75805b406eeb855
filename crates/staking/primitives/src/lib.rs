//! Shared primitives for the staking economics engine.
//!
//! Amounts are denominated in the smallest unit of the native token and carried as `u64`.
//! Ratio math widens to `u128` through [`arith::mul_div`] before truncating back.

pub mod arith;
pub use arith::{apply_bps, mul_div, mul_div_or_zero, ArithError, SafeArith, SafeArithIter};

pub use alloy_primitives::{keccak256, Address, B256};

/// Epoch number.
pub type EpochId = u64;

/// Protocol version number.
pub type ProtocolVersion = u64;

/// Denominator of every basis-point rate.
pub const BASIS_POINT_DENOMINATOR: u64 = 10_000;

/// Smallest units per whole token.
pub const MIST_PER_SUI: u64 = 1_000_000_000;

/// Returns `true` if `rate` is a valid basis-point value.
#[inline]
pub const fn is_valid_bps(rate: u64) -> bool {
    rate <= BASIS_POINT_DENOMINATOR
}
