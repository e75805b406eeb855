//! System parameters.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use staking_primitives::MIST_PER_SUI;

/// What happens to peer reports once an epoch ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportRecordsPolicy {
    /// Reports stay until the reporter withdraws them or either party leaves the set.
    #[default]
    Persist,
    /// All reports are cleared at every epoch boundary.
    Reset,
}

/// Tunable parameters of the validator set and the epoch transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SystemParameters {
    /// Minimum epoch length for the stake subsidy to be paid.
    pub epoch_duration_ms: u64,
    /// First epoch that pays a stake subsidy.
    pub stake_subsidy_start_epoch: u64,
    /// Minimum total stake of a joining validator.
    pub min_validator_joining_stake: u64,
    /// Self-stake a validator must keep when withdrawing.
    pub min_validator_stake: u64,
    /// Maximum number of active plus pending validators.
    pub max_validator_count: u64,
    /// Validators below this stake are at risk of removal.
    pub validator_low_stake_threshold: u64,
    /// Validators below this stake are removed at the next epoch boundary.
    pub validator_very_low_stake_threshold: u64,
    /// Epochs a validator may stay below the low stake threshold.
    pub validator_low_stake_grace_period: u64,
    /// Whether peer reports survive the epoch boundary.
    pub report_records_policy: ReportRecordsPolicy,
}

impl Default for SystemParameters {
    fn default() -> Self {
        Self {
            epoch_duration_ms: 24 * 60 * 60 * 1_000,
            stake_subsidy_start_epoch: 0,
            min_validator_joining_stake: 30_000_000 * MIST_PER_SUI,
            min_validator_stake: MIST_PER_SUI,
            max_validator_count: 150,
            validator_low_stake_threshold: 20_000_000 * MIST_PER_SUI,
            validator_very_low_stake_threshold: 15_000_000 * MIST_PER_SUI,
            validator_low_stake_grace_period: 7,
            report_records_policy: ReportRecordsPolicy::Persist,
        }
    }
}

impl SystemParameters {
    /// Parses and validates parameters from TOML. Missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let params: Self = toml::from_str(s)?;
        params.validate()?;
        Ok(params)
    }

    /// Checks the parameters for consistency.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.max_validator_count == 0 {
            return Err(ConfigError::Invalid("max_validator_count must be positive"))
        }
        if self.validator_very_low_stake_threshold > self.validator_low_stake_threshold {
            return Err(ConfigError::Invalid(
                "validator_very_low_stake_threshold exceeds validator_low_stake_threshold",
            ))
        }
        if self.validator_low_stake_threshold > self.min_validator_joining_stake {
            return Err(ConfigError::Invalid(
                "validator_low_stake_threshold exceeds min_validator_joining_stake",
            ))
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_are_valid() {
        SystemParameters::default().validate().unwrap();
        assert_eq!(SystemParameters::from_toml_str("").unwrap(), SystemParameters::default());
    }

    #[test]
    fn parses_overrides() {
        let params = SystemParameters::from_toml_str(
            r#"
            max_validator_count = 4
            min_validator_joining_stake = 100
            validator_low_stake_threshold = 50
            validator_very_low_stake_threshold = 10
            report_records_policy = "reset"
            "#,
        )
        .unwrap();
        assert_eq!(params.max_validator_count, 4);
        assert_eq!(params.report_records_policy, ReportRecordsPolicy::Reset);
        assert_eq!(params.validator_low_stake_grace_period, 7);
    }

    #[test]
    fn rejects_unknown_and_inconsistent_fields() {
        assert_matches!(SystemParameters::from_toml_str("bogus = 1"), Err(ConfigError::Parse(_)));
        assert_matches!(
            SystemParameters::from_toml_str("max_validator_count = 0"),
            Err(ConfigError::Invalid(_))
        );
        assert_matches!(
            SystemParameters::from_toml_str(
                "validator_low_stake_threshold = 1\nvalidator_very_low_stake_threshold = 2"
            ),
            Err(ConfigError::Invalid(_))
        );
    }
}
