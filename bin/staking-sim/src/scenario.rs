//! Scenario files driving a simulation.

use eyre::WrapErr;
use serde::Deserialize;
use staking_economics::{StakeSubsidySchedule, SystemParameters, ValidatorMetadata};
use staking_primitives::{Address, ProtocolVersion};
use std::path::Path;

/// A genesis configuration and the inputs of every simulated epoch.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Scenario {
    #[serde(default = "default_protocol_version")]
    pub(crate) protocol_version: ProtocolVersion,
    /// Initial, non-refundable storage fund.
    #[serde(default)]
    pub(crate) storage_fund: u64,
    #[serde(default)]
    pub(crate) parameters: SystemParameters,
    pub(crate) subsidy: SubsidyConfig,
    pub(crate) validators: Vec<ValidatorConfig>,
    #[serde(default)]
    pub(crate) delegations: Vec<DelegationConfig>,
    /// Per-epoch inputs. Runs longer than the list repeat the last entry.
    #[serde(default)]
    pub(crate) epochs: Vec<EpochInput>,
}

const fn default_protocol_version() -> ProtocolVersion {
    1
}

/// Stake subsidy reserve and schedule.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SubsidyConfig {
    pub(crate) fund: u64,
    #[serde(flatten)]
    pub(crate) schedule: StakeSubsidySchedule,
}

/// A genesis validator.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ValidatorConfig {
    #[serde(flatten)]
    pub(crate) metadata: ValidatorMetadata,
    pub(crate) stake: u64,
    pub(crate) gas_price: u64,
    #[serde(default)]
    pub(crate) commission_rate: u64,
}

/// A delegation made before the first epoch boundary.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct DelegationConfig {
    pub(crate) delegator: Address,
    pub(crate) validator: Address,
    pub(crate) amount: u64,
}

/// Inputs of one epoch.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct EpochInput {
    pub(crate) computation_charge: u64,
    pub(crate) storage_charge: u64,
    pub(crate) storage_rebate: u64,
    pub(crate) storage_fund_reinvest_rate: u64,
    pub(crate) reward_slashing_rate: u64,
    /// Epoch length; defaults to the configured minimum epoch duration.
    pub(crate) duration_ms: Option<u64>,
    /// Advance in safe mode instead of distributing rewards.
    pub(crate) safe_mode: bool,
    /// Reports filed during the epoch.
    pub(crate) reports: Vec<ReportConfig>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ReportConfig {
    pub(crate) reporter: Address,
    pub(crate) reportee: Address,
}

impl Scenario {
    /// Reads a scenario from a TOML file.
    pub(crate) fn load(path: &Path) -> eyre::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read scenario {}", path.display()))?;
        Self::parse(&contents).wrap_err_with(|| format!("invalid scenario {}", path.display()))
    }

    pub(crate) fn parse(contents: &str) -> eyre::Result<Self> {
        let scenario: Self = toml::from_str(contents)?;
        scenario.parameters.validate()?;
        if scenario.validators.is_empty() {
            eyre::bail!("scenario has no validators")
        }
        Ok(scenario)
    }

    /// Inputs of the epoch ending at boundary `index`.
    pub(crate) fn epoch(&self, index: usize) -> EpochInput {
        self.epochs.get(index).or_else(|| self.epochs.last()).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bundled_example() {
        let scenario = Scenario::parse(include_str!("../scenarios/example.toml")).unwrap();
        assert_eq!(scenario.validators.len(), 4);
        assert_eq!(scenario.subsidy.schedule.period_length, 30);
        assert!(scenario.epochs.iter().any(|epoch| epoch.safe_mode));
        let last = scenario.epochs.len() - 1;
        assert_eq!(
            scenario.epoch(last + 10).computation_charge,
            scenario.epochs[last].computation_charge
        );
    }

    #[test]
    fn rejects_empty_validator_set() {
        let err = Scenario::parse(
            "validators = []\n[subsidy]\nfund = 0\ninitial_distribution_amount = 0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("no validators"));
    }
}
