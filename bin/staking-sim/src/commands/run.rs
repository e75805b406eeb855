use crate::scenario::Scenario;
use clap::Parser;
use eyre::{OptionExt, WrapErr};
use serde::Serialize;
use staking_economics::{
    AdvanceEpochParams, Balance, PayoutKind, StakeSubsidy, Supply, SystemEpochInfo, SystemState,
    TxContext, Validator, ValidatorEpochInfo,
};
use staking_primitives::{Address, EpochId, ProtocolVersion};
use std::path::PathBuf;
use tracing::info;

/// Runs a scenario from genesis.
#[derive(Debug, Parser)]
pub(crate) struct Command {
    /// Scenario file to run.
    #[arg(long, value_name = "FILE")]
    scenario: PathBuf,

    /// Number of epochs to simulate. Defaults to the epochs listed in the scenario.
    #[arg(long, value_name = "N")]
    epochs: Option<usize>,

    /// Also print one record per validator and epoch.
    #[arg(long)]
    validators: bool,
}

/// One line of simulator output.
#[derive(Debug, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum Record<'a> {
    Epoch(&'a SystemEpochInfo),
    Validator(&'a ValidatorEpochInfo),
    SafeMode { epoch: EpochId, protocol_version: ProtocolVersion },
    Payout { epoch: EpochId, recipient: Address, kind: PayoutKind, amount: u64 },
}

impl Record<'_> {
    fn emit(&self) -> eyre::Result<()> {
        println!("{}", serde_json::to_string(self)?);
        Ok(())
    }
}

impl Command {
    pub(crate) fn execute(self) -> eyre::Result<()> {
        let scenario = Scenario::load(&self.scenario)?;
        let mut supply = Supply::new();
        let mut state = genesis(&scenario, &mut supply)?;

        let mut receipts = Vec::with_capacity(scenario.delegations.len());
        for delegation in &scenario.delegations {
            let stake = supply.increase_supply(delegation.amount)?;
            let ctx = TxContext::new(delegation.delegator, state.epoch());
            let receipt = state
                .request_add_delegation(delegation.validator, stake, &ctx)
                .wrap_err_with(|| format!("delegation to {} failed", delegation.validator))?;
            receipts.push(receipt);
        }

        let epochs = self.epochs.unwrap_or(scenario.epochs.len());
        let mut paid_out = Balance::zero();
        let mut timestamp = state.epoch_start_timestamp_ms();
        for index in 0..epochs {
            let input = scenario.epoch(index);
            let epoch = state.epoch();
            for report in &input.reports {
                state
                    .report_validator(report.reportee, &TxContext::new(report.reporter, epoch))
                    .wrap_err_with(|| format!("report in epoch {epoch} failed"))?;
            }

            let duration = input.duration_ms.unwrap_or(state.parameters().epoch_duration_ms);
            timestamp = timestamp.checked_add(duration).ok_or_eyre("epoch timestamp overflow")?;
            let params = AdvanceEpochParams {
                new_epoch: epoch + 1,
                next_protocol_version: scenario.protocol_version,
                storage_charge: input.storage_charge,
                computation_charge: input.computation_charge,
                storage_rebate: input.storage_rebate,
                storage_fund_reinvest_rate: input.storage_fund_reinvest_rate,
                reward_slashing_rate: input.reward_slashing_rate,
                epoch_start_timestamp_ms: timestamp,
            };
            let ctx = TxContext::system(epoch);

            if input.safe_mode {
                state.advance_epoch_safe_mode(params, &mut supply, &ctx)?;
                Record::SafeMode { epoch: state.epoch(), protocol_version: state.protocol_version() }
                    .emit()?;
                continue
            }

            let outcome = state
                .advance_epoch(params, &mut supply, &ctx)
                .wrap_err_with(|| format!("epoch {} failed", epoch + 1))?;
            Record::Epoch(&outcome.summary).emit()?;
            if self.validators {
                for info in &outcome.validator_infos {
                    Record::Validator(info).emit()?;
                }
            }
            for payout in outcome.payouts {
                Record::Payout {
                    epoch: state.epoch(),
                    recipient: payout.recipient,
                    kind: payout.kind,
                    amount: payout.amount.value(),
                }
                .emit()?;
                paid_out.join(payout.amount)?;
            }
            paid_out.join(outcome.storage_rebate)?;
        }

        info!(
            target: "staking::sim",
            epochs,
            delegations = receipts.len(),
            supply = supply.total(),
            custody = state.custody_total()?,
            paid_out = paid_out.value(),
            "simulation finished"
        );
        Ok(())
    }
}

/// Mints the genesis balances and builds the initial state.
fn genesis(scenario: &Scenario, supply: &mut Supply) -> eyre::Result<SystemState> {
    let validators = scenario
        .validators
        .iter()
        .map(|config| {
            let stake = supply.increase_supply(config.stake)?;
            Validator::new(
                config.metadata.clone(),
                stake,
                config.gas_price,
                config.commission_rate,
                0,
            )
            .wrap_err_with(|| format!("invalid validator {}", config.metadata.name))
        })
        .collect::<eyre::Result<Vec<_>>>()?;
    let subsidy =
        StakeSubsidy::new(supply.increase_supply(scenario.subsidy.fund)?, scenario.subsidy.schedule)?;
    let storage_fund = supply.increase_supply(scenario.storage_fund)?;
    let state = SystemState::new(
        validators,
        storage_fund,
        subsidy,
        scenario.parameters.clone(),
        scenario.protocol_version,
        0,
    )?;
    info!(
        target: "staking::sim",
        validators = state.validators().active_validators().len(),
        total_stake = state.validators().total_stake(),
        "genesis ready"
    );
    Ok(state)
}
