//! Records emitted by the epoch transition.

use crate::staking_pool::PoolTokenExchangeRate;
use serde::{Deserialize, Serialize};
use staking_primitives::{Address, EpochId, ProtocolVersion};

/// Summary of one epoch transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemEpochInfo {
    /// The epoch that just started.
    pub epoch: EpochId,
    pub protocol_version: ProtocolVersion,
    /// Reference gas price of the new epoch.
    pub reference_gas_price: u64,
    /// Active stake of the new epoch.
    pub total_stake: u64,
    pub storage_charge: u64,
    pub storage_fund_reinvestment: u64,
    pub storage_rebate: u64,
    /// Storage fund balance after the transition.
    pub storage_fund_balance: u64,
    pub stake_subsidy_amount: u64,
    /// Computation charges collected during the ending epoch.
    pub total_gas_fees: u64,
    pub total_stake_rewards_distributed: u64,
    /// Undistributed rewards moved into the storage fund.
    pub leftover_storage_fund_inflow: u64,
}

/// Per-validator record of one epoch transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorEpochInfo {
    pub epoch: EpochId,
    pub validator_address: Address,
    /// Gas price quoted for the new epoch.
    pub reference_gas_survey_quote: u64,
    /// Committed self-stake plus pool stake once the pool reward is deposited. The validator's
    /// own reward is still pending at this point and is not included.
    pub stake: u64,
    pub commission_rate: u64,
    /// Reward deposited into the validator's pool, net of commission.
    pub pool_staking_reward: u64,
    /// Share of the staking reward kept by the validator, commission included.
    pub validator_staking_reward: u64,
    /// Storage fund reward credited to the validator.
    pub storage_fund_staking_reward: u64,
    pub pool_token_exchange_rate: PoolTokenExchangeRate,
    /// Validators reporting this one.
    pub tallying_rule_reporters: Vec<Address>,
    /// Zero if the validator was slashed, one otherwise.
    pub tallying_rule_global_score: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validator_info_serializes_with_nested_rate() {
        let info = ValidatorEpochInfo {
            epoch: 3,
            validator_address: Address::repeat_byte(1),
            reference_gas_survey_quote: 20,
            stake: 1_100,
            commission_rate: 500,
            pool_staking_reward: 95,
            validator_staking_reward: 5,
            storage_fund_staking_reward: 0,
            pool_token_exchange_rate: PoolTokenExchangeRate::new(1_100, 1_000),
            tallying_rule_reporters: vec![Address::repeat_byte(2)],
            tallying_rule_global_score: 1,
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(
            value["pool_token_exchange_rate"],
            json!({ "sui_amount": 1_100, "pool_token_amount": 1_000 })
        );
        assert_eq!(value["tallying_rule_reporters"].as_array().map(Vec::len), Some(1));

        let decoded: ValidatorEpochInfo = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn system_info_uses_snake_case_fields() {
        let info = SystemEpochInfo {
            epoch: 1,
            protocol_version: 2,
            total_stake: 4_000,
            stake_subsidy_amount: 100,
            leftover_storage_fund_inflow: 3,
            ..Default::default()
        };
        let text = serde_json::to_string(&info).unwrap();
        assert!(text.contains("\"leftover_storage_fund_inflow\":3"));
        assert_eq!(serde_json::from_str::<SystemEpochInfo>(&text).unwrap(), info);
    }
}
