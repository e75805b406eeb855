use clap::Parser;
use staking_economics::derive_voting_power_info;

/// Derives voting power for a stake vector.
#[derive(Debug, Parser)]
pub(crate) struct Command {
    /// Stakes of the validators, in input order.
    #[arg(required = true, value_name = "STAKE")]
    stakes: Vec<u64>,
}

impl Command {
    pub(crate) fn execute(self) -> eyre::Result<()> {
        let mut infos = derive_voting_power_info(&self.stakes)?;
        infos.sort_by_key(|info| info.index);
        println!("{}", serde_json::to_string_pretty(&infos)?);
        Ok(())
    }
}
