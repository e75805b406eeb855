//! Subcommands of the simulator.

pub(crate) mod run;
pub(crate) mod voting_power;
