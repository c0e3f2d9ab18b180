//! Consensus constants and parameters.

pub mod money;
pub mod params;

pub use money::{money_range, Amount, CENT, COIN, MAX_MONEY};
pub use params::{consensus_params, ConsensusParams, Network};

pub type Hash256 = [u8; 32];
