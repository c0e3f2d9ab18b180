//! Chain index, coin views, and the stake index.

pub mod chain;
pub mod stakeindex;
pub mod view;

pub use chain::{BlockIndex, Chain};
pub use stakeindex::{StakeIndex, ZERO_KEY_ID};
pub use view::{Coin, CoinView, MemoryCoinView, UtxoView, ViewError};
