//! Game rules on top of the entity store.

pub mod airdrop;
pub mod leaderboard;
pub mod price;
pub mod rounds;

pub use airdrop::{plan_airdrop, AirdropAllocation, AirdropPlan};
pub use leaderboard::{rank_users, RankingEntry};
pub use price::{PriceSimulator, PriceTicker};
pub use rounds::{RoundManager, Settlement};
