use serde::{Deserialize, Serialize};
use super::{Direction, Entity};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    #[default]
    Pending,
    Won,
    Lost,
    Refunded,
}

/// Points staked on one round's direction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Bet {
    pub id: String,
    pub user_id: String,
    pub round_id: String,
    pub direction: Direction,
    pub amount: i64,
    pub status: BetStatus,
    /// Points credited back at settlement (stake included).
    pub payout: i64,
    pub created_date: u64,
    pub updated_date: u64,
}

impl Entity for Bet {
    const TABLE: &'static str = "bets";

    fn id(&self) -> &str {
        &self.id
    }
}
