use serde::{Deserialize, Serialize};
use super::Entity;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    #[default]
    Open,
    Settled,
}

/// A fixed-duration betting window with a start/end price snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Round {
    pub id: String,
    pub symbol: String,
    pub start_time: u64,
    pub end_time: u64,
    pub start_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_price: Option<f64>,
    pub status: RoundStatus,
    pub created_date: u64,
    pub updated_date: u64,
}

impl Round {
    /// Whether the round still takes bets at `now`.
    pub fn accepts_entries(&self, now: u64) -> bool {
        self.status == RoundStatus::Open && now < self.end_time
    }

    pub fn is_due(&self, now: u64) -> bool {
        self.status == RoundStatus::Open && now >= self.end_time
    }
}

impl Entity for Round {
    const TABLE: &'static str = "rounds";

    fn id(&self) -> &str {
        &self.id
    }
}
