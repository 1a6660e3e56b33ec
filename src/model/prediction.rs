use serde::{Deserialize, Serialize};
use super::{Direction, Entity};

/// An unstaked call on a round's direction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Prediction {
    pub id: String,
    pub user_id: String,
    pub round_id: String,
    pub direction: Direction,
    /// Set when the round settles; stays `None` if the price did not move.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct: Option<bool>,
    pub created_date: u64,
    pub updated_date: u64,
}

impl Entity for Prediction {
    const TABLE: &'static str = "predictions";

    fn id(&self) -> &str {
        &self.id
    }
}
