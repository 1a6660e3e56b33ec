//! Request and response bodies shared by the HTTP backend and its client.

use serde::{Deserialize, Serialize};
use crate::model::User;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
}

/// The fields a client may push for an existing user.
///
/// Numeric fields are merged with the larger-value rule, so replaying an old
/// update never lowers a score.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ScoreUpdate {
    pub email: String,
    pub score: i64,
    pub points: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bets: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wins: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streak: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
}

impl From<&User> for ScoreUpdate {
    fn from(user: &User) -> Self {
        Self {
            email: user.email.clone(),
            score: user.score,
            points: user.points,
            username: Some(user.username.clone()).filter(|u| !u.is_empty()),
            total_bets: Some(user.total_bets),
            wins: Some(user.wins),
            streak: Some(user.streak),
            wallet_address: user.wallet_address.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RankingsQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AirdropQuery {
    pub pool: f64,
    #[serde(default)]
    pub min_points: i64,
}
