use std::cmp::Ordering;
use serde::{Deserialize, Serialize};
use crate::model::User;

/// One row of the leaderboard.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RankingEntry {
    pub rank: usize,
    pub user_id: String,
    pub username: String,
    pub score: i64,
    pub points: i64,
    #[serde(default)]
    pub wins: u32,
    #[serde(default)]
    pub total_bets: u32,
}

/// Orders users by score, then points (both descending), then the earlier
/// registration, then id. Ranks are 1-based and unique.
pub fn rank_users(users: &[User], limit: Option<usize>) -> Vec<RankingEntry> {
    let mut sorted: Vec<&User> = users.iter().collect();
    sorted.sort_by(|a, b| compare(a, b));
    sorted.into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(i, u)| RankingEntry {
            rank: i + 1,
            user_id: u.id.clone(),
            username: u.username.clone(),
            score: u.score,
            points: u.points,
            wins: u.wins,
            total_bets: u.total_bets,
        })
        .collect()
}

fn compare(a: &User, b: &User) -> Ordering {
    b.score.cmp(&a.score)
        .then_with(|| b.points.cmp(&a.points))
        .then_with(|| a.created_date.cmp(&b.created_date))
        .then_with(|| a.id.cmp(&b.id))
}
