//! Merging of local and remote copies of a user.
//!
//! There is no version vector or log: counters that only grow in normal play
//! (score, points, bets, wins) take the larger value, and descriptive fields
//! come from whichever copy was updated last.

use crate::model::User;
use crate::sdk::api::ScoreUpdate;

/// Result of merging a local and a remote user record.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub user: User,
    /// The merged record differs from the local copy and should be written back.
    pub local_changed: bool,
    /// The backend holds older values and should receive a push.
    pub remote_behind: bool,
}

/// Merges two copies of the same player. The local id is kept.
pub fn reconcile_user(local: &User, remote: &User) -> Reconciled {
    let remote_is_newer = remote.updated_date > local.updated_date;
    let (newer, older) = if remote_is_newer { (remote, local) } else { (local, remote) };

    let mut user = local.clone();
    if user.id.is_empty() {
        user.id = remote.id.clone();
    }
    user.score = local.score.max(remote.score);
    user.points = local.points.max(remote.points);
    user.total_bets = local.total_bets.max(remote.total_bets);
    user.wins = local.wins.max(remote.wins);
    user.streak = newer.streak;
    user.username = pick_text(&newer.username, &older.username).to_string();
    user.wallet_address = pick_wallet(newer, older);
    user.created_date = earliest(local.created_date, remote.created_date);
    user.updated_date = local.updated_date.max(remote.updated_date);

    let local_changed = differs(&user, local);
    let remote_behind = differs(&user, remote);
    Reconciled { user, local_changed, remote_behind }
}

/// Applies a pushed update to the stored record with the same merge rule.
///
/// Fields absent from the update keep their stored values. Descriptive fields
/// present in the update win, since the push is the latest write.
pub fn apply_score_update(existing: &User, update: &ScoreUpdate) -> User {
    let mut user = existing.clone();
    user.score = existing.score.max(update.score);
    user.points = existing.points.max(update.points);
    if let Some(total_bets) = update.total_bets {
        user.total_bets = existing.total_bets.max(total_bets);
    }
    if let Some(wins) = update.wins {
        user.wins = existing.wins.max(wins);
    }
    if let Some(streak) = update.streak {
        user.streak = streak;
    }
    if let Some(username) = update.username.as_deref().filter(|u| !u.trim().is_empty()) {
        user.username = username.to_string();
    }
    if let Some(wallet) = update.wallet_address.as_deref().filter(|w| !w.trim().is_empty()) {
        user.wallet_address = Some(wallet.to_string());
    }
    user
}

fn pick_text<'a>(preferred: &'a str, fallback: &'a str) -> &'a str {
    if preferred.trim().is_empty() { fallback } else { preferred }
}

fn pick_wallet(newer: &User, older: &User) -> Option<String> {
    let non_empty = |u: &User| u.wallet_address.clone().filter(|w| !w.trim().is_empty());
    non_empty(newer).or_else(|| non_empty(older))
}

fn earliest(a: u64, b: u64) -> u64 {
    match (a, b) {
        (0, b) => b,
        (a, 0) => a,
        (a, b) => a.min(b),
    }
}

// Fields carried by a score push; ids and timestamps are per side.
fn differs(merged: &User, side: &User) -> bool {
    merged.score != side.score
        || merged.points != side.points
        || merged.total_bets != side.total_bets
        || merged.wins != side.wins
        || merged.streak != side.streak
        || merged.username != side.username
        || merged.wallet_address != side.wallet_address
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, score: i64, points: i64, updated: u64) -> User {
        User {
            id: id.to_string(),
            email: "p@x.io".to_string(),
            username: "player".to_string(),
            score,
            points,
            created_date: 1,
            updated_date: updated,
            ..Default::default()
        }
    }

    #[test]
    fn test_larger_values_win() {
        let local = user("local", 40, 900, 10);
        let remote = user("remote", 55, 700, 5);

        let merged = reconcile_user(&local, &remote);
        assert_eq!(merged.user.id, "local");
        assert_eq!(merged.user.score, 55);
        assert_eq!(merged.user.points, 900);
        assert_eq!(merged.user.updated_date, 10);
        assert!(merged.local_changed);
        assert!(merged.remote_behind);
    }

    #[test]
    fn test_identical_copies_need_nothing() {
        let local = user("local", 10, 10, 3);
        let remote = user("remote", 10, 10, 9);
        let merged = reconcile_user(&local, &remote);
        assert!(!merged.local_changed);
        assert!(!merged.remote_behind);
    }

    #[test]
    fn test_streak_and_name_follow_newer_copy() {
        let mut local = user("l", 10, 10, 100);
        local.streak = 4;
        local.username = "old-name".to_string();
        let mut remote = user("r", 10, 10, 200);
        remote.streak = 0;
        remote.username = "new-name".to_string();

        let merged = reconcile_user(&local, &remote).user;
        assert_eq!(merged.streak, 0);
        assert_eq!(merged.username, "new-name");
    }

    #[test]
    fn test_empty_fields_do_not_erase() {
        let mut local = user("l", 0, 0, 1);
        local.wallet_address = Some("0xabc".to_string());
        let mut remote = user("r", 0, 0, 2);
        remote.username = String::new();

        let merged = reconcile_user(&local, &remote).user;
        assert_eq!(merged.username, "player");
        assert_eq!(merged.wallet_address.as_deref(), Some("0xabc"));
    }

    #[test]
    fn test_score_update_never_lowers() {
        let existing = user("s", 100, 500, 1);
        let update = ScoreUpdate {
            email: "p@x.io".to_string(),
            score: 20,
            points: 800,
            streak: Some(2),
            username: Some("  ".to_string()),
            ..Default::default()
        };
        let merged = apply_score_update(&existing, &update);
        assert_eq!(merged.score, 100);
        assert_eq!(merged.points, 800);
        assert_eq!(merged.streak, 2);
        assert_eq!(merged.username, "player");
    }
}
