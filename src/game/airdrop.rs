use serde::{Deserialize, Serialize};
use crate::model::User;
use crate::{Error, Result};

/// CTA amounts are truncated to this many decimals so the sum never exceeds the pool.
const CTA_DECIMALS: i32 = 6;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AirdropAllocation {
    pub user_id: String,
    pub username: String,
    pub wallet_address: String,
    pub points: i64,
    /// CTA credited to the wallet.
    pub amount: f64,
}

/// A mock CTA distribution. Nothing is sent anywhere.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AirdropPlan {
    pub pool: f64,
    pub min_points: i64,
    pub eligible_points: i64,
    pub allocations: Vec<AirdropAllocation>,
    /// Users above the threshold who have no wallet on file.
    pub skipped_without_wallet: usize,
}

impl AirdropPlan {
    pub fn total_allocated(&self) -> f64 {
        self.allocations.iter().map(|a| a.amount).sum()
    }
}

/// Splits `pool` across users holding at least `min_points` CTT and a wallet
/// address, in proportion to their points. Largest allocations come first.
pub fn plan_airdrop(users: &[User], pool: f64, min_points: i64) -> Result<AirdropPlan> {
    if !pool.is_finite() || pool < 0.0 {
        return Err(Error::InvalidAmount(format!("airdrop pool must be a non-negative number, got {}", pool)));
    }
    let threshold = min_points.max(1);

    let mut skipped_without_wallet = 0;
    let eligible: Vec<(&User, &str)> = users.iter()
        .filter(|u| u.points >= threshold)
        .filter_map(|u| match u.wallet_address.as_deref().map(str::trim) {
            Some(wallet) if !wallet.is_empty() => Some((u, wallet)),
            _ => {
                skipped_without_wallet += 1;
                None
            }
        })
        .collect();

    let eligible_points: i64 = eligible.iter().map(|(u, _)| u.points).sum();
    let scale = 10f64.powi(CTA_DECIMALS);

    let mut allocations: Vec<AirdropAllocation> = eligible.into_iter()
        .map(|(u, wallet)| {
            let share = if eligible_points > 0 { u.points as f64 / eligible_points as f64 } else { 0.0 };
            AirdropAllocation {
                user_id: u.id.clone(),
                username: u.username.clone(),
                wallet_address: wallet.to_string(),
                points: u.points,
                amount: (pool * share * scale).floor() / scale,
            }
        })
        .collect();
    allocations.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.user_id.cmp(&b.user_id)));

    Ok(AirdropPlan {
        pool,
        min_points: threshold,
        eligible_points,
        allocations,
        skipped_without_wallet,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holder(id: &str, points: i64, wallet: Option<&str>) -> User {
        User {
            id: id.to_string(),
            username: id.to_string(),
            points,
            wallet_address: wallet.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_proportional_split() {
        let users = vec![
            holder("a", 300, Some("0xa")),
            holder("b", 100, Some("0xb")),
            holder("poor", 5, Some("0xp")),
            holder("nowallet", 900, None),
        ];
        let plan = plan_airdrop(&users, 1000.0, 50).unwrap();

        assert_eq!(plan.eligible_points, 400);
        assert_eq!(plan.skipped_without_wallet, 1);
        assert_eq!(plan.allocations.len(), 2);
        assert_eq!(plan.allocations[0].user_id, "a");
        assert_eq!(plan.allocations[0].amount, 750.0);
        assert_eq!(plan.allocations[1].amount, 250.0);
    }

    #[test]
    fn test_never_exceeds_pool() {
        let users: Vec<User> = (0..7).map(|i| holder(&format!("u{}", i), 1 + i, Some("0x1"))).collect();
        let plan = plan_airdrop(&users, 10.0, 1).unwrap();
        assert!(plan.total_allocated() <= 10.0);
    }

    #[test]
    fn test_rejects_negative_pool() {
        assert!(matches!(plan_airdrop(&[], -1.0, 0), Err(Error::InvalidAmount(_))));
        let empty = plan_airdrop(&[], 10.0, 0).unwrap();
        assert!(empty.allocations.is_empty());
    }
}
