use serde::{Deserialize, Serialize};
use super::Entity;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// A player. `email` is the identity shared between the local store and the
/// backend; ids are assigned independently on each side.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
    /// CTT balance.
    pub points: i64,
    pub score: i64,
    pub total_bets: u32,
    pub wins: u32,
    pub streak: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    pub role: Role,
    pub created_date: u64,
    pub updated_date: u64,
}

impl User {
    pub fn new(email: &str, username: &str, starting_points: i64) -> Self {
        Self {
            email: normalize_email(email),
            username: username.to_string(),
            points: starting_points,
            ..Default::default()
        }
    }

    /// Whether two records describe the same player.
    pub fn same_player(&self, other: &User) -> bool {
        normalize_email(&self.email) == normalize_email(&other.email)
    }
}

impl Entity for User {
    const TABLE: &'static str = "users";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Emails are compared case-insensitively and without surrounding whitespace.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
