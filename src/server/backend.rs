use std::sync::Arc;
use log::info;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use crate::game::{plan_airdrop, rank_users, AirdropPlan, RankingEntry};
use crate::model::user::normalize_email;
use crate::model::User;
use crate::sdk::api::{RegisterRequest, ScoreUpdate};
use crate::sdk::reconcile::apply_score_update;
use crate::{EntityStore, Error, GameConfig, Result};

/// Leaderboard size when the request does not say.
pub const DEFAULT_RANKINGS_LIMIT: usize = 100;

/// Fields an admin may change on a user.
const ADMIN_EDITABLE: &[&str] = &["username", "points", "score", "role", "wallet_address", "streak", "wins", "total_bets"];

/// The backend's operations over its user table.
pub struct Backend {
    store: Arc<dyn EntityStore>,
    config: GameConfig,
    admin_token: Option<String>,
    // Serializes read-modify-write of user records.
    writes: Mutex<()>,
}

impl Backend {
    pub fn new(store: Arc<dyn EntityStore>, config: GameConfig, admin_token: Option<String>) -> Self {
        Self {
            store,
            config,
            admin_token: admin_token.filter(|t| !t.is_empty()),
            writes: Mutex::new(()),
        }
    }

    /// Checks the admin token. Without a configured token admin routes are open.
    pub fn authorize(&self, presented: Option<&str>) -> Result<()> {
        match &self.admin_token {
            None => Ok(()),
            Some(expected) if presented == Some(expected.as_str()) => Ok(()),
            Some(_) => Err(Error::Unauthorized),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.store.table::<User>().find_one(json!({"email": normalize_email(email)})).await
    }

    /// Returns the user with this email, creating it on first sight.
    pub async fn register(&self, request: RegisterRequest) -> Result<User> {
        let email = normalize_email(&request.email);
        if !email.contains('@') {
            return Err(Error::InvalidRequest(format!("'{}' is not an email address", email)));
        }
        if request.username.trim().is_empty() {
            return Err(Error::InvalidRequest("username must not be empty".to_string()));
        }
        let wallet = request.wallet_address.filter(|w| !w.trim().is_empty());

        let _guard = self.writes.lock().await;
        let users = self.store.table::<User>();
        if let Some(existing) = self.find_by_email(&email).await? {
            if existing.wallet_address.is_none() && wallet.is_some() {
                return users.update(&existing.id, json!({"wallet_address": wallet})).await;
            }
            return Ok(existing);
        }

        let mut user = User::new(&email, request.username.trim(), self.config.starting_points);
        user.wallet_address = wallet;
        let user = users.create(&user).await?;
        info!("Registered {} ({})", user.username, user.email);
        Ok(user)
    }

    pub async fn get_user(&self, email: &str) -> Result<User> {
        self.find_by_email(email).await?
            .ok_or_else(|| Error::UserNotFound(normalize_email(email)))
    }

    /// Merges a pushed score into the stored user; values never go down.
    pub async fn update_score(&self, update: ScoreUpdate) -> Result<User> {
        let _guard = self.writes.lock().await;
        let existing = self.get_user(&update.email).await?;
        let merged = apply_score_update(&existing, &update);
        if merged == existing {
            return Ok(existing);
        }
        self.store.table::<User>().save(&merged).await
    }

    pub async fn rankings(&self, limit: Option<usize>) -> Result<Vec<RankingEntry>> {
        let users = self.store.table::<User>().list().await?;
        Ok(rank_users(&users, Some(limit.unwrap_or(DEFAULT_RANKINGS_LIMIT))))
    }

    pub async fn users(&self) -> Result<Vec<User>> {
        self.store.table::<User>().list_sorted("-score").await
    }

    /// Applies an admin edit after checking it still yields a valid user.
    pub async fn update_user(&self, id: &str, patch: Value) -> Result<User> {
        let Value::Object(fields) = &patch else {
            return Err(Error::InvalidRequest("patch must be a JSON object".to_string()));
        };
        if let Some(field) = fields.keys().find(|k| !ADMIN_EDITABLE.contains(&k.as_str())) {
            return Err(Error::InvalidRequest(format!("field '{}' cannot be edited", field)));
        }

        let _guard = self.writes.lock().await;
        let users = self.store.table::<User>();
        let existing = users.get(id).await?;
        let mut candidate = serde_json::to_value(&existing)?;
        if let Value::Object(current) = &mut candidate {
            for (k, v) in fields {
                current.insert(k.clone(), v.clone());
            }
        }
        serde_json::from_value::<User>(candidate)
            .map_err(|e| Error::InvalidRequest(format!("invalid user patch: {}", e)))?;

        let user = users.update(id, patch).await?;
        info!("Admin updated user {}", id);
        Ok(user)
    }

    pub async fn delete_user(&self, id: &str) -> Result<()> {
        let _guard = self.writes.lock().await;
        self.store.table::<User>().delete(id).await?;
        info!("Admin deleted user {}", id);
        Ok(())
    }

    pub async fn airdrop(&self, pool: f64, min_points: i64) -> Result<AirdropPlan> {
        let users = self.store.table::<User>().list().await?;
        plan_airdrop(&users, pool, min_points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemStore;
    use std::collections::HashMap;

    fn backend(token: Option<&str>) -> Backend {
        let store: Arc<dyn EntityStore> = Arc::new(MemStore::new(HashMap::new(), None));
        Backend::new(store, GameConfig::default(), token.map(str::to_string))
    }

    fn register_request(email: &str, name: &str) -> RegisterRequest {
        RegisterRequest { email: email.to_string(), username: name.to_string(), wallet_address: None }
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let backend = backend(None);
        let first = backend.register(register_request("A@x.io", "alice")).await.unwrap();
        let second = backend.register(register_request("a@x.io", "someone")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.username, "alice");
        assert_eq!(backend.users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_fills_missing_wallet() {
        let backend = backend(None);
        backend.register(register_request("a@x.io", "alice")).await.unwrap();
        let mut request = register_request("a@x.io", "alice");
        request.wallet_address = Some("0xfeed".to_string());
        let user = backend.register(request).await.unwrap();
        assert_eq!(user.wallet_address.as_deref(), Some("0xfeed"));
    }

    #[tokio::test]
    async fn test_update_score_unknown_user() {
        let backend = backend(None);
        let update = ScoreUpdate { email: "ghost@x.io".to_string(), ..Default::default() };
        let res = backend.update_score(update).await;
        assert!(matches!(res, Err(Error::UserNotFound(_))));
    }

    #[tokio::test]
    async fn test_update_score_keeps_maximum() {
        let backend = backend(None);
        backend.register(register_request("a@x.io", "alice")).await.unwrap();

        let update = ScoreUpdate { email: "a@x.io".to_string(), score: 40, points: 200, ..Default::default() };
        let user = backend.update_score(update).await.unwrap();
        assert_eq!(user.score, 40);
        assert_eq!(user.points, 1000);
    }

    #[tokio::test]
    async fn test_admin_patch_validation() {
        let backend = backend(None);
        let user = backend.register(register_request("a@x.io", "alice")).await.unwrap();

        assert!(matches!(
            backend.update_user(&user.id, json!({"email": "x@y.z"})).await,
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            backend.update_user(&user.id, json!({"points": "lots"})).await,
            Err(Error::InvalidRequest(_))
        ));
        let updated = backend.update_user(&user.id, json!({"points": 5, "role": "admin"})).await.unwrap();
        assert_eq!(updated.points, 5);
        assert_eq!(updated.role, crate::model::Role::Admin);
    }

    #[test]
    fn test_authorize() {
        assert!(backend(None).authorize(None).is_ok());
        let guarded = backend(Some("s3cret"));
        assert!(guarded.authorize(Some("s3cret")).is_ok());
        assert!(matches!(guarded.authorize(Some("nope")), Err(Error::Unauthorized)));
        assert!(matches!(guarded.authorize(None), Err(Error::Unauthorized)));
    }
}
