use std::sync::Arc;
use std::time::Duration;
use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use crate::game::{rank_users, RankingEntry, RoundManager};
use crate::model::user::normalize_email;
use crate::model::{Entity, User};
use crate::sdk::api::{RegisterRequest, ScoreUpdate};
use crate::sdk::client::RemoteApi;
use crate::sdk::reconcile::reconcile_user;
use crate::{now_millis, EntityStore, EntityWriter, Error, GameConfig, Result};

/// Result of a best-effort push.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The backend accepted the push and returned its copy.
    Synced(User),
    /// No backend is configured.
    LocalOnly,
    /// The backend was unreachable or refused; the local copy stands.
    Failed(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RankingSource {
    Remote,
    /// Last leaderboard successfully fetched from the backend.
    Cached,
    /// Computed from the users in the local store.
    Local,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RankingsSnapshot {
    pub entries: Vec<RankingEntry>,
    pub source: RankingSource,
    pub fetched_at: u64,
}

/// Last-known-good leaderboard, kept in the local store.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
struct CachedRankings {
    id: String,
    entries: Vec<RankingEntry>,
    fetched_at: u64,
}

impl Entity for CachedRankings {
    const TABLE: &'static str = "rankings_cache";

    fn id(&self) -> &str {
        &self.id
    }
}

const CACHE_ID: &str = "latest";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub synced: usize,
    pub failed: usize,
    pub local_only: usize,
}

/// The local entity store paired with an optional backend.
///
/// Reads reconcile the two copies of a user; writes go to the local store
/// first and are pushed to the backend best effort. A backend failure is
/// logged and never surfaces as an error.
///
/// Local user writes share one lock with the [`RoundManager`] returned by
/// [`SyncedStore::rounds`], so a merge never overwrites a bet placed while a
/// backend call was in flight.
pub struct SyncedStore {
    local: Arc<dyn EntityStore>,
    remote: Option<Arc<dyn RemoteApi>>,
    config: GameConfig,
    writes: Arc<Mutex<()>>,
}

impl SyncedStore {
    pub fn new(local: Arc<dyn EntityStore>, remote: Option<Arc<dyn RemoteApi>>, config: GameConfig) -> Self {
        Self { local, remote, config, writes: Arc::new(Mutex::new(())) }
    }

    /// A round manager over the local store that shares this store's write lock.
    pub fn rounds(&self) -> RoundManager {
        RoundManager::with_lock(self.local.clone(), self.config.clone(), self.writes.clone())
    }

    pub fn local(&self) -> &Arc<dyn EntityStore> {
        &self.local
    }

    pub fn remote(&self) -> Option<&Arc<dyn RemoteApi>> {
        self.remote.as_ref()
    }

    /// Waits for pending local writes to reach disk.
    pub async fn flush(&self) -> Result<()> {
        self.local.flush().await
    }

    pub async fn find_local(&self, email: &str) -> Result<Option<User>> {
        self.local.table::<User>().find_one(json!({"email": normalize_email(email)})).await
    }

    /// Finds or creates the local user, then registers it with the backend.
    pub async fn register(&self, email: &str, username: &str, wallet_address: Option<String>) -> Result<User> {
        let email = normalize_email(email);
        if !email.contains('@') {
            return Err(Error::InvalidRequest(format!("'{}' is not an email address", email)));
        }
        if username.trim().is_empty() {
            return Err(Error::InvalidRequest("username must not be empty".to_string()));
        }

        let mut user = {
            let _guard = self.writes.lock().await;
            match self.find_local(&email).await? {
                Some(user) => user,
                None => {
                    let mut user = User::new(&email, username.trim(), self.config.starting_points);
                    user.wallet_address = wallet_address.clone().filter(|w| !w.trim().is_empty());
                    let user = self.local.table::<User>().create(&user).await?;
                    info!("Registered local user {} ({})", user.username, user.email);
                    user
                }
            }
        };

        if let Some(remote) = &self.remote {
            let request = RegisterRequest {
                email: email.clone(),
                username: user.username.clone(),
                wallet_address: user.wallet_address.clone(),
            };
            match remote.register(&request).await {
                Ok(remote_user) => user = self.merge(&remote_user).await?,
                Err(e) => warn!("Remote registration of {} failed, continuing locally: {}", email, e),
            }
        }
        Ok(user)
    }

    /// Reads a user, reconciling the local copy with the backend's.
    pub async fn load_user(&self, email: &str) -> Result<User> {
        let email = normalize_email(email);
        let local = self.find_local(&email).await?;

        let Some(remote) = &self.remote else {
            return local.ok_or(Error::UserNotFound(email));
        };

        match (remote.get_user(&email).await, local) {
            (Ok(remote_user), _) => self.merge(&remote_user).await,
            (Err(e), Some(local_user)) if e.is_not_found() => {
                self.push_user(&local_user).await;
                Ok(local_user)
            }
            (Err(e), local) => {
                warn!("Could not fetch {} from backend, using local copy: {}", email, e);
                local.ok_or(Error::UserNotFound(email))
            }
        }
    }

    /// Reconciles the backend's copy with the local record as it is now,
    /// adopting the backend's copy when there is no local one.
    async fn merge(&self, remote: &User) -> Result<User> {
        let (user, remote_behind) = {
            let _guard = self.writes.lock().await;
            let users = self.local.table::<User>();
            match self.find_local(&remote.email).await? {
                Some(local) => {
                    let merged = reconcile_user(&local, remote);
                    let user = if merged.local_changed { users.save(&merged.user).await? } else { local };
                    (user, merged.remote_behind)
                }
                None => {
                    let mut copy = remote.clone();
                    copy.id = String::new();
                    debug!("Adopting remote copy of {}", copy.email);
                    (users.create(&copy).await?, false)
                }
            }
        };
        if remote_behind {
            self.push_user(&user).await;
        }
        Ok(user)
    }

    /// Pushes the user's score to the backend, registering it there first if
    /// the backend does not know the email.
    pub async fn push_user(&self, user: &User) -> SyncOutcome {
        let Some(remote) = &self.remote else {
            return SyncOutcome::LocalOnly;
        };
        let update = ScoreUpdate::from(user);
        let result = match remote.update_score(&update).await {
            Err(e) if e.is_not_found() => {
                let request = RegisterRequest {
                    email: user.email.clone(),
                    username: user.username.clone(),
                    wallet_address: user.wallet_address.clone(),
                };
                match remote.register(&request).await {
                    Ok(_) => remote.update_score(&update).await,
                    Err(e) => Err(e),
                }
            }
            other => other,
        };
        match result {
            Ok(remote_user) => SyncOutcome::Synced(remote_user),
            Err(e) => {
                warn!("Score push for {} failed: {}", user.email, e);
                SyncOutcome::Failed(e.to_string())
            }
        }
    }

    pub async fn push_users(&self, users: &[User]) -> Vec<SyncOutcome> {
        join_all(users.iter().map(|u| self.push_user(u))).await
    }

    /// Pushes every local user.
    pub async fn sync_all(&self) -> Result<SyncSummary> {
        let users = self.local.table::<User>().list().await?;
        let mut summary = SyncSummary::default();
        for outcome in self.push_users(&users).await {
            match outcome {
                SyncOutcome::Synced(_) => summary.synced += 1,
                SyncOutcome::Failed(_) => summary.failed += 1,
                SyncOutcome::LocalOnly => summary.local_only += 1,
            }
        }
        Ok(summary)
    }

    /// The leaderboard from the backend, else the cached copy, else the local users.
    pub async fn rankings(&self, limit: Option<usize>) -> Result<RankingsSnapshot> {
        if let Some(remote) = &self.remote {
            match remote.rankings(limit).await {
                Ok(entries) => {
                    let fetched_at = now_millis();
                    if let Err(e) = self.store_cache(&entries, fetched_at).await {
                        warn!("Could not cache rankings: {}", e);
                    }
                    return Ok(RankingsSnapshot { entries, source: RankingSource::Remote, fetched_at });
                }
                Err(e) => warn!("Rankings unavailable from backend: {}", e),
            }
        }

        if let Some(cached) = self.load_cache().await? {
            let mut entries = cached.entries;
            entries.truncate(limit.unwrap_or(usize::MAX));
            return Ok(RankingsSnapshot { entries, source: RankingSource::Cached, fetched_at: cached.fetched_at });
        }

        let users = self.local.table::<User>().list().await?;
        Ok(RankingsSnapshot {
            entries: rank_users(&users, limit),
            source: RankingSource::Local,
            fetched_at: now_millis(),
        })
    }

    async fn store_cache(&self, entries: &[RankingEntry], fetched_at: u64) -> Result<()> {
        let cached = CachedRankings { id: CACHE_ID.to_string(), entries: entries.to_vec(), fetched_at };
        let mut value = serde_json::to_value(&cached)?;
        value["created_date"] = fetched_at.into();
        value["updated_date"] = fetched_at.into();
        self.local.replace_all(CachedRankings::TABLE, vec![value]).await
    }

    async fn load_cache(&self) -> Result<Option<CachedRankings>> {
        match self.local.table::<CachedRankings>().get(CACHE_ID).await {
            Ok(cached) => Ok(Some(cached)),
            Err(Error::RecordNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Refreshes the leaderboard every `interval` in the background.
    pub fn poll_rankings(self: &Arc<Self>, interval: Duration, limit: Option<usize>) -> RankingsPoller {
        let (tx, rx) = watch::channel(None);
        let store = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            loop {
                timer.tick().await;
                match store.rankings(limit).await {
                    Ok(snapshot) => {
                        if tx.send(Some(snapshot)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Rankings poll failed: {}", e),
                }
            }
        });
        RankingsPoller { rx, handle }
    }
}

/// Handle to a background rankings poll. Dropping it stops polling.
pub struct RankingsPoller {
    rx: watch::Receiver<Option<RankingsSnapshot>>,
    handle: JoinHandle<()>,
}

impl RankingsPoller {
    pub fn latest(&self) -> Option<RankingsSnapshot> {
        self.rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<RankingsSnapshot>> {
        self.rx.clone()
    }
}

impl Drop for RankingsPoller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
