use std::env;
use std::sync::Arc;
use std::time::Duration;
use crate::engine::MemStore;
use crate::sdk::{Client, RemoteApi, SyncedStore};
use crate::{EntityStore, GameConfig, Result};

/// Default per-request timeout for the backend, in milliseconds.
pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 3000;

/// Initializes a [`SyncedStore`] based on the environment.
///
/// The local store is always a persistent [`MemStore`] in `data_dir`. When the
/// `CTT_SERVER_URL` environment variable is set, a backend [`Client`] is
/// attached as well (`CTT_REMOTE_TIMEOUT_MS` sets its timeout and
/// `CTT_ADMIN_TOKEN` its admin token).
///
/// # Examples
///
/// ```no_run
/// use ctt_arena::sdk;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let store = sdk::new("./data").await?;
///     let user = store.register("alice@example.com", "alice", None).await?;
///     println!("{} has {} CTT", user.username, user.points);
///     Ok(())
/// }
/// ```
pub async fn new(data_dir: &str) -> Result<Arc<SyncedStore>> {
    new_with_config(data_dir, GameConfig::load(None)?).await
}

pub async fn new_with_config(data_dir: &str, config: GameConfig) -> Result<Arc<SyncedStore>> {
    let local: Arc<dyn EntityStore> = Arc::new(MemStore::open(data_dir)?);

    let mut remote: Option<Arc<dyn RemoteApi>> = None;
    if let Ok(url) = env::var("CTT_SERVER_URL") {
        if !url.is_empty() {
            let timeout = env::var("CTT_REMOTE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_REMOTE_TIMEOUT_MS);
            let client = Client::new(&url, Duration::from_millis(timeout))?
                .with_admin_token(env::var("CTT_ADMIN_TOKEN").ok());
            // An unreachable backend is expected; it is retried on every call.
            if let Err(e) = client.health().await {
                log::warn!("Backend at {} is not reachable right now: {}", url, e);
            }
            remote = Some(Arc::new(client));
        }
    }

    Ok(Arc::new(SyncedStore::new(local, remote, config)))
}
