/// Software Development Kit (SDK) for CTT Arena.
///
/// This module provides the client side of the game: the HTTP client for the
/// backend, the reconciliation rules, and the [`SyncedStore`] that ties the
/// local store to the backend.
pub mod api;
pub mod client;
/// Automatic mode discovery and store initialization.
pub mod discovery;
pub mod reconcile;
pub mod sync;

pub use client::{Client, RemoteApi};
pub use discovery::{new, new_with_config};
pub use reconcile::{reconcile_user, Reconciled};
pub use sync::{RankingSource, RankingsPoller, RankingsSnapshot, SyncOutcome, SyncSummary, SyncedStore};
