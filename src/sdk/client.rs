use std::time::Duration;
use async_trait::async_trait;
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use crate::game::{AirdropPlan, RankingEntry};
use crate::model::User;
use crate::sdk::api::{ErrorBody, RegisterRequest, ScoreUpdate};
use crate::{Error, Result};

/// Header carrying the admin token on `/admin/*` routes.
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// The backend operations the game relies on.
///
/// Implementations make a single attempt per call. Callers decide what to do
/// when the backend is unavailable.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn health(&self) -> Result<()>;
    /// Registers a user, or returns the existing one with that email.
    async fn register(&self, request: &RegisterRequest) -> Result<User>;
    async fn get_user(&self, email: &str) -> Result<User>;
    async fn update_score(&self, update: &ScoreUpdate) -> Result<User>;
    async fn rankings(&self, limit: Option<usize>) -> Result<Vec<RankingEntry>>;
    async fn admin_users(&self) -> Result<Vec<User>>;
    async fn admin_update_user(&self, id: &str, patch: Value) -> Result<User>;
    async fn admin_delete_user(&self, id: &str) -> Result<()>;
    async fn admin_airdrop(&self, pool: f64, min_points: i64) -> Result<AirdropPlan>;
}

/// HTTP client for the arena backend.
pub struct Client {
    base_url: Url,
    http: reqwest::Client,
    admin_token: Option<String>,
}

impl Client {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::InvalidRequest(format!("invalid server url '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidRequest(format!("server url '{}' cannot be a base", base_url)));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { base_url, http, admin_token: None })
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token.filter(|t| !t.is_empty());
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Internal("server url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn admin(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.admin_token {
            Some(token) => builder.header(ADMIN_TOKEN_HEADER, token),
            None => builder,
        }
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or(body);
    Err(Error::Remote { status: status.as_u16(), message })
}

#[async_trait]
impl RemoteApi for Client {
    async fn health(&self) -> Result<()> {
        let resp = self.http.get(self.endpoint(&["health"])?).send().await?;
        let _: Value = decode(resp).await?;
        Ok(())
    }

    async fn register(&self, request: &RegisterRequest) -> Result<User> {
        let resp = self.http.post(self.endpoint(&["register"])?).json(request).send().await?;
        decode(resp).await
    }

    async fn get_user(&self, email: &str) -> Result<User> {
        let resp = self.http.get(self.endpoint(&["users", email])?).send().await?;
        decode(resp).await
    }

    async fn update_score(&self, update: &ScoreUpdate) -> Result<User> {
        let resp = self.http.post(self.endpoint(&["update-score"])?).json(update).send().await?;
        decode(resp).await
    }

    async fn rankings(&self, limit: Option<usize>) -> Result<Vec<RankingEntry>> {
        let mut request = self.http.get(self.endpoint(&["rankings"])?);
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        decode(request.send().await?).await
    }

    async fn admin_users(&self) -> Result<Vec<User>> {
        let resp = self.admin(self.http.get(self.endpoint(&["admin", "users"])?)).send().await?;
        decode(resp).await
    }

    async fn admin_update_user(&self, id: &str, patch: Value) -> Result<User> {
        let request = self.http.put(self.endpoint(&["admin", "users", id])?).json(&patch);
        decode(self.admin(request).send().await?).await
    }

    async fn admin_delete_user(&self, id: &str) -> Result<()> {
        let resp = self.admin(self.http.delete(self.endpoint(&["admin", "users", id])?)).send().await?;
        let _: Value = decode(resp).await?;
        Ok(())
    }

    async fn admin_airdrop(&self, pool: f64, min_points: i64) -> Result<AirdropPlan> {
        let request = self.http.get(self.endpoint(&["admin", "airdrop"])?)
            .query(&[("pool", pool.to_string()), ("min_points", min_points.to_string())]);
        decode(self.admin(request).send().await?).await
    }
}
