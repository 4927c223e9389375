//! REST client for the hosted backend
//!
//! PostgREST-style tables (`community_posts`, `post_likes`,
//! `post_favorites`) plus anonymous sign-in. The session is cached in the
//! local key-value store so a restart reuses the same anonymous identity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{realtime, RemotePost, SocialBackend};
use crate::error::RemoteError;
use crate::state::kv::KeyValueStore;

const SESSION_KEY: &str = "backend.session";
const POSTS_TABLE: &str = "community_posts";
const LIKES_TABLE: &str = "post_likes";
const FAVORITES_TABLE: &str = "post_favorites";

/// Configuration for the REST backend
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Project URL, e.g. `https://<project>.supabase.co`
    pub base_url: String,
    /// Publishable API key
    pub api_key: String,
    /// Name shown next to posts this device publishes
    pub nickname: String,
    pub request_timeout: Duration,
}

/// Anonymous session
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct Session {
    access_token: String,
    user_id: Uuid,
}

#[derive(Deserialize)]
struct SignUpResponse {
    access_token: String,
    user: SignUpUser,
}

#[derive(Deserialize)]
struct SignUpUser {
    id: Uuid,
}

#[derive(Serialize)]
struct NewPostPayload<'a> {
    user_id: Uuid,
    nickname: &'a str,
    vault_name: &'a str,
    content: &'a str,
    likes_count: i64,
}

/// Body for both like and favorite rows
#[derive(Serialize)]
struct InteractionPayload {
    post_id: Uuid,
    user_id: Uuid,
}

#[derive(Deserialize)]
struct InteractionRow {
    post_id: Uuid,
}

pub struct RestBackend {
    http: reqwest::Client,
    config: RestConfig,
    session: RwLock<Option<Session>>,
    cache: Arc<dyn KeyValueStore>,
}

impl RestBackend {
    pub fn new(config: RestConfig, cache: Arc<dyn KeyValueStore>) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let session = match cache.get_json::<Session>(SESSION_KEY) {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable cached session");
                None
            }
        };

        Ok(Self {
            http,
            config,
            session: RwLock::new(session),
            cache,
        })
    }

    pub async fn current_user_id(&self) -> Option<Uuid> {
        self.session.read().await.as_ref().map(|s| s.user_id)
    }

    /// Reuse the cached session, otherwise sign in anonymously.
    /// Failure is logged; callers check `current_user_id` afterwards.
    pub async fn sign_in_if_needed(&self) {
        if self.session.read().await.is_some() {
            return;
        }
        match self.sign_in_anonymously().await {
            Ok(session) => {
                info!(user_id = %session.user_id, "Signed in anonymously");
                if let Err(e) = self.cache.set_json(SESSION_KEY, &session) {
                    warn!(error = %e, "Could not cache session");
                }
                *self.session.write().await = Some(session);
            }
            Err(e) => warn!(error = %e, "Anonymous sign-in failed"),
        }
    }

    async fn sign_in_anonymously(&self) -> Result<Session, RemoteError> {
        let url = format!("{}/auth/v1/signup", self.base());
        let resp = self
            .http
            .post(url)
            .header("apikey", &self.config.api_key)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let body: SignUpResponse = check(resp).await?.json().await?;
        Ok(Session {
            access_token: body.access_token,
            user_id: body.user.id,
        })
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base(), table)
    }

    async fn bearer(&self) -> String {
        match self.session.read().await.as_ref() {
            Some(session) => session.access_token.clone(),
            None => self.config.api_key.clone(),
        }
    }

    async fn select<T: for<'de> Deserialize<'de>>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, RemoteError> {
        let resp = self
            .http
            .get(self.table_url(table))
            .header("apikey", &self.config.api_key)
            .bearer_auth(self.bearer().await)
            .query(query)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn insert<T: Serialize + ?Sized>(&self, table: &str, row: &T) -> Result<(), RemoteError> {
        let resp = self
            .http
            .post(self.table_url(table))
            .header("apikey", &self.config.api_key)
            .header("Prefer", "return=minimal")
            .bearer_auth(self.bearer().await)
            .json(row)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn interaction_ids(&self, table: &str) -> Result<HashSet<Uuid>, RemoteError> {
        let Some(user_id) = self.current_user_id().await else {
            return Ok(HashSet::new());
        };
        let rows: Vec<InteractionRow> = self
            .select(
                table,
                &[
                    ("select", "post_id".to_string()),
                    ("user_id", format!("eq.{user_id}")),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.post_id).collect())
    }

    async fn insert_interaction(&self, table: &str, post_id: Uuid) -> Result<(), RemoteError> {
        let Some(user_id) = self.current_user_id().await else {
            debug!(table, %post_id, "No session, skipping interaction write");
            return Ok(());
        };
        self.insert(table, &InteractionPayload { post_id, user_id }).await
    }
}

/// Turn non-2xx responses into `RemoteError::Status`
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(RemoteError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl SocialBackend for RestBackend {
    async fn fetch_posts(&self, limit: usize) -> Result<Vec<RemotePost>, RemoteError> {
        self.select(
            POSTS_TABLE,
            &[
                ("select", "*".to_string()),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn share_post(&self, content: &str, vault_name: &str) -> Result<(), RemoteError> {
        // One just-in-time attempt before giving up on the publish
        if self.current_user_id().await.is_none() {
            self.sign_in_if_needed().await;
        }
        let user_id = self
            .current_user_id()
            .await
            .ok_or(RemoteError::NotAuthenticated)?;

        let payload = NewPostPayload {
            user_id,
            nickname: &self.config.nickname,
            vault_name,
            content,
            likes_count: 0,
        };
        self.insert(POSTS_TABLE, &payload).await?;
        info!(%user_id, vault_name, "Post published");
        Ok(())
    }

    async fn fetch_liked_post_ids(&self) -> Result<HashSet<Uuid>, RemoteError> {
        self.interaction_ids(LIKES_TABLE).await
    }

    async fn like_post(&self, post_id: Uuid) -> Result<(), RemoteError> {
        self.insert_interaction(LIKES_TABLE, post_id).await
    }

    async fn fetch_favorited_post_ids(&self) -> Result<HashSet<Uuid>, RemoteError> {
        self.interaction_ids(FAVORITES_TABLE).await
    }

    async fn favorite_post(&self, post_id: Uuid) -> Result<(), RemoteError> {
        self.insert_interaction(FAVORITES_TABLE, post_id).await
    }

    async fn subscribe_inserts(&self) -> Result<mpsc::Receiver<RemotePost>, RemoteError> {
        let token = self.bearer().await;
        realtime::subscribe(self.base(), &self.config.api_key, &token, POSTS_TABLE).await
    }
}

impl std::fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBackend")
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::kv::MemoryStore;

    fn backend(cache: Arc<dyn KeyValueStore>) -> RestBackend {
        RestBackend::new(
            RestConfig {
                base_url: "https://example.supabase.co/".to_string(),
                api_key: "publishable".to_string(),
                nickname: "tester".to_string(),
                request_timeout: Duration::from_secs(5),
            },
            cache,
        )
        .unwrap()
    }

    #[test]
    fn test_table_url_trims_trailing_slash() {
        let backend = backend(Arc::new(MemoryStore::new()));
        assert_eq!(
            backend.table_url(POSTS_TABLE),
            "https://example.supabase.co/rest/v1/community_posts"
        );
    }

    #[tokio::test]
    async fn test_cached_session_is_reused() {
        let cache: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        cache
            .set_json(
                SESSION_KEY,
                &Session {
                    access_token: "jwt".to_string(),
                    user_id,
                },
            )
            .unwrap();

        let backend = backend(cache);
        assert_eq!(backend.current_user_id().await, Some(user_id));
        assert_eq!(backend.bearer().await, "jwt");
    }

    #[tokio::test]
    async fn test_without_session_bearer_falls_back_to_api_key() {
        let backend = backend(Arc::new(MemoryStore::new()));
        assert_eq!(backend.current_user_id().await, None);
        assert_eq!(backend.bearer().await, "publishable");
    }

    #[test]
    fn test_new_post_payload_columns() {
        let payload = NewPostPayload {
            user_id: Uuid::nil(),
            nickname: "Mumu",
            vault_name: "Career · Wealth",
            content: "Pitched the plan",
            likes_count: 0,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["vault_name"], "Career · Wealth");
        assert_eq!(value["likes_count"], 0);
        assert!(value.get("user_id").is_some());
    }
}
