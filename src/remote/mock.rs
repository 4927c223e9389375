//! In-process backend for tests

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{RemotePost, SocialBackend};
use crate::error::RemoteError;

#[derive(Default)]
pub(crate) struct MockBackend {
    pub posts: Mutex<Vec<RemotePost>>,
    pub liked: Mutex<HashSet<Uuid>>,
    pub favorited: Mutex<HashSet<Uuid>>,
    pub shared: Mutex<Vec<(String, String)>>,
    pub fail_fetch: AtomicBool,
    pub fail_writes: AtomicBool,
    pub signed_out: AtomicBool,
    pub like_calls: AtomicUsize,
    pub favorite_calls: AtomicUsize,
    pub subscriptions: AtomicUsize,
    inserts: Mutex<Vec<mpsc::Sender<RemotePost>>>,
}

impl MockBackend {
    pub fn failing() -> Self {
        let backend = Self::default();
        backend.fail_fetch.store(true, Ordering::SeqCst);
        backend.fail_writes.store(true, Ordering::SeqCst);
        backend
    }

    pub fn with_posts(posts: Vec<RemotePost>) -> Self {
        let backend = Self::default();
        *backend.posts.lock().unwrap() = posts;
        backend
    }

    pub fn like_calls(&self) -> usize {
        self.like_calls.load(Ordering::SeqCst)
    }

    pub fn favorite_calls(&self) -> usize {
        self.favorite_calls.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Push an insert event to every subscriber still listening
    pub async fn push_insert(&self, post: RemotePost) {
        let senders = self.inserts.lock().unwrap().clone();
        for sender in senders {
            let _ = sender.send(post.clone()).await;
        }
    }

    /// Subscriptions whose receiving side is still alive
    pub fn open_subscriptions(&self) -> usize {
        self.inserts
            .lock()
            .unwrap()
            .iter()
            .filter(|sender| !sender.is_closed())
            .count()
    }

    fn check_fetch(&self) -> Result<(), RemoteError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            Err(RemoteError::Unavailable("simulated network error".to_string()))
        } else {
            Ok(())
        }
    }

    fn check_write(&self) -> Result<(), RemoteError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(RemoteError::Unavailable("simulated write failure".to_string()))
        } else {
            Ok(())
        }
    }
}

pub(crate) fn post(content: &str, likes: i64) -> RemotePost {
    RemotePost {
        id: Uuid::new_v4(),
        author_id: Uuid::new_v4(),
        display_name: "tester".to_string(),
        category_label: "Growth · Wisdom".to_string(),
        content: content.to_string(),
        like_count: likes,
        created_at: Utc::now(),
    }
}

#[async_trait]
impl SocialBackend for MockBackend {
    async fn fetch_posts(&self, limit: usize) -> Result<Vec<RemotePost>, RemoteError> {
        self.check_fetch()?;
        let posts = self.posts.lock().unwrap();
        Ok(posts.iter().take(limit).cloned().collect())
    }

    async fn share_post(&self, content: &str, vault_name: &str) -> Result<(), RemoteError> {
        if self.signed_out.load(Ordering::SeqCst) {
            return Err(RemoteError::NotAuthenticated);
        }
        self.check_write()?;
        self.shared
            .lock()
            .unwrap()
            .push((content.to_string(), vault_name.to_string()));
        Ok(())
    }

    async fn fetch_liked_post_ids(&self) -> Result<HashSet<Uuid>, RemoteError> {
        self.check_fetch()?;
        Ok(self.liked.lock().unwrap().clone())
    }

    async fn like_post(&self, post_id: Uuid) -> Result<(), RemoteError> {
        self.like_calls.fetch_add(1, Ordering::SeqCst);
        self.check_write()?;
        self.liked.lock().unwrap().insert(post_id);
        Ok(())
    }

    async fn fetch_favorited_post_ids(&self) -> Result<HashSet<Uuid>, RemoteError> {
        self.check_fetch()?;
        Ok(self.favorited.lock().unwrap().clone())
    }

    async fn favorite_post(&self, post_id: Uuid) -> Result<(), RemoteError> {
        self.favorite_calls.fetch_add(1, Ordering::SeqCst);
        self.check_write()?;
        self.favorited.lock().unwrap().insert(post_id);
        Ok(())
    }

    async fn subscribe_inserts(&self) -> Result<mpsc::Receiver<RemotePost>, RemoteError> {
        let (tx, rx) = mpsc::channel(16);
        self.inserts.lock().unwrap().push(tx);
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }
}
