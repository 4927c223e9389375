//! Community feed cache
//!
//! Holds the feed for one session: posts (newest first), the user's liked and
//! favorited ids, and the realtime subscription. All of it is owned by one
//! task. Background work (the realtime forwarder, remote writes) never touches
//! this state; inserts come back over a channel and are applied by the owner.
//!
//! Likes and favorites are optimistic. The local transition happens first and
//! the remote write runs detached. A failed write is logged and the local
//! state stands.

use chrono::Utc;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::RemoteError;
use crate::favorites::{AddOutcome, FavoritesStore};
use crate::remote::{RemotePost, SocialBackend, DEFAULT_PAGE_SIZE};
use crate::state::snapshot::WidgetChannel;

/// Shown when the feed had to fall back to placeholder posts
pub const FALLBACK_MESSAGE: &str = "Network error, showing sample posts";

const INSERT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Uninitialized,
    Loaded,
    /// Fetch failed; the feed holds placeholder posts
    LoadedWithFallback,
}

struct Subscription {
    cancel: CancellationToken,
    inserts: mpsc::Receiver<RemotePost>,
    _task: JoinHandle<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct CommunityFeed {
    backend: Arc<dyn SocialBackend>,
    favorites: FavoritesStore,
    widget: Option<WidgetChannel>,
    pro: watch::Receiver<bool>,
    page_size: usize,

    posts: Vec<RemotePost>,
    liked_ids: HashSet<Uuid>,
    favorited_ids: HashSet<Uuid>,
    state: FeedState,
    is_loading: bool,
    error_message: Option<String>,

    realtime: Option<Subscription>,
    pending_writes: Vec<JoinHandle<()>>,
}

impl CommunityFeed {
    pub fn new(
        backend: Arc<dyn SocialBackend>,
        favorites: FavoritesStore,
        pro: watch::Receiver<bool>,
    ) -> Self {
        Self {
            backend,
            favorites,
            widget: None,
            pro,
            page_size: DEFAULT_PAGE_SIZE,
            posts: Vec::new(),
            liked_ids: HashSet::new(),
            favorited_ids: HashSet::new(),
            state: FeedState::Uninitialized,
            is_loading: false,
            error_message: None,
            realtime: None,
            pending_writes: Vec::new(),
        }
    }

    /// Publish the last favorited text to the widget channel
    pub fn with_widget(mut self, widget: WidgetChannel) -> Self {
        self.widget = Some(widget);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn posts(&self) -> &[RemotePost] {
        &self.posts
    }

    pub fn post(&self, id: Uuid) -> Option<&RemotePost> {
        self.posts.iter().find(|p| p.id == id)
    }

    pub fn liked_ids(&self) -> &HashSet<Uuid> {
        &self.liked_ids
    }

    pub fn favorited_ids(&self) -> &HashSet<Uuid> {
        &self.favorited_ids
    }

    pub fn is_liked(&self, id: Uuid) -> bool {
        self.liked_ids.contains(&id)
    }

    pub fn is_favorited(&self, id: Uuid) -> bool {
        self.favorited_ids.contains(&id)
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn favorites(&self) -> &FavoritesStore {
        &self.favorites
    }

    pub fn is_subscribed(&self) -> bool {
        self.realtime.is_some()
    }

    /// Fetch posts and both interaction sets together. Any failure puts the
    /// feed on placeholder posts (if it is empty) with an error message.
    pub async fn load_all(&mut self) {
        self.is_loading = true;
        let result = tokio::try_join!(
            self.backend.fetch_posts(self.page_size),
            self.backend.fetch_liked_post_ids(),
            self.backend.fetch_favorited_post_ids(),
        );
        self.is_loading = false;

        match result {
            Ok((posts, liked, favorited)) => {
                info!(posts = posts.len(), liked = liked.len(), favorited = favorited.len(), "Community feed loaded");
                self.posts = posts;
                self.liked_ids = liked;
                self.favorited_ids = favorited;
                self.error_message = None;
                self.state = FeedState::Loaded;
            }
            Err(e) => {
                warn!(error = %e, "Community feed load failed, using placeholders");
                self.error_message = Some(FALLBACK_MESSAGE.to_string());
                if self.posts.is_empty() {
                    self.posts = placeholder_posts();
                }
                self.state = FeedState::LoadedWithFallback;
            }
        }
    }

    /// Open the realtime subscription, replacing any previous one.
    pub fn subscribe_to_new_posts(&mut self) {
        // Cancel first so events are never delivered twice
        self.unsubscribe();

        let (tx, rx) = mpsc::channel(INSERT_BUFFER);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let backend = Arc::clone(&self.backend);

        let task = tokio::spawn(async move {
            let mut inserts = tokio::select! {
                _ = token.cancelled() => return,
                opened = backend.subscribe_inserts() => match opened {
                    Ok(inserts) => inserts,
                    Err(e) => {
                        warn!(error = %e, "Realtime subscription failed");
                        return;
                    }
                },
            };

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = inserts.recv() => match next {
                        Some(post) => {
                            if tx.send(post).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            debug!("Realtime forwarder stopped");
        });

        self.realtime = Some(Subscription {
            cancel,
            inserts: rx,
            _task: task,
        });
    }

    /// Tear down the realtime subscription, if any.
    pub fn unsubscribe(&mut self) {
        if self.realtime.take().is_some() {
            debug!("Realtime subscription cancelled");
        }
    }

    /// Apply one inserted post. Ids already in the feed are ignored; new
    /// posts go to the front. Returns whether the feed changed.
    pub fn apply_insert(&mut self, post: RemotePost) -> bool {
        if self.posts.iter().any(|p| p.id == post.id) {
            debug!(id = %post.id, "Realtime insert already in feed");
            return false;
        }
        self.posts.insert(0, post);
        true
    }

    /// Wait for the next realtime insert that actually changes the feed.
    /// `None` once the subscription is gone.
    pub async fn next_insert(&mut self) -> Option<RemotePost> {
        loop {
            let post = self.realtime.as_mut()?.inserts.recv().await?;
            if self.apply_insert(post.clone()) {
                return Some(post);
            }
        }
    }

    /// Apply every insert already received without waiting. Returns how many
    /// were new.
    pub fn drain_inserts(&mut self) -> usize {
        let mut received = Vec::new();
        if let Some(sub) = self.realtime.as_mut() {
            while let Ok(post) = sub.inserts.try_recv() {
                received.push(post);
            }
        }
        let mut applied = 0;
        for post in received {
            if self.apply_insert(post) {
                applied += 1;
            }
        }
        applied
    }

    /// Like a post. Returns `false` if it was already liked.
    pub fn like(&mut self, post_id: Uuid) -> bool {
        if !self.liked_ids.insert(post_id) {
            return false;
        }
        if let Some(post) = self.posts.iter_mut().find(|p| p.id == post_id) {
            post.like_count += 1;
        }

        let backend = Arc::clone(&self.backend);
        self.spawn_write("like", post_id, async move { backend.like_post(post_id).await });
        true
    }

    /// Favorite a post. `false` means the free limit was hit: nothing was
    /// marked and nothing was sent.
    pub fn favorite(&mut self, post_id: Uuid, post: &RemotePost) -> bool {
        if self.favorited_ids.contains(&post_id) {
            return true;
        }

        let is_pro = *self.pro.borrow();
        if self.favorites.add(post, is_pro) == AddOutcome::QuotaExceeded {
            info!(%post_id, limit = self.favorites.limit(), "Favorite needs upgrade");
            return false;
        }

        self.favorited_ids.insert(post_id);
        if let Some(widget) = &self.widget {
            if let Err(e) = widget.update_last_favorite(Some(post.content.clone())) {
                warn!(error = %e, "Could not publish last favorite to widget");
            }
        }

        let backend = Arc::clone(&self.backend);
        self.spawn_write("favorite", post_id, async move {
            backend.favorite_post(post_id).await
        });
        true
    }

    /// Drop a favorite from the local cache. The remote record is kept.
    pub fn remove_favorite(&mut self, id: &str) -> bool {
        self.favorites.remove(id)
    }

    /// Wait for detached remote writes to finish.
    pub async fn flush_writes(&mut self) {
        for handle in self.pending_writes.drain(..) {
            let _ = handle.await;
        }
    }

    fn spawn_write<F>(&mut self, action: &'static str, post_id: Uuid, write: F)
    where
        F: Future<Output = Result<(), RemoteError>> + Send + 'static,
    {
        self.pending_writes.retain(|handle| !handle.is_finished());
        self.pending_writes.push(tokio::spawn(async move {
            match write.await {
                Ok(()) => debug!(action, %post_id, "Remote write applied"),
                Err(e) => warn!(action, %post_id, error = %e, "Remote write failed, keeping local state"),
            }
        }));
    }
}

impl std::fmt::Debug for CommunityFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommunityFeed")
            .field("state", &self.state)
            .field("posts", &self.posts.len())
            .field("subscribed", &self.realtime.is_some())
            .finish()
    }
}

/// Fixed sample posts used when the feed cannot be fetched. Ids are stable
/// so interactions on them survive a reload.
pub fn placeholder_posts() -> Vec<RemotePost> {
    const SAMPLES: [(&str, &str, &str, i64); 8] = [
        ("Mumu", "Career · Wealth", "Finally pitched my proposal to the boss and it got accepted!", 128),
        ("Sunny", "Growth · Wisdom", "Thirty days of morning meditation, full of energy", 87),
        ("Star River", "Love · Relations", "Messaged a friend I'd lost touch with, they were so happy", 212),
        ("Acheng", "Growth · Wisdom", "Finished the first chapter of the novel I shelved two years ago", 341),
        ("Huixin", "Love · Relations", "Didn't react emotionally today, calmly settled a conflict", 176),
        ("Little Fish", "Career · Wealth", "Landed my first freelance gig, small but I'm proud", 409),
        ("Yangguang", "Love · Relations", "Learned a new dish, the family loved it", 93),
        ("Breeze", "Growth · Wisdom", "Got up on time without snoozing, applause for me", 267),
    ];

    let now = Utc::now();
    SAMPLES
        .iter()
        .enumerate()
        .map(|(i, (nickname, vault, content, likes))| RemotePost {
            id: Uuid::from_u128(0x11fe_0000_0000_4000_8000_0000_0000_0001 + i as u128),
            author_id: Uuid::from_u128(0x11fe_0000_0000_4000_8000_0000_0001_0001 + i as u128),
            display_name: nickname.to_string(),
            category_label: vault.to_string(),
            content: content.to_string(),
            like_count: *likes,
            created_at: now,
        })
        .collect()
}

/// Compact counter for feed stats: `12.3万` from ten thousand up.
pub fn format_wan(n: u64) -> String {
    if n >= 10_000 {
        format!("{:.1}万", n as f64 / 10_000.0)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::favorites::FREE_LIMIT;
    use crate::remote::mock::{post, MockBackend};
    use crate::state::kv::{KeyValueStore, MemoryStore};

    fn feed_with(backend: Arc<MockBackend>, is_pro: bool) -> (CommunityFeed, watch::Sender<bool>) {
        let (pro_tx, pro_rx) = watch::channel(is_pro);
        let favorites = FavoritesStore::load(Arc::new(MemoryStore::new()));
        (CommunityFeed::new(backend, favorites, pro_rx), pro_tx)
    }

    async fn wait_for_subscriptions(backend: &MockBackend, n: usize) {
        while backend.subscriptions() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_load_all_success() {
        let posts = vec![post("newest", 1), post("older", 2)];
        let backend = Arc::new(MockBackend::with_posts(posts.clone()));
        backend.liked.lock().unwrap().insert(posts[1].id);
        let (mut feed, _pro) = feed_with(Arc::clone(&backend), false);

        assert_eq!(feed.state(), FeedState::Uninitialized);
        feed.load_all().await;

        assert_eq!(feed.state(), FeedState::Loaded);
        assert_eq!(feed.posts(), &posts[..]);
        assert!(feed.is_liked(posts[1].id));
        assert!(feed.error_message().is_none());
        assert!(!feed.is_loading());
    }

    #[tokio::test]
    async fn test_failed_load_falls_back_and_like_still_works() {
        let backend = Arc::new(MockBackend::failing());
        let (mut feed, _pro) = feed_with(Arc::clone(&backend), false);

        feed.load_all().await;

        assert_eq!(feed.state(), FeedState::LoadedWithFallback);
        let expected: Vec<Uuid> = placeholder_posts().iter().map(|p| p.id).collect();
        let shown: Vec<Uuid> = feed.posts().iter().map(|p| p.id).collect();
        assert_eq!(shown, expected);
        assert_eq!(feed.error_message(), Some(FALLBACK_MESSAGE));

        let first = feed.posts()[0].clone();
        assert!(feed.like(first.id));
        assert_eq!(feed.post(first.id).unwrap().like_count, first.like_count + 1);

        // The remote write fails, the optimistic state stays
        feed.flush_writes().await;
        assert_eq!(backend.like_calls(), 1);
        assert!(feed.is_liked(first.id));
        assert_eq!(feed.post(first.id).unwrap().like_count, first.like_count + 1);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_existing_posts() {
        let posts = vec![post("real", 5)];
        let backend = Arc::new(MockBackend::with_posts(posts.clone()));
        let (mut feed, _pro) = feed_with(Arc::clone(&backend), false);
        feed.load_all().await;

        backend.fail_fetch.store(true, std::sync::atomic::Ordering::SeqCst);
        feed.load_all().await;

        assert_eq!(feed.state(), FeedState::LoadedWithFallback);
        assert_eq!(feed.posts(), &posts[..]);
        assert!(feed.error_message().is_some());
    }

    #[tokio::test]
    async fn test_like_is_idempotent() {
        let target = post("like me", 10);
        let backend = Arc::new(MockBackend::with_posts(vec![target.clone()]));
        let (mut feed, _pro) = feed_with(Arc::clone(&backend), false);
        feed.load_all().await;

        assert!(feed.like(target.id));
        assert!(!feed.like(target.id));
        feed.flush_writes().await;

        assert_eq!(feed.post(target.id).unwrap().like_count, 11);
        assert_eq!(backend.like_calls(), 1);
        assert!(backend.liked.lock().unwrap().contains(&target.id));
    }

    #[tokio::test]
    async fn test_favorite_over_quota_touches_nothing() {
        let posts: Vec<_> = (0..=FREE_LIMIT).map(|i| post(&format!("p{i}"), 0)).collect();
        let backend = Arc::new(MockBackend::with_posts(posts.clone()));
        let (mut feed, _pro) = feed_with(Arc::clone(&backend), false);
        feed.load_all().await;

        for p in &posts[..FREE_LIMIT] {
            assert!(feed.favorite(p.id, p));
        }
        let extra = &posts[FREE_LIMIT];
        assert!(!feed.favorite(extra.id, extra));
        feed.flush_writes().await;

        assert!(!feed.is_favorited(extra.id));
        assert_eq!(feed.favorites().len(), FREE_LIMIT);
        assert_eq!(backend.favorite_calls(), FREE_LIMIT);
    }

    #[tokio::test]
    async fn test_favorite_twice_and_pro_unlimited() {
        let posts: Vec<_> = (0..12).map(|i| post(&format!("p{i}"), 0)).collect();
        let backend = Arc::new(MockBackend::with_posts(posts.clone()));
        let (mut feed, pro) = feed_with(Arc::clone(&backend), false);
        feed.load_all().await;

        assert!(feed.favorite(posts[0].id, &posts[0]));
        assert!(feed.favorite(posts[0].id, &posts[0]));

        pro.send_replace(true);
        for p in &posts[1..] {
            assert!(feed.favorite(p.id, p));
        }
        feed.flush_writes().await;
        assert_eq!(feed.favorites().len(), 12);
        assert_eq!(backend.favorite_calls(), 12);
    }

    #[tokio::test]
    async fn test_favorite_publishes_last_favorite_to_widget() {
        let target = post("a kind stranger helped me", 0);
        let backend = Arc::new(MockBackend::with_posts(vec![target.clone()]));
        let shared: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let widget = WidgetChannel::new(Arc::clone(&shared));
        let (feed, _pro) = feed_with(backend, false);
        let mut feed = feed.with_widget(widget.clone());

        feed.favorite(target.id, &target);
        assert_eq!(
            widget.read().unwrap().last_favorite.as_deref(),
            Some("a kind stranger helped me")
        );
    }

    #[tokio::test]
    async fn test_realtime_insert_prepends_and_dedups() {
        let existing = post("already here", 0);
        let backend = Arc::new(MockBackend::with_posts(vec![existing.clone()]));
        let (mut feed, _pro) = feed_with(Arc::clone(&backend), false);
        feed.load_all().await;

        feed.subscribe_to_new_posts();
        wait_for_subscriptions(&backend, 1).await;

        let fresh = post("just shared", 0);
        backend.push_insert(existing.clone()).await;
        backend.push_insert(fresh.clone()).await;

        assert_eq!(feed.next_insert().await, Some(fresh.clone()));
        assert_eq!(feed.posts().len(), 2);
        assert_eq!(feed.posts()[0].id, fresh.id);
        assert_eq!(feed.posts()[1].id, existing.id);
    }

    #[test]
    fn test_duplicate_insert_leaves_feed_unchanged() {
        let posts = vec![post("a", 0), post("b", 0)];
        let (_pro_tx, pro_rx) = watch::channel(false);
        let mut feed = CommunityFeed::new(
            Arc::new(MockBackend::default()),
            FavoritesStore::load(Arc::new(MemoryStore::new())),
            pro_rx,
        );
        feed.posts = posts.clone();

        assert!(!feed.apply_insert(posts[1].clone()));
        assert_eq!(feed.posts(), &posts[..]);
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_previous_subscription() {
        let backend = Arc::new(MockBackend::default());
        let (mut feed, _pro) = feed_with(Arc::clone(&backend), false);

        feed.subscribe_to_new_posts();
        wait_for_subscriptions(&backend, 1).await;
        feed.subscribe_to_new_posts();
        wait_for_subscriptions(&backend, 2).await;

        // The first forwarder is gone, not just superseded
        let closed = tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while backend.open_subscriptions() > 1 {
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(closed.is_ok());
        assert_eq!(backend.open_subscriptions(), 1);

        let fresh = post("once", 0);
        backend.push_insert(fresh.clone()).await;
        assert_eq!(feed.next_insert().await, Some(fresh));
        assert_eq!(feed.posts().len(), 1);

        // Nothing else was delivered for the same push
        let mut queued = 0;
        if let Some(sub) = feed.realtime.as_mut() {
            while sub.inserts.try_recv().is_ok() {
                queued += 1;
            }
        }
        assert_eq!(queued, 0);

        feed.unsubscribe();
        assert!(!feed.is_subscribed());
        assert_eq!(feed.next_insert().await, None);
    }

    #[tokio::test]
    async fn test_drain_inserts_applies_in_receipt_order() {
        let backend = Arc::new(MockBackend::default());
        let (mut feed, _pro) = feed_with(Arc::clone(&backend), false);
        feed.subscribe_to_new_posts();
        wait_for_subscriptions(&backend, 1).await;

        let first = post("first", 0);
        let second = post("second", 0);
        backend.push_insert(first.clone()).await;
        backend.push_insert(second.clone()).await;

        // Let the forwarder hand both over
        let mut applied = 0;
        while applied < 2 {
            tokio::task::yield_now().await;
            applied += feed.drain_inserts();
        }
        assert_eq!(feed.posts()[0].id, second.id);
        assert_eq!(feed.posts()[1].id, first.id);
    }

    #[test]
    fn test_placeholders_are_stable() {
        let a = placeholder_posts();
        let b = placeholder_posts();
        assert_eq!(a.len(), 8);
        assert_eq!(
            a.iter().map(|p| p.id).collect::<Vec<_>>(),
            b.iter().map(|p| p.id).collect::<Vec<_>>()
        );
        let unique: HashSet<_> = a.iter().map(|p| p.id).collect();
        assert_eq!(unique.len(), 8);
    }

    #[test]
    fn test_format_wan() {
        assert_eq!(format_wan(9_999), "9999");
        assert_eq!(format_wan(12_345), "1.2万");
    }
}
