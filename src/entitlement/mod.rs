//! Pro entitlement gate
//!
//! `is_pro` is restored from the local cache at startup so gated screens do
//! not flash their locked state, then reconciled against the platform ledger.
//! Reconciliation is the only writer of the flag. Consumers hold a
//! `watch::Receiver<bool>` from [`EntitlementGate::subscribe`].

pub mod sandbox;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::state::kv::KeyValueStore;

pub use sandbox::SandboxLedger;

pub const MONTHLY_ID: &str = "com.xinyao.lifevault.pro.monthly";
pub const ANNUAL_ID: &str = "com.xinyao.lifevault.pro.annual";

/// Either plan unlocks the same flag
pub const PRO_PRODUCT_IDS: [&str; 2] = [MONTHLY_ID, ANNUAL_ID];

const PRO_CACHE_KEY: &str = "isPro";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EntitlementError {
    #[error("Purchase verification failed, please try again")]
    FailedVerification,

    #[error("Unknown product: {0}")]
    UnknownProduct(String),

    #[error("Store error: {0}")]
    Store(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Product {
    pub id: String,
    pub display_name: String,
    pub display_price: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: u64,
    pub product_id: String,
    pub purchased_at: DateTime<Utc>,
    /// Set on refund or revocation
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Transaction {
    fn grants_pro(&self) -> bool {
        self.revoked_at.is_none() && PRO_PRODUCT_IDS.contains(&self.product_id.as_str())
    }
}

/// Ledger verification result
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Verification<T> {
    Verified(T),
    Unverified(T, String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PurchaseResult {
    Success(Verification<Transaction>),
    UserCancelled,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseOutcome {
    Purchased,
    Cancelled,
    Pending,
}

/// The platform's purchase and entitlement ledger
#[async_trait]
pub trait EntitlementLedger: Send + Sync {
    async fn products(&self, ids: &[&str]) -> Result<Vec<Product>, EntitlementError>;

    /// Current entitlements, one per active product
    async fn current_entitlements(&self) -> Result<Vec<Verification<Transaction>>, EntitlementError>;

    async fn purchase(&self, product_id: &str) -> Result<PurchaseResult, EntitlementError>;

    /// Re-sync with the purchase history
    async fn sync(&self) -> Result<(), EntitlementError>;

    /// Acknowledge a transaction as handled
    async fn finish(&self, transaction: &Transaction) -> Result<(), EntitlementError>;

    /// Renewals, revocations and refunds pushed by the platform
    fn updates(&self) -> broadcast::Receiver<Verification<Transaction>>;
}

struct Shared {
    ledger: Arc<dyn EntitlementLedger>,
    cache: Arc<dyn KeyValueStore>,
    is_pro: watch::Sender<bool>,
}

impl Shared {
    /// Scan the ledger and store the result. On ledger failure the current
    /// value stays.
    async fn reconcile(&self) -> bool {
        let entitlements = match self.ledger.current_entitlements().await {
            Ok(entitlements) => entitlements,
            Err(e) => {
                warn!(error = %e, "Entitlement scan failed, keeping cached status");
                return *self.is_pro.borrow();
            }
        };

        let found = entitlements
            .iter()
            .any(|v| matches!(v, Verification::Verified(tx) if tx.grants_pro()));

        let previous = self.is_pro.send_replace(found);
        if previous != found {
            info!(is_pro = found, "Entitlement changed");
        }
        if let Err(e) = self.cache.set_bool(PRO_CACHE_KEY, found) {
            warn!(error = %e, "Could not cache pro status");
        }
        found
    }
}

pub struct EntitlementGate {
    shared: Arc<Shared>,
    products: Vec<Product>,
    is_loading: bool,
    purchase_error: Option<String>,
    listener: Option<(CancellationToken, JoinHandle<()>)>,
}

impl EntitlementGate {
    /// Start from the cached flag. Call [`reconcile`](Self::reconcile) to
    /// check it against the ledger.
    pub fn restore(ledger: Arc<dyn EntitlementLedger>, cache: Arc<dyn KeyValueStore>) -> Self {
        let cached = cache.get_bool(PRO_CACHE_KEY);
        debug!(is_pro = cached, "Restored cached pro status");
        let (is_pro, _) = watch::channel(cached);
        Self {
            shared: Arc::new(Shared {
                ledger,
                cache,
                is_pro,
            }),
            products: Vec::new(),
            is_loading: false,
            purchase_error: None,
            listener: None,
        }
    }

    pub fn is_pro(&self) -> bool {
        *self.shared.is_pro.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shared.is_pro.subscribe()
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn product(&self, id: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    /// Last user-visible purchase or restore failure
    pub fn purchase_error(&self) -> Option<&str> {
        self.purchase_error.as_deref()
    }

    pub async fn load_products(&mut self) {
        match self.shared.ledger.products(&PRO_PRODUCT_IDS).await {
            Ok(products) => self.products = products,
            Err(e) => warn!(error = %e, "Product load failed"),
        }
    }

    pub async fn reconcile(&self) -> bool {
        self.shared.reconcile().await
    }

    /// Buy a plan. A verified purchase is reconciled before the transaction
    /// is finished, so the unlock is recorded before the ledger forgets it.
    pub async fn purchase(&mut self, product_id: &str) -> Result<PurchaseOutcome, EntitlementError> {
        self.is_loading = true;
        self.purchase_error = None;
        let result = self.purchase_inner(product_id).await;
        self.is_loading = false;

        if let Err(e) = &result {
            self.purchase_error = Some(e.to_string());
        }
        result
    }

    async fn purchase_inner(&self, product_id: &str) -> Result<PurchaseOutcome, EntitlementError> {
        if !PRO_PRODUCT_IDS.contains(&product_id) {
            return Err(EntitlementError::UnknownProduct(product_id.to_string()));
        }

        match self.shared.ledger.purchase(product_id).await? {
            PurchaseResult::Success(Verification::Verified(tx)) => {
                self.shared.reconcile().await;
                // Unlock is already recorded, a failed acknowledgement only logs
                if let Err(e) = self.shared.ledger.finish(&tx).await {
                    warn!(error = %e, transaction = tx.id, "Could not finish transaction");
                }
                info!(product_id, transaction = tx.id, "Purchase completed");
                Ok(PurchaseOutcome::Purchased)
            }
            PurchaseResult::Success(Verification::Unverified(tx, reason)) => {
                warn!(product_id, transaction = tx.id, reason = %reason, "Purchase failed verification");
                Err(EntitlementError::FailedVerification)
            }
            PurchaseResult::UserCancelled => Ok(PurchaseOutcome::Cancelled),
            PurchaseResult::Pending => Ok(PurchaseOutcome::Pending),
        }
    }

    /// Re-sync the purchase history, then reconcile.
    pub async fn restore_purchases(&mut self) -> Result<bool, EntitlementError> {
        self.is_loading = true;
        self.purchase_error = None;
        let synced = self.shared.ledger.sync().await;
        let result = match synced {
            Ok(()) => Ok(self.shared.reconcile().await),
            Err(e) => {
                self.purchase_error = Some(e.to_string());
                Err(e)
            }
        };
        self.is_loading = false;
        result
    }

    /// Start the long-lived ledger listener, replacing any running one.
    pub fn spawn_listener(&mut self) {
        self.stop_listener();

        let mut updates = self.shared.ledger.updates();
        let shared = Arc::clone(&self.shared);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                let update = tokio::select! {
                    _ = token.cancelled() => break,
                    update = updates.recv() => update,
                };
                match update {
                    Ok(Verification::Verified(tx)) => {
                        shared.reconcile().await;
                        if let Err(e) = shared.ledger.finish(&tx).await {
                            warn!(error = %e, transaction = tx.id, "Could not finish transaction");
                        }
                    }
                    Ok(Verification::Unverified(tx, reason)) => {
                        debug!(transaction = tx.id, reason = %reason, "Ignoring unverified ledger update");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Ledger updates lagged, reconciling");
                        shared.reconcile().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Ledger listener stopped");
        });

        self.listener = Some((cancel, task));
    }

    pub fn stop_listener(&mut self) {
        if let Some((cancel, _task)) = self.listener.take() {
            cancel.cancel();
        }
    }
}

impl Drop for EntitlementGate {
    fn drop(&mut self) {
        self.stop_listener();
    }
}

impl std::fmt::Debug for EntitlementGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitlementGate")
            .field("is_pro", &self.is_pro())
            .field("listening", &self.listener.is_some())
            .finish()
    }
}
