//! Local sandbox ledger
//!
//! Stands in for the platform store when running on a desktop: purchases
//! succeed immediately and are kept in the key-value cache. Refunds can be
//! simulated with [`SandboxLedger::revoke`], which pushes an update the same
//! way a real store would.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::info;

use super::{
    EntitlementError, EntitlementLedger, Product, PurchaseResult, Transaction, Verification,
    ANNUAL_ID, MONTHLY_ID,
};
use crate::state::kv::KeyValueStore;

const STATE_KEY: &str = "sandbox.ledger";

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
struct LedgerState {
    next_id: u64,
    transactions: Vec<Transaction>,
    finished: Vec<u64>,
}

pub struct SandboxLedger {
    cache: Arc<dyn KeyValueStore>,
    state: Mutex<LedgerState>,
    updates: broadcast::Sender<Verification<Transaction>>,
}

impl SandboxLedger {
    pub fn open(cache: Arc<dyn KeyValueStore>) -> Result<Self, EntitlementError> {
        let state = cache
            .get_json::<LedgerState>(STATE_KEY)
            .map_err(|e| EntitlementError::Store(e.to_string()))?
            .unwrap_or_default();
        let (updates, _) = broadcast::channel(16);
        Ok(Self {
            cache,
            state: Mutex::new(state),
            updates,
        })
    }

    /// Refund every active transaction for `product_id`.
    /// Returns whether anything was revoked.
    pub fn revoke(&self, product_id: &str) -> Result<bool, EntitlementError> {
        let revoked: Vec<Transaction> = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let now = Utc::now();
            let mut revoked = Vec::new();
            for tx in state.transactions.iter_mut() {
                if tx.product_id == product_id && tx.revoked_at.is_none() {
                    tx.revoked_at = Some(now);
                    revoked.push(tx.clone());
                }
            }
            self.persist(&state)?;
            revoked
        };

        for tx in &revoked {
            info!(product_id, transaction = tx.id, "Sandbox transaction revoked");
            // No listener is fine
            let _ = self.updates.send(Verification::Verified(tx.clone()));
        }
        Ok(!revoked.is_empty())
    }

    /// Transactions not yet acknowledged with `finish`
    pub fn unfinished(&self) -> Vec<u64> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .transactions
            .iter()
            .map(|tx| tx.id)
            .filter(|id| !state.finished.contains(id))
            .collect()
    }

    fn persist(&self, state: &LedgerState) -> Result<(), EntitlementError> {
        self.cache
            .set_json(STATE_KEY, state)
            .map_err(|e| EntitlementError::Store(e.to_string()))
    }
}

fn catalog(id: &str) -> Option<Product> {
    let (name, price) = match id {
        MONTHLY_ID => ("Pro Monthly", "¥8 / month"),
        ANNUAL_ID => ("Pro Annual", "¥48 / year"),
        _ => return None,
    };
    Some(Product {
        id: id.to_string(),
        display_name: name.to_string(),
        display_price: price.to_string(),
    })
}

#[async_trait]
impl EntitlementLedger for SandboxLedger {
    async fn products(&self, ids: &[&str]) -> Result<Vec<Product>, EntitlementError> {
        Ok(ids.iter().filter_map(|id| catalog(id)).collect())
    }

    async fn current_entitlements(&self) -> Result<Vec<Verification<Transaction>>, EntitlementError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        // Latest transaction per product
        let mut latest: BTreeMap<&str, &Transaction> = BTreeMap::new();
        for tx in &state.transactions {
            latest.insert(tx.product_id.as_str(), tx);
        }
        Ok(latest
            .into_values()
            .map(|tx| Verification::Verified(tx.clone()))
            .collect())
    }

    async fn purchase(&self, product_id: &str) -> Result<PurchaseResult, EntitlementError> {
        if catalog(product_id).is_none() {
            return Err(EntitlementError::UnknownProduct(product_id.to_string()));
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.next_id += 1;
        let tx = Transaction {
            id: state.next_id,
            product_id: product_id.to_string(),
            purchased_at: Utc::now(),
            revoked_at: None,
        };
        state.transactions.push(tx.clone());
        self.persist(&state)?;
        info!(product_id, transaction = tx.id, "Sandbox purchase recorded");
        Ok(PurchaseResult::Success(Verification::Verified(tx)))
    }

    async fn sync(&self) -> Result<(), EntitlementError> {
        let state = self
            .cache
            .get_json::<LedgerState>(STATE_KEY)
            .map_err(|e| EntitlementError::Store(e.to_string()))?
            .unwrap_or_default();
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
        Ok(())
    }

    async fn finish(&self, transaction: &Transaction) -> Result<(), EntitlementError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.finished.contains(&transaction.id) {
            state.finished.push(transaction.id);
            self.persist(&state)?;
        }
        Ok(())
    }

    fn updates(&self) -> broadcast::Receiver<Verification<Transaction>> {
        self.updates.subscribe()
    }
}
