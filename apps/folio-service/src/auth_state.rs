//! # Auth State Store
//!
//! Short-lived, single-use values keyed by a random nonce, such as the
//! PKCE verifier held between an OAuth redirect and its callback.
//!
//! ```text
//!  login start            callback               sweeper (interval)
//!      │                      │                        │
//!  issue(v) ──► nonce     take(nonce) ──► Some(v)   sweep() drops
//!      │                      │           (once)     expired entries
//!      ▼                      ▼                        ▼
//!  ┌──────────────────────────────────────────────────────────┐
//!  │  HashMap<nonce, (value, expires_at)>  behind an RwLock   │
//!  └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Limits
//! The store is process-local. Entries do not survive a restart and are
//! not visible to other instances, so a callback that lands on a different
//! process than its login start will fail. Running more than one instance
//! requires moving this state to a shared expiring cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// TTL-expiring, single-use value store.
pub struct AuthStateStore<V> {
    entries: Arc<RwLock<HashMap<String, Entry<V>>>>,
    ttl: Duration,
}

impl<V> Clone for AuthStateStore<V> {
    fn clone(&self) -> Self {
        AuthStateStore {
            entries: Arc::clone(&self.entries),
            ttl: self.ttl,
        }
    }
}

impl<V: Send + Sync + 'static> AuthStateStore<V> {
    pub fn new(ttl: Duration) -> Self {
        AuthStateStore {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stores `value` and returns the nonce that redeems it.
    pub async fn issue(&self, value: V) -> String {
        let nonce = Uuid::new_v4().simple().to_string();
        let entry = Entry {
            value,
            expires_at: Instant::now() + self.ttl,
        };

        self.entries.write().await.insert(nonce.clone(), entry);
        nonce
    }

    /// Redeems a nonce. Each nonce works once; expired ones yield `None`.
    pub async fn take(&self, nonce: &str) -> Option<V> {
        let entry = self.entries.write().await.remove(nonce)?;
        (entry.expires_at > Instant::now()).then_some(entry.value)
    }

    /// Drops expired entries and returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Starts a background task that sweeps every `every` until shut down.
    pub fn spawn_sweeper(&self, every: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let store = self.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(every_ms = every.as_millis() as u64, "Auth state sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = store.sweep().await;
                        if removed > 0 {
                            debug!(removed, "Expired auth state swept");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Auth state sweeper shutting down");
                        break;
                    }
                }
            }
        });

        SweeperHandle { shutdown_tx, task }
    }
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stops the sweeper and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_issue_and_take_once() {
        let store = AuthStateStore::new(Duration::from_secs(60));
        let nonce = store.issue("verifier-1".to_string()).await;

        assert_eq!(store.take(&nonce).await.as_deref(), Some("verifier-1"));
        assert_eq!(store.take(&nonce).await, None);
        assert_eq!(store.take("unknown").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_values_are_not_returned() {
        let store = AuthStateStore::new(Duration::from_secs(60));
        let nonce = store.issue(42u32).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.take(&nonce).await, None);
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_only_expired() {
        let store = AuthStateStore::new(Duration::from_secs(60));
        store.issue(1u32).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        let fresh = store.issue(2u32).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(store.sweep().await, 1);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.take(&fresh).await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task() {
        let store = AuthStateStore::new(Duration::from_secs(5));
        store.issue("a").await;
        store.issue("b").await;

        let sweeper = store.spawn_sweeper(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(store.is_empty().await);

        sweeper.shutdown().await;
    }
}
