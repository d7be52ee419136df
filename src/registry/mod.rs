//! Tenant connection registry.
//!
//! Owns the at-most-one-live-connection-per-tenant invariant. Each tenant has
//! a slot guarded by an async mutex; whoever holds the slot lock is the only
//! task allowed to construct that tenant's connection, and concurrent callers
//! wait on the lock and then reuse the result.
//!
//! ```text
//! absent ──get_or_create──▶ connecting ──ok──▶ ready
//!    ▲                           │                │
//!    └──────── failure ──────────┘   not ready / evict
//!    ▲                                            │
//!    └────────────────────────────────────────────┘
//! ```

mod discord;

pub use discord::{DiscordConnection, DiscordConnector, guild_commands};

use crate::models::{FullSetup, SetupId};
use crate::storage::{CredentialStore, run_blocking};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinSet;

/// A live, authenticated chat session for one tenant.
#[async_trait]
pub trait ChatConnection: Send + Sync {
    /// Returns whether the session can still be used.
    fn is_ready(&self) -> bool;

    /// Sends one message to a channel.
    async fn send(&self, channel_id: &str, content: &str) -> Result<()>;
}

/// Builds chat connections from decrypted tenant setups.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Establishes a session and registers the tenant's command set.
    async fn connect(&self, setup: &FullSetup) -> Result<Arc<dyn ChatConnection>>;
}

/// Observable state of a tenant's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No usable connection.
    Absent,
    /// Construction in flight.
    Connecting,
    /// Connection cached and ready.
    Ready,
}

/// Result of a startup preload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreloadSummary {
    /// Tenants connected.
    pub connected: usize,
    /// Tenants that failed to connect.
    pub failed: usize,
}

type Slot = Arc<tokio::sync::Mutex<Option<Arc<dyn ChatConnection>>>>;

/// In-memory map from tenant id to its live connection.
pub struct ConnectionRegistry {
    factory: Arc<dyn ConnectionFactory>,
    slots: Mutex<HashMap<SetupId, Slot>>,
    connecting: Mutex<HashSet<SetupId>>,
    connect_timeout: Duration,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(factory: Arc<dyn ConnectionFactory>, connect_timeout: Duration) -> Self {
        Self {
            factory,
            slots: Mutex::new(HashMap::new()),
            connecting: Mutex::new(HashSet::new()),
            connect_timeout,
        }
    }

    fn slot(&self, id: &SetupId) -> Slot {
        Arc::clone(lock(&self.slots).entry(id.clone()).or_default())
    }

    /// Returns the tenant's ready connection, constructing one if needed.
    ///
    /// At most one construction per tenant runs at a time. Construction is
    /// bounded by the connect timeout; a timeout is a construction failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if construction fails or times out. The
    /// slot is left empty so the next call retries.
    pub async fn get_or_create(&self, setup: &FullSetup) -> Result<Arc<dyn ChatConnection>> {
        let slot = self.slot(&setup.id);
        let mut guard = slot.lock().await;

        if let Some(connection) = guard.as_ref() {
            if connection.is_ready() {
                return Ok(Arc::clone(connection));
            }
            tracing::info!(setup_id = %setup.id, "Cached connection not ready, reconstructing");
            *guard = None;
        }

        lock(&self.connecting).insert(setup.id.clone());
        let result = tokio::time::timeout(self.connect_timeout, self.factory.connect(setup)).await;
        lock(&self.connecting).remove(&setup.id);

        let connection = match result {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                metrics::counter!("connection_failures_total", "operation" => "connect")
                    .increment(1);
                return Err(e);
            },
            Err(_) => {
                metrics::counter!("connection_failures_total", "operation" => "connect_timeout")
                    .increment(1);
                return Err(Error::connection(
                    "connect",
                    format!("timed out after {:?}", self.connect_timeout),
                ));
            },
        };

        *guard = Some(Arc::clone(&connection));
        metrics::counter!("connections_constructed_total").increment(1);
        tracing::info!(setup_id = %setup.id, "Connection ready");
        Ok(connection)
    }

    /// Drops the cached connection if it is still `stale`.
    ///
    /// A connection installed by a concurrent caller in the meantime is kept.
    pub async fn evict(&self, id: &SetupId, stale: &Arc<dyn ChatConnection>) {
        let Some(slot) = lock(&self.slots).get(id).cloned() else {
            return;
        };
        let mut guard = slot.lock().await;
        if guard
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, stale))
        {
            *guard = None;
            tracing::info!(setup_id = %id, "Evicted connection");
        }
    }

    /// Drops a tenant's connection and slot, whatever its state.
    ///
    /// Used when a tenant is disabled; returns whether a connection was held.
    pub async fn remove(&self, id: &SetupId) -> bool {
        let Some(slot) = lock(&self.slots).get(id).cloned() else {
            return false;
        };
        let held = slot.lock().await.take().is_some();
        {
            let mut slots = lock(&self.slots);
            if slots.get(id).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                slots.remove(id);
            }
        }
        if held {
            tracing::info!(setup_id = %id, "Removed connection");
        }
        held
    }

    /// Returns the observable state of a tenant's connection.
    #[must_use]
    pub fn state(&self, id: &SetupId) -> ConnectionState {
        if lock(&self.connecting).contains(id) {
            return ConnectionState::Connecting;
        }
        let Some(slot) = lock(&self.slots).get(id).cloned() else {
            return ConnectionState::Absent;
        };
        match slot.try_lock() {
            Ok(guard) => match guard.as_ref() {
                Some(connection) if connection.is_ready() => ConnectionState::Ready,
                _ => ConnectionState::Absent,
            },
            // Held briefly by a readiness check or by a construction that
            // has not yet marked itself connecting.
            Err(_) => ConnectionState::Connecting,
        }
    }

    /// Connects every active tenant concurrently.
    ///
    /// Per-tenant failures are logged and counted; they never abort the
    /// preload for other tenants.
    ///
    /// # Errors
    ///
    /// Returns an error only if the tenant list cannot be read.
    pub async fn preload_all(
        self: &Arc<Self>,
        store: &Arc<dyn CredentialStore>,
    ) -> Result<PreloadSummary> {
        let tenants = run_blocking(store, |s| s.list_active()).await?;
        tracing::info!(count = tenants.len(), "Preloading tenant connections");

        let mut tasks = JoinSet::new();
        for tenant in tenants {
            let registry = Arc::clone(self);
            let store = Arc::clone(store);
            tasks.spawn(async move {
                let id = tenant.id;
                let lookup_id = id.clone();
                let setup = run_blocking(&store, move |s| s.get_by_id(&lookup_id)).await?;
                let Some(setup) = setup else {
                    return Err(Error::NotFound(format!("setup {id} disappeared")));
                };
                registry.get_or_create(&setup).await.map(|_| ())
            });
        }

        let mut summary = PreloadSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => summary.connected += 1,
                Ok(Err(e)) => {
                    summary.failed += 1;
                    tracing::warn!(error = %e, "Failed to preload tenant connection");
                },
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(error = %e, "Preload task aborted");
                },
            }
        }

        tracing::info!(
            connected = summary.connected,
            failed = summary.failed,
            "Preload complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeliveryToken, Platform};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeConnection {
        ready: AtomicBool,
    }

    #[async_trait]
    impl ChatConnection for FakeConnection {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn send(&self, _channel_id: &str, _content: &str) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        constructed: AtomicUsize,
        fail: AtomicBool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl ConnectionFactory for FakeFactory {
        async fn connect(&self, _setup: &FullSetup) -> Result<Arc<dyn ChatConnection>> {
            self.constructed.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::connection("connect", "bad token"));
            }
            Ok(Arc::new(FakeConnection {
                ready: AtomicBool::new(true),
            }))
        }
    }

    fn setup(id: &str) -> FullSetup {
        FullSetup {
            id: SetupId::new(id),
            delivery_token: DeliveryToken::generate(),
            discord_token: None,
            discord_client_id: "1".to_string(),
            discord_guild_id: "2".to_string(),
            discord_channel_id: "3".to_string(),
            github_token: None,
            github_owner: "octo".to_string(),
            github_repo: "repo".to_string(),
            gitlab_token: None,
            gitlab_url: None,
            gitlab_username: None,
            current_platform: Platform::GitHub,
            current_repo: None,
            current_branch: "main".to_string(),
            is_active: true,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_reuses_ready_connection() {
        let factory = Arc::new(FakeFactory::default());
        let registry = ConnectionRegistry::new(factory.clone(), Duration::from_secs(1));
        let setup = setup("setup_a");

        let first = registry.get_or_create(&setup).await.unwrap();
        let second = registry.get_or_create(&setup).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.constructed.load(Ordering::SeqCst), 1);
        assert_eq!(registry.state(&setup.id), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_failure_leaves_slot_absent_and_retries() {
        let factory = Arc::new(FakeFactory::default());
        factory.fail.store(true, Ordering::SeqCst);
        let registry = ConnectionRegistry::new(factory.clone(), Duration::from_secs(1));
        let setup = setup("setup_a");

        assert!(registry.get_or_create(&setup).await.is_err());
        assert_eq!(registry.state(&setup.id), ConnectionState::Absent);

        factory.fail.store(false, Ordering::SeqCst);
        assert!(registry.get_or_create(&setup).await.is_ok());
        assert_eq!(factory.constructed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_connection_error() {
        let factory = Arc::new(FakeFactory {
            delay: Some(Duration::from_millis(200)),
            ..FakeFactory::default()
        });
        let registry = ConnectionRegistry::new(factory, Duration::from_millis(20));

        let result = registry.get_or_create(&setup("setup_a")).await;
        assert!(matches!(result, Err(Error::Connection { .. })));
    }

    #[tokio::test]
    async fn test_not_ready_connection_is_replaced() {
        let factory = Arc::new(FakeFactory::default());
        let registry = ConnectionRegistry::new(factory.clone(), Duration::from_secs(1));
        let setup = setup("setup_a");

        let first = registry.get_or_create(&setup).await.unwrap();
        first.send("3", "hello").await.unwrap();
        // Simulate the session dropping.
        let fake: Arc<dyn ChatConnection> = Arc::new(FakeConnection {
            ready: AtomicBool::new(false),
        });
        {
            let slot = registry.slot(&setup.id);
            *slot.lock().await = Some(fake);
        }
        assert_eq!(registry.state(&setup.id), ConnectionState::Absent);

        let second = registry.get_or_create(&setup).await.unwrap();
        assert!(second.is_ready());
        assert_eq!(factory.constructed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_evict_only_removes_matching_connection() {
        let factory = Arc::new(FakeFactory::default());
        let registry = ConnectionRegistry::new(factory, Duration::from_secs(1));
        let setup = setup("setup_a");

        let current = registry.get_or_create(&setup).await.unwrap();
        let other: Arc<dyn ChatConnection> = Arc::new(FakeConnection {
            ready: AtomicBool::new(true),
        });

        registry.evict(&setup.id, &other).await;
        assert_eq!(registry.state(&setup.id), ConnectionState::Ready);

        registry.evict(&setup.id, &current).await;
        assert_eq!(registry.state(&setup.id), ConnectionState::Absent);
    }

    #[tokio::test]
    async fn test_remove_drops_connection_and_slot() {
        let factory = Arc::new(FakeFactory::default());
        let registry = ConnectionRegistry::new(factory.clone(), Duration::from_secs(1));
        let setup = setup("setup_a");

        registry.get_or_create(&setup).await.unwrap();
        assert!(registry.remove(&setup.id).await);
        assert_eq!(registry.state(&setup.id), ConnectionState::Absent);
        assert!(!lock(&registry.slots).contains_key(&setup.id));
        assert!(!registry.remove(&setup.id).await);

        registry.get_or_create(&setup).await.unwrap();
        assert_eq!(factory.constructed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_absent() {
        let registry =
            ConnectionRegistry::new(Arc::new(FakeFactory::default()), Duration::from_secs(1));
        assert_eq!(
            registry.state(&SetupId::new("setup_none")),
            ConnectionState::Absent
        );
    }
}
