//! Forced serialization of non-reentrant sources
//!
//! A source declaring `forceSerialization` runs at most once at a time in
//! the process. The lock is keyed by the source's protocol-facing
//! declaration, so structurally identical sources share one lock even when
//! they belong to different connectors or hosts.

use dashmap::DashMap;
use iw_connector::Source;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Default)]
pub struct SerializationLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SerializationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable identity of a source declaration
    pub fn identity(source: &Source) -> String {
        match serde_json::to_string(&source.kind) {
            Ok(identity) => identity,
            Err(e) => {
                warn!(source_key = %source.key, error = %e, "Falling back to key as serialization identity");
                source.key.clone()
            }
        }
    }

    fn lock_for(&self, identity: String) -> Arc<Mutex<()>> {
        self.locks
            .entry(identity)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the lock of a source, waiting at most `timeout`.
    /// Returns `None` when the wait timed out.
    pub async fn acquire(&self, source: &Source, timeout: Duration) -> Option<OwnedMutexGuard<()>> {
        self.acquire_until(source, Instant::now() + timeout).await
    }

    /// Acquire the lock of a source, waiting until `deadline` at most
    pub async fn acquire_until(
        &self,
        source: &Source,
        deadline: Instant,
    ) -> Option<OwnedMutexGuard<()>> {
        let lock = self.lock_for(Self::identity(source));
        tokio::time::timeout_at(deadline, lock.lock_owned()).await.ok()
    }

    /// Number of distinct serialized sources seen so far
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iw_connector::source::{SourceKind, StaticSource};

    fn source(key: &str, value: &str) -> Source {
        Source::new(
            key,
            SourceKind::Static(StaticSource {
                value: value.to_string(),
            }),
        )
        .serialized()
    }

    #[test]
    fn test_identity_ignores_key() {
        assert_eq!(
            SerializationLocks::identity(&source("${source::a}", "x")),
            SerializationLocks::identity(&source("${source::b}", "x"))
        );
        assert_ne!(
            SerializationLocks::identity(&source("${source::a}", "x")),
            SerializationLocks::identity(&source("${source::a}", "y"))
        );
    }

    #[tokio::test]
    async fn test_acquire_times_out_while_held() {
        let locks = SerializationLocks::new();
        let s = source("${source::a}", "x");

        let guard = locks.acquire(&s, Duration::from_secs(1)).await;
        assert!(guard.is_some());
        assert!(locks.acquire(&s, Duration::from_millis(50)).await.is_none());

        drop(guard);
        assert!(locks.acquire(&s, Duration::from_millis(50)).await.is_some());
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_acquire_until_past_deadline() {
        let locks = SerializationLocks::new();
        let s = source("${source::a}", "x");

        let _held = locks.acquire(&s, Duration::from_secs(1)).await;
        let deadline = Instant::now() + Duration::from_millis(30);
        assert!(locks.acquire_until(&s, deadline).await.is_none());
        assert!(Instant::now() >= deadline);
    }
}
