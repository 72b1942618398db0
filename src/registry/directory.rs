//! Process-wide service directory.
//!
//! A name→handle registry with asynchronous wait/notify, used for bootstrap
//! discovery before the full service registry exists: early risers register
//! their handles here and everyone else waits for the names they need.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use super::Handle;

/// Process-wide name→handle registry with blocking wait/notify.
///
/// Cloning is cheap; all clones observe the same entries. Availability waits
/// are designed to wait indefinitely in practice — the deadline is re-armed
/// every interval with a warning rather than failing.
#[derive(Debug, Clone)]
pub struct ServiceDirectory {
    inner: Arc<DirectoryInner>,
}

#[derive(Debug)]
struct DirectoryInner {
    entries: Mutex<HashMap<String, Handle>>,
    notify: Notify,
    wait_interval: Duration,
}

impl ServiceDirectory {
    pub fn new() -> Self {
        Self::with_wait_interval(Duration::from_secs(10))
    }

    /// Create a directory with a custom wait re-arm interval.
    pub fn with_wait_interval(wait_interval: Duration) -> Self {
        Self {
            inner: Arc::new(DirectoryInner {
                entries: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                wait_interval,
            }),
        }
    }

    /// Register a handle under `name`. First registration wins; returns
    /// false if the name is already taken.
    pub fn add(&self, name: &str, handle: Handle) -> bool {
        let mut entries = self.lock_entries();
        if entries.contains_key(name) {
            return false;
        }
        entries.insert(name.to_string(), handle);
        drop(entries);
        self.inner.notify.notify_waiters();
        true
    }

    /// Remove every entry wrapping the same object as `handle`; notifies
    /// shutdown-waiters. Returns true if anything was removed.
    pub fn remove(&self, handle: &Handle) -> bool {
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|_, h| !h.same_as(handle));
        let removed = entries.len() != before;
        drop(entries);
        if removed {
            self.inner.notify.notify_waiters();
        }
        removed
    }

    /// Look up a handle by name.
    pub fn get(&self, name: &str) -> Option<Handle> {
        self.lock_entries().get(name).cloned()
    }

    /// Wait until a handle is registered under `name`.
    ///
    /// Never fails: each elapsed interval logs a warning and re-arms the
    /// deadline.
    pub async fn wait_for_service(&self, name: &str) -> Handle {
        let mut deadline = Instant::now() + self.inner.wait_interval;
        loop {
            let notified = self.inner.notify.notified();
            if let Some(handle) = self.get(name) {
                return handle;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::warn!("starting {} takes very long", name);
                deadline = Instant::now() + self.inner.wait_interval;
            }
        }
    }

    /// Wait until no handle is registered under `name`.
    ///
    /// Never fails: each elapsed interval logs a warning and re-arms the
    /// deadline.
    pub async fn wait_for_shutdown(&self, name: &str) {
        let mut deadline = Instant::now() + self.inner.wait_interval;
        loop {
            let notified = self.inner.notify.notified();
            if self.get(name).is_none() {
                return;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::warn!("stopping {} takes very long", name);
                deadline = Instant::now() + self.inner.wait_interval;
            }
        }
    }

    /// Bounded variant of [`wait_for_shutdown`](Self::wait_for_shutdown).
    ///
    /// Returns true once the entry disappears, false if `timeout` elapsed
    /// first (logged as a warning).
    pub async fn wait_for_shutdown_timeout(&self, name: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inner.notify.notified();
            if self.get(name).is_none() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                if self.get(name).is_none() {
                    return true;
                }
                tracing::warn!("failed to wait for {} shutdown", name);
                return false;
            }
        }
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Handle>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ServiceDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_add_get_remove() {
        let directory = ServiceDirectory::new();
        let handle = Handle::new("logger".to_string());

        assert!(directory.add("corvid://logger", handle.clone()));
        assert!(directory.get("corvid://logger").is_some());

        // First registration wins
        assert!(!directory.add("corvid://logger", Handle::new(1u8)));
        let found = directory.get("corvid://logger").unwrap();
        assert!(found.same_as(&handle));

        assert!(directory.remove(&handle));
        assert!(directory.get("corvid://logger").is_none());
        assert!(!directory.remove(&handle));
    }

    #[tokio::test]
    async fn test_wait_for_service_completes_on_add() {
        let directory = ServiceDirectory::new();
        let waiter = {
            let directory = directory.clone();
            tokio::spawn(async move { directory.wait_for_service("corvid://logger").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        directory.add("corvid://logger", Handle::new(7u32));

        let handle = waiter.await.unwrap();
        assert_eq!(*handle.downcast::<u32>().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_wait_for_service_rearms_deadline() {
        // A short interval must not fail the wait, only re-arm it.
        let directory = ServiceDirectory::with_wait_interval(Duration::from_millis(10));
        let waiter = {
            let directory = directory.clone();
            tokio::spawn(async move { directory.wait_for_service("corvid://slow").await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        directory.add("corvid://slow", Handle::new(1u32));
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_completes_on_remove() {
        let directory = ServiceDirectory::new();
        let handle = Handle::new("svc".to_string());
        directory.add("corvid://svc", handle.clone());

        let waiter = {
            let directory = directory.clone();
            tokio::spawn(async move { directory.wait_for_shutdown("corvid://svc").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        directory.remove(&handle);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_timeout_expires() {
        let directory = ServiceDirectory::new();
        directory.add("corvid://svc", Handle::new(1u8));

        let ok = directory
            .wait_for_shutdown_timeout("corvid://svc", Duration::from_millis(30))
            .await;
        assert!(!ok);

        // Already absent → immediately true
        let ok = directory
            .wait_for_shutdown_timeout("corvid://other", Duration::from_millis(30))
            .await;
        assert!(ok);
    }
}
