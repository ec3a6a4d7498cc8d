//! In-memory session store keyed by user id.
//!
//! Each user gets one [`UserSession`] behind its own async mutex, so one
//! user's updates are processed in order while different users interleave.

use super::types::UserSession;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Shared handle to one user's session.
pub type SessionHandle = Arc<Mutex<UserSession>>;

/// Time source for idle tracking.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now
            .fetch_add(i64::try_from(by.as_millis()).unwrap_or(i64::MAX), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

struct Slot {
    session: SessionHandle,
    touched_ms: AtomicI64,
}

/// Process-wide map from user id to session.
///
/// Grows without bound unless [`SessionStore::evict_idle`] is driven by the
/// caller.
pub struct SessionStore {
    sessions: DashMap<String, Slot>,
    max_history: usize,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    /// Create a store whose new sessions cap history at `max_history`.
    pub fn new(max_history: usize) -> Self {
        Self::with_clock(max_history, Arc::new(SystemClock))
    }

    pub fn with_clock(max_history: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            max_history,
            clock,
        }
    }

    /// Return the user's session, creating a default one on first use.
    pub fn get_or_create(&self, user_id: &str) -> SessionHandle {
        let now = self.clock.now_ms();

        if let Some(slot) = self.sessions.get(user_id) {
            slot.touched_ms.store(now, Ordering::Relaxed);
            return slot.session.clone();
        }

        let slot = self
            .sessions
            .entry(user_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(user_id = %user_id, "Creating session");
                Slot {
                    session: Arc::new(Mutex::new(UserSession::with_max_history(
                        self.max_history,
                    ))),
                    touched_ms: AtomicI64::new(now),
                }
            });
        slot.touched_ms.store(now, Ordering::Relaxed);
        slot.session.clone()
    }

    /// Look up a session without creating it.
    pub fn get(&self, user_id: &str) -> Option<SessionHandle> {
        self.sessions.get(user_id).map(|slot| slot.session.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions untouched for longer than `ttl`.
    ///
    /// A session someone still holds a handle to is kept regardless of age.
    /// Returns how many sessions were removed.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let cutoff = self
            .clock
            .now_ms()
            .saturating_sub(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));
        let before = self.sessions.len();

        self.sessions.retain(|_, slot| {
            slot.touched_ms.load(Ordering::Relaxed) >= cutoff
                || Arc::strong_count(&slot.session) > 1
        });

        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            tracing::info!(removed, remaining = self.sessions.len(), "Evicted idle sessions");
        }
        removed
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(super::types::DEFAULT_MAX_HISTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::Role;

    #[tokio::test]
    async fn same_user_gets_same_session() {
        let store = SessionStore::default();
        let a = store.get_or_create("42");
        a.lock().await.append_turn(Role::User, "hello");

        let b = store.get_or_create("42");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.lock().await.history_len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn distinct_users_are_isolated() {
        let store = SessionStore::default();
        store
            .get_or_create("alice")
            .lock()
            .await
            .set_temperature(1.5)
            .unwrap();

        let bob = store.get_or_create("bob");
        assert_eq!(bob.lock().await.temperature(), 0.7);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn new_sessions_use_store_history_cap() {
        let store = SessionStore::new(2);
        let handle = store.get_or_create("u");
        let session = handle.lock().await;
        assert_eq!(session.max_history(), 2);
    }

    #[test]
    fn get_does_not_create() {
        let store = SessionStore::default();
        assert!(store.get("nobody").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn evict_idle_removes_only_stale_unheld_sessions() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = SessionStore::with_clock(10, clock.clone());

        drop(store.get_or_create("stale"));
        let held = store.get_or_create("held");

        clock.advance(Duration::from_secs(120));
        drop(store.get_or_create("fresh"));

        let removed = store.evict_idle(Duration::from_secs(60));
        assert_eq!(removed, 1);
        assert!(store.get("stale").is_none());
        assert!(store.get("held").is_some());
        assert!(store.get("fresh").is_some());
        drop(held);
    }

    #[test]
    fn touching_a_session_refreshes_it() {
        let clock = Arc::new(ManualClock::new(0));
        let store = SessionStore::with_clock(10, clock.clone());

        drop(store.get_or_create("u"));
        clock.advance(Duration::from_secs(50));
        drop(store.get_or_create("u"));
        clock.advance(Duration::from_secs(50));

        assert_eq!(store.evict_idle(Duration::from_secs(60)), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_first_access_creates_one_session() {
        let store = Arc::new(SessionStore::default());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .get_or_create("same")
                    .lock()
                    .await
                    .append_turn(Role::User, "x");
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("same").unwrap().lock().await.history_len(), 16);
    }
}
