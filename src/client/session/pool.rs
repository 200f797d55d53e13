use std::{collections::VecDeque, time::Duration};

use tokio::sync::Mutex;

use super::ServerSession;
use crate::bson::Bson;

/// A pool of server sessions, checked out most-recently-used first so that
/// idle sessions age out together at the back of the queue.
#[derive(Debug, Default)]
pub(crate) struct ServerSessionPool {
    pool: Mutex<VecDeque<ServerSession>>,
}

impl ServerSessionPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Checks out a server session from the pool. Sessions about to expire
    /// within the safety margin are discarded along the way; if none remain,
    /// a fresh session is created.
    pub(crate) async fn check_out(&self, logical_session_timeout: Duration) -> ServerSession {
        let mut pool = self.pool.lock().await;
        while let Some(session) = pool.pop_front() {
            if session.is_about_to_expire(logical_session_timeout) {
                continue;
            }
            return session;
        }
        ServerSession::new()
    }

    /// Checks in a server session. Dirty or nearly-expired sessions are
    /// discarded rather than returned, and expired sessions at the back of
    /// the pool are dropped.
    pub(crate) async fn check_in(&self, session: ServerSession, logical_session_timeout: Duration) {
        let mut pool = self.pool.lock().await;
        while let Some(pooled_session) = pool.pop_back() {
            if pooled_session.is_about_to_expire(logical_session_timeout) {
                continue;
            }
            pool.push_back(pooled_session);
            break;
        }

        if !session.dirty && !session.is_about_to_expire(logical_session_timeout) {
            pool.push_front(session);
        }
    }

    /// Empties the pool, returning the `lsid` documents of every pooled
    /// session for use in an `endSessions` command.
    pub(crate) async fn drain_ids(&self) -> Vec<Bson> {
        let mut pool = self.pool.lock().await;
        pool.drain(..)
            .map(|session| Bson::Document(session.id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(30 * 60);

    #[tokio::test]
    async fn sessions_are_reused_lifo() {
        let pool = ServerSessionPool::new();
        let first = pool.check_out(TIMEOUT).await;
        let second = pool.check_out(TIMEOUT).await;
        assert_ne!(first.id, second.id);

        let first_id = first.id.clone();
        let second_id = second.id.clone();
        pool.check_in(first, TIMEOUT).await;
        pool.check_in(second, TIMEOUT).await;

        // most recently checked in comes out first
        assert_eq!(pool.check_out(TIMEOUT).await.id, second_id);
        assert_eq!(pool.check_out(TIMEOUT).await.id, first_id);
    }

    #[tokio::test]
    async fn dirty_sessions_are_discarded() {
        let pool = ServerSessionPool::new();
        let mut session = pool.check_out(TIMEOUT).await;
        let id = session.id.clone();
        session.dirty = true;
        pool.check_in(session, TIMEOUT).await;

        assert_ne!(pool.check_out(TIMEOUT).await.id, id);
    }

    #[tokio::test]
    async fn expiring_sessions_are_discarded() {
        let pool = ServerSessionPool::new();
        let session = pool.check_out(TIMEOUT).await;
        let id = session.id.clone();

        // with a 30 second timeout, even a just-used session falls inside
        // the one-minute expiry margin and must not be pooled
        let short_timeout = Duration::from_secs(30);
        pool.check_in(session, short_timeout).await;

        let fresh = pool.check_out(short_timeout).await;
        assert_ne!(fresh.id, id);
    }
}
