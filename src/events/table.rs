//! Table of active event subscriptions

use tokio::sync::Mutex;

use super::session::EventSession;

/// Active subscriptions
///
/// Every operation runs under a single lock acquisition, so compound
/// updates are never observed half-applied.
#[derive(Debug, Default)]
pub struct EventSessionTable {
    sessions: Mutex<Vec<EventSession>>,
}

impl EventSessionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session unless one with the same key exists
    ///
    /// Returns true if the session was inserted.
    pub async fn add(&self, session: EventSession) -> bool {
        let mut sessions = self.sessions.lock().await;
        if sessions.iter().any(|s| s.same_key(&session)) {
            return false;
        }
        sessions.push(session);
        true
    }

    /// Remove the session with the same key
    ///
    /// Returns true if a session was removed.
    pub async fn remove(&self, session: &EventSession) -> bool {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|s| !s.same_key(session));
        sessions.len() != before
    }

    /// Snapshot of all sessions
    pub async fn all(&self) -> Vec<EventSession> {
        self.sessions.lock().await.clone()
    }

    /// Sessions satisfying a predicate
    pub async fn find<F>(&self, predicate: F) -> Vec<EventSession>
    where
        F: Fn(&EventSession) -> bool,
    {
        self.sessions
            .lock()
            .await
            .iter()
            .filter(|s| predicate(s))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Set the access token on every session of a plugin
    pub async fn update_access_token_for_plugin(&self, plugin_id: &str, token: &str) -> usize {
        self.update(|s| s.plugin_id == plugin_id, token).await
    }

    /// Move sessions holding `old` over to `new`
    pub async fn replace_access_token(&self, old: &str, new: &str) -> usize {
        self.update(|s| s.access_token.as_deref() == Some(old), new)
            .await
    }

    /// Drop every session of a plugin
    pub async fn remove_for_plugin(&self, plugin_id: &str) -> usize {
        self.remove_where(|s| s.plugin_id == plugin_id).await
    }

    /// Drop every session of a receiver, by receiver id or delivery address
    pub async fn remove_for_receiver(&self, receiver: &str) -> usize {
        self.remove_where(|s| s.receiver_id == receiver || s.receiver_address == receiver)
            .await
    }

    /// Drop every session holding one of the tokens
    pub async fn remove_for_tokens(&self, tokens: &[String]) -> usize {
        if tokens.is_empty() {
            return 0;
        }
        self.remove_where(|s| {
            s.access_token
                .as_ref()
                .is_some_and(|t| tokens.contains(t))
        })
        .await
    }

    async fn update<F>(&self, predicate: F, token: &str) -> usize
    where
        F: Fn(&EventSession) -> bool,
    {
        let mut sessions = self.sessions.lock().await;
        let mut updated = 0;
        for session in sessions.iter_mut().filter(|s| predicate(s)) {
            session.access_token = Some(token.to_string());
            updated += 1;
        }
        updated
    }

    async fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&EventSession) -> bool,
    {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|s| !predicate(s));
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::debug!(removed, "event sessions removed");
        }
        removed
    }
}
