use std::{collections::HashMap, sync::Arc};

use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;

use crate::clock::Clock;

const TOKEN_LEN: usize = 48;

#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub email: String,
    pub expires_at: OffsetDateTime,
}

/// In-memory bearer session store with a fixed lifetime per session.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            clock,
            ttl,
        }
    }

    /// Create a new session and return its token.
    pub async fn create(&self, email: &str) -> (String, Session) {
        let token: String = OsRng
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();
        let session = Session {
            email: email.to_string(),
            expires_at: self.clock.now() + self.ttl,
        };
        self.sessions
            .write()
            .await
            .insert(token.clone(), session.clone());
        (token, session)
    }

    /// Look up a live session. Expired entries are dropped on the way.
    pub async fn resolve(&self, token: &str) -> Option<Session> {
        let now = self.clock.now();
        {
            let sessions = self.sessions.read().await;
            match sessions.get(token) {
                Some(s) if now < s.expires_at => return Some(s.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        self.sessions.write().await.remove(token);
        None
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }

    /// Drop all expired sessions; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| now < s.expires_at);
        before - sessions.len()
    }

    /// Periodic purge for the lifetime of the process.
    pub fn spawn_sweeper(&self, every: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tick.tick().await;
                let removed = store.purge_expired().await;
                if removed > 0 {
                    tracing::debug!(removed, "expired sessions purged");
                }
            }
        })
    }
}
