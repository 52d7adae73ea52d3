use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use super::session::{MemoryTokenStore, SessionData, TokenPair, TokenStore};

/// Buffer size for the session event channel.
/// Events are rare (login, refresh, logout) so a small buffer is enough.
const EVENT_BUFFER_SIZE: usize = 16;

/// Changes to the session that callers may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn { username: Option<String> },
    Refreshed,
    /// The session could not be recovered; the caller should sign in again
    Unauthorized,
    SignedOut,
}

/// Owns the current session and its persistent store.
///
/// Shared by `Arc` between the API client and anything else that needs
/// the token. Every write goes to memory first and is then persisted;
/// persistence failures are logged but never fail the caller.
pub struct SessionManager {
    store: Box<dyn TokenStore>,
    current: RwLock<Option<SessionData>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    /// Create a manager backed by `store`, restoring any saved session.
    pub fn new(store: Box<dyn TokenStore>) -> Self {
        let restored = match store.load() {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable saved session");
                None
            }
        };
        if restored.is_some() {
            debug!("Restored saved session");
        }

        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            store,
            current: RwLock::new(restored),
            events,
        }
    }

    /// Session that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryTokenStore::new()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.current.read().await.as_ref().map(|d| d.access_token.clone())
    }

    pub async fn session(&self) -> Option<SessionData> {
        self.current.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.current.read().await.is_some()
    }

    /// Store the tokens from a successful login.
    pub async fn sign_in(&self, tokens: TokenPair, username: Option<String>) {
        let data = SessionData::new(tokens, username.clone());
        self.persist(&data);
        *self.current.write().await = Some(data);
        info!("Session stored");
        self.emit(SessionEvent::SignedIn { username });
    }

    /// Store the tokens from a successful refresh.
    ///
    /// Returns `false` and discards the tokens when the session was cleared
    /// while the refresh was in flight; a signed-out user stays signed out.
    pub async fn apply_refresh(&self, tokens: TokenPair) -> bool {
        let mut current = self.current.write().await;
        let Some(data) = current.as_mut() else {
            info!("Discarding refreshed token, session was cleared");
            return false;
        };
        data.apply_refresh(tokens);
        self.persist(data);
        drop(current);
        debug!("Access token refreshed");
        self.emit(SessionEvent::Refreshed);
        true
    }

    /// Remove all stored session data.
    pub async fn clear(&self) {
        *self.current.write().await = None;
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to remove saved session");
        }
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        if self.events.send(event.clone()).is_err() {
            debug!(?event, "Session event dropped, nobody is listening");
        }
    }

    fn persist(&self, data: &SessionData) {
        if let Err(e) = self.store.save(data) {
            warn!(error = %e, "Failed to persist session");
        }
    }
}
