use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Token pair returned by the token endpoint on login and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SessionData {
    pub fn new(tokens: TokenPair, username: Option<String>) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            username,
            updated_at: Utc::now(),
        }
    }

    /// Replace the tokens after a refresh. A refresh that does not return a
    /// new refresh token keeps the previous one.
    pub fn apply_refresh(&mut self, tokens: TokenPair) {
        self.access_token = tokens.access_token;
        if tokens.refresh_token.is_some() {
            self.refresh_token = tokens.refresh_token;
        }
        self.updated_at = Utc::now();
    }

    /// Minutes since the tokens were last written (for display)
    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.updated_at).num_minutes().max(0)
    }
}

/// Persistent storage for the single session record.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<SessionData>>;
    fn save(&self, data: &SessionData) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Stores the session as JSON in the cache directory.
pub struct FileTokenStore {
    cache_dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<SessionData>> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read session file")?;
        let data: SessionData =
            serde_json::from_str(&contents).context("Failed to parse session file")?;
        Ok(Some(data))
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        let path = self.session_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(data)?;
        std::fs::write(path, contents).context("Failed to write session file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Keeps the session in memory only. Nothing survives the process.
#[derive(Default)]
pub struct MemoryTokenStore {
    data: Mutex<Option<SessionData>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(data: SessionData) -> Self {
        Self {
            data: Mutex::new(Some(data)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<SessionData>> {
        let data = self.data.lock().map_err(|_| anyhow!("Session store lock poisoned"))?;
        Ok(data.clone())
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        let mut slot = self.data.lock().map_err(|_| anyhow!("Session store lock poisoned"))?;
        *slot = Some(data.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut slot = self.data.lock().map_err(|_| anyhow!("Session store lock poisoned"))?;
        *slot = None;
        Ok(())
    }
}
