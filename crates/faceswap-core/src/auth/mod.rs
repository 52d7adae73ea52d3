//! Authentication module for managing the user session and its storage.
//!
//! This module provides:
//! - `SessionManager`: the single owner of the current token pair
//! - `TokenStore` implementations: session file, OS keychain, memory
//!
//! The session is written on login and refresh and removed on logout
//! or when a refresh is rejected.

pub mod credentials;
pub mod manager;
pub mod session;

pub use credentials::{KeyringTokenStore, ACCESS_TOKEN_STORAGE_KEY};
pub use manager::{SessionEvent, SessionManager};
pub use session::{FileTokenStore, MemoryTokenStore, SessionData, TokenPair, TokenStore};
