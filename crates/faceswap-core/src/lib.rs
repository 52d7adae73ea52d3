//! Core library for faceswap.
//!
//! Talks to the Piktid face-swap service: signs the user in, keeps the
//! session token fresh, uploads the two images, submits the swap job and
//! polls it until a result is available.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod swap;

pub use api::{ApiClient, ApiError};
pub use auth::{SessionEvent, SessionManager};
pub use config::Config;
pub use swap::{JobPoller, PollConfig, SwapEvent, SwapState};
