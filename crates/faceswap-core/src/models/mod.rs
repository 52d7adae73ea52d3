//! Data models for API responses.

pub mod user;

pub use user::User;
