//! REST API client module for the face-swap service.
//!
//! This module provides the `ApiClient` for authenticating, uploading
//! images, submitting swap jobs and querying their status.
//!
//! Requests carry the session's bearer token. An expired token is
//! refreshed through `PUT /tokens` at most once per request, and
//! concurrent requests share a single refresh.

pub mod client;
pub mod error;
pub mod request;

pub use client::{ApiClient, TOKENS_PATH};
pub use error::ApiError;
pub use request::{ApiResponse, Auth, RequestBody, RequestOptions, UploadFile};
