//! Request and response values passed through [`ApiClient::request`].
//!
//! [`ApiClient::request`]: super::ApiClient::request

use std::path::Path;

use anyhow::{Context, Result};
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::ApiError;

/// Body shown for responses synthesized after a transport failure
const TRANSPORT_FAILURE_BODY: &str = "Unexpected error";

/// How the `Authorization` header is filled in for a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Auth {
    /// Bearer token from the session, if one is stored
    #[default]
    Session,
    /// HTTP Basic credentials (login)
    Basic { username: String, password: String },
}

/// A file sent as a single-part multipart form.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub mime: Option<String>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
            mime: None,
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// Read an image from disk, guessing the MIME type from its extension.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read image {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());

        let mut file = Self::new(file_name, bytes);
        if let Some(mime) = path.extension().and_then(|e| e.to_str()).and_then(mime_for_extension) {
            file = file.with_mime(mime);
        }
        Ok(file)
    }
}

fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

/// Request payload. Kept as owned data so the request can be rebuilt
/// for the retry that follows a token refresh.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(Value),
    Multipart { field: String, file: UploadFile },
}

#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub headers: HeaderMap,
    pub auth: Auth,
}

impl RequestOptions {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: HeaderMap::new(),
            auth: Auth::Session,
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn multipart(mut self, field: impl Into<String>, file: UploadFile) -> Self {
        self.body = Some(RequestBody::Multipart {
            field: field.into(),
            file,
        });
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }
}

/// Outcome of a request. Transport failures are folded into a synthetic
/// `500` response instead of an error.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub ok: bool,
    pub status: StatusCode,
    pub body: Option<Value>,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: Option<Value>) -> Self {
        Self {
            ok: status.is_success(),
            status,
            body,
        }
    }

    pub(crate) fn transport_failure() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            Some(Value::String(TRANSPORT_FAILURE_BODY.to_string())),
        )
    }

    /// Parse a raw payload: JSON when it parses, otherwise the text as a JSON string.
    pub(crate) fn from_text(status: StatusCode, text: &str) -> Self {
        let body = if text.is_empty() {
            None
        } else {
            Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
        };
        Self::new(status, body)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    /// Deserialize the body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        let body = self
            .body
            .clone()
            .ok_or_else(|| ApiError::InvalidResponse(format!("Status {}: empty body", self.status)))?;
        serde_json::from_value(body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Body rendered as text for error messages.
    pub fn body_text(&self) -> String {
        match &self.body {
            None => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    /// Map a non-success response to an [`ApiError`].
    pub fn error(&self) -> ApiError {
        ApiError::from_status(self.status, &self.body_text())
    }
}
