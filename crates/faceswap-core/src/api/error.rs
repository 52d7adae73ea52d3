use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Upload failed with status {status}: {message}")]
    Upload { status: u16, message: String },

    #[error("Swap job {job_id} failed")]
    JobFailed { job_id: String },

    #[error("Polling job {job_id} failed: {message}")]
    TransientPoll { job_id: String, message: String },

    #[error("Swap job {job_id} was replaced by a newer submission")]
    Superseded { job_id: String },

    #[error("Swap job {job_id} did not finish after {attempts} status checks")]
    PollTimeout { job_id: String, attempts: u32 },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    pub fn upload(status: reqwest::StatusCode, body: &str) -> Self {
        ApiError::Upload {
            status: status.as_u16(),
            message: Self::truncate_body(body),
        }
    }

    /// True for an upload the server rejected as not being a usable image.
    pub fn is_invalid_image(&self) -> bool {
        matches!(self, ApiError::Upload { status: 400, .. })
    }

    /// True when the error means the caller has to sign in again.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::Authentication(_) | ApiError::Unauthorized)
    }

    /// Short message suitable for showing to a user.
    ///
    /// Raw transport and server details stay in the logs.
    pub fn notification(&self) -> String {
        match self {
            ApiError::Authentication(_) | ApiError::Unauthorized => {
                "Your session is no longer valid, please sign in again".to_string()
            }
            ApiError::AccessDenied(_) => "You are not allowed to do that".to_string(),
            ApiError::NotFound(_) => "The requested resource does not exist".to_string(),
            ApiError::RateLimited => "Too many requests, please wait a moment".to_string(),
            ApiError::ServerError(_) | ApiError::NetworkError(_) => {
                "The service is unavailable, please try again later".to_string()
            }
            ApiError::Upload { status: 400, .. } => "Invalid image, please pick another file".to_string(),
            ApiError::Upload { .. } => "Image upload failed".to_string(),
            ApiError::JobFailed { .. } => "The face swap failed, please try again".to_string(),
            ApiError::TransientPoll { .. } => "Could not check the swap status, retrying".to_string(),
            ApiError::Superseded { .. } => "A newer swap replaced this one".to_string(),
            ApiError::PollTimeout { .. } => "The face swap is taking too long, giving up".to_string(),
            ApiError::InvalidResponse(_) => "Unexpected response from the service".to_string(),
            ApiError::InvalidUrl(_) => "The service address is misconfigured".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_maps_common_codes() {
        assert!(matches!(ApiError::from_status(StatusCode::UNAUTHORIZED, ""), ApiError::Unauthorized));
        assert!(matches!(ApiError::from_status(StatusCode::FORBIDDEN, "no"), ApiError::AccessDenied(_)));
        assert!(matches!(ApiError::from_status(StatusCode::NOT_FOUND, ""), ApiError::NotFound(_)));
        assert!(matches!(ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""), ApiError::RateLimited));
        assert!(matches!(ApiError::from_status(StatusCode::BAD_GATEWAY, ""), ApiError::ServerError(_)));
        assert!(matches!(ApiError::from_status(StatusCode::BAD_REQUEST, ""), ApiError::InvalidResponse(_)));
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(2000);
        match ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, &body) {
            ApiError::ServerError(msg) => {
                assert!(msg.len() < 600);
                assert!(msg.ends_with("(truncated, 2000 total bytes)"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let body = "é".repeat(400);
        let truncated = ApiError::truncate_body(&body);
        assert!(truncated.contains("truncated, 800 total bytes"));
    }

    #[test]
    fn test_upload_invalid_image() {
        let err = ApiError::upload(StatusCode::BAD_REQUEST, "{\"error\":\"No selected image\"}");
        assert!(err.is_invalid_image());
        assert_eq!(err.notification(), "Invalid image, please pick another file");

        let err = ApiError::upload(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert!(!err.is_invalid_image());
    }

    #[test]
    fn test_notification_hides_details() {
        let err = ApiError::ServerError("stack trace at line 42".to_string());
        assert!(!err.notification().contains("stack trace"));
    }
}
