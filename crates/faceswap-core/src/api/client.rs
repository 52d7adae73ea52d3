//! API client for the face-swap REST service.
//!
//! Every request goes through [`ApiClient::request`], which attaches the
//! session's bearer token and recovers from an expired token with a
//! single refresh followed by a single retry.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{multipart, Client, Method, StatusCode, Url};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::{SessionEvent, SessionManager, TokenPair};
use crate::config::Config;
use crate::models::User;
use crate::swap::job::{
    GenerateRequest, JobCreated, JobStatusResponse, UploadFaceResponse, UploadTargetResponse,
};

use super::request::{ApiResponse, Auth, RequestBody, RequestOptions, UploadFile};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Token endpoint: login (POST), refresh (PUT), logout (DELETE)
pub const TOKENS_PATH: &str = "/tokens";

/// Current user profile
const ME_PATH: &str = "/me";

const UPLOAD_FACE_PATH: &str = "/swap/face";
const UPLOAD_TARGET_PATH: &str = "/swap/target";
const GENERATE_PATH: &str = "/swap/generate";

/// HTTP request timeout in seconds.
/// Uploads of large photos need more than a few seconds on slow links.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Result of a token refresh, shared by every request waiting on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshOutcome {
    Refreshed,
    Rejected,
}

type RefreshFuture = Shared<BoxFuture<'static, RefreshOutcome>>;

/// API client for the face-swap service.
/// Clone is cheap - the reqwest client, session and refresh slot are shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Arc<str>,
    session: Arc<SessionManager>,
    /// Refresh currently in flight, if any
    refresh_slot: Arc<Mutex<Option<RefreshFuture>>>,
}

impl ApiClient {
    /// Create a client for `base_url` (including any `/api` prefix)
    pub fn new(base_url: impl Into<String>, session: Arc<SessionManager>) -> Result<Self, ApiError> {
        Self::with_timeout(
            base_url,
            session,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn from_config(config: &Config, session: Arc<SessionManager>) -> Result<Self, ApiError> {
        Self::with_timeout(config.base_url.clone(), session, config.request_timeout())
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        session: Arc<SessionManager>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            // The refresh token may live in a server-set cookie
            .cookie_store(true)
            .build()?;

        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            session,
            refresh_slot: Arc::new(Mutex::new(None)),
        })
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Build the full URL for a path and query string
    pub fn url(&self, path: &str, query: &[(String, String)]) -> Result<Url, ApiError> {
        let raw = format!("{}{}", self.base_url, path);
        let parsed = if query.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, query)
        };
        parsed.map_err(|e| ApiError::InvalidUrl(format!("{}: {}", raw, e)))
    }

    // ===== Request Pipeline =====

    /// Send a request, refreshing the session token once on a 401.
    ///
    /// Never fails: transport errors come back as a synthetic `500`
    /// response. A 401 on the token endpoint, or on a request carrying
    /// explicit credentials, is returned as-is.
    pub async fn request(&self, options: RequestOptions) -> ApiResponse {
        let sent_with = self.session.access_token().await;
        let response = self.send(&options, sent_with.as_deref()).await;

        if !response.is_unauthorized() || options.path == TOKENS_PATH || options.auth != Auth::Session {
            return response;
        }

        debug!(method = %options.method, path = %options.path, "Access token rejected, refreshing");
        match self.refresh_shared(sent_with).await {
            RefreshOutcome::Refreshed => {
                let token = self.session.access_token().await;
                // The retry's answer is final, even another 401
                self.send(&options, token.as_deref()).await
            }
            RefreshOutcome::Rejected => response,
        }
    }

    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> ApiResponse {
        let mut options = RequestOptions::new(Method::GET, path);
        for (key, value) in query {
            options = options.query(*key, *value);
        }
        self.request(options).await
    }

    pub async fn post(&self, path: &str, body: Option<Value>) -> ApiResponse {
        self.request(with_body(RequestOptions::new(Method::POST, path), body)).await
    }

    pub async fn put(&self, path: &str, body: Option<Value>) -> ApiResponse {
        self.request(with_body(RequestOptions::new(Method::PUT, path), body)).await
    }

    pub async fn delete(&self, path: &str) -> ApiResponse {
        self.request(RequestOptions::new(Method::DELETE, path)).await
    }

    /// Perform one HTTP round trip.
    async fn send(&self, options: &RequestOptions, token: Option<&str>) -> ApiResponse {
        let url = match self.url(&options.path, &options.query) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Could not build request URL");
                return ApiResponse::transport_failure();
            }
        };

        let mut builder = self
            .client
            .request(options.method.clone(), url)
            .headers(options.headers.clone());

        builder = match (&options.auth, token) {
            (Auth::Session, Some(token)) => builder.bearer_auth(token),
            (Auth::Session, None) => builder,
            (Auth::Basic { username, password }, _) => builder.basic_auth(username, Some(password)),
        };

        match &options.body {
            Some(RequestBody::Json(body)) => builder = builder.json(body),
            Some(RequestBody::Multipart { field, file }) => match file_part(file) {
                Ok(part) => builder = builder.multipart(multipart::Form::new().part(field.clone(), part)),
                Err(e) => {
                    warn!(error = %e, file = %file.file_name, "Invalid upload MIME type");
                    return ApiResponse::transport_failure();
                }
            },
            None => {}
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status();
                match response.text().await {
                    Ok(text) => ApiResponse::from_text(status, &text),
                    Err(e) => {
                        warn!(error = %e, path = %options.path, "Failed to read response body");
                        ApiResponse::transport_failure()
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, method = %options.method, path = %options.path, "Request failed");
                ApiResponse::transport_failure()
            }
        }
    }

    // ===== Token Refresh =====

    /// Join the refresh in flight or start one.
    ///
    /// `sent_with` is the token the rejected request carried. If the
    /// session already moved past it, no new refresh is started.
    async fn refresh_shared(&self, sent_with: Option<String>) -> RefreshOutcome {
        let pending = {
            let mut slot = self.refresh_slot.lock().await;
            match slot.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    let current = self.session.access_token().await;
                    if current != sent_with {
                        debug!("Token changed while the request was in flight");
                        return match current {
                            Some(_) => RefreshOutcome::Refreshed,
                            None => RefreshOutcome::Rejected,
                        };
                    }

                    let client = self.clone();
                    let pending = async move {
                        let outcome = client.refresh_token(current).await;
                        client.refresh_slot.lock().await.take();
                        outcome
                    }
                    .boxed()
                    .shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    /// Exchange the current access token for a new one.
    /// A rejected refresh ends the session.
    async fn refresh_token(&self, current: Option<String>) -> RefreshOutcome {
        let options = RequestOptions::new(Method::PUT, TOKENS_PATH)
            .json(json!({ "access_token": current }));
        let response = self.send(&options, current.as_deref()).await;

        if response.ok {
            match response.json::<TokenPair>() {
                Ok(tokens) => {
                    if self.session.apply_refresh(tokens).await {
                        return RefreshOutcome::Refreshed;
                    }
                    // Signed out meanwhile; nothing left to invalidate
                    return RefreshOutcome::Rejected;
                }
                Err(e) => warn!(error = %e, "Refresh response had no usable token"),
            }
        } else {
            info!(status = %response.status, "Token refresh rejected");
        }

        self.session.clear().await;
        self.session.emit(SessionEvent::Unauthorized);
        RefreshOutcome::Rejected
    }

    /// Clear the session and tell listeners, unless it is already gone.
    async fn invalidate_session(&self) {
        if self.session.is_authenticated().await {
            self.session.clear().await;
            self.session.emit(SessionEvent::Unauthorized);
        }
    }

    // ===== Authentication =====

    /// Sign in with username and password, returning the user's profile
    pub async fn login(&self, username: &str, password: &str) -> Result<User, ApiError> {
        let options = RequestOptions::new(Method::POST, TOKENS_PATH).auth(Auth::Basic {
            username: username.to_string(),
            password: password.to_string(),
        });
        let response = self.request(options).await;

        if !response.ok {
            warn!(status = %response.status, "User authentication failed");
            self.session.clear().await;
            self.session.emit(SessionEvent::Unauthorized);
            return Err(ApiError::Authentication(format!(
                "login rejected with status {}",
                response.status
            )));
        }

        let tokens: TokenPair = match response.json() {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Login response had no usable token");
                self.session.clear().await;
                return Err(e);
            }
        };
        self.session.sign_in(tokens, Some(username.to_string())).await;

        match self.get_current_user().await {
            Ok(Some(user)) => {
                info!(username = %user.username, "User sign-in success");
                Ok(user)
            }
            Ok(None) => Err(ApiError::Authentication(
                "session rejected right after login".to_string(),
            )),
            Err(e) => {
                // A half-finished login leaves no token behind
                warn!(error = %e, "Could not load profile after login");
                self.invalidate_session().await;
                Err(e)
            }
        }
    }

    /// Revoke the session on the server and forget it locally.
    /// Returns whether the server acknowledged the logout.
    pub async fn logout(&self) -> bool {
        let response = self.delete(TOKENS_PATH).await;
        if !response.ok {
            debug!(status = %response.status, "Logout not acknowledged by server");
        }
        self.session.clear().await;
        self.session.emit(SessionEvent::SignedOut);
        response.ok
    }

    /// Fetch the signed-in user. `None` means the session is not valid.
    pub async fn get_current_user(&self) -> Result<Option<User>, ApiError> {
        let response = self.get(ME_PATH, &[]).await;
        if response.ok {
            return response.json().map(Some);
        }

        match response.status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                info!("User session token is expired");
                self.invalidate_session().await;
                Ok(None)
            }
            _ => Err(response.error()),
        }
    }

    /// Validate a previously saved session
    pub async fn restore_session(&self) -> Result<Option<User>, ApiError> {
        if !self.session.is_authenticated().await {
            debug!("No saved session token");
            return Ok(None);
        }
        let user = self.get_current_user().await?;
        if user.is_some() {
            info!("User has a valid session token");
        }
        Ok(user)
    }

    /// Refresh the token explicitly. Clears the session when rejected.
    pub async fn check_token(&self) -> bool {
        let current = self.session.access_token().await;
        let response = self
            .put(TOKENS_PATH, Some(json!({ "access_token": current })))
            .await;

        if response.ok {
            if let Ok(tokens) = response.json::<TokenPair>() {
                return self.session.apply_refresh(tokens).await;
            }
        }
        self.session.clear().await;
        false
    }

    // ===== Face Swap =====

    /// Upload the face image, returning the name the service stored it under
    pub async fn upload_face(&self, file: UploadFile) -> Result<String, ApiError> {
        let response = self.upload(UPLOAD_FACE_PATH, "face", file).await?;
        Ok(response.json::<UploadFaceResponse>()?.face_name)
    }

    /// Upload the target image, returning the name the service stored it under
    pub async fn upload_target(&self, file: UploadFile) -> Result<String, ApiError> {
        let response = self.upload(UPLOAD_TARGET_PATH, "target", file).await?;
        Ok(response.json::<UploadTargetResponse>()?.target_name)
    }

    async fn upload(&self, path: &str, field: &str, file: UploadFile) -> Result<ApiResponse, ApiError> {
        let size = file.bytes.len();
        let response = self
            .request(RequestOptions::new(Method::POST, path).multipart(field, file))
            .await;

        if response.ok {
            debug!(path, size, "Image uploaded");
            Ok(response)
        } else if response.is_unauthorized() {
            Err(ApiError::Unauthorized)
        } else {
            warn!(path, status = %response.status, "Image upload failed");
            Err(ApiError::upload(response.status, &response.body_text()))
        }
    }

    /// Submit a swap job for two uploaded images
    pub async fn swap_generate(
        &self,
        face_name: &str,
        target_name: &str,
        seed: Option<u64>,
    ) -> Result<String, ApiError> {
        let body = GenerateRequest {
            face_name: face_name.to_string(),
            target_name: target_name.to_string(),
            seed,
        };
        let body = serde_json::to_value(&body).map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        let response = self.post(GENERATE_PATH, Some(body)).await;
        if !response.ok {
            return Err(response.error());
        }
        let created: JobCreated = response.json()?;
        info!(job_id = %created.job_id, "Swap job submitted");
        Ok(created.job_id)
    }

    /// Query the status of a swap job
    pub async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, ApiError> {
        let response = self.get(&job_path(job_id)?, &[]).await;
        if !response.ok {
            return Err(response.error());
        }
        response.json()
    }
}

/// `/jobs/{id}` with the id percent-encoded as a single path segment
fn job_path(job_id: &str) -> Result<String, ApiError> {
    let mut url = Url::parse("http://localhost/jobs").map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| ApiError::InvalidUrl(format!("bad job id {:?}", job_id)))?
        .push(job_id);
    Ok(url.path().to_string())
}

fn with_body(options: RequestOptions, body: Option<Value>) -> RequestOptions {
    match body {
        Some(body) => options.json(body),
        None => options,
    }
}

fn file_part(file: &UploadFile) -> Result<multipart::Part, reqwest::Error> {
    let part = multipart::Part::bytes(file.bytes.clone()).file_name(file.file_name.clone());
    match &file.mime {
        Some(mime) => part.mime_str(mime),
        None => Ok(part),
    }
}
