//! API client for the spreadsheet matching service.
//!
//! This module provides the `ApiClient` struct: password-grant login,
//! session verification and spreadsheet submission. All calls share one
//! connection pool and one `AuthLayer`.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, RequestBuilder, Response, StatusCode, Url};
use tracing::{debug, info, warn};

use super::disposition::result_filename;
use super::layer::{AuthLayer, Navigator};
use super::types::{LoginOptions, LoginResponse, MatchRequest, MatchResult};
use super::ApiError;
use crate::auth::SessionStore;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds when none is configured.
///
/// Matching runs re-rank every row server side, so this is generous.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Path prefix of the token verification endpoint; the token is the last segment
const VERIFY_TOKEN_PATH: &str = "/verify-token";

const DEFAULT_LOGIN_ERROR: &str = "Invalid username or password";
const DEFAULT_SUBMISSION_ERROR: &str = "Unexpected error.";

/// API client for the matching service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    auth: AuthLayer,
}

impl ApiClient {
    /// Create a client for `base_url` bound to a session store and navigator
    pub fn new(
        base_url: &str,
        session: Arc<SessionStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, ApiError> {
        Self::with_timeout(
            base_url,
            session,
            navigator,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn with_timeout(
        base_url: &str,
        session: Arc<SessionStore>,
        navigator: Arc<dyn Navigator>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| ApiError::Config(format!("Invalid base URL \"{}\": {}", base_url, e)))?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url,
            auth: AuthLayer::new(session, navigator),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &SessionStore {
        self.auth.session()
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Send a request through the auth layer.
    ///
    /// Non-2xx statuses are returned as responses; only transport failures
    /// are errors here.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = self.auth.authorize(request).send().await?;
        self.auth.on_response(response.status());
        Ok(response)
    }

    async fn error_detail(response: Response) -> (StatusCode, Option<String>) {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!(status = %status, body = %ApiError::truncate_body(&body), "Error response");
        (status, ApiError::server_detail(&body))
    }

    // ===== Authentication =====

    /// Password-grant login. Does not store anything; see `AuthSnapshot::from`.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        options: &LoginOptions,
    ) -> Result<LoginResponse, ApiError> {
        let path = options.path();
        debug!(path = path, "Sending login request");

        let request = self
            .client
            .post(self.url(path))
            .form(&options.form_fields(username, password));
        let response = self.send(request).await?;

        if !response.status().is_success() {
            let (status, detail) = Self::error_detail(response).await;
            warn!(status = %status, "Login rejected");
            return Err(ApiError::Auth(
                detail.unwrap_or_else(|| DEFAULT_LOGIN_ERROR.to_string()),
            ));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| {
                ApiError::InvalidResponse(format!("Failed to parse login response: {}", e))
            })?;

        if login.access_token.is_empty() {
            return Err(ApiError::InvalidResponse(
                "Login response has an empty access token".to_string(),
            ));
        }

        info!("Login successful");
        Ok(login)
    }

    /// Ask the server whether the stored token is still valid.
    ///
    /// Fails closed: no token, a non-2xx answer or a transport error all
    /// mean `false`. A 401 drops the stored token but leaves the rest of
    /// the session and the current location alone.
    pub async fn verify_session(&self) -> bool {
        let Some(token) = self.session().token() else {
            debug!("No stored token, skipping verification");
            return false;
        };

        let url = self.url(&format!("{}/{}", VERIFY_TOKEN_PATH, urlencoding::encode(&token)));
        let request = self.auth.authorize(self.client.get(url));

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status == StatusCode::UNAUTHORIZED {
                    warn!("Stored token rejected");
                    if let Err(e) = self.session().clear_token() {
                        warn!(error = %e, "Failed to clear stored token");
                    }
                }
                debug!(status = %status, "Session verification finished");
                status.is_success()
            }
            Err(e) => {
                warn!(error = %e, "Session verification request failed");
                false
            }
        }
    }

    // ===== Matching =====

    /// Submit a spreadsheet and download the result archive
    pub async fn submit_match(&self, request: MatchRequest) -> Result<MatchResult, ApiError> {
        self.start_match(request).await?.collect().await
    }

    /// Submit a spreadsheet and wait for the response headers.
    ///
    /// The returned `PendingMatch` still has to drain the body.
    pub async fn start_match(&self, request: MatchRequest) -> Result<PendingMatch, ApiError> {
        let url = self.url(&request.target_path);
        info!(
            file = %request.file.name,
            bytes = request.file.bytes.len(),
            path = %request.target_path,
            "Submitting spreadsheet"
        );

        let form = request.into_form()?;
        let response = self.send(self.client.post(url).multipart(form)).await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::SessionExpired);
        }
        if !status.is_success() {
            let (status, detail) = Self::error_detail(response).await;
            warn!(status = %status, "Match request failed");
            return Err(ApiError::Submission(
                detail.unwrap_or_else(|| DEFAULT_SUBMISSION_ERROR.to_string()),
            ));
        }

        Ok(PendingMatch { response })
    }
}

/// A successful match response whose body has not been read yet
pub struct PendingMatch {
    response: Response,
}

impl PendingMatch {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// Suggested filename from `Content-Disposition`, or `resultado.zip`
    pub fn filename(&self) -> String {
        let header = self
            .response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
        result_filename(header.as_deref())
    }

    pub fn content_type(&self) -> Option<String> {
        self.response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// Read the whole body as an opaque payload, whatever its content type
    pub async fn collect(self) -> Result<MatchResult, ApiError> {
        let filename = self.filename();
        let content_type = self.content_type();
        let payload = self.response.bytes().await?.to_vec();

        debug!(bytes = payload.len(), filename = %filename, "Match result received");
        Ok(MatchResult {
            payload,
            filename,
            content_type,
        })
    }
}
