//! Authenticated HTTP client for the backing API.
//!
//! Wraps [`reqwest`] with a bearer-token request phase and a response
//! phase that funnels every 401 through the single-flight
//! [`RefreshGate`](crate::single_flight::RefreshGate): the first
//! failing request performs the token exchange, concurrent failures
//! join it, and all of them are replayed once with the new token. A
//! failed exchange forces the session to `Unauthenticated`.

use std::sync::Arc;

use futures::FutureExt;
use reqwest::{Method, StatusCode};
use serde::Deserialize;

use vmpanel_core::{routes, DbId, PowerAction, User, VmStatus};

use crate::claims;
use crate::session::SessionManager;
use crate::single_flight::{RefreshFailed, RefreshGate};

/// Errors from the API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (connection, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API returned a non-2xx status code.
    #[error("API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The request was rejected and the token could not be refreshed,
    /// or was rejected again after a refresh.
    #[error("Unauthorized: access token rejected and refresh failed")]
    Unauthorized,
}

impl ApiError {
    /// HTTP status carried by this error, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Api { status, .. } => Some(*status),
            ApiError::Unauthorized => Some(401),
            ApiError::Request(e) => e.status().map(|s| s.as_u16()),
        }
    }

    /// Whether this is a 404 from the API.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Successful response from `POST /auth/login`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: User,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Body of `POST /auth/refresh` responses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPair {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

struct ClientInner {
    http: reqwest::Client,
    base_url: String,
    session: Arc<SessionManager>,
    refresh_gate: RefreshGate,
}

/// Cheaply cloneable handle to the API client. All clones share the
/// same connection pool, session, and refresh gate.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    /// Create a client for the given base URL (no trailing slash).
    pub fn new(base_url: impl Into<String>, session: Arc<SessionManager>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, session)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        session: Arc<SessionManager>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                http,
                base_url: base_url.into(),
                session,
                refresh_gate: RefreshGate::new(),
            }),
        }
    }

    /// The session this client authenticates against.
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.inner.session
    }

    // ---- session lifecycle ------------------------------------------------

    /// Initial session bootstrap (run once at startup).
    ///
    /// Missing or expired access token triggers a silent refresh; if
    /// that fails the session ends `Unauthenticated` with both tokens
    /// cleared. With a valid token, an embedded user claim is used
    /// directly, otherwise `/@me` is fetched. Always leaves the
    /// `Bootstrapping` state.
    pub async fn bootstrap(&self) {
        let token = self.inner.session.access_token();
        let needs_refresh = token.as_deref().map_or(true, claims::is_expired);

        if needs_refresh && !self.refresh_access_token().await {
            self.inner.session.clear_tokens();
            self.inner.session.finish_bootstrap();
            tracing::info!("No usable session; starting unauthenticated");
            return;
        }

        if let Some(token) = self.inner.session.access_token() {
            match claims::decode_claims(&token).and_then(|claims| claims.user) {
                Some(user) => {
                    tracing::debug!(user_id = user.id, "Bootstrapped from embedded user claim");
                    self.inner.session.set_user(user);
                }
                None => match self.me().await {
                    Ok(user) => self.inner.session.set_user(user),
                    Err(e) => {
                        tracing::warn!(error = %e, "Session bootstrap failed; clearing stored tokens");
                        self.inner.session.clear_tokens();
                    }
                },
            }
        }

        self.inner.session.finish_bootstrap();
    }

    /// `POST /auth/login`. On success the session becomes
    /// authenticated and both tokens are persisted.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let body = serde_json::json!({ "email": email, "password": password });
        let response = self
            .send_once(Method::POST, routes::AUTH_LOGIN, Some(&body), None)
            .await?;
        let login: LoginResponse = Self::parse_json(Self::ensure_success(response).await?).await?;

        self.inner.session.login(
            login.user.clone(),
            Some(&login.access_token),
            login.refresh_token.as_deref(),
        );
        Ok(login)
    }

    /// Exchange the stored refresh token for a new access/refresh pair.
    ///
    /// Returns `false` immediately when no refresh token is stored.
    /// Any failure clears both tokens. Safe to call concurrently with
    /// itself; deduplication is the 401 interceptor's job, not this
    /// method's.
    pub async fn refresh_access_token(&self) -> bool {
        ClientInner::refresh_access_token(&self.inner).await
    }

    /// `GET /@me` -- the current user, VM inventory included.
    pub async fn me(&self) -> Result<User, ApiError> {
        let response = self.send_authenticated(Method::GET, routes::ME, None).await?;
        Self::parse_json(response).await
    }

    // ---- VM endpoints -----------------------------------------------------

    /// `GET /@me/vm/{id}/status`.
    pub async fn vm_status(&self, vm_id: DbId) -> Result<VmStatus, ApiError> {
        let response = self
            .send_authenticated(Method::GET, &routes::vm_status(vm_id), None)
            .await?;
        Self::parse_json(response).await
    }

    /// `PATCH /@me/vm/{id}/power/{action}`. The response body is
    /// discarded; callers refresh the VM's status separately.
    pub async fn power(&self, vm_id: DbId, action: PowerAction) -> Result<(), ApiError> {
        self.send_authenticated(Method::PATCH, &routes::vm_power(vm_id, action), None)
            .await?;
        Ok(())
    }

    // ---- request plumbing -------------------------------------------------

    /// Send an authenticated request, handling 401 via the
    /// single-flight refresh and replaying exactly once.
    async fn send_authenticated(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, ApiError> {
        let token = self.inner.session.access_token();
        let response = self
            .send_once(method.clone(), path, body, token.as_deref())
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::ensure_success(response).await;
        }

        let new_token = match self.refresh_via_gate().await {
            Ok(token) => token,
            Err(RefreshFailed) => {
                tracing::warn!(path, "Token refresh failed; forcing logout");
                self.inner.session.logout();
                return Err(ApiError::Unauthorized);
            }
        };

        // Replay once with the fresh token. A second 401 is terminal
        // and must not re-enter the refresh path.
        let response = self.send_once(method, path, body, Some(&new_token)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        Self::ensure_success(response).await
    }

    /// Acquire-or-join the system-wide refresh operation.
    async fn refresh_via_gate(&self) -> Result<String, RefreshFailed> {
        let inner = self.inner.clone();
        self.inner
            .refresh_gate
            .run(move || {
                async move {
                    if ClientInner::refresh_access_token(&inner).await {
                        inner.session.access_token().ok_or(RefreshFailed)
                    } else {
                        Err(RefreshFailed)
                    }
                }
                .boxed()
            })
            .await
    }

    /// One request/response round trip, bearer header attached when a
    /// token is supplied. Transport errors only; status handling is
    /// the caller's.
    async fn send_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        token: Option<&str>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut request = self
            .inner
            .http
            .request(method, format!("{}{}", self.inner.base_url, path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Ensure the response has a success status code, or convert it to
    /// [`ApiError::Api`] carrying the status and body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        Ok(response.json::<T>().await?)
    }
}

impl ClientInner {
    async fn refresh_access_token(inner: &Arc<ClientInner>) -> bool {
        let Some(refresh_token) = inner.session.refresh_token() else {
            tracing::debug!("No refresh token stored; cannot refresh");
            return false;
        };

        let body = serde_json::json!({ "refreshToken": refresh_token });
        let result = inner
            .http
            .post(format!("{}{}", inner.base_url, routes::AUTH_REFRESH))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                match response.json::<TokenPair>().await {
                    Ok(pair) if !pair.access_token.is_empty() => {
                        inner
                            .session
                            .store_token_pair(&pair.access_token, pair.refresh_token.as_deref());
                        tracing::debug!("Access token refreshed");
                        true
                    }
                    Ok(_) => {
                        tracing::warn!("Refresh response carried an empty access token");
                        inner.session.clear_tokens();
                        false
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Refresh response body was unreadable");
                        inner.session.clear_tokens();
                        false
                    }
                }
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Token refresh rejected");
                inner.session.clear_tokens();
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh request failed");
                inner.session.clear_tokens();
                false
            }
        }
    }
}
