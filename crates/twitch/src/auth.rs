//! Authenticated transport: decorates requests with the active credential and
//! keeps that credential fresh.
//!
//! Each call to [`AuthenticatedTransport::send`] runs a small state machine:
//!
//! 1. preflight: refresh the stored credential if it expires within the buffer,
//! 2. attach either `Authorization: Bearer ...` or `Client-ID` (never both),
//! 3. send through the wrapped [`HttpTransport`],
//! 4. on a `401` carrying `WWW-Authenticate`, refresh and resend exactly once,
//! 5. hand the final response back whatever its status.
//!
//! Refresh runs while holding the store lock, so concurrent callers observe a
//! single refresh instead of racing to overwrite the credential.

use metrics::counter;
use reqwest::{
    header::{HeaderName, HeaderValue, InvalidHeaderValue, AUTHORIZATION, WWW_AUTHENTICATE},
    StatusCode,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credential::{
    system_clock, ClientIdentity, Clock, Credential, CredentialKind, ExpiryPolicy, TokenStore,
};
use crate::oauth::{OAuthError, TokenSource};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};

pub const CLIENT_ID_HEADER: &str = "client-id";

/// Errors produced while sending through the authenticated transport.
///
/// Non-2xx responses are not errors; they are returned to the caller as is.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("failed to refresh credential: {source}")]
    CredentialRefresh {
        #[source]
        source: OAuthError,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("credential cannot be encoded as a header value")]
    InvalidHeader(#[from] InvalidHeaderValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshTrigger {
    Preflight,
    Challenge,
    Manual,
}

impl RefreshTrigger {
    fn as_str(self) -> &'static str {
        match self {
            Self::Preflight => "preflight",
            Self::Challenge => "challenge",
            Self::Manual => "manual",
        }
    }
}

/// Wraps an [`HttpTransport`] and manages the credential lifecycle around it.
pub struct AuthenticatedTransport<T, S> {
    transport: T,
    token_source: S,
    identity: ClientIdentity,
    store: Mutex<TokenStore>,
    policy: ExpiryPolicy,
    clock: Clock,
}

impl<T, S> AuthenticatedTransport<T, S>
where
    T: HttpTransport,
    S: TokenSource,
{
    /// Creates an anonymous client using the default expiry buffer and the system clock.
    pub fn new(transport: T, token_source: S, identity: ClientIdentity) -> Self {
        Self {
            transport,
            token_source,
            identity,
            store: Mutex::new(TokenStore::default()),
            policy: ExpiryPolicy::default(),
            clock: system_clock(),
        }
    }

    pub fn with_policy(mut self, policy: ExpiryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Seeds the store with an existing credential.
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.store.get_mut().set(credential);
        self
    }

    pub fn client_id(&self) -> &str {
        &self.identity.client_id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn token_source(&self) -> &S {
        &self.token_source
    }

    pub fn policy(&self) -> ExpiryPolicy {
        self.policy
    }

    /// Snapshot of the active credential, if any.
    pub async fn credential(&self) -> Option<Credential> {
        self.store.lock().await.get().cloned()
    }

    pub async fn set_credential(&self, credential: Credential) {
        self.store.lock().await.set(credential);
    }

    /// Drops the active credential, returning the client to anonymous mode.
    pub async fn clear_credential(&self) {
        self.store.lock().await.clear();
    }

    /// Issues an app-access credential for `scope` and makes it active.
    pub async fn authenticate_app(&self, scope: &[String]) -> Result<Credential, OAuthError> {
        let mut store = self.store.lock().await;
        let response = self.token_source.issue_app_token(scope).await?;
        let credential = Credential::from_app_response(response, scope, self.now());
        info!(
            stage = "auth",
            kind = "app",
            expires_in = credential.expires_in,
            "credential issued"
        );
        store.set(credential.clone());
        Ok(credential)
    }

    /// Exchanges an authorization code and makes the resulting user credential active.
    pub async fn authenticate_user(
        &self,
        code: &str,
        redirect_uri: &str,
        state: Option<&str>,
    ) -> Result<Credential, OAuthError> {
        let mut store = self.store.lock().await;
        let response = self
            .token_source
            .exchange_code(code, redirect_uri, state)
            .await?;
        let credential = Credential::from_user_response(response, self.now())?;
        info!(
            stage = "auth",
            kind = "user",
            expires_in = credential.expires_in,
            "credential issued"
        );
        store.set(credential.clone());
        Ok(credential)
    }

    /// Refreshes the active credential regardless of its expiry.
    ///
    /// Returns `false` when the client is anonymous and there is nothing to refresh.
    pub async fn refresh_now(&self) -> Result<bool, SendError> {
        let mut store = self.store.lock().await;
        self.refresh_locked(&mut store, RefreshTrigger::Manual).await
    }

    /// Sends `request` with authentication attached, refreshing as needed.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SendError> {
        let presented = self.preflight().await?;
        let response = self.dispatch(&request, presented.as_deref()).await?;

        let Some(sent_token) = presented else {
            return Ok(response);
        };
        if !is_auth_challenge(&response) {
            return Ok(response);
        }

        warn!(
            stage = "auth",
            method = %request.method,
            path = %request.path,
            "request rejected with authentication challenge"
        );
        let Some(token) = self.reactive_refresh(&sent_token).await? else {
            return Ok(response);
        };

        counter!("helix_auth_retry_total").increment(1);
        let retried = self.dispatch(&request, Some(&token)).await?;
        if retried.status == StatusCode::UNAUTHORIZED {
            warn!(
                stage = "auth",
                method = %request.method,
                path = %request.path,
                "request still unauthorized after refresh"
            );
        }
        Ok(retried)
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        (self.clock)()
    }

    /// Refreshes a due credential and returns the access token to present.
    async fn preflight(&self) -> Result<Option<String>, SendError> {
        let mut store = self.store.lock().await;
        if self.policy.is_due(store.get(), self.now()) {
            debug!(stage = "auth", "credential due for refresh before send");
            self.refresh_locked(&mut store, RefreshTrigger::Preflight).await?;
        }
        Ok(store.get().map(|credential| credential.access_token.clone()))
    }

    /// Refreshes after a challenge unless another caller already replaced the
    /// rejected token. Returns `None` when the credential was cleared meanwhile.
    async fn reactive_refresh(&self, rejected_token: &str) -> Result<Option<String>, SendError> {
        let mut store = self.store.lock().await;
        match store.get() {
            None => return Ok(None),
            Some(current) if current.access_token != rejected_token => {
                debug!(stage = "auth", "credential already refreshed by another request");
                return Ok(Some(current.access_token.clone()));
            }
            Some(_) => {}
        }

        self.refresh_locked(&mut store, RefreshTrigger::Challenge).await?;
        Ok(store.get().map(|credential| credential.access_token.clone()))
    }

    /// Dispatches by credential kind. App credentials have no refresh token,
    /// so they are re-issued with the stored scope.
    async fn refresh_locked(
        &self,
        store: &mut TokenStore,
        trigger: RefreshTrigger,
    ) -> Result<bool, SendError> {
        let Some(credential) = store.get_mut() else {
            return Ok(false);
        };
        let kind = credential.kind.as_str();

        let outcome = match &credential.kind {
            CredentialKind::AppAccess => self.token_source.issue_app_token(&credential.scope).await,
            CredentialKind::UserAccess { refresh_token } => {
                self.token_source
                    .refresh_user_token(refresh_token, &credential.scope)
                    .await
            }
        };

        let response = match outcome {
            Ok(response) => response,
            Err(source) => {
                counter!("helix_token_refresh_failures_total", "kind" => kind).increment(1);
                warn!(
                    stage = "auth",
                    kind,
                    trigger = trigger.as_str(),
                    error = %source,
                    "credential refresh failed"
                );
                return Err(SendError::CredentialRefresh { source });
            }
        };

        let now = self.now();
        if matches!(credential.kind, CredentialKind::AppAccess) {
            *credential = Credential::from_app_response(response, &credential.scope, now);
        } else {
            credential.apply_user_refresh(response, now);
        }

        counter!("helix_token_refresh_total", "kind" => kind, "trigger" => trigger.as_str())
            .increment(1);
        info!(
            stage = "auth",
            kind,
            trigger = trigger.as_str(),
            expires_in = credential.expires_in,
            "credential refreshed"
        );
        Ok(true)
    }

    async fn dispatch(
        &self,
        request: &HttpRequest,
        access_token: Option<&str>,
    ) -> Result<HttpResponse, SendError> {
        let mut decorated = request.clone();
        match access_token {
            Some(token) => {
                let value = HeaderValue::from_str(&format!("Bearer {token}"))?;
                decorated.headers.insert(AUTHORIZATION, value);
            }
            None => {
                let value = HeaderValue::from_str(&self.identity.client_id)?;
                decorated
                    .headers
                    .insert(HeaderName::from_static(CLIENT_ID_HEADER), value);
            }
        }

        Ok(self.transport.send(decorated).await?)
    }
}

fn is_auth_challenge(response: &HttpResponse) -> bool {
    response.status == StatusCode::UNAUTHORIZED && response.headers.contains_key(WWW_AUTHENTICATE)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;
    use crate::oauth::TokenResponse;

    /// Transport that replays scripted responses and records every request.
    #[derive(Default)]
    pub struct FakeTransport {
        responses: StdMutex<VecDeque<HttpResponse>>,
        requests: StdMutex<Vec<HttpRequest>>,
    }

    impl FakeTransport {
        pub fn respond(self, response: HttpResponse) -> Self {
            self.responses
                .lock()
                .expect("responses poisoned")
                .push_back(response);
            self
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().expect("requests poisoned").clone()
        }
    }

    #[async_trait]
    impl HttpTransport for FakeTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests
                .lock()
                .expect("requests poisoned")
                .push(request);
            Ok(self
                .responses
                .lock()
                .expect("responses poisoned")
                .pop_front()
                .unwrap_or_else(|| HttpResponse::new(StatusCode::OK)))
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum TokenCall {
        Exchange { code: String, state: Option<String> },
        IssueApp { scope: Vec<String> },
        RefreshUser { refresh_token: String, scope: Vec<String> },
    }

    /// Token source returning scripted results, defaulting to fresh tokens.
    #[derive(Default)]
    pub struct FakeTokenSource {
        results: StdMutex<VecDeque<Result<TokenResponse, OAuthError>>>,
        calls: StdMutex<Vec<TokenCall>>,
    }

    impl FakeTokenSource {
        pub fn returning(self, result: Result<TokenResponse, OAuthError>) -> Self {
            self.results
                .lock()
                .expect("results poisoned")
                .push_back(result);
            self
        }

        pub fn calls(&self) -> Vec<TokenCall> {
            self.calls.lock().expect("calls poisoned").clone()
        }

        fn next(&self, call: TokenCall) -> Result<TokenResponse, OAuthError> {
            let mut calls = self.calls.lock().expect("calls poisoned");
            calls.push(call);
            let count = calls.len();
            self.results
                .lock()
                .expect("results poisoned")
                .pop_front()
                .unwrap_or_else(|| {
                    Ok(token_response(&format!("fresh-{count}"), Some("rotated"), 3600))
                })
        }
    }

    #[async_trait]
    impl TokenSource for FakeTokenSource {
        async fn exchange_code(
            &self,
            code: &str,
            _redirect_uri: &str,
            state: Option<&str>,
        ) -> Result<TokenResponse, OAuthError> {
            self.next(TokenCall::Exchange {
                code: code.to_string(),
                state: state.map(str::to_string),
            })
        }

        async fn issue_app_token(&self, scope: &[String]) -> Result<TokenResponse, OAuthError> {
            self.next(TokenCall::IssueApp {
                scope: scope.to_vec(),
            })
        }

        async fn refresh_user_token(
            &self,
            refresh_token: &str,
            scope: &[String],
        ) -> Result<TokenResponse, OAuthError> {
            self.next(TokenCall::RefreshUser {
                refresh_token: refresh_token.to_string(),
                scope: scope.to_vec(),
            })
        }
    }

    pub fn token_response(access: &str, refresh: Option<&str>, expires_in: u64) -> TokenResponse {
        TokenResponse {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_in,
            scope: vec!["user:read:email".to_string()],
            token_type: Some("bearer".to_string()),
        }
    }

    pub fn challenge() -> HttpResponse {
        let mut response = HttpResponse::new(StatusCode::UNAUTHORIZED);
        response
            .headers
            .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        response
    }
}
