//! Credential model and the pure pieces of the token lifecycle.
//!
//! A [`Credential`] is either absent (anonymous mode) or fully populated; the
//! [`TokenStore`] only ever holds complete values. [`ExpiryPolicy`] decides when
//! a stored credential should be refreshed before it is used.

use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};

use crate::oauth::{OAuthError, TokenResponse};

/// Default window before expiry in which a credential is considered due.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(30);

/// Source of the current time. Injected so expiry decisions can be tested.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Clock backed by the system time.
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Which OAuth flow produced a credential, and therefore how it is refreshed.
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialKind {
    /// Client-credentials token. Has no refresh token; refreshing re-issues it.
    AppAccess,
    /// Token granted by a user through the authorization-code flow.
    UserAccess { refresh_token: String },
}

impl CredentialKind {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppAccess => "app",
            Self::UserAccess { .. } => "user",
        }
    }
}

impl fmt::Debug for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AppAccess => f.write_str("AppAccess"),
            Self::UserAccess { .. } => f
                .debug_struct("UserAccess")
                .field("refresh_token", &"<redacted>")
                .finish(),
        }
    }
}

/// Bearer token plus the metadata needed to know when to refresh it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub kind: CredentialKind,
    pub access_token: String,
    pub scope: Vec<String>,
    /// Local receipt time of the token response. Never taken from the server.
    pub issued_at: DateTime<Utc>,
    pub expires_in: u64,
}

impl Credential {
    /// Builds an app-access credential from a client-credentials response.
    ///
    /// Twitch omits `scope` from client-credentials responses, so the scope
    /// that was requested is kept unless the response names one.
    pub fn from_app_response(
        response: TokenResponse,
        requested_scope: &[String],
        issued_at: DateTime<Utc>,
    ) -> Self {
        let scope = if response.scope.is_empty() {
            requested_scope.to_vec()
        } else {
            response.scope
        };
        Self {
            kind: CredentialKind::AppAccess,
            access_token: response.access_token,
            scope,
            issued_at,
            expires_in: response.expires_in,
        }
    }

    /// Builds a user-access credential. Twitch always returns a refresh token
    /// for the authorization-code grant, so its absence is an error.
    pub fn from_user_response(
        response: TokenResponse,
        issued_at: DateTime<Utc>,
    ) -> Result<Self, OAuthError> {
        let refresh_token = response
            .refresh_token
            .ok_or(OAuthError::MissingRefreshToken)?;
        Ok(Self {
            kind: CredentialKind::UserAccess { refresh_token },
            access_token: response.access_token,
            scope: response.scope,
            issued_at,
            expires_in: response.expires_in,
        })
    }

    /// Refresh token for user credentials.
    pub fn refresh_token(&self) -> Option<&str> {
        match &self.kind {
            CredentialKind::AppAccess => None,
            CredentialKind::UserAccess { refresh_token } => Some(refresh_token),
        }
    }

    /// Unix timestamp (seconds) at which the token stops being accepted.
    pub fn expires_at_timestamp(&self) -> i64 {
        self.issued_at
            .timestamp()
            .saturating_add(saturating_i64(self.expires_in))
    }

    /// Applies a refresh-token grant response in place.
    ///
    /// The refresh token is rotated when the response carries a new one, and
    /// the stored scope is kept when the response leaves it out.
    pub(crate) fn apply_user_refresh(&mut self, response: TokenResponse, issued_at: DateTime<Utc>) {
        if let (CredentialKind::UserAccess { refresh_token }, Some(rotated)) =
            (&mut self.kind, response.refresh_token)
        {
            *refresh_token = rotated;
        }
        self.access_token = response.access_token;
        if !response.scope.is_empty() {
            self.scope = response.scope;
        }
        self.issued_at = issued_at;
        self.expires_in = response.expires_in;
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("access_token", &"<redacted>")
            .field("scope", &self.scope)
            .field("issued_at", &self.issued_at)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Application credentials registered with Twitch. Immutable for the client's lifetime.
#[derive(Clone)]
pub struct ClientIdentity {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientIdentity {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Holder for the active credential.
///
/// Performs no validation and no locking; mutation requires `&mut self`, so
/// callers sharing a store must serialize access themselves.
#[derive(Debug, Default)]
pub struct TokenStore {
    current: Option<Credential>,
}

impl TokenStore {
    pub fn get(&self) -> Option<&Credential> {
        self.current.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut Credential> {
        self.current.as_mut()
    }

    /// Replaces the stored credential wholesale.
    pub fn set(&mut self, credential: Credential) {
        self.current = Some(credential);
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

/// Decides whether a credential should be refreshed before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    pub buffer: Duration,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_REFRESH_BUFFER,
        }
    }
}

impl ExpiryPolicy {
    pub fn new(buffer: Duration) -> Self {
        Self { buffer }
    }

    /// Returns `true` when the credential expires within the buffer window.
    ///
    /// Anonymous mode (`None`) is never due. A zero lifetime is always due.
    pub fn is_due(&self, credential: Option<&Credential>, now: DateTime<Utc>) -> bool {
        let Some(credential) = credential else {
            return false;
        };
        if credential.expires_in == 0 {
            return true;
        }
        let deadline = now
            .timestamp()
            .saturating_add(saturating_i64(self.buffer.as_secs()));
        credential.expires_at_timestamp() <= deadline
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
