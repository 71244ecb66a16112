use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// The raw OAuth operations the authenticated transport depends on.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Exchanges an authorization code for a user-access token.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        state: Option<&str>,
    ) -> Result<TokenResponse, OAuthError>;

    /// Issues an app-access token through the client-credentials grant.
    async fn issue_app_token(&self, scope: &[String]) -> Result<TokenResponse, OAuthError>;

    /// Trades a refresh token for a new user-access token.
    async fn refresh_user_token(
        &self,
        refresh_token: &str,
        scope: &[String],
    ) -> Result<TokenResponse, OAuthError>;
}

/// Client responsible for OAuth flow interactions with Twitch.
#[derive(Clone)]
pub struct TwitchOAuthClient {
    http: Client,
    base_url: Url,
    client_id: String,
    client_secret: String,
}

impl TwitchOAuthClient {
    /// Creates a new client with the provided HTTP instance and configuration.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        base_url: Url,
        http: Client,
    ) -> Self {
        Self {
            http,
            base_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Builds the URL a user visits to grant this application access.
    pub fn authorize_url(&self, params: &AuthorizeUrlParams<'_>) -> Result<Url, OAuthError> {
        let mut url = self.base_url.join("authorize")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.client_id);
            query.append_pair("redirect_uri", params.redirect_uri);
            query.append_pair("response_type", "code");
            query.append_pair("scope", &params.scopes.join(" "));
            if let Some(state) = params.state {
                query.append_pair("state", state);
            }
            if params.force_verify {
                query.append_pair("force_verify", "true");
            }
        }

        Ok(url)
    }

    /// Validates the provided access token and returns metadata.
    pub async fn validate_token(
        &self,
        access_token: &str,
    ) -> Result<ValidateTokenResponse, OAuthError> {
        let url = self.base_url.join("validate")?;
        let response = self
            .http
            .get(url)
            .header("Authorization", format!("OAuth {access_token}"))
            .send()
            .await?;

        parse_json(response).await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, OAuthError> {
        let url = self.base_url.join("token")?;
        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        params.extend_from_slice(form);

        let response = self.http.post(url).form(&params).send().await?;
        parse_json(response).await
    }
}

#[async_trait]
impl TokenSource for TwitchOAuthClient {
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        state: Option<&str>,
    ) -> Result<TokenResponse, OAuthError> {
        debug!(stage = "oauth", grant = "authorization_code", "requesting token");
        let mut form = vec![
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(state) = state {
            form.push(("state", state));
        }
        self.token_request(&form).await
    }

    async fn issue_app_token(&self, scope: &[String]) -> Result<TokenResponse, OAuthError> {
        debug!(stage = "oauth", grant = "client_credentials", "requesting token");
        let scope = scope.join(" ");
        let mut form = vec![("grant_type", "client_credentials")];
        if !scope.is_empty() {
            form.push(("scope", scope.as_str()));
        }
        self.token_request(&form).await
    }

    async fn refresh_user_token(
        &self,
        refresh_token: &str,
        scope: &[String],
    ) -> Result<TokenResponse, OAuthError> {
        debug!(stage = "oauth", grant = "refresh_token", "requesting token");
        let scope = scope.join(" ");
        let mut form = vec![
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        if !scope.is_empty() {
            form.push(("scope", scope.as_str()));
        }
        self.token_request(&form).await
    }
}

/// Parameters required to generate an authorization URL.
pub struct AuthorizeUrlParams<'a> {
    pub redirect_uri: &'a str,
    pub scopes: &'a [&'a str],
    pub state: Option<&'a str>,
    pub force_verify: bool,
}

/// Token issuance/exchange/refresh response returned by Twitch.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Validation response describing the access token.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ValidateTokenResponse {
    pub client_id: String,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub expires_in: u64,
}

/// Errors that can occur during OAuth interactions.
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("token response did not include a refresh token")]
    MissingRefreshToken,
}

async fn parse_json<T>(response: Response) -> Result<T, OAuthError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(OAuthError::Status { status, body });
    }

    Ok(response.json().await?)
}
