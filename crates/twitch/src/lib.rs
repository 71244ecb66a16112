pub mod auth;
pub mod credential;
pub mod helix;
pub mod oauth;
pub mod signature;
pub mod transport;
pub mod webhook;

use helix_hook_util::ClientConfig;
use reqwest::Client;

pub use auth::{AuthenticatedTransport, SendError};
pub use credential::{
    system_clock, ClientIdentity, Clock, Credential, CredentialKind, ExpiryPolicy, TokenStore,
};
pub use helix::{
    GetStreamsParams, HelixClient, HelixError, HelixStream, HelixStreamPage, HelixUser,
};
pub use oauth::{
    AuthorizeUrlParams, OAuthError, TokenResponse, TokenSource, TwitchOAuthClient,
    ValidateTokenResponse,
};
pub use signature::{verify_signature, SignatureError, SIGNATURE_HEADER};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};
pub use webhook::{stream_changed_topic, WebhookError, WebhookSubscriber};

/// Authenticated client wired to the real Twitch endpoints.
pub type TwitchClient = AuthenticatedTransport<ReqwestTransport, TwitchOAuthClient>;

/// Builds an anonymous [`TwitchClient`] from configuration.
///
/// Helix and OAuth calls share one reqwest client carrying the configured timeout.
pub fn connect(config: &ClientConfig) -> Result<TwitchClient, TransportError> {
    let http = Client::builder().timeout(config.request_timeout).build()?;
    let oauth = TwitchOAuthClient::new(
        config.client_id.clone(),
        config.client_secret.clone(),
        config.oauth_base_url.clone(),
        http.clone(),
    );
    let transport = ReqwestTransport::new(config.helix_base_url.clone(), http);
    let identity = ClientIdentity::new(config.client_id.clone(), config.client_secret.clone());

    tracing::debug!(
        stage = "auth",
        helix = %config.helix_base_url,
        oauth = %config.oauth_base_url,
        "client configured"
    );
    Ok(AuthenticatedTransport::new(transport, oauth, identity)
        .with_policy(ExpiryPolicy::new(config.refresh_buffer)))
}
