use std::sync::Arc;

use metrics::counter;
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use helix_hook_util::ClientConfig;

use crate::auth::{AuthenticatedTransport, SendError, CLIENT_ID_HEADER};
use crate::oauth::TokenSource;
use crate::signature::{verify_signature, SignatureError};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

const HUB_PATH: &str = "webhooks/hub";
const STREAMS_TOPIC_BASE: &str = "https://api.twitch.tv/helix/streams";

/// Subscribes to WebSub-style webhook topics through the authenticated transport.
pub struct WebhookSubscriber<T, S> {
    transport: Arc<AuthenticatedTransport<T, S>>,
    secret: String,
}

#[derive(Debug, Serialize)]
struct HubRequest<'a> {
    #[serde(rename = "hub.callback")]
    callback: &'a str,
    #[serde(rename = "hub.mode")]
    mode: &'static str,
    #[serde(rename = "hub.topic")]
    topic: &'a str,
    #[serde(rename = "hub.lease_seconds", skip_serializing_if = "Option::is_none")]
    lease_seconds: Option<u32>,
    #[serde(rename = "hub.secret", skip_serializing_if = "Option::is_none")]
    secret: Option<&'a str>,
}

/// Errors raised while building or sending a hub request.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error(transparent)]
    Send(#[from] SendError),
    #[error("failed to encode hub request: {0}")]
    Encode(#[from] serde_json::Error),
}

impl<T, S> WebhookSubscriber<T, S>
where
    T: HttpTransport,
    S: TokenSource,
{
    /// `secret` is sent as `hub.secret` and later signs the callbacks.
    pub fn new(transport: Arc<AuthenticatedTransport<T, S>>, secret: impl Into<String>) -> Self {
        Self {
            transport,
            secret: secret.into(),
        }
    }

    /// Uses the configured `WEBHOOK_SECRET`. Returns `None` when none is set.
    pub fn from_config(
        transport: Arc<AuthenticatedTransport<T, S>>,
        config: &ClientConfig,
    ) -> Option<Self> {
        let secret = config.webhook_secret.as_deref()?;
        Some(Self::new(transport, secret))
    }

    /// Requests notifications for `topic` delivered to `callback_url`.
    ///
    /// The hub's answer is returned as is; a `202 Accepted` means the hub will
    /// next send a verification request to the callback.
    pub async fn subscribe_to_topic(
        &self,
        topic: &str,
        bearer_token: &str,
        callback_url: &str,
        lease_seconds: u32,
    ) -> Result<HttpResponse, WebhookError> {
        let body = HubRequest {
            callback: callback_url,
            mode: "subscribe",
            topic,
            lease_seconds: Some(lease_seconds),
            secret: Some(&self.secret),
        };
        let response = self.send_hub(&body, bearer_token).await?;
        info!(
            stage = "webhook",
            %topic,
            lease_seconds,
            status = %response.status,
            "subscription requested"
        );
        Ok(response)
    }

    /// Cancels a subscription created by [`Self::subscribe_to_topic`].
    pub async fn unsubscribe_from_topic(
        &self,
        topic: &str,
        bearer_token: &str,
        callback_url: &str,
    ) -> Result<HttpResponse, WebhookError> {
        let body = HubRequest {
            callback: callback_url,
            mode: "unsubscribe",
            topic,
            lease_seconds: None,
            secret: None,
        };
        let response = self.send_hub(&body, bearer_token).await?;
        info!(stage = "webhook", %topic, status = %response.status, "unsubscription requested");
        Ok(response)
    }

    /// Verifies a callback signed with this subscriber's secret.
    pub fn verify_callback(
        &self,
        signature_header: &str,
        raw_body: &[u8],
    ) -> Result<bool, SignatureError> {
        let verified = verify_signature(signature_header, raw_body, self.secret.as_bytes());
        if !matches!(verified, Ok(true)) {
            counter!("webhook_invalid_signature_total").increment(1);
            warn!(stage = "webhook", body_len = raw_body.len(), "callback signature rejected");
        }
        verified
    }

    async fn send_hub(
        &self,
        body: &HubRequest<'_>,
        bearer_token: &str,
    ) -> Result<HttpResponse, WebhookError> {
        let request = HttpRequest::post(HUB_PATH)
            .header(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {bearer_token}")).map_err(SendError::from)?,
            )
            .header(
                HeaderName::from_static(CLIENT_ID_HEADER),
                HeaderValue::from_str(self.transport.client_id()).map_err(SendError::from)?,
            )
            .json(body)?;

        Ok(self.transport.send(request).await?)
    }
}

/// Topic URL notifying when `user_id` goes live, goes offline or changes stream metadata.
pub fn stream_changed_topic(user_id: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(STREAMS_TOPIC_BASE)?;
    url.query_pairs_mut().append_pair("user_id", user_id);
    Ok(url.into())
}
