use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;

use crate::auth::{AuthenticatedTransport, SendError};
use crate::oauth::TokenSource;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

/// Typed Helix endpoints on top of the authenticated transport.
pub struct HelixClient<T, S> {
    transport: Arc<AuthenticatedTransport<T, S>>,
}

impl<T, S> Clone for HelixClient<T, S> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T, S> HelixClient<T, S>
where
    T: HttpTransport,
    S: TokenSource,
{
    pub fn new(transport: Arc<AuthenticatedTransport<T, S>>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<AuthenticatedTransport<T, S>> {
        &self.transport
    }

    /// Looks up users by login name.
    pub async fn get_users(&self, logins: &[&str]) -> Result<Vec<HelixUser>, HelixError> {
        let mut request = HttpRequest::get("users");
        for login in logins {
            request = request.query("login", *login);
        }

        let response = self.transport.send(request).await?;
        parse_json::<HelixListResponse<HelixUser>>(response).map(|page| page.data)
    }

    /// Fetches live streams matching the provided filters.
    pub async fn get_streams(
        &self,
        params: &GetStreamsParams<'_>,
    ) -> Result<HelixStreamPage, HelixError> {
        let mut request = HttpRequest::get("streams");
        for user_id in params.user_ids {
            request = request.query("user_id", *user_id);
        }
        for login in params.user_logins {
            request = request.query("user_login", *login);
        }
        if let Some(first) = params.first {
            request = request.query("first", first.to_string());
        }
        if let Some(after) = params.after {
            request = request.query("after", after);
        }

        let response = self.transport.send(request).await?;
        parse_json::<HelixListResponse<HelixStream>>(response).map(HelixStreamPage::from)
    }
}

/// Filters for listing streams.
#[derive(Default)]
pub struct GetStreamsParams<'a> {
    pub user_ids: &'a [&'a str],
    pub user_logins: &'a [&'a str],
    pub first: Option<u32>,
    pub after: Option<&'a str>,
}

/// Page of stream results. The cursor is surfaced but never followed.
#[derive(Debug, Clone, PartialEq)]
pub struct HelixStreamPage {
    pub data: Vec<HelixStream>,
    pub cursor: Option<String>,
}

impl From<HelixListResponse<HelixStream>> for HelixStreamPage {
    fn from(value: HelixListResponse<HelixStream>) -> Self {
        Self {
            data: value.data,
            cursor: value.pagination.and_then(|p| p.cursor),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct HelixListResponse<D> {
    data: Vec<D>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Deserialize)]
struct Pagination {
    cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HelixUser {
    pub id: String,
    pub login: String,
    pub display_name: String,
    #[serde(default)]
    pub broadcaster_type: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HelixStream {
    pub id: String,
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    #[serde(default)]
    pub game_id: String,
    #[serde(default)]
    pub game_name: String,
    #[serde(rename = "type")]
    pub stream_type: String,
    pub title: String,
    pub viewer_count: u64,
    pub started_at: DateTime<Utc>,
}

/// Errors produced by the typed Helix helpers.
#[derive(Debug, Error)]
pub enum HelixError {
    #[error(transparent)]
    Send(#[from] SendError),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

fn parse_json<D>(response: HttpResponse) -> Result<D, HelixError>
where
    D: DeserializeOwned,
{
    if !response.is_success() {
        return Err(HelixError::Status {
            status: response.status,
            body: response.text(),
        });
    }

    Ok(response.json()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::{FakeTokenSource, FakeTransport};
    use crate::credential::ClientIdentity;
    use serde_json::json;

    fn client(transport: FakeTransport) -> HelixClient<FakeTransport, FakeTokenSource> {
        HelixClient::new(Arc::new(AuthenticatedTransport::new(
            transport,
            FakeTokenSource::default(),
            ClientIdentity::new("client-id", "secret"),
        )))
    }

    fn json_response(status: StatusCode, body: serde_json::Value) -> HttpResponse {
        let mut response = HttpResponse::new(status);
        response.body = serde_json::to_vec(&body).expect("body");
        response
    }

    #[tokio::test]
    async fn get_streams_parses_page() {
        let transport = FakeTransport::default().respond(json_response(
            StatusCode::OK,
            json!({
                "data": [
                    {
                        "id": "s-1",
                        "user_id": "u-1",
                        "user_login": "streamer",
                        "user_name": "Streamer",
                        "game_id": "509658",
                        "game_name": "Just Chatting",
                        "type": "live",
                        "title": "hello",
                        "viewer_count": 42,
                        "started_at": "2024-01-01T00:00:00Z",
                        "language": "en"
                    }
                ],
                "pagination": { "cursor": "next" }
            }),
        ));
        let client = client(transport);

        let page = client
            .get_streams(&GetStreamsParams {
                user_ids: &["u-1", "u-2"],
                first: Some(20),
                ..Default::default()
            })
            .await
            .expect("streams");

        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].stream_type, "live");
        assert_eq!(page.cursor.as_deref(), Some("next"));

        let requests = client.transport().transport().requests();
        assert_eq!(requests[0].path, "streams");
        assert_eq!(
            requests[0].query,
            vec![
                ("user_id".to_string(), "u-1".to_string()),
                ("user_id".to_string(), "u-2".to_string()),
                ("first".to_string(), "20".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn get_users_parses_data() {
        let transport = FakeTransport::default().respond(json_response(
            StatusCode::OK,
            json!({
                "data": [
                    {
                        "id": "141981764",
                        "login": "twitchdev",
                        "display_name": "TwitchDev",
                        "broadcaster_type": "partner",
                        "description": "Supporting third-party developers",
                        "created_at": "2016-12-14T20:32:28Z"
                    }
                ]
            }),
        ));
        let client = client(transport);

        let users = client.get_users(&["twitchdev"]).await.expect("users");
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].display_name, "TwitchDev");
    }

    #[tokio::test]
    async fn error_status_returns_message() {
        let mut response = HttpResponse::new(StatusCode::UNAUTHORIZED);
        response.body = b"unauthorized".to_vec();
        let client = client(FakeTransport::default().respond(response));

        let err = client.get_users(&["a"]).await.expect_err("should error");
        match err {
            HelixError::Status { status, body } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(body, "unauthorized");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let mut response = HttpResponse::new(StatusCode::OK);
        response.body = b"not json".to_vec();
        let client = client(FakeTransport::default().respond(response));

        let err = client.get_users(&["a"]).await.expect_err("should error");
        assert!(matches!(err, HelixError::Decode(_)));
    }
}
