use std::{fmt, time::Duration};

use url::Url;

use crate::{
    non_empty_var, DEFAULT_HELIX_BASE_URL, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_OAUTH_BASE_URL,
    DEFAULT_REFRESH_BUFFER_SECS,
};

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Client configuration resolved from environment variables.
#[derive(Clone)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub helix_base_url: Url,
    pub oauth_base_url: Url,
    pub request_timeout: Duration,
    pub refresh_buffer: Duration,
    pub webhook_secret: Option<String>,
    pub environment: Environment,
}

impl ClientConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = non_empty_var("APP_ENV").unwrap_or_else(|| "development".to_string());
        let environment = Environment::from_str(&env_value)?;

        let client_id =
            non_empty_var("TWITCH_CLIENT_ID").ok_or(ConfigError::Missing("TWITCH_CLIENT_ID"))?;
        let client_secret = non_empty_var("TWITCH_CLIENT_SECRET")
            .ok_or(ConfigError::Missing("TWITCH_CLIENT_SECRET"))?;

        let helix_base_url = base_url_var("TWITCH_HELIX_BASE_URL", DEFAULT_HELIX_BASE_URL)?;
        let oauth_base_url = base_url_var("TWITCH_OAUTH_BASE_URL", DEFAULT_OAUTH_BASE_URL)?;
        let request_timeout =
            Duration::from_secs(seconds_var("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?);
        let refresh_buffer = Duration::from_secs(seconds_var(
            "TOKEN_REFRESH_BUFFER_SECS",
            DEFAULT_REFRESH_BUFFER_SECS,
        )?);

        Ok(Self {
            client_id,
            client_secret,
            helix_base_url,
            oauth_base_url,
            request_timeout,
            refresh_buffer,
            webhook_secret: non_empty_var("WEBHOOK_SECRET"),
            environment,
        })
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("helix_base_url", &self.helix_base_url.as_str())
            .field("oauth_base_url", &self.oauth_base_url.as_str())
            .field("request_timeout", &self.request_timeout)
            .field("refresh_buffer", &self.refresh_buffer)
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("environment", &self.environment)
            .finish()
    }
}

/// Parses a base URL, appending a trailing slash so relative joins keep the path prefix.
pub fn normalize_base_url(value: &str) -> Result<Url, url::ParseError> {
    if value.ends_with('/') {
        Url::parse(value)
    } else {
        Url::parse(&format!("{value}/"))
    }
}

fn base_url_var(name: &'static str, default: &str) -> Result<Url, ConfigError> {
    let value = non_empty_var(name).unwrap_or_else(|| default.to_string());
    normalize_base_url(&value).map_err(|err| ConfigError::InvalidUrl { name, source: err })
}

fn seconds_var(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match non_empty_var(name) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
        None => Ok(default),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    Missing(&'static str),
    InvalidUrl {
        name: &'static str,
        source: url::ParseError,
    },
    InvalidNumber {
        name: &'static str,
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::Missing(name) => write!(f, "{name} must be set"),
            Self::InvalidUrl { name, source } => write!(f, "invalid {name} value: {source}"),
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a whole number of seconds (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidUrl { source, .. } => Some(source),
            _ => None,
        }
    }
}
