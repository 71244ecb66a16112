pub mod config;
pub mod telemetry;

use std::env;

pub use config::{ClientConfig, ConfigError, Environment};
pub use telemetry::{describe_metrics, init_tracing, TelemetryError};

pub const DEFAULT_HELIX_BASE_URL: &str = "https://api.twitch.tv/helix/";
pub const DEFAULT_OAUTH_BASE_URL: &str = "https://id.twitch.tv/oauth2/";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_REFRESH_BUFFER_SECS: u64 = 30;

/// Loads environment variables from `.env` when available.
///
/// Missing files are ignored so the function is safe in production builds
/// where dotenv files are not deployed.
pub fn load_env_file() {
    let _ = dotenvy::dotenv();
}

/// Reads an environment variable, treating empty values as unset.
pub fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        env,
        sync::{LazyLock, Mutex},
    };

    static ENV_GUARD: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    #[test]
    fn empty_variable_is_treated_as_missing() {
        let _lock = ENV_GUARD.lock().expect("env guard poisoned");
        env::set_var("HELIX_HOOK_UTIL_TEST_EMPTY", "   ");
        assert_eq!(non_empty_var("HELIX_HOOK_UTIL_TEST_EMPTY"), None);
        env::remove_var("HELIX_HOOK_UTIL_TEST_EMPTY");
    }

    #[test]
    fn variable_value_is_trimmed() {
        let _lock = ENV_GUARD.lock().expect("env guard poisoned");
        env::set_var("HELIX_HOOK_UTIL_TEST_VALUE", " abc ");
        assert_eq!(
            non_empty_var("HELIX_HOOK_UTIL_TEST_VALUE").as_deref(),
            Some("abc")
        );
        env::remove_var("HELIX_HOOK_UTIL_TEST_VALUE");
    }
}
