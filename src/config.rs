use time::Duration;

use crate::error::Error;
use crate::records::REMEMBER_ME_TTL;
use crate::route::{LOGIN_PATH, RouteTable, USER_PROFILE_PATH};

/// Shared guard settings used by both config and runtime state.
#[derive(Debug, Clone)]
pub(crate) struct GuardSettings {
    pub(crate) login_path: String,
    pub(crate) signed_in_redirect: String,
    pub(crate) remember_me_ttl: Duration,
}

impl GuardSettings {
    fn defaults() -> Self {
        Self {
            login_path: LOGIN_PATH.into(),
            signed_in_redirect: USER_PROFILE_PATH.into(),
            remember_me_ttl: REMEMBER_ME_TTL,
        }
    }

    pub(crate) fn route_table(&self) -> RouteTable {
        RouteTable::new(self.login_path.as_str(), self.signed_in_redirect.as_str())
    }
}

/// Session guard configuration.
///
/// Use [`from_env()`](GuardConfig::from_env) for convention-based setup,
/// or [`new()`](GuardConfig::new) with `with_*` methods for full control.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub(crate) settings: GuardSettings,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            settings: GuardSettings::defaults(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Optional env vars
    /// - `CODEHAT_LOGIN_PATH`: where unauthenticated visitors are sent (default `/login`)
    /// - `CODEHAT_SIGNED_IN_REDIRECT`: where signed-in visitors leave guest-only
    ///   routes for (default `/userprofile`)
    /// - `CODEHAT_REMEMBER_ME_DAYS`: remember-me lifetime in whole days (default 14)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a path does not start with `/` or the
    /// day count is not a positive integer.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::new();

        if let Ok(path) = std::env::var("CODEHAT_LOGIN_PATH") {
            config = config.with_login_path(absolute_path("CODEHAT_LOGIN_PATH", path)?);
        }
        if let Ok(path) = std::env::var("CODEHAT_SIGNED_IN_REDIRECT") {
            config =
                config.with_signed_in_redirect(absolute_path("CODEHAT_SIGNED_IN_REDIRECT", path)?);
        }
        if let Ok(days) = std::env::var("CODEHAT_REMEMBER_ME_DAYS") {
            let days: i64 = days
                .trim()
                .parse()
                .ok()
                .filter(|d| *d > 0)
                .ok_or_else(|| {
                    Error::Config(format!(
                        "CODEHAT_REMEMBER_ME_DAYS must be a positive integer, got {days:?}"
                    ))
                })?;
            config = config.with_remember_me_ttl(Duration::days(days));
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.settings.login_path = path.into();
        self
    }

    #[must_use]
    pub fn with_signed_in_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.signed_in_redirect = path.into();
        self
    }

    #[must_use]
    pub fn with_remember_me_ttl(mut self, ttl: Duration) -> Self {
        self.settings.remember_me_ttl = ttl;
        self
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.settings.login_path
    }

    #[must_use]
    pub fn signed_in_redirect(&self) -> &str {
        &self.settings.signed_in_redirect
    }

    #[must_use]
    pub fn remember_me_ttl(&self) -> Duration {
        self.settings.remember_me_ttl
    }
}

fn absolute_path(var: &str, value: String) -> Result<String, Error> {
    if value.starts_with('/') {
        Ok(value)
    } else {
        Err(Error::Config(format!("{var} must start with '/', got {value:?}")))
    }
}
