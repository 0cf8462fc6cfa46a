use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::clock::unix_millis;
use crate::error::{BoxError, Error};
use crate::storage::KeyValueStore;

/// Durable key holding the serialized [`RememberMeRecord`].
pub const REMEMBER_ME_KEY: &str = "rememberMeData";
/// Ephemeral key holding the browser-session start instant (Unix millis).
pub const SESSION_START_KEY: &str = "sessionStart";
/// Ephemeral key set to `"true"` once the fresh-session check has run.
pub const APP_INITIALIZED_KEY: &str = "appInitialized";
/// Ephemeral key set to `"true"` when the visitor signed in without remember-me.
pub const SESSION_ONLY_KEY: &str = "sessionOnly";

/// How long a remember-me opt-in keeps a session alive.
pub const REMEMBER_ME_TTL: Duration = Duration::days(14);

/// Durable remember-me opt-in, stored as `{"timestamp": <millis>, "rememberMe": <bool>}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RememberMeRecord {
    /// Creation instant in milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub remember_me: bool,
}

/// Verdict on a parsed [`RememberMeRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Valid,
    Expired,
    NotRemembered,
    /// Created after `now`; the record cannot be trusted.
    PostDated,
}

impl RememberMeRecord {
    #[must_use]
    pub fn new(created_at: OffsetDateTime, remember_me: bool) -> Self {
        Self {
            timestamp: unix_millis(created_at),
            remember_me,
        }
    }

    /// Parse the stored JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRecord`] for anything that is not an object
    /// with an integer `timestamp` and a boolean `rememberMe`, and for
    /// timestamps outside the representable date range.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let record: Self = serde_json::from_str(raw).map_err(|e| malformed(e.to_string()))?;
        record.created_at()?;
        Ok(record)
    }

    /// Creation instant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRecord`] if `timestamp` is out of range.
    pub fn created_at(&self) -> Result<OffsetDateTime, Error> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.timestamp) * 1_000_000)
            .map_err(|e| malformed(e.to_string()))
    }

    #[must_use]
    pub fn to_json(&self) -> String {
        // Two scalar fields; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// `true` once strictly more than `ttl` has elapsed since creation.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime, ttl: Duration) -> bool {
        self.age_millis(now) > ttl.whole_milliseconds()
    }

    #[must_use]
    pub fn status(&self, now: OffsetDateTime, ttl: Duration) -> RecordStatus {
        if self.age_millis(now) < 0 {
            RecordStatus::PostDated
        } else if self.is_expired(now, ttl) {
            RecordStatus::Expired
        } else if !self.remember_me {
            RecordStatus::NotRemembered
        } else {
            RecordStatus::Valid
        }
    }

    fn age_millis(&self, now: OffsetDateTime) -> i128 {
        i128::from(unix_millis(now)) - i128::from(self.timestamp)
    }
}

fn malformed(detail: String) -> Error {
    Error::MalformedRecord {
        key: REMEMBER_ME_KEY,
        detail,
    }
}

/// Ephemeral per-browser-session flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMarker {
    pub session_start: Option<String>,
    pub app_initialized: bool,
}

impl SessionMarker {
    /// Read both flags. Empty values count as absent.
    ///
    /// # Errors
    ///
    /// Propagates the store's read error.
    pub fn load(store: &dyn KeyValueStore) -> Result<Self, BoxError> {
        let session_start = store.get(SESSION_START_KEY)?.filter(|v| !v.is_empty());
        let app_initialized = store
            .get(APP_INITIALIZED_KEY)?
            .is_some_and(|v| !v.is_empty());
        Ok(Self {
            session_start,
            app_initialized,
        })
    }

    /// Neither flag exists: first load in this browser session.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.session_start.is_none() && !self.app_initialized
    }

    /// Write both flags for a freshly started browser session.
    ///
    /// # Errors
    ///
    /// Propagates the store's write error.
    pub fn start(store: &dyn KeyValueStore, now: OffsetDateTime) -> Result<(), BoxError> {
        store.set(SESSION_START_KEY, &unix_millis(now).to_string())?;
        Self::mark_initialized(store)
    }

    /// # Errors
    ///
    /// Propagates the store's write error.
    pub fn mark_initialized(store: &dyn KeyValueStore) -> Result<(), BoxError> {
        store.set(APP_INITIALIZED_KEY, "true")
    }

    /// Remove every per-session key, including `sessionOnly`. Each key is
    /// removed independently; failures are logged.
    pub fn clear(store: &dyn KeyValueStore) {
        for key in [SESSION_ONLY_KEY, SESSION_START_KEY, APP_INITIALIZED_KEY] {
            if let Err(e) = store.remove(key) {
                tracing::warn!(error = %e, key, "Failed to clear session marker");
            }
        }
    }
}
