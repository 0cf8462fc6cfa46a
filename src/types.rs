use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

/// Identity-provider user identifier (opaque string).
///
/// Issued by the identity provider; the application never mints one.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct UserId(pub String);

/// The identity provider's view of a signed-in visitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct AuthSession {
    pub user_id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
}

impl AuthSession {
    /// Create a session with only the required `user_id`.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId(user_id.into()),
            email: None,
            email_verified: false,
        }
    }

    /// Set the email.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the email_verified flag.
    #[must_use]
    pub fn with_email_verified(mut self, verified: bool) -> Self {
        self.email_verified = verified;
        self
    }
}

/// Latest known authentication state for the browser context.
///
/// `Unknown` holds from construction until the provider delivers its first
/// notification. Providers only ever publish the two resolved variants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthSnapshot {
    #[default]
    Unknown,
    SignedOut,
    SignedIn(AuthSession),
}

impl AuthSnapshot {
    #[must_use]
    pub fn is_present(&self) -> bool {
        matches!(self, Self::SignedIn(_))
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    #[must_use]
    pub fn session(&self) -> Option<&AuthSession> {
        match self {
            Self::SignedIn(session) => Some(session),
            _ => None,
        }
    }
}

impl From<Option<AuthSession>> for AuthSnapshot {
    fn from(session: Option<AuthSession>) -> Self {
        session.map_or(Self::SignedOut, Self::SignedIn)
    }
}

/// Sign-in credentials. The secret never appears in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    pub identifier: String,
    pub secret: String,
}

impl Credentials {
    #[must_use]
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}
