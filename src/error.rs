/// Error type returned by consumer-implemented seams
/// ([`IdentityProvider`](crate::IdentityProvider), [`KeyValueStore`](crate::KeyValueStore),
/// [`ProfileDirectory`](crate::ProfileDirectory)).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("malformed {key} record: {detail}")]
    MalformedRecord { key: &'static str, detail: String },

    #[error("storage error on {key}: {source}")]
    Storage {
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("sign-in rejected: {0}")]
    SignIn(#[source] BoxError),

    #[error("email address not verified")]
    EmailNotVerified,

    #[error("profile lookup failed: {0}")]
    ProfileLookup(#[source] BoxError),

    #[error("configuration error: {0}")]
    Config(String),

    #[cfg(feature = "execution")]
    #[error("no source code to run")]
    EmptySource,

    #[cfg(feature = "execution")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[cfg(feature = "execution")]
    #[error("execution endpoint returned {status}: {detail}")]
    Execution { status: u16, detail: String },
}
