use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

const TRACEBACK_HEADER: &str = "Traceback (most recent call last):";

/// Remote code-execution endpoint configuration.
///
/// ```rust,ignore
/// use codehat_session::ExecutionConfig;
///
/// let config = ExecutionConfig::new("https://api.codehat.dev".parse()?);
/// // Optional overrides via chaining:
/// let config = config.with_path("python/run");
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ExecutionConfig {
    pub(crate) backend_api: Url,
    pub(crate) path: String,
}

impl ExecutionConfig {
    #[must_use]
    pub fn new(backend_api: Url) -> Self {
        Self {
            backend_api,
            path: "py".into(),
        }
    }

    /// Create config from the `CODEHAT_BACKEND_API` environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the variable is missing or not a URL.
    pub fn from_env() -> Result<Self, Error> {
        let raw = std::env::var("CODEHAT_BACKEND_API")
            .map_err(|_| Error::Config("CODEHAT_BACKEND_API is required".into()))?;
        let backend_api: Url = raw
            .parse()
            .map_err(|e| Error::Config(format!("CODEHAT_BACKEND_API: {e}")))?;
        Ok(Self::new(backend_api))
    }

    /// Override the endpoint path below the backend URL (default `py`).
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn backend_api(&self) -> &Url {
        &self.backend_api
    }

    /// Full endpoint URL: the configured path appended to the backend URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the backend URL cannot carry a path.
    pub fn endpoint(&self) -> Result<Url, Error> {
        let mut url = self.backend_api.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Config(format!("{} cannot be a base URL", self.backend_api)))?
            .pop_if_empty()
            .extend(self.path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }
}

#[derive(Serialize)]
struct ExecutionRequest<'a> {
    code: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionResponse {
    #[serde(default)]
    pass_or_fail: Option<String>,
}

/// Result of running a snippet.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ExecutionOutput {
    /// Output exactly as the endpoint returned it.
    pub raw: String,
    /// [`extract_relevant_output`] applied to `raw`.
    pub output: String,
}

/// Client for the remote code-execution endpoint.
pub struct ExecutionClient {
    config: ExecutionConfig,
    http: reqwest::Client,
}

impl ExecutionClient {
    #[must_use]
    pub fn new(config: ExecutionConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Submit `code` and return its output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptySource`] for blank input without contacting the
    /// endpoint, [`Error::Http`] on network failure, or
    /// [`Error::Execution`] if the endpoint answers with an error status.
    pub async fn run(&self, code: &str) -> Result<ExecutionOutput, Error> {
        if code.trim().is_empty() {
            return Err(Error::EmptySource);
        }

        let response = self
            .http
            .post(self.config.endpoint()?)
            .json(&ExecutionRequest { code })
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        let body = response.json::<ExecutionResponse>().await?;
        let raw = body.pass_or_fail.unwrap_or_default();
        tracing::debug!(bytes = raw.len(), "Execution finished");

        Ok(ExecutionOutput {
            output: extract_relevant_output(&raw),
            raw,
        })
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let detail = response.text().await.unwrap_or_default();
        tracing::warn!(status, "Execution endpoint returned an error");
        Err(Error::Execution { status, detail })
    }
}

/// Reduce interpreter output to what a learner needs to see.
///
/// For a Python traceback only the final non-blank line (the exception) is
/// kept; anything else is trimmed.
#[must_use]
pub fn extract_relevant_output(raw: &str) -> String {
    if raw.contains(TRACEBACK_HEADER) {
        return raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .last()
            .unwrap_or_default()
            .to_owned();
    }
    raw.trim().to_owned()
}
