//! REST API client for the generation grid.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::request::GridRequest;
use crate::status::{GridStatus, SubmitResponse};

/// Default grid endpoint.
pub const DEFAULT_GRID_API_URL: &str = "https://api.aipowergrid.io/api";
/// Default `Client-Agent` header value.
pub const DEFAULT_CLIENT_AGENT: &str = "aipg-pipeline:0.1:deterministic";

const APIKEY_HEADER: HeaderName = HeaderName::from_static("apikey");
const CLIENT_AGENT_HEADER: HeaderName = HeaderName::from_static("client-agent");

/// Errors from the grid REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum GridApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The grid returned a non-2xx status code.
    #[error("Grid API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    /// Submission was accepted at the HTTP level but carried no job id.
    #[error("Grid returned no job id: {0}")]
    MissingJobId(String),

    #[error("Invalid header value for {0}")]
    InvalidHeader(&'static str),
}

/// HTTP client for the grid's v2 generate endpoints.
pub struct GridApi {
    client: reqwest::Client,
    api_url: String,
    api_key: HeaderValue,
    client_agent: HeaderValue,
}

impl GridApi {
    pub fn new(api_url: String, api_key: String, client_agent: &str) -> Result<Self, GridApiError> {
        Self::with_client(reqwest::Client::new(), api_url, api_key, client_agent)
    }

    pub fn with_client(
        client: reqwest::Client,
        api_url: String,
        api_key: String,
        client_agent: &str,
    ) -> Result<Self, GridApiError> {
        let client_agent = HeaderValue::from_str(client_agent)
            .map_err(|_| GridApiError::InvalidHeader("Client-Agent"))?;
        let mut api_key =
            HeaderValue::from_str(&api_key).map_err(|_| GridApiError::InvalidHeader("apikey"))?;
        api_key.set_sensitive(true);
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            client_agent,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit an async generation job and return its id.
    pub async fn submit(&self, request: &GridRequest) -> Result<String, GridApiError> {
        let response = self
            .client
            .post(format!("{}/v2/generate/async", self.api_url))
            .headers(self.headers(true))
            .json(request)
            .send()
            .await?;

        let body: SubmitResponse = Self::parse_response(response).await?;
        body.id.ok_or_else(|| {
            GridApiError::MissingJobId(
                body.message
                    .unwrap_or_else(|| "no message from server".to_string()),
            )
        })
    }

    /// Fetch the status of a job, including finished generations.
    pub async fn status(&self, job_id: &str) -> Result<GridStatus, GridApiError> {
        let response = self
            .client
            .get(format!("{}/v2/generate/status/{}", self.api_url, job_id))
            .headers(self.headers(false))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Status checks are anonymous; only submission carries the key.
    fn headers(&self, with_key: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CLIENT_AGENT_HEADER, self.client_agent.clone());
        if with_key {
            headers.insert(APIKEY_HEADER, self.api_key.clone());
        }
        headers
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GridApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GridApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }
}
