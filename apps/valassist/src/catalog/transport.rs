use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::catalog::errors::FetchError;

/// One GET against the catalog service, returning the decoded JSON body.
///
/// Implementations classify failures into [`FetchError`] kinds; retrying is
/// the caller's job.
#[async_trait]
pub trait CatalogTransport: Send + Sync {
    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, FetchError>;
}

/// Credentials attached to every catalog request.
#[derive(Clone, Default)]
pub enum CatalogAuth {
    /// Authentication is handled outside this process (e.g. a negotiating proxy).
    #[default]
    Delegated,
    Bearer(String),
}

impl std::fmt::Debug for CatalogAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogAuth::Delegated => write!(f, "Delegated"),
            CatalogAuth::Bearer(_) => write!(f, "Bearer(<redacted>)"),
        }
    }
}

/// reqwest-backed transport. The client and credentials are injected so the
/// caller controls proxies, TLS, and timeouts.
#[derive(Clone)]
pub struct HttpCatalogTransport {
    client: Client,
    base_url: String,
    auth: CatalogAuth,
}

impl HttpCatalogTransport {
    pub fn new(client: Client, base_url: impl Into<String>, auth: CatalogAuth) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    /// Builds the default client used by the server binary.
    pub fn default_client() -> Result<Client, reqwest::Error> {
        Client::builder().timeout(Duration::from_secs(60)).build()
    }
}

#[async_trait]
impl CatalogTransport for HttpCatalogTransport {
    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, FetchError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!("GET {url} {query:?}");

        let mut request = self
            .client
            .get(&url)
            .header("content-type", "application/json")
            .query(query);
        if let CatalogAuth::Bearer(token) = &self.auth {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = if status.is_success() {
            response.text().await?
        } else {
            let body = response.text().await.unwrap_or_default();
            if let Some(err) = FetchError::from_status(status.as_u16(), &body) {
                return Err(err);
            }
            body
        };

        serde_json::from_str(&body)
            .map_err(|e| FetchError::Malformed(format!("response is not JSON: {e}")))
    }
}
