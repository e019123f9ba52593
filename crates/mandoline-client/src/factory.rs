use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::client::MandolineClient;
use crate::config::{DEFAULT_BASE_URL, MandolineConfig};
use crate::error::ClientError;
use crate::traits::EvaluationApi;

/// Builds an API client for one caller's credential.
pub trait ClientFactory: Send + Sync {
    fn client_for(&self, api_key: &str) -> Result<Arc<dyn EvaluationApi>, ClientError>;
}

/// Hands out `MandolineClient`s that share one connection pool.
#[derive(Clone)]
pub struct HttpClientFactory {
    base_url: String,
    http: Client,
}

impl HttpClientFactory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = base_url.into();
        let base_url = if base_url.trim().is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else {
            base_url
        };
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl ClientFactory for HttpClientFactory {
    fn client_for(&self, api_key: &str) -> Result<Arc<dyn EvaluationApi>, ClientError> {
        let config = MandolineConfig::new(api_key).with_base_url(self.base_url.clone());
        Ok(Arc::new(MandolineClient::with_http_client(
            config,
            self.http.clone(),
        )?))
    }
}
