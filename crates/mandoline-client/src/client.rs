use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;

use crate::config::MandolineConfig;
use crate::error::ClientError;
use crate::traits::EvaluationApi;
use crate::types::{
    Evaluation, EvaluationCreate, EvaluationUpdate, EvaluationsQuery, Metric, MetricCreate,
    MetricUpdate, MetricsQuery,
};

const API_KEY_HEADER: &str = "X-API-KEY";

#[derive(Clone)]
pub struct MandolineClient {
    config: MandolineConfig,
    client: Client,
}

impl MandolineClient {
    pub fn new(config: MandolineConfig) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Self::with_http_client(config, client)
    }

    /// Reuses an existing connection pool; the timeout of `client` wins.
    pub fn with_http_client(config: MandolineConfig, client: Client) -> Result<Self, ClientError> {
        if config.api_key.trim().is_empty() {
            return Err(ClientError::Config("api key is empty".to_string()));
        }
        if config.base_url.trim().is_empty() {
            return Err(ClientError::Config("base url is empty".to_string()));
        }
        Ok(Self { config, client })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// `/v1/<segments>` under the base url. Each segment is percent-encoded,
    /// so ids cannot escape their path position.
    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = Url::parse(self.config.base_url.trim())
            .map_err(|err| ClientError::Config(format!("invalid base url: {err}")))?;
        url.path_segments_mut()
            .map_err(|()| ClientError::Config("base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .push("v1")
            .extend(segments);
        Ok(url)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header(API_KEY_HEADER, &self.config.api_key)
    }

    fn resource_url(&self, collection: &str, id: &str) -> Result<Url, ClientError> {
        if matches!(id.trim(), "" | "." | "..") {
            return Err(ClientError::InvalidId(id.to_string()));
        }
        self.url(&[collection, id])
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        let res = self.authed(builder).send().await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(ClientError::Api { status, body });
        }
        let bytes = res.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| {
            ClientError::InvalidResponse(format!("failed to decode response body: {err}"))
        })
    }
}

#[async_trait::async_trait]
impl EvaluationApi for MandolineClient {
    async fn create_metric(&self, metric: MetricCreate) -> Result<Metric, ClientError> {
        self.send(self.client.post(self.url(&["metrics"])?).json(&metric))
            .await
    }

    async fn batch_create_metrics(
        &self,
        metrics: Vec<MetricCreate>,
    ) -> Result<Vec<Metric>, ClientError> {
        if metrics.is_empty() {
            return Err(ClientError::Config("metric batch is empty".to_string()));
        }
        self.send(self.client.post(self.url(&["metrics", "batch"])?).json(&metrics))
            .await
    }

    async fn get_metric(&self, metric_id: &str) -> Result<Metric, ClientError> {
        self.send(self.client.get(self.resource_url("metrics", metric_id)?))
            .await
    }

    async fn get_metrics(&self, query: MetricsQuery) -> Result<Vec<Metric>, ClientError> {
        let pairs = query.to_pairs()?;
        self.send(self.client.get(self.url(&["metrics"])?).query(&pairs))
            .await
    }

    async fn update_metric(
        &self,
        metric_id: &str,
        update: MetricUpdate,
    ) -> Result<Metric, ClientError> {
        self.send(
            self.client
                .put(self.resource_url("metrics", metric_id)?)
                .json(&update),
        )
        .await
    }

    async fn create_evaluation(
        &self,
        evaluation: EvaluationCreate,
        include_content: bool,
    ) -> Result<Evaluation, ClientError> {
        self.send(
            self.client
                .post(self.url(&["evaluations"])?)
                .query(&[("include_content", include_content)])
                .json(&evaluation),
        )
        .await
    }

    async fn batch_create_evaluations(
        &self,
        evaluations: Vec<EvaluationCreate>,
        include_content: bool,
    ) -> Result<Vec<Evaluation>, ClientError> {
        if evaluations.is_empty() {
            return Err(ClientError::Config("evaluation batch is empty".to_string()));
        }
        self.send(
            self.client
                .post(self.url(&["evaluations", "batch"])?)
                .query(&[("include_content", include_content)])
                .json(&evaluations),
        )
        .await
    }

    async fn get_evaluation(&self, evaluation_id: &str) -> Result<Evaluation, ClientError> {
        self.send(
            self.client
                .get(self.resource_url("evaluations", evaluation_id)?),
        )
        .await
    }

    async fn get_evaluations(
        &self,
        query: EvaluationsQuery,
    ) -> Result<Vec<Evaluation>, ClientError> {
        self.send(
            self.client
                .get(self.url(&["evaluations"])?)
                .query(&query.to_pairs()),
        )
        .await
    }

    async fn update_evaluation(
        &self,
        evaluation_id: &str,
        update: EvaluationUpdate,
    ) -> Result<Evaluation, ClientError> {
        self.send(
            self.client
                .put(self.resource_url("evaluations", evaluation_id)?)
                .json(&update),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned response and hands back the raw request head.
    async fn one_shot_server(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = vec![0_u8; 8192];
            let mut read = 0;
            loop {
                let n = stream.read(&mut buf[read..]).await.expect("read");
                read += n;
                if n == 0 || buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.expect("write");
            String::from_utf8_lossy(&buf[..read]).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn rejects_empty_api_key() {
        let err = MandolineClient::new(MandolineConfig::new("  ")).err();
        assert!(matches!(err, Some(ClientError::Config(_))));
    }

    #[test]
    fn url_joins_base_without_double_slash() {
        let client =
            MandolineClient::new(MandolineConfig::new("sk_test").with_base_url("http://x.test/"))
                .expect("client");
        let url = client.url(&["metrics", "m1"]).expect("url");
        assert_eq!(url.as_str(), "http://x.test/v1/metrics/m1");
    }

    #[test]
    fn ids_are_confined_to_one_path_segment() {
        let client =
            MandolineClient::new(MandolineConfig::new("sk_test").with_base_url("http://x.test"))
                .expect("client");
        let url = client
            .resource_url("metrics", "../evaluations?x=1")
            .expect("url");
        assert_eq!(url.path(), "/v1/metrics/..%2Fevaluations%3Fx=1");
        assert!(url.query().is_none());
        for bad in ["", " ", ".", ".."] {
            assert!(matches!(
                client.resource_url("evaluations", bad),
                Err(ClientError::InvalidId(_))
            ));
        }
    }

    #[tokio::test]
    async fn get_metric_sends_api_key_and_parses_body() {
        let (base, server) = one_shot_server("200 OK", r#"{"id":"m1","name":"helpfulness"}"#).await;
        let client = MandolineClient::new(MandolineConfig::new("sk_live_1").with_base_url(base))
            .expect("client");

        let metric = client.get_metric("m1").await.expect("metric");
        assert_eq!(metric.id, "m1");
        assert_eq!(metric.name.as_deref(), Some("helpfulness"));

        let head = server.await.expect("server task").to_ascii_lowercase();
        assert!(head.starts_with("get /v1/metrics/m1 "));
        assert!(head.contains("x-api-key: sk_live_1"));
    }

    #[tokio::test]
    async fn non_success_status_maps_to_api_error() {
        let (base, server) = one_shot_server("404 Not Found", r#"{"detail":"missing"}"#).await;
        let client = MandolineClient::new(MandolineConfig::new("sk_live_1").with_base_url(base))
            .expect("client");

        let err = client.get_evaluation("nope").await.err();
        match err {
            Some(ClientError::Api { status, body }) => {
                assert_eq!(status, 404);
                assert!(body.contains("missing"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        let _ = server.await;
    }
}
