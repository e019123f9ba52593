use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::protocol::{JsonRpcResponse, INVALID_PARAMS};
use crate::server::McpServer;

pub const LLMS_TXT_URI: &str = "mandoline://llms.txt";
pub const MCP_DOCS_URI: &str = "mandoline://mcp";

#[derive(Debug, Clone, Copy)]
pub struct DocResource {
    pub uri: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub mime_type: &'static str,
    /// Path below the docs base URL.
    pub path: &'static str,
    /// Prefix of the text returned when the fetch fails.
    pub failure_label: &'static str,
}

static DOC_RESOURCES: [DocResource; 2] = [
    DocResource {
        uri: LLMS_TXT_URI,
        name: "Mandoline llms.txt",
        description: "Index and overview of Mandoline's LLM evaluation platform documentation. \
            Provides site navigation, key concepts summary, and links to detailed guides on \
            creating custom metrics, API usage, and evaluation workflows.",
        mime_type: "text/plain",
        path: "/llms.txt",
        failure_label: "Error fetching llms.txt",
    },
    DocResource {
        uri: MCP_DOCS_URI,
        name: "Mandoline MCP Docs",
        description: "Documentation for Mandoline's Model Context Protocol (MCP) server \
            integration. Covers MCP setup, configuration, available tools and resources, and \
            how to integrate Mandoline's evaluation capabilities through the MCP interface.",
        mime_type: "text/plain",
        path: "/mcp",
        failure_label: "Error fetching MCP docs",
    },
];

pub fn doc_resources() -> &'static [DocResource] {
    &DOC_RESOURCES
}

pub fn find_resource(uri: &str) -> Option<&'static DocResource> {
    DOC_RESOURCES.iter().find(|resource| resource.uri == uri)
}

/// Fetches public documentation pages. Needs no credential.
#[derive(Clone)]
pub struct DocsFetcher {
    base_url: String,
    http: Client,
}

impl DocsFetcher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub async fn fetch(&self, path: &str) -> Result<String, reqwest::Error> {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

#[derive(Debug, Deserialize)]
struct ResourceReadParams {
    uri: String,
}

impl McpServer {
    pub(crate) fn resources_list_result(&self) -> Value {
        let resources = doc_resources()
            .iter()
            .map(|resource| {
                json!({
                    "uri": resource.uri,
                    "name": resource.name,
                    "description": resource.description,
                    "mimeType": resource.mime_type
                })
            })
            .collect::<Vec<_>>();
        json!({
            "resources": resources
        })
    }

    pub(crate) async fn handle_resources_read(&self, id: Value, params: Value) -> JsonRpcResponse {
        let parsed: ResourceReadParams = match serde_json::from_value(params) {
            Ok(v) => v,
            Err(err) => {
                return JsonRpcResponse::error(id, INVALID_PARAMS, format!("invalid params: {err}"));
            }
        };
        let Some(resource) = find_resource(&parsed.uri) else {
            return JsonRpcResponse::error(id, INVALID_PARAMS, "unknown resource uri");
        };

        let text = match self.docs.fetch(resource.path).await {
            Ok(text) => text,
            Err(err) => {
                warn!(uri = resource.uri, error = %err, "resource fetch failed");
                format!("{}: {err}.", resource.failure_label)
            }
        };

        JsonRpcResponse::success(
            id,
            json!({
                "contents": [{
                    "uri": resource.uri,
                    "mimeType": resource.mime_type,
                    "text": text
                }]
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::protocol::JsonRpcRequest;
    use crate::server::tests::{test_server, NoClients};
    use crate::server::ServerInfo;

    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = [0_u8; 4096];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
        });
        format!("http://{addr}")
    }

    #[test]
    fn lists_both_doc_resources() {
        let server = test_server();
        let listed = server.resources_list_result();
        let uris = listed["resources"]
            .as_array()
            .expect("array")
            .iter()
            .map(|r| r["uri"].as_str().unwrap_or_default().to_string())
            .collect::<Vec<_>>();
        assert_eq!(uris, vec![LLMS_TXT_URI, MCP_DOCS_URI]);
        assert_eq!(listed["resources"][0]["name"], json!("Mandoline llms.txt"));
    }

    #[tokio::test]
    async fn read_returns_fetched_text() {
        let base = serve_once("200 OK", "# Mandoline\n").await;
        let docs = DocsFetcher::new(base, Duration::from_secs(2)).expect("docs");
        let server = McpServer::new(ServerInfo::default(), Arc::new(NoClients), docs);
        let response = server
            .handle_request(JsonRpcRequest::new(
                json!(3),
                "resources/read",
                json!({"uri": LLMS_TXT_URI}),
            ))
            .await
            .expect("response");
        let result = response.result.expect("result");
        assert_eq!(result["contents"][0]["text"], json!("# Mandoline\n"));
        assert_eq!(result["contents"][0]["mimeType"], json!("text/plain"));
    }

    #[tokio::test]
    async fn fetch_failure_becomes_error_text() {
        let server = test_server();
        let response = server
            .handle_resources_read(json!(1), json!({"uri": MCP_DOCS_URI}))
            .await;
        let result = response.result.expect("result");
        let text = result["contents"][0]["text"].as_str().expect("text");
        assert!(text.starts_with("Error fetching MCP docs: "));
        assert!(text.ends_with('.'));
    }

    #[tokio::test]
    async fn error_status_is_reported_instead_of_page_body() {
        let base = serve_once("404 Not Found", "<html>missing</html>").await;
        let docs = DocsFetcher::new(base, Duration::from_secs(2)).expect("docs");
        let server = McpServer::new(ServerInfo::default(), Arc::new(NoClients), docs);
        let response = server
            .handle_resources_read(json!(1), json!({"uri": LLMS_TXT_URI}))
            .await;
        let result = response.result.expect("result");
        let text = result["contents"][0]["text"].as_str().expect("text");
        assert!(text.starts_with("Error fetching llms.txt: "));
        assert!(text.contains("404"));
        assert!(!text.contains("missing</html>"));
    }

    #[tokio::test]
    async fn unknown_uri_is_invalid_params() {
        let server = test_server();
        let response = server
            .handle_resources_read(json!(1), json!({"uri": "mandoline://nope"}))
            .await;
        assert_eq!(response.error.expect("error").code, INVALID_PARAMS);
    }
}
