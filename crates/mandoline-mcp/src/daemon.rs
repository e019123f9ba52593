//! Listener, routing and lifecycle for the HTTP daemon.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use mandoline_client::HttpClientFactory;
use serde_json::json;
use tokio::io::{BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::cors::CorsPolicy;
use crate::dispatcher::{DispatchSummary, Dispatcher, SessionPolicy};
use crate::error::ServerError;
use crate::http::{read_http_request, HttpError, HttpRequest, ResponseSink};
use crate::resources::DocsFetcher;
use crate::server::{McpServer, ServerInfo};
use crate::session::SessionRegistry;
use crate::sweeper::spawn_expiry_sweeper;
use crate::transport::StreamableHttpFactory;

const USAGE_PAGE: &str = include_str!("../README.md");

/// Everything a connection task needs.
pub struct App {
    config: ServerConfig,
    server: Arc<McpServer>,
    dispatcher: Dispatcher,
    cors: CorsPolicy,
}

impl App {
    pub fn from_config(config: ServerConfig) -> Result<Self, ServerError> {
        let clients = HttpClientFactory::new(config.api_base_url.clone(), config.api_timeout)?;
        let docs = DocsFetcher::new(config.docs_base_url.clone(), config.api_timeout)
            .map_err(|e| ServerError::Config(format!("docs client: {e}")))?;
        let server = Arc::new(McpServer::new(ServerInfo::default(), Arc::new(clients), docs));
        let factory = StreamableHttpFactory::new(Arc::clone(&server), config.sse_keep_alive);
        let registry = Arc::new(SessionRegistry::new(Arc::new(factory)));
        Ok(Self {
            cors: CorsPolicy::new(config.cors_origins.clone()),
            config,
            server,
            dispatcher: Dispatcher::new(registry),
        })
    }

    pub fn server(&self) -> &Arc<McpServer> {
        &self.server
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.dispatcher.registry()
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), HttpError> {
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut writer = BufWriter::new(write_half);
        let mut sink = ResponseSink::new(&mut writer);

        let request = match read_http_request(&mut reader, self.config.max_body_bytes).await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(HttpError::BodyTooLarge { limit, actual }) => {
                warn!(%peer, limit, actual, "request body too large");
                sink.send_json(413, &json!({"error": "Payload too large"})).await?;
                return Ok(());
            }
            Err(HttpError::Malformed(reason)) => {
                debug!(%peer, reason, "malformed request");
                sink.send_json(400, &json!({"error": "Bad request"})).await?;
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let request_id = request
            .headers
            .get("x-request-id")
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        let span = info_span!(
            "request",
            request_id = %request_id,
            method = %request.method,
            path = %request.path
        );

        async {
            let start = Instant::now();
            debug!("request in");
            let summary = self.route(&request, &request_id, &mut sink).await;
            log_request_done(&summary, sink.status(), start);
        }
        .instrument(span)
        .await;
        Ok(())
    }

    async fn route(
        &self,
        request: &HttpRequest,
        request_id: &str,
        sink: &mut ResponseSink<'_>,
    ) -> DispatchSummary {
        let summary = DispatchSummary::default();
        self.cors.apply(request, sink);
        let written = match (request.method.as_str(), request.path.as_str()) {
            ("OPTIONS", _) => self.cors.preflight(request, sink).await,
            ("GET", "/health") => {
                let info = self.server.info();
                sink.send_json(
                    200,
                    &json!({
                        "status": "ok",
                        "name": info.name,
                        "version": info.version,
                        "sessions": self.registry().len()
                    }),
                )
                .await
            }
            ("POST", "/mcp") => {
                return self
                    .dispatcher
                    .dispatch(request, request_id, SessionPolicy::CreateIfMissing, sink)
                    .await;
            }
            ("GET", "/mcp") if request.accepts_event_stream() => {
                return self
                    .dispatcher
                    .dispatch(request, request_id, SessionPolicy::RequireExisting, sink)
                    .await;
            }
            ("GET", "/mcp") => {
                sink.send_text(200, "text/plain; charset=utf-8", USAGE_PAGE)
                    .await
            }
            ("DELETE", "/mcp") => {
                return self
                    .dispatcher
                    .dispatch(request, request_id, SessionPolicy::RequireExisting, sink)
                    .await;
            }
            (_, "/mcp") => {
                sink.set_header("Allow", "GET, POST, DELETE, OPTIONS");
                sink.send_json(405, &json!({"error": "Method not allowed"}))
                    .await
            }
            _ => sink.send_json(404, &json!({"error": "Not found"})).await,
        };
        if let Err(err) = written {
            debug!(error = %err, "response write failed");
        }
        summary
    }
}

fn log_request_done(summary: &DispatchSummary, status: Option<u16>, start: Instant) {
    let status = status.unwrap_or(0);
    let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    let sid = summary.session_id.as_deref();
    let rpc = summary.rpc_method.as_deref();
    let tool = summary.tool.as_deref();
    if status >= 500 {
        error!(sid, rpc, tool, status, elapsed_ms, "request done");
    } else if status >= 400 {
        warn!(sid, rpc, tool, status, elapsed_ms, "request done");
    } else {
        debug!(sid, rpc, tool, status, elapsed_ms, "request done");
    }
}

/// Accepts connections until `shutdown` resolves, then stops the sweeper,
/// refuses new bindings and closes every session.
pub async fn serve<F>(listener: TcpListener, app: App, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()>,
{
    let app = Arc::new(app);
    let cancel = CancellationToken::new();
    let sweeper = spawn_expiry_sweeper(
        Arc::clone(app.registry()),
        app.config.session_timeout,
        app.config.session_cleanup_interval,
        cancel.clone(),
    );

    let addr = listener.local_addr()?;
    info!(
        %addr,
        session_timeout_ms = u64::try_from(app.config.session_timeout.as_millis()).unwrap_or(u64::MAX),
        cleanup_interval_ms = u64::try_from(app.config.session_cleanup_interval.as_millis()).unwrap_or(u64::MAX),
        "mandoline mcp server listening"
    );

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let app = Arc::clone(&app);
                    tokio::spawn(async move {
                        if let Err(err) = app.handle_connection(stream, peer).await {
                            debug!(%peer, error = %err, "connection ended with error");
                        }
                    });
                }
                Err(err) => warn!(error = %err, "accept failed"),
            }
        }
    }

    info!("shutting down");
    app.server.shutdown();
    cancel.cancel();
    if let Err(err) = sweeper.await {
        warn!(error = %err, "sweeper task failed");
    }
    let closed = app.registry().clear();
    info!(closed, "sessions closed");
    Ok(())
}

pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let listener = TcpListener::bind(&config.http_addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: config.http_addr.clone(),
            source,
        })?;
    let app = App::from_config(config)?;
    serve(listener, app, shutdown_signal()).await
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn start() -> (SocketAddr, tokio::sync::oneshot::Sender<()>, tokio::task::JoinHandle<Result<(), ServerError>>) {
        let config = ServerConfig {
            api_base_url: "http://127.0.0.1:9".to_string(),
            docs_base_url: "http://127.0.0.1:9".to_string(),
            api_timeout: Duration::from_secs(1),
            max_body_bytes: 1_024,
            ..ServerConfig::default()
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let app = App::from_config(config).expect("app");
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(serve(listener, app, async {
            let _ = rx.await;
        }));
        (addr, tx, handle)
    }

    async fn raw(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream.write_all(request.as_bytes()).await.expect("write");
        let mut out = String::new();
        stream.read_to_string(&mut out).await.expect("read");
        out
    }

    #[tokio::test]
    async fn routes_health_usage_and_unknown_paths() {
        let (addr, stop, handle) = start().await;

        let health = raw(addr, "GET /health HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(health.starts_with("HTTP/1.1 200 OK"));
        assert!(health.contains("\"status\":\"ok\""));

        let usage = raw(addr, "GET /mcp HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(usage.starts_with("HTTP/1.1 200 OK"));
        assert!(usage.contains("text/plain; charset=utf-8"));

        let missing = raw(addr, "GET /nope HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(missing.starts_with("HTTP/1.1 404"));

        let wrong = raw(addr, "PUT /mcp HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(wrong.starts_with("HTTP/1.1 405"));

        stop.send(()).expect("stop");
        handle.await.expect("join").expect("serve");
    }

    #[tokio::test]
    async fn browser_origins_get_cors_headers() {
        let (addr, stop, handle) = start().await;

        let preflight = raw(
            addr,
            "OPTIONS /mcp HTTP/1.1\r\nHost: x\r\nOrigin: https://mandoline.ai\r\nAccess-Control-Request-Method: POST\r\n\r\n",
        )
        .await;
        assert!(preflight.starts_with("HTTP/1.1 204"));
        assert!(preflight.contains("Access-Control-Allow-Origin: https://mandoline.ai\r\n"));
        assert!(preflight.contains("Access-Control-Allow-Credentials: true\r\n"));

        let unauthorized = raw(
            addr,
            "POST /mcp HTTP/1.1\r\nHost: x\r\nOrigin: http://localhost:3000\r\nContent-Length: 2\r\n\r\n{}",
        )
        .await;
        assert!(unauthorized.starts_with("HTTP/1.1 401"));
        assert!(unauthorized.contains("Access-Control-Allow-Origin: http://localhost:3000\r\n"));
        assert!(unauthorized.contains("Access-Control-Expose-Headers: Mcp-Session-Id\r\n"));

        let foreign = raw(
            addr,
            "GET /health HTTP/1.1\r\nHost: x\r\nOrigin: https://evil.test\r\n\r\n",
        )
        .await;
        assert!(foreign.starts_with("HTTP/1.1 200"));
        assert!(!foreign.contains("Access-Control-"));

        stop.send(()).expect("stop");
        handle.await.expect("join").expect("serve");
    }

    #[tokio::test]
    async fn oversized_body_is_refused() {
        let (addr, stop, handle) = start().await;
        let response = raw(
            addr,
            "POST /mcp HTTP/1.1\r\nHost: x\r\nX-API-KEY: sk_t\r\nContent-Length: 4096\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 413"));
        stop.send(()).expect("stop");
        handle.await.expect("join").expect("serve");
    }
}
