use std::time::Duration;

use mandoline_client::DEFAULT_BASE_URL;

pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 1_800_000;
pub const DEFAULT_SESSION_CLEANUP_INTERVAL_MS: u64 = 300_000;
const DEFAULT_PORT: u64 = 8080;
const DEFAULT_DOCS_BASE_URL: &str = "https://mandoline.ai";
pub const DEFAULT_CORS_ORIGINS: &[&str] = &["https://mandoline.ai", "http://localhost:3000"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_addr: String,
    pub session_timeout: Duration,
    pub session_cleanup_interval: Duration,
    pub api_base_url: String,
    pub api_timeout: Duration,
    pub docs_base_url: String,
    pub max_body_bytes: usize,
    pub sse_keep_alive: Duration,
    /// Browser origins allowed to call the server with credentials.
    pub cors_origins: Vec<String>,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            session_timeout: Duration::from_millis(DEFAULT_SESSION_TIMEOUT_MS),
            session_cleanup_interval: Duration::from_millis(DEFAULT_SESSION_CLEANUP_INTERVAL_MS),
            api_base_url: DEFAULT_BASE_URL.to_string(),
            api_timeout: Duration::from_secs(30),
            docs_base_url: DEFAULT_DOCS_BASE_URL.to_string(),
            max_body_bytes: 16 * 1024 * 1024,
            sse_keep_alive: Duration::from_secs(15),
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(|o| (*o).to_string()).collect(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let port = env_u64("PORT", DEFAULT_PORT, 0, 65_535);
        let http_addr =
            env_string("MANDOLINE_HTTP_ADDR").unwrap_or_else(|| format!("0.0.0.0:{port}"));
        let log_format = match env_string("LOG_FORMAT").as_deref() {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        let log_level = env_string("LOG_LEVEL")
            .or_else(|| env_string("RUST_LOG"))
            .unwrap_or(defaults.log_level);

        Self {
            http_addr,
            session_timeout: Duration::from_millis(env_u64(
                "SESSION_TIMEOUT_MS",
                DEFAULT_SESSION_TIMEOUT_MS,
                1_000,
                7 * 86_400_000,
            )),
            session_cleanup_interval: Duration::from_millis(env_u64(
                "SESSION_CLEANUP_INTERVAL_MS",
                DEFAULT_SESSION_CLEANUP_INTERVAL_MS,
                100,
                86_400_000,
            )),
            api_base_url: env_string("MANDOLINE_API_BASE_URL").unwrap_or(defaults.api_base_url),
            api_timeout: Duration::from_millis(env_u64(
                "MANDOLINE_API_TIMEOUT_MS",
                30_000,
                1_000,
                600_000,
            )),
            docs_base_url: env_string("MANDOLINE_DOCS_BASE_URL").unwrap_or(defaults.docs_base_url),
            max_body_bytes: usize::try_from(env_u64(
                "MANDOLINE_MAX_BODY_BYTES",
                16 * 1024 * 1024,
                1_024,
                256 * 1024 * 1024,
            ))
            .unwrap_or(defaults.max_body_bytes),
            sse_keep_alive: Duration::from_millis(env_u64(
                "MANDOLINE_SSE_KEEPALIVE_MS",
                15_000,
                100,
                300_000,
            )),
            cors_origins: env_string("MANDOLINE_CORS_ORIGINS")
                .map_or(defaults.cors_origins, |raw| parse_list(&raw)),
            log_level,
            log_format,
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|v| v.trim().trim_end_matches('/'))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_u64(name: &str, default: u64, min: u64, max: u64) -> u64 {
    parse_u64(std::env::var(name).ok().as_deref(), default, min, max)
}

fn parse_u64(raw: Option<&str>, default: u64, min: u64, max: u64) -> u64 {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
        .clamp(min, max)
}
