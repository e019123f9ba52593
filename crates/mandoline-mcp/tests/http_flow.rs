use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

fn reserve_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("reserve addr");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    addr.to_string()
}

fn wait_for_http(addr: &str) {
    for _ in 0..200 {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    panic!("http server not ready on {addr}");
}

struct Daemon {
    child: Child,
    addr: String,
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_daemon(extra_env: &[(&str, &str)]) -> Daemon {
    let addr = reserve_addr();
    let mut command = Command::new(env!("CARGO_BIN_EXE_mandoline-mcpd"));
    command
        .env("MANDOLINE_HTTP_ADDR", &addr)
        .env("MANDOLINE_API_BASE_URL", "http://127.0.0.1:9")
        .env("MANDOLINE_DOCS_BASE_URL", "http://127.0.0.1:9")
        .env("LOG_LEVEL", "error")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    for (key, value) in extra_env {
        command.env(key, value);
    }
    let child = command.spawn().expect("spawn mandoline-mcpd");
    wait_for_http(&addr);
    Daemon { child, addr }
}

fn send_http(addr: &str, method: &str, path: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut stream = TcpStream::connect(addr).expect("connect http");
    let mut request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nAccept: application/json, text/event-stream\r\nContent-Length: {}\r\n",
        body.len()
    );
    for (name, value) in headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str("\r\n");
    request.push_str(body);
    stream.write_all(request.as_bytes()).expect("write request");
    stream.flush().expect("flush");
    let mut buf = String::new();
    stream.read_to_string(&mut buf).expect("read response");
    buf
}

fn response_body(response: &str) -> &str {
    response.split("\r\n\r\n").nth(1).unwrap_or("")
}

fn session_id(response: &str) -> String {
    response
        .split("\r\n\r\n")
        .next()
        .unwrap_or("")
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("mcp-session-id")
                .then(|| value.trim().to_string())
        })
        .expect("Mcp-Session-Id header")
}

const KEY: (&str, &str) = ("X-API-KEY", "sk_integration");
const INIT: &str = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18","clientInfo":{"name":"it","version":"0.0.1"}}}"#;
const PING: &str = r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#;

#[test]
fn health_and_usage_need_no_credentials() {
    let daemon = spawn_daemon(&[]);

    let health = send_http(&daemon.addr, "GET", "/health", &[], "");
    assert!(health.starts_with("HTTP/1.1 200"));
    assert!(response_body(&health).contains("\"status\":\"ok\""));

    let mut stream = TcpStream::connect(&daemon.addr).expect("connect");
    stream
        .write_all(b"GET /mcp HTTP/1.1\r\nHost: x\r\n\r\n")
        .expect("write");
    let mut usage = String::new();
    stream.read_to_string(&mut usage).expect("read");
    assert!(usage.starts_with("HTTP/1.1 200"));
    assert!(usage.contains("Mandoline MCP Server"));
}

#[test]
fn session_lifecycle_over_http() {
    let daemon = spawn_daemon(&[]);
    let addr = daemon.addr.as_str();

    let unauthorized = send_http(addr, "POST", "/mcp", &[], INIT);
    assert!(unauthorized.starts_with("HTTP/1.1 401"));
    assert_eq!(response_body(&unauthorized), r#"{"error":"Unauthorized"}"#);

    let init = send_http(addr, "POST", "/mcp", &[KEY], INIT);
    assert!(init.starts_with("HTTP/1.1 200"));
    let body = response_body(&init);
    assert!(body.contains("\"mandoline-mcp-server\""));
    assert!(body.contains("\"protocolVersion\":\"2025-06-18\""));
    let sid = session_id(&init);

    let notified = send_http(
        addr,
        "POST",
        "/mcp",
        &[KEY, ("Mcp-Session-Id", &sid)],
        r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
    );
    assert!(notified.starts_with("HTTP/1.1 202"));

    let ping = send_http(
        addr,
        "POST",
        "/mcp",
        &[("Authorization", "Bearer sk_integration"), ("Mcp-Session-Id", &sid)],
        PING,
    );
    assert!(ping.starts_with("HTTP/1.1 200"));
    assert_eq!(session_id(&ping), sid);

    let tools = send_http(
        addr,
        "POST",
        "/mcp",
        &[KEY, ("Mcp-Session-Id", &sid)],
        r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#,
    );
    assert!(response_body(&tools).contains("\"create_evaluation\""));

    let unknown = send_http(addr, "POST", "/mcp", &[KEY, ("Mcp-Session-Id", "nope")], PING);
    assert!(unknown.starts_with("HTTP/1.1 404"));
    assert!(response_body(&unknown).contains("-32001"));

    let no_id = send_http(addr, "DELETE", "/mcp", &[KEY], "");
    assert!(no_id.starts_with("HTTP/1.1 400"));
    assert!(response_body(&no_id).contains("-32000"));

    let deleted = send_http(addr, "DELETE", "/mcp", &[KEY, ("Mcp-Session-Id", &sid)], "");
    assert!(deleted.starts_with("HTTP/1.1 200"));

    let after = send_http(addr, "POST", "/mcp", &[KEY, ("Mcp-Session-Id", &sid)], PING);
    assert!(after.starts_with("HTTP/1.1 404"));
}

#[test]
fn idle_sessions_expire() {
    let daemon = spawn_daemon(&[
        ("SESSION_TIMEOUT_MS", "1000"),
        ("SESSION_CLEANUP_INTERVAL_MS", "100"),
    ]);
    let addr = daemon.addr.as_str();

    let init = send_http(addr, "POST", "/mcp", &[KEY], INIT);
    let sid = session_id(&init);

    let alive = send_http(addr, "POST", "/mcp", &[KEY, ("Mcp-Session-Id", &sid)], PING);
    assert!(alive.starts_with("HTTP/1.1 200"));

    std::thread::sleep(Duration::from_millis(1_600));
    let expired = send_http(addr, "POST", "/mcp", &[KEY, ("Mcp-Session-Id", &sid)], PING);
    assert!(expired.starts_with("HTTP/1.1 404"));
}

#[test]
fn event_stream_requires_existing_session() {
    let daemon = spawn_daemon(&[]);
    let mut stream = TcpStream::connect(&daemon.addr).expect("connect");
    stream
        .write_all(b"GET /mcp HTTP/1.1\r\nHost: x\r\nAccept: text/event-stream\r\nX-API-KEY: sk_integration\r\n\r\n")
        .expect("write");
    let mut response = String::new();
    stream.read_to_string(&mut response).expect("read");
    assert!(response.starts_with("HTTP/1.1 400"));
}
