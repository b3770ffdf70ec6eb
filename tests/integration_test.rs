use futures_util::{SinkExt, StreamExt};
use goputn::config::Storage;
use goputn::history::Mode;
use goputn::input::ScriptedSource;
use goputn::ws::{self, SessionState};
use goputn::Session;
use serde_json::{json, Value};
use std::net::SocketAddr;
use tempfile::{tempdir, TempDir};
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Session rooted in a fresh temp dir, pointed at `server`.
async fn session_for(server: &str) -> (TempDir, Session) {
    let dir = tempdir().unwrap();
    let mut session = Session::open(Storage::new(dir.path())).unwrap();
    let line = format!("config set server {}", server);
    run(&mut session, &[line.as_str()]).await;
    (dir, session)
}

/// Feed `lines` through the dispatcher one at a time and collect the output.
async fn run(session: &mut Session, lines: &[&str]) -> String {
    let mut input = ScriptedSource::new(lines.iter().skip(1).copied());
    let mut out = Vec::new();
    if let Some(first) = lines.first() {
        session.run_once(first, &mut input, &mut out).await.unwrap();
        while input.remaining() > 0 {
            session.run(&mut input, &mut out).await.unwrap();
        }
    }
    String::from_utf8(out).unwrap()
}

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Test output mode prints the `output` field and json mode the whole body
#[tokio::test]
async fn test_http_output_mode_prints_output_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/terminal"))
        .and(header("Content-Type", "application/json"))
        .and(body_json(json!("echo hello")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output": "hello"})))
        .expect(2)
        .mount(&server)
        .await;

    let (_dir, mut session) = session_for(&server.uri()).await;

    let out = run(&mut session, &["config set print_mode output"]).await;
    assert!(out.contains("print_mode = \"output\""));
    let out = run(&mut session, &["echo hello"]).await;
    assert_eq!(out, "hello\n");

    run(&mut session, &["print mode json"]).await;
    let out = run(&mut session, &["echo hello"]).await;
    assert_eq!(out, "{\n  \"output\": \"hello\"\n}\n");
}

/// Test a successful HTTP exchange lands in history
#[tokio::test]
async fn test_http_success_is_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/terminal"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output": "a.txt"})))
        .mount(&server)
        .await;

    let (_dir, mut session) = session_for(&format!("{}/", server.uri())).await;
    run(&mut session, &["ls"]).await;

    let entries = session.history().entries().unwrap();
    let last = entries.last().unwrap();
    assert_eq!(last.mode, Mode::Http);
    assert_eq!(last.field("command"), Some(&Value::from("ls")));
    assert_eq!(last.field("status"), Some(&Value::from(200)));
    assert_eq!(last.field("response"), Some(&json!({"output": "a.txt"})));
    assert!(last.timestamp.is_some());
}

/// Test an error status shows its code and body
#[tokio::test]
async fn test_http_error_status_shows_code_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/terminal"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!("boom")))
        .mount(&server)
        .await;

    let (_dir, mut session) = session_for(&server.uri()).await;
    let out = run(&mut session, &["rm -rf /tmp/x"]).await;
    assert!(out.contains("500"));
    assert!(out.contains("boom"));

    let entries = session.history().entries().unwrap();
    let last = entries.last().unwrap();
    assert_eq!(last.mode, Mode::Http);
    assert_eq!(last.field("status"), Some(&Value::from(500)));
    assert_eq!(last.field("response"), Some(&Value::from("boom")));
}

/// Test a non-JSON error body is kept as raw text
#[tokio::test]
async fn test_http_error_status_with_plain_body_keeps_raw_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .mount(&server)
        .await;

    let (_dir, mut session) = session_for(&server.uri()).await;
    let out = run(&mut session, &["whoami"]).await;
    assert!(out.contains("404"));
    assert!(out.contains("not here"));

    let entries = session.history().entries().unwrap();
    assert_eq!(entries.last().unwrap().field("response"), Some(&Value::from("not here")));
}

/// Test a 2xx body that is not JSON is reported as malformed
#[tokio::test]
async fn test_http_malformed_success_body_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let (_dir, mut session) = session_for(&server.uri()).await;
    let out = run(&mut session, &["pwd"]).await;
    assert!(out.contains("200"));
    assert!(out.contains("malformed"));

    let entries = session.history().entries().unwrap();
    let last = entries.last().unwrap();
    assert_eq!(last.field("response"), Some(&Value::from("<html>oops</html>")));
    assert!(last.field("error").is_some());
}

/// Test an unreachable server is reported and the loop keeps going
#[tokio::test]
async fn test_http_transport_failure_is_logged_and_loop_continues() {
    let (_dir, mut session) = session_for(&format!("http://127.0.0.1:{}", closed_port())).await;
    let out = run(&mut session, &["ls", "config get server"]).await;
    assert!(out.starts_with("Error: "));
    assert!(out.contains("127.0.0.1"));

    let entries = session.history().entries().unwrap();
    let http: Vec<_> = entries.iter().filter(|e| e.mode == Mode::Http).collect();
    assert_eq!(http.len(), 1);
    assert!(http[0].field("error").is_some());
    assert!(http[0].field("status").is_none());
}

/// Terminal stub: greets with `welcome`, answers `ls`, echoes anything else.
/// With `hang_up` set it closes right after the first command arrives.
async fn spawn_terminal(welcome: &'static str, hang_up: bool) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = accept_async(stream).await.unwrap();
        socket.send(Message::Text(welcome.to_string())).await.unwrap();
        while let Some(Ok(msg)) = socket.next().await {
            match msg {
                Message::Text(_) if hang_up => {
                    let _ = socket.close(None).await;
                    break;
                }
                Message::Text(cmd) => {
                    let reply = match cmd.as_str() {
                        "ls" => "a.txt b.txt".to_string(),
                        other => format!("echo: {}", other),
                    };
                    if socket.send(Message::Text(reply)).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });
    addr
}

/// Stub that completes the handshake and closes before any welcome frame.
async fn spawn_silent_terminal() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = accept_async(stream).await.unwrap();
        let _ = socket.close(None).await;
        while let Some(Ok(_)) = socket.next().await {}
    });
    addr
}

/// Test a full WebSocket session: welcome, command, exit
#[tokio::test]
async fn test_ws_session_round_trip() {
    let addr = spawn_terminal("ready", false).await;
    let (_dir, mut session) = session_for(&format!("http://{}", addr)).await;

    let out = run(&mut session, &["ws", "ls", "exit", "exit"]).await;
    let ready = out.find("ready").unwrap();
    let listing = out.find("a.txt b.txt").unwrap();
    assert!(ready < listing);

    let entries = session.history().entries().unwrap();
    let ws: Vec<_> = entries.iter().filter(|e| e.mode == Mode::Ws).collect();
    assert_eq!(ws.len(), 3);
    assert_eq!(ws[0].event_name(), Some("connected"));
    assert_eq!(ws[0].field("welcome"), Some(&Value::from("ready")));
    assert_eq!(ws[0].field("url"), Some(&Value::from(format!("ws://{}/terminal/ws", addr))));
    assert_eq!(ws[1].field("command"), Some(&Value::from("ls")));
    assert_eq!(ws[1].field("response"), Some(&Value::from("a.txt b.txt")));
    assert_eq!(ws[2].event_name(), Some("exit"));

    // the outer loop's own exit comes after the session closed
    assert_eq!(entries.last().unwrap().mode, Mode::Meta);
}

/// Test blank lines are skipped and `quit` closes the session
#[tokio::test]
async fn test_ws_session_ignores_blank_lines_and_accepts_quit() {
    let addr = spawn_terminal("hi", false).await;
    let (_dir, session) = session_for(&format!("http://{}", addr)).await;
    let cfg = session.config().clone();

    let mut input = ScriptedSource::new(["", "whoami", "quit", "never read"]);
    let mut out = Vec::new();
    let state = ws::run_interactive(&cfg, session.history(), &mut input, &mut out)
        .await
        .unwrap();

    assert_eq!(state, SessionState::Closed);
    assert_eq!(input.remaining(), 1);
    let out = String::from_utf8(out).unwrap();
    assert!(out.contains("echo: whoami"));
}

/// Test a server hang-up mid-session ends in the error state
#[tokio::test]
async fn test_ws_server_hang_up_ends_session_in_error() {
    let addr = spawn_terminal("ready", true).await;
    let (_dir, session) = session_for(&format!("http://{}", addr)).await;
    let cfg = session.config().clone();

    let mut input = ScriptedSource::new(["ls", "pwd"]);
    let mut out = Vec::new();
    let state = ws::run_interactive(&cfg, session.history(), &mut input, &mut out)
        .await
        .unwrap();

    assert_eq!(state, SessionState::Errored);
    assert_eq!(input.remaining(), 1);
    let out = String::from_utf8(out).unwrap();
    assert!(out.contains("WebSocket error"));

    let entries = session.history().entries().unwrap();
    let last = entries.last().unwrap();
    assert_eq!(last.mode, Mode::Ws);
    assert_eq!(last.event_name(), Some("error"));
    assert_eq!(last.field("command"), Some(&Value::from("ls")));
}

/// Test a failed connect falls back to the main prompt
#[tokio::test]
async fn test_ws_connect_failure_returns_to_prompt() {
    let (_dir, mut session) = session_for(&format!("http://127.0.0.1:{}", closed_port())).await;
    let out = run(&mut session, &["ws", "help"]).await;
    assert!(out.contains("Could not open WebSocket session"));
    assert!(out.contains("Local commands:"));

    let entries = session.history().entries().unwrap();
    assert!(entries
        .iter()
        .any(|e| e.mode == Mode::Ws && e.event_name() == Some("connect_error")));
}

/// Test a server that closes before the welcome frame ends the session in error
#[tokio::test]
async fn test_ws_missing_welcome_ends_session_in_error() {
    let addr = spawn_silent_terminal().await;
    let (_dir, session) = session_for(&format!("http://{}", addr)).await;
    let cfg = session.config().clone();

    let mut input = ScriptedSource::new(["ls"]);
    let mut out = Vec::new();
    let state = ws::run_interactive(&cfg, session.history(), &mut input, &mut out)
        .await
        .unwrap();

    assert_eq!(state, SessionState::Errored);
    assert_eq!(input.remaining(), 1);
    let out = String::from_utf8(out).unwrap();
    assert!(out.contains("WebSocket error"));

    let entries = session.history().entries().unwrap();
    let last = entries.last().unwrap();
    assert_eq!(last.mode, Mode::Ws);
    assert_eq!(last.event_name(), Some("error"));
    assert!(last.field("command").is_none());
}
