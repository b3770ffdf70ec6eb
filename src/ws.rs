//! Interactive WebSocket session with the remote terminal.
//!
//! One connection per `ws` invocation. The server greets with a single text
//! frame; after that every command sent is answered by exactly one reply
//! before the next line is read.

use futures_util::{SinkExt, StreamExt};
use std::io::Write;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::commands::is_exit_keyword;
use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::history::{HistoryEntry, HistoryLog, Mode};
use crate::input::{LineSource, WS_PROMPT};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
    Errored,
}

/// Map the configured server onto its WebSocket scheme and append `ws_path`.
pub fn ws_url(cfg: &Config) -> String {
    let server = cfg.server().trim_end_matches('/');
    let base = if let Some(rest) = server.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = server.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        server.to_string()
    };
    format!("{}{}", base, cfg.ws_path())
}

pub struct WsSession<'a> {
    cfg: &'a Config,
    history: &'a HistoryLog,
    url: String,
    state: SessionState,
}

impl<'a> WsSession<'a> {
    pub fn new(cfg: &'a Config, history: &'a HistoryLog) -> Self {
        Self {
            url: ws_url(cfg),
            cfg,
            history,
            state: SessionState::Connecting,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until the user exits or the connection fails.
    /// Transport failures end in `Errored`; only terminal I/O errors are
    /// returned as `Err`.
    pub async fn run<S, W>(mut self, input: &mut S, out: &mut W) -> Result<SessionState>
    where
        S: LineSource + ?Sized,
        W: Write,
    {
        info!(url = %self.url, "opening websocket session");
        let mut socket = match connect_async(self.url.as_str()).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                warn!(url = %self.url, error = %e, "websocket connect failed");
                self.record(
                    HistoryEntry::event(Mode::Ws, "connect_error")
                        .with("url", self.url.as_str())
                        .with("error", e.to_string()),
                );
                writeln!(out, "Could not open WebSocket session at {}: {}", self.url, e)?;
                self.transition(SessionState::Errored);
                return Ok(self.state);
            }
        };

        let welcome = match recv_reply(&mut socket).await {
            Ok(text) => text,
            Err(e) => {
                self.fail(&mut socket, out, None, e).await?;
                return Ok(self.state);
            }
        };
        self.transition(SessionState::Open);
        writeln!(out, "{}", welcome)?;
        self.record(
            HistoryEntry::event(Mode::Ws, "connected")
                .with("url", self.url.as_str())
                .with("welcome", welcome),
        );

        loop {
            let command = match input.next_line(WS_PROMPT).await? {
                Some(line) => line.trim().to_string(),
                None => "exit".to_string(),
            };
            if command.is_empty() {
                continue;
            }
            if is_exit_keyword(&command) {
                self.transition(SessionState::Closing);
                self.record(HistoryEntry::event(Mode::Ws, "exit"));
                if let Err(e) = socket.close(None).await {
                    debug!(error = %e, "close handshake failed");
                }
                writeln!(out, "WebSocket session closed.")?;
                self.transition(SessionState::Closed);
                break;
            }

            if let Err(e) = socket.send(Message::Text(command.clone())).await {
                self.fail(&mut socket, out, Some(&command), e.into()).await?;
                break;
            }
            match recv_reply(&mut socket).await {
                Ok(reply) => {
                    writeln!(out, "{}", reply)?;
                    self.record(
                        HistoryEntry::new(Mode::Ws)
                            .with("command", command)
                            .with("response", reply),
                    );
                }
                Err(e) => {
                    self.fail(&mut socket, out, Some(&command), e).await?;
                    break;
                }
            }
        }
        Ok(self.state)
    }

    async fn fail<W: Write>(
        &mut self,
        socket: &mut Socket,
        out: &mut W,
        command: Option<&str>,
        err: ClientError,
    ) -> Result<()> {
        warn!(url = %self.url, error = %err, "websocket session failed");
        let mut entry = HistoryEntry::event(Mode::Ws, "error").with("error", err.to_string());
        if let Some(command) = command {
            entry = entry.with("command", command);
        }
        self.record(entry);
        writeln!(out, "WebSocket error: {}", err)?;
        if let Err(e) = socket.close(None).await {
            debug!(error = %e, "close handshake failed");
        }
        self.transition(SessionState::Errored);
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "websocket state");
        self.state = next;
    }

    fn record(&self, entry: HistoryEntry) {
        if let Err(e) = self.history.append(entry, self.cfg.history_limit()) {
            warn!(error = %e, "failed to record websocket event");
        }
    }
}

/// Wait for the next data frame, skipping control frames.
async fn recv_reply(socket: &mut Socket) -> Result<String> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text),
            Some(Ok(Message::Binary(bytes))) => {
                return Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
            Some(Ok(Message::Close(_))) | None => {
                return Err(ClientError::Transport(
                    "connection closed by server".to_string(),
                ))
            }
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

/// Run one interactive WebSocket session against the configured server.
pub async fn run_interactive<S, W>(
    cfg: &Config,
    history: &HistoryLog,
    input: &mut S,
    out: &mut W,
) -> Result<SessionState>
where
    S: LineSource + ?Sized,
    W: Write,
{
    WsSession::new(cfg, history).run(input, out).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::ScriptedSource;
    use tempfile::tempdir;

    fn cfg_with_server(server: &str) -> Config {
        let mut cfg = Config::default();
        cfg.set("server", server).unwrap();
        cfg
    }

    #[test]
    fn test_ws_url_maps_https_to_wss() {
        let cfg = cfg_with_server("https://gophub.example.com/");
        assert_eq!(ws_url(&cfg), "wss://gophub.example.com/terminal/ws");
    }

    #[test]
    fn test_ws_url_maps_http_to_ws() {
        let mut cfg = cfg_with_server("http://127.0.0.1:9000");
        cfg.set("ws_path", "/shell").unwrap();
        assert_eq!(ws_url(&cfg), "ws://127.0.0.1:9000/shell");
    }

    #[test]
    fn test_ws_url_keeps_explicit_ws_scheme() {
        let cfg = cfg_with_server("ws://host:1");
        assert_eq!(ws_url(&cfg), "ws://host:1/terminal/ws");
    }

    #[test]
    fn test_new_session_starts_connecting() {
        let dir = tempdir().unwrap();
        let history = HistoryLog::new(dir.path().join("history.log"));
        let cfg = cfg_with_server("http://localhost:1");
        let session = WsSession::new(&cfg, &history);
        assert_eq!(session.state(), SessionState::Connecting);
        assert_eq!(session.url(), "ws://localhost:1/terminal/ws");
    }

    #[tokio::test]
    async fn test_connect_failure_records_and_returns_errored() {
        let dir = tempdir().unwrap();
        let history = HistoryLog::new(dir.path().join("history.log"));
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let cfg = cfg_with_server(&format!("http://127.0.0.1:{}", port));
        let mut input = ScriptedSource::new(["ls"]);
        let mut out = Vec::new();

        let state = run_interactive(&cfg, &history, &mut input, &mut out)
            .await
            .unwrap();
        assert_eq!(state, SessionState::Errored);
        assert_eq!(input.remaining(), 1);

        let entries = history.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_name(), Some("connect_error"));
        assert!(entries[0].field("error").is_some());
        assert!(String::from_utf8(out).unwrap().contains("Could not open WebSocket session"));
    }
}
