use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{Config, PrintMode};
use crate::error::{ClientError, Result};
use crate::history::{HistoryEntry, HistoryLog, Mode};

/// A successful round trip: HTTP status plus the decoded JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub status: u16,
    pub response: Value,
}

/// One-shot request/response transport to the remote terminal.
pub struct HttpChannel {
    client: Client,
}

impl HttpChannel {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("goputn/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// `<server><http_path>` with any trailing slash on the server removed.
    pub fn command_url(cfg: &Config) -> String {
        format!("{}{}", cfg.server().trim_end_matches('/'), cfg.http_path())
    }

    /// POST `command` as a JSON string and decode the JSON reply.
    pub async fn exchange(&self, command: &str, cfg: &Config) -> Result<Exchange> {
        let url = Self::command_url(cfg);
        info!(url = %url, command_length = command.len(), "sending command");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .timeout(cfg.timeout())
            .json(&command)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ClientError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        match serde_json::from_str(&body) {
            Ok(response) => Ok(Exchange {
                status: status.as_u16(),
                response,
            }),
            Err(e) => Err(ClientError::MalformedResponse {
                status: status.as_u16(),
                body,
                reason: e.to_string(),
            }),
        }
    }

    /// Run one command end to end: exchange, record the outcome in history
    /// and return the text to show the user. Never fails.
    pub async fn send(&self, command: &str, cfg: &Config, history: &HistoryLog) -> String {
        let entry = HistoryEntry::new(Mode::Http).with("command", command);

        let (entry, display) = match self.exchange(command, cfg).await {
            Ok(exchange) => {
                let display = render(&exchange.response, cfg.print_mode());
                let entry = entry
                    .with("status", exchange.status)
                    .with("response", exchange.response);
                (entry, display)
            }
            Err(ClientError::Remote { status, body }) => {
                warn!(status, "remote returned an error status");
                let response: Value =
                    serde_json::from_str(&body).unwrap_or_else(|_| Value::from(body.as_str()));
                let display = ClientError::Remote { status, body }.to_string();
                (entry.with("status", status).with("response", response), display)
            }
            Err(ClientError::MalformedResponse {
                status,
                body,
                reason,
            }) => {
                warn!(status, error = %reason, "remote returned malformed JSON");
                let entry = entry
                    .with("status", status)
                    .with("response", body.as_str())
                    .with("error", reason.as_str());
                let display = ClientError::MalformedResponse {
                    status,
                    body,
                    reason,
                }
                .to_string();
                (entry, display)
            }
            Err(e) => {
                warn!(error = %e, "command transport failed");
                (entry.with("error", e.to_string()), format!("Error: {}", e))
            }
        };

        if let Err(e) = history.append(entry, cfg.history_limit()) {
            warn!(error = %e, "failed to record http exchange");
        }
        display
    }
}

/// Format a decoded response for display. In output mode an `output` field
/// is passed through as plain text; everything else is pretty JSON.
pub fn render(response: &Value, mode: PrintMode) -> String {
    if mode == PrintMode::Output {
        if let Some(output) = response.get("output") {
            return match output {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
        }
    }
    serde_json::to_string_pretty(response).unwrap_or_else(|_| response.to_string())
}
