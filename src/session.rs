use std::borrow::Cow;
use std::io::Write;
use tracing::{info, warn};

use crate::commands::{is_exit_keyword, parse_meta};
use crate::config::{Config, Storage};
use crate::error::{ClientError, Result};
use crate::history::{HistoryEntry, HistoryLog, Mode};
use crate::http::HttpChannel;
use crate::input::{LineSource, PROMPT};
use crate::ws;

/// What the dispatcher does after a line has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Process-wide client state: storage paths, loaded config, history log and
/// the HTTP channel. Built once at startup and passed by reference.
pub struct Session {
    storage: Storage,
    config: Config,
    server_override: Option<String>,
    history: HistoryLog,
    http: HttpChannel,
    notice: Option<String>,
}

impl Session {
    /// Prepare the storage directory and load the config. A corrupt config
    /// is reported once and replaced by defaults for this run.
    pub fn open(storage: Storage) -> Result<Self> {
        storage.ensure()?;
        let (config, notice) = match storage.load() {
            Ok(config) => (config, None),
            Err(e @ ClientError::ConfigCorrupt { .. }) => {
                warn!(error = %e, "falling back to default configuration");
                (Config::default(), Some(format!("{}; using defaults", e)))
            }
            Err(e) => return Err(e),
        };
        let history = HistoryLog::new(storage.history_path());
        info!(dir = %storage.dir().display(), "session opened");

        Ok(Self {
            storage,
            config,
            server_override: None,
            history,
            http: HttpChannel::new()?,
            notice,
        })
    }

    /// Use `server` for remote calls this run without saving it.
    pub fn with_server_override(mut self, server: impl Into<String>) -> Self {
        self.server_override = Some(server.into());
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Config as seen by the channels, with any server override applied.
    pub fn effective_config(&self) -> Cow<'_, Config> {
        match &self.server_override {
            Some(server) => {
                let mut config = self.config.clone();
                if let Err(e) = config.set("server", server) {
                    warn!(error = %e, "ignoring server override");
                }
                Cow::Owned(config)
            }
            None => Cow::Borrowed(&self.config),
        }
    }

    /// Append to the history log. Failures are logged, never raised.
    pub fn record(&self, entry: HistoryEntry) {
        if let Err(e) = self.history.append(entry, self.config.history_limit()) {
            warn!(error = %e, "failed to record history entry");
        }
    }

    /// Interactive read-eval loop. End of input behaves like `exit`.
    pub async fn run<S, W>(&mut self, input: &mut S, out: &mut W) -> Result<()>
    where
        S: LineSource + ?Sized,
        W: Write,
    {
        self.flush_notice(out)?;
        loop {
            let line = input
                .next_line(PROMPT)
                .await?
                .unwrap_or_else(|| "exit".to_string());
            if self.handle_line(&line, input, out).await? == Flow::Exit {
                break;
            }
        }
        Ok(())
    }

    /// Dispatch a single line, as in one-shot mode.
    pub async fn run_once<S, W>(&mut self, line: &str, input: &mut S, out: &mut W) -> Result<Flow>
    where
        S: LineSource + ?Sized,
        W: Write,
    {
        self.flush_notice(out)?;
        self.handle_line(line, input, out).await
    }

    /// Route one line: local meta-command, WebSocket mode, or HTTP.
    pub async fn handle_line<S, W>(&mut self, line: &str, input: &mut S, out: &mut W) -> Result<Flow>
    where
        S: LineSource + ?Sized,
        W: Write,
    {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Flow::Continue);
        }
        if is_exit_keyword(line) {
            self.record(HistoryEntry::event(Mode::Meta, "exit"));
            return Ok(Flow::Exit);
        }
        if self.handle_meta(parse_meta(line), out)? {
            return Ok(Flow::Continue);
        }

        let config = self.effective_config();
        if line == "ws" {
            let state = ws::run_interactive(&config, &self.history, input, out).await?;
            info!(state = ?state, "websocket session ended");
        } else {
            let display = self.http.send(line, &config, &self.history).await;
            writeln!(out, "{}", display)?;
        }
        Ok(Flow::Continue)
    }

    fn flush_notice<W: Write>(&mut self, out: &mut W) -> Result<()> {
        if let Some(notice) = self.notice.take() {
            writeln!(out, "{}", notice)?;
        }
        Ok(())
    }
}
