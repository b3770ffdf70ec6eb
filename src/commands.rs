use serde_json::Value;
use std::io::Write;
use tracing::{info, warn};

use crate::config::PrintMode;
use crate::error::Result;
use crate::history::{HistoryEntry, Mode, DEFAULT_SHOW_COUNT};
use crate::session::Session;

pub const EXIT_KEYWORDS: [&str; 2] = ["exit", "quit"];

pub const HELP_TEXT: &str = "\
Local commands:
  config get [key]              show one option or the whole configuration
  config set <key> <value...>   change an option and save it
  history show [n]              show the last n history records (default 50)
  history clear                 empty the history log
  print mode <output|json>      how HTTP responses are displayed
  ws                            open an interactive WebSocket session
  help                          show this help
  exit | quit                   leave
Anything else is sent to the remote terminal.";

pub fn is_exit_keyword(line: &str) -> bool {
    EXIT_KEYWORDS.contains(&line)
}

/// Locally handled instructions, parsed before anything is sent remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaCommand {
    ConfigGet(Option<String>),
    ConfigSet { key: String, value: String },
    HistoryShow(usize),
    HistoryClear,
    PrintMode(String),
    Help,
    /// Recognized verb with unusable arguments; the message says why.
    Invalid(String),
    Unrecognized,
}

/// Parse a trimmed input line into a meta-command.
pub fn parse_meta(line: &str) -> MetaCommand {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        ["config", "get"] => MetaCommand::ConfigGet(None),
        ["config", "get", key, ..] => MetaCommand::ConfigGet(Some(key.to_string())),
        ["config", "set", key, rest @ ..] => MetaCommand::ConfigSet {
            key: key.to_string(),
            value: rest.join(" "),
        },
        ["config", "set"] => MetaCommand::Invalid("usage: config set <key> <value...>".into()),
        ["history", "show"] => MetaCommand::HistoryShow(DEFAULT_SHOW_COUNT),
        ["history", "show", n, ..] => match n.parse::<usize>() {
            Ok(n) => MetaCommand::HistoryShow(n),
            Err(_) => MetaCommand::Invalid(format!("usage: history show [n] (got '{}')", n)),
        },
        ["history", "clear"] => MetaCommand::HistoryClear,
        ["print", "mode", rest @ ..] => MetaCommand::PrintMode(rest.join(" ")),
        ["help"] => MetaCommand::Help,
        _ => MetaCommand::Unrecognized,
    }
}

impl Session {
    /// Run a meta-command against the local config and history. Returns
    /// `false` when the command is not a local one and should go remote.
    pub fn handle_meta<W: Write>(&mut self, cmd: MetaCommand, out: &mut W) -> Result<bool> {
        match cmd {
            MetaCommand::ConfigGet(key) => self.handle_config_get(key.as_deref(), out)?,
            MetaCommand::ConfigSet { key, value } => self.handle_config_set(&key, &value, out)?,
            MetaCommand::HistoryShow(n) => self.handle_history_show(n, out)?,
            MetaCommand::HistoryClear => self.handle_history_clear(out)?,
            MetaCommand::PrintMode(value) => self.handle_print_mode(&value, out)?,
            MetaCommand::Help => writeln!(out, "{}", HELP_TEXT)?,
            MetaCommand::Invalid(msg) => writeln!(out, "{}", msg)?,
            MetaCommand::Unrecognized => return Ok(false),
        }
        Ok(true)
    }

    fn handle_config_get<W: Write>(&self, key: Option<&str>, out: &mut W) -> Result<()> {
        match key {
            Some(key) => match self.config().get(key) {
                Some(value) => writeln!(out, "{}", serde_json::to_string_pretty(value)?)?,
                None => writeln!(out, "config key '{}' is not set", key)?,
            },
            None => writeln!(out, "{}", self.config().to_pretty()?)?,
        }
        Ok(())
    }

    fn handle_config_set<W: Write>(&mut self, key: &str, value: &str, out: &mut W) -> Result<()> {
        if value.is_empty() {
            writeln!(out, "usage: config set <key> <value...>")?;
            return Ok(());
        }
        if let Err(e) = self.config_mut().set(key, value) {
            writeln!(out, "{}", e)?;
            return Ok(());
        }
        self.persist_config(out)?;
        info!(key, "config updated");

        let stored = self.config().get(key).cloned().unwrap_or(Value::Null);
        self.record(
            HistoryEntry::event(Mode::Meta, "config_set")
                .with("key", key)
                .with("value", stored.clone()),
        );
        writeln!(out, "{} = {}", key, stored)?;
        Ok(())
    }

    fn handle_history_show<W: Write>(&self, n: usize, out: &mut W) -> Result<()> {
        let lines = self.history().show(n)?;
        if lines.is_empty() {
            writeln!(out, "(history is empty)")?;
        }
        for line in lines {
            writeln!(out, "{}", line)?;
        }
        Ok(())
    }

    fn handle_history_clear<W: Write>(&self, out: &mut W) -> Result<()> {
        self.history().clear()?;
        self.record(HistoryEntry::event(Mode::Meta, "history_clear"));
        writeln!(out, "History cleared.")?;
        Ok(())
    }

    fn handle_print_mode<W: Write>(&mut self, value: &str, out: &mut W) -> Result<()> {
        let mode = match value.parse::<PrintMode>() {
            Ok(mode) => mode,
            Err(_) => {
                writeln!(out, "Allowed print modes: {}", PrintMode::ALLOWED.join(", "))?;
                return Ok(());
            }
        };
        self.config_mut().set("print_mode", mode.as_str())?;
        self.persist_config(out)?;
        self.record(HistoryEntry::event(Mode::Meta, "print_mode").with("value", mode.as_str()));
        writeln!(out, "Print mode set to {}", mode)?;
        Ok(())
    }

    fn persist_config<W: Write>(&self, out: &mut W) -> Result<()> {
        if let Err(e) = self.storage().save(self.config()) {
            warn!(error = %e, "failed to save config");
            writeln!(out, "config not saved: {}", e)?;
        }
        Ok(())
    }
}
