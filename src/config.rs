use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ClientError, Result};

/// Environment variable that selects the storage directory directly.
pub const STORAGE_ENV: &str = "GOPUTN_HOME";
pub const STORAGE_DIR_NAME: &str = ".goputn";
pub const CONFIG_FILE: &str = "config.json";
pub const HISTORY_FILE: &str = "history.log";

pub const DEFAULT_SERVER: &str = "https://gophub.onrender.com";
pub const DEFAULT_HTTP_PATH: &str = "/terminal";
pub const DEFAULT_WS_PATH: &str = "/terminal/ws";
pub const DEFAULT_HISTORY_LIMIT: usize = 500;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// Serialises file creation in `ensure_storage` within this process.
static ENSURE_LOCK: Mutex<()> = Mutex::new(());

/// How successful HTTP responses are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrintMode {
    #[default]
    Json,
    Output,
}

impl PrintMode {
    pub const ALLOWED: [&'static str; 2] = ["output", "json"];

    pub fn as_str(&self) -> &'static str {
        match self {
            PrintMode::Json => "json",
            PrintMode::Output => "output",
        }
    }
}

impl fmt::Display for PrintMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrintMode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(PrintMode::Json),
            "output" => Ok(PrintMode::Output),
            other => Err(ClientError::InvalidInput(format!(
                "invalid print mode '{}' (allowed: {})",
                other,
                PrintMode::ALLOWED.join(", ")
            ))),
        }
    }
}

/// Client configuration: a free-form JSON object with typed accessors for
/// the recognized options. Unknown keys are kept so they survive a save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    values: Map<String, Value>,
}

fn defaults() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("server".into(), Value::from(DEFAULT_SERVER));
    map.insert("http_path".into(), Value::from(DEFAULT_HTTP_PATH));
    map.insert("ws_path".into(), Value::from(DEFAULT_WS_PATH));
    map.insert("history_limit".into(), Value::from(DEFAULT_HISTORY_LIMIT));
    map.insert("print_mode".into(), Value::from(PrintMode::Json.as_str()));
    map.insert("timeout_secs".into(), Value::from(DEFAULT_TIMEOUT_SECS));
    map
}

impl Default for Config {
    fn default() -> Self {
        Self { values: defaults() }
    }
}

impl Config {
    /// Wrap a raw document, filling in any missing defaults.
    pub fn from_map(values: Map<String, Value>) -> Self {
        let mut config = Self { values };
        config.merge_defaults();
        config
    }

    /// Insert every default key the document lacks. Present keys are never
    /// touched. Returns the number of keys added.
    pub fn merge_defaults(&mut self) -> usize {
        let mut added = 0;
        for (key, value) in defaults() {
            if !self.values.contains_key(&key) {
                self.values.insert(key, value);
                added += 1;
            }
        }
        added
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Set an option from its textual form. Known numeric and enum options
    /// are validated; everything else is stored as a string.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<()> {
        let value = match key {
            "history_limit" | "timeout_secs" => match raw.trim().parse::<u64>() {
                Ok(n) if n > 0 => Value::from(n),
                _ => {
                    return Err(ClientError::InvalidInput(format!(
                        "{} must be a positive integer, got '{}'",
                        key, raw
                    )))
                }
            },
            "print_mode" => Value::from(raw.parse::<PrintMode>()?.as_str()),
            _ => Value::from(raw),
        };
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    pub fn server(&self) -> &str {
        self.str_or("server", DEFAULT_SERVER)
    }

    pub fn http_path(&self) -> &str {
        self.str_or("http_path", DEFAULT_HTTP_PATH)
    }

    pub fn ws_path(&self) -> &str {
        self.str_or("ws_path", DEFAULT_WS_PATH)
    }

    pub fn history_limit(&self) -> usize {
        self.positive_int("history_limit")
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
    }

    pub fn print_mode(&self) -> PrintMode {
        self.values
            .get("print_mode")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(
            self.positive_int("timeout_secs")
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        )
    }

    /// Whole document, pretty-printed.
    pub fn to_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.values)?)
    }

    fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
    }

    // Accepts both `500` and `"500"`; a `config set` from an older client
    // may have stored the string form.
    fn positive_int(&self, key: &str) -> Option<u64> {
        let n = match self.values.get(key)? {
            Value::Number(n) => n.as_u64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        (n > 0).then_some(n)
    }
}

/// Pick the storage directory: explicit override, then `./.goputn` if it
/// exists, then `~/.goputn`.
pub fn resolve_storage_dir() -> PathBuf {
    resolve_storage_dir_from(
        std::env::var_os(STORAGE_ENV).map(PathBuf::from),
        std::env::current_dir().ok(),
        dirs::home_dir(),
    )
}

pub fn resolve_storage_dir_from(
    env_override: Option<PathBuf>,
    cwd: Option<PathBuf>,
    home: Option<PathBuf>,
) -> PathBuf {
    if let Some(dir) = env_override.filter(|p| !p.as_os_str().is_empty()) {
        return dir;
    }
    let local = cwd
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STORAGE_DIR_NAME);
    if local.is_dir() {
        return local;
    }
    match home {
        Some(home) => home.join(STORAGE_DIR_NAME),
        None => local,
    }
}

/// Handle on the storage directory holding `config.json` and `history.log`.
#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn resolve() -> Self {
        Self::new(resolve_storage_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    /// Create the directory, a defaults-seeded config and an empty history
    /// file. Existing files are left alone.
    pub fn ensure(&self) -> Result<()> {
        let _guard = ENSURE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        fs::create_dir_all(&self.dir)?;

        // Seed through `save` so a crash mid-write never leaves an empty
        // config.json behind.
        if !self.config_path().exists() {
            self.save(&Config::default())?;
            info!(path = %self.config_path().display(), "created default config");
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.history_path())
        {
            Ok(_) => debug!(path = %self.history_path().display(), "created history log"),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Load the config, filling absent keys from defaults. A missing file
    /// loads as defaults; a malformed one is `ConfigCorrupt`.
    pub fn load(&self) -> Result<Config> {
        let path = self.config_path();
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => return Err(e.into()),
        };
        let value: Value =
            serde_json::from_str(&content).map_err(|e| ClientError::ConfigCorrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        match value {
            Value::Object(map) => {
                let config = Config::from_map(map);
                debug!(path = %path.display(), "configuration loaded");
                Ok(config)
            }
            other => Err(ClientError::ConfigCorrupt {
                path,
                reason: format!("expected a JSON object, found {}", json_kind(&other)),
            }),
        }
    }

    /// Atomically replace the config file with `config`.
    pub fn save(&self, config: &Config) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let data = config.to_pretty()?;
        let tmp = self.dir.join(format!("{}.tmp", CONFIG_FILE));
        fs::write(&tmp, format!("{}\n", data))?;
        fs::rename(&tmp, self.config_path())?;
        debug!(path = %self.config_path().display(), "configuration saved");
        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
