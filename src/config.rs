use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SCROLLBACK_LINES: usize = 2_000;
pub const DEFAULT_MAX_EVENTS_PER_PUMP: usize = 200;
pub const DEFAULT_TERMINAL_ROWS: u16 = 50;
pub const DEFAULT_TERMINAL_COLS: u16 = 240;
pub const DEFAULT_TERMINAL_SCROLLBACK: usize = 8_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GantryConfig {
    pub stop_timeout: Duration,
    pub scrollback_lines: usize,
    pub max_events_per_pump: usize,
    pub terminal_rows: u16,
    pub terminal_cols: u16,
    pub terminal_scrollback: usize,
}

impl Default for GantryConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
            scrollback_lines: DEFAULT_SCROLLBACK_LINES,
            max_events_per_pump: DEFAULT_MAX_EVENTS_PER_PUMP,
            terminal_rows: DEFAULT_TERMINAL_ROWS,
            terminal_cols: DEFAULT_TERMINAL_COLS,
            terminal_scrollback: DEFAULT_TERMINAL_SCROLLBACK,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        error: std::io::Error,
    },
    Parse(toml::de::Error),
    InvalidValue {
        field: &'static str,
        detail: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, error } => {
                write!(f, "failed to read config `{}`: {error}", path.display())
            }
            ConfigError::Parse(error) => write!(f, "failed to parse config: {error}"),
            ConfigError::InvalidValue { field, detail } => {
                write!(f, "invalid config value for `{field}`: {detail}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigTable {
    #[serde(default)]
    stop_timeout_ms: Option<u64>,
    #[serde(default)]
    scrollback_lines: Option<usize>,
    #[serde(default)]
    max_events_per_pump: Option<usize>,
    #[serde(default)]
    terminal_rows: Option<u16>,
    #[serde(default)]
    terminal_cols: Option<u16>,
    #[serde(default)]
    terminal_scrollback: Option<usize>,
}

impl GantryConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let table = toml::from_str::<ConfigTable>(text).map_err(ConfigError::Parse)?;
        let mut config = Self::default();
        if let Some(value) = table.stop_timeout_ms {
            config.stop_timeout = Duration::from_millis(value);
        }
        if let Some(value) = table.scrollback_lines {
            config.scrollback_lines = value;
        }
        if let Some(value) = table.max_events_per_pump {
            config.max_events_per_pump = value;
        }
        if let Some(value) = table.terminal_rows {
            config.terminal_rows = value;
        }
        if let Some(value) = table.terminal_cols {
            config.terminal_cols = value;
        }
        if let Some(value) = table.terminal_scrollback {
            config.terminal_scrollback = value;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.to_path_buf(),
            error,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    pub(crate) fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = parse_env::<u64, F>(&lookup, "GANTRY_STOP_TIMEOUT_MS") {
            self.stop_timeout = Duration::from_millis(value);
        }
        if let Some(value) =
            parse_env::<usize, F>(&lookup, "GANTRY_SCROLLBACK_LINES").filter(|value| *value > 0)
        {
            self.scrollback_lines = value;
        }
        if let Some(value) =
            parse_env::<usize, F>(&lookup, "GANTRY_MAX_EVENTS_PER_PUMP").filter(|value| *value > 0)
        {
            self.max_events_per_pump = value;
        }
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.scrollback_lines == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scrollback_lines",
                detail: "must be greater than zero".to_owned(),
            });
        }
        if self.max_events_per_pump == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_events_per_pump",
                detail: "must be greater than zero".to_owned(),
            });
        }
        if self.terminal_rows == 0 || self.terminal_cols == 0 {
            return Err(ConfigError::InvalidValue {
                field: "terminal_rows/terminal_cols",
                detail: "terminal dimensions must be greater than zero".to_owned(),
            });
        }
        Ok(())
    }
}

fn parse_env<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name).and_then(|value| value.trim().parse::<T>().ok())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
