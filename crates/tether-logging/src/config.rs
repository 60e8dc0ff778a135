//! What to log and where to put it
//!
//! A [`LogConfig`] is plain data: it can be built from one of the presets,
//! edited field by field, or read from JSON alongside the rest of a
//! device's settings.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level for every target not listed in `targets`; `RUST_LOG` wins
    pub default_level: String,
    pub console: ConsoleConfig,
    /// Rolling log files; off when `None`
    pub file: Option<FileConfig>,
    /// Shape of JSON lines, wherever they are written
    pub jsonl: JsonlConfig,
    /// Per-target levels, e.g. `tether_transport = "debug"`
    #[serde(default)]
    pub targets: BTreeMap<String, String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            console: ConsoleConfig::json(),
            file: None,
            jsonl: JsonlConfig::default(),
            targets: BTreeMap::new(),
        }
    }
}

impl LogConfig {
    /// Colored human output at debug, with the race engine at trace
    pub fn development() -> Self {
        Self {
            default_level: "debug".to_string(),
            console: ConsoleConfig::pretty(),
            ..Default::default()
        }
        .with_target("tether_transport", "trace")
    }

    /// Files under `log_dir`, nothing on the console
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            console: ConsoleConfig::off(),
            file: Some(FileConfig::in_dir(log_dir)),
            ..Default::default()
        }
    }

    /// Warnings only, uncolored
    pub fn testing() -> Self {
        Self {
            default_level: "warn".to_string(),
            console: ConsoleConfig::json(),
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.targets.insert(target.into(), level.into());
        self
    }

    /// Filter directives: the default level followed by per-target levels
    pub fn directives(&self) -> String {
        std::iter::once(self.default_level.clone())
            .chain(
                self.targets
                    .iter()
                    .map(|(target, level)| format!("{target}={level}")),
            )
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Console sink. `pretty` switches from JSON lines to the human format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub pretty: bool,
    pub ansi: bool,
}

impl ConsoleConfig {
    pub fn pretty() -> Self {
        Self {
            enabled: true,
            pretty: true,
            ansi: true,
        }
    }

    pub fn json() -> Self {
        Self {
            enabled: true,
            pretty: false,
            ansi: false,
        }
    }

    pub fn off() -> Self {
        Self {
            enabled: false,
            ..Self::json()
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self::json()
    }
}

/// Rolling files named `<prefix>.<date>` under `directory`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub directory: PathBuf,
    pub prefix: String,
    pub rotation: RotationStrategy,
}

impl FileConfig {
    /// Daily `tether.*` files under `directory`
    pub fn in_dir(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            prefix: "tether".to_string(),
            rotation: RotationStrategy::Daily,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self::in_dir("./logs")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RotationStrategy {
    #[default]
    Daily,
    Hourly,
    /// One `<prefix>.log`, truncated when logging starts
    Never,
}

/// Which parts of an event end up in a JSON line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonlConfig {
    /// Event fields at the top level instead of under `fields`
    pub flatten_events: bool,
    /// The chain of enclosing spans, e.g. `start_race` inside `connect`
    pub include_spans: bool,
    pub include_location: bool,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            flatten_events: true,
            include_spans: true,
            include_location: true,
        }
    }
}
