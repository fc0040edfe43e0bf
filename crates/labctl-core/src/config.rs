//! Settings store and typed configuration.
//!
//! The settings file is TOML laid out as named sections of key/value pairs.
//! [`SettingsStore`] gives untyped, read-on-every-call access to a section;
//! [`LabConfig`] validates the whole file against a fixed schema and
//! deserializes it into typed sections, reporting every missing key at once.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::experiment::Role;
use crate::node;

/// Settings file looked up when the CLI is not given `--config`.
pub const DEFAULT_SETTINGS_FILE: &str = "settings.toml";

/// Public IoT-LAB REST endpoint.
pub const DEFAULT_API_URL: &str = "https://www.iot-lab.info/api/";

/// Sections every settings file must carry, with their required keys.
const REQUIRED_SECTIONS: &[(&str, &[&str])] = &[
    ("iot-lab-account", &["user", "password"]),
    (
        "experiment",
        &["extra_time", "step_time", "openvisualizer_time"],
    ),
    ("starting_port", &["port"]),
    ("build", &["build_command_node", "build_command_sink"]),
    ("openwsn-fw", &["fw_path", "fw_firmware_path"]),
    ("openwsn-sw", &["sw_openvisualizer_path", "sw_log_path"]),
];

/// Sections that may be omitted entirely.
const OPTIONAL_SECTIONS: &[&str] = &["api", "workspace"];

/// Keys every per-site section must carry. Corridor keys are checked on demand.
const SITE_KEYS: &[&str] = &["listening_port", "excluded_nodes"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("section [{0}] not found in settings")]
    MissingSection(String),
    #[error("parameter {key} not found in [{section}]")]
    MissingParameter { section: String, key: String },
    #[error("missing configuration keys: {}", .0.join(", "))]
    MissingKeys(Vec<String>),
    #[error("invalid value for {section}.{key}: {reason}")]
    Invalid {
        section: String,
        key: String,
        reason: String,
    },
    #[error("settings do not match the expected layout: {0}")]
    Schema(#[source] toml::de::Error),
}

// ---------------------------------------------------------------------------
// Untyped store
// ---------------------------------------------------------------------------

/// Read-through access to the settings file. Nothing is cached: every call
/// re-reads the file from disk.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and parse the whole file.
    pub fn load(&self) -> Result<toml::Table, ConfigError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        content
            .parse::<toml::Table>()
            .map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    /// All options under `section`, rendered as strings.
    pub fn read(&self, section: &str) -> Result<BTreeMap<String, String>, ConfigError> {
        let table = self.load()?;
        section_values(&table, section)
    }

    /// A single option. Fails with [`ConfigError::MissingParameter`] when absent.
    pub fn get(&self, section: &str, key: &str) -> Result<String, ConfigError> {
        let mut values = self.read(section)?;
        values
            .remove(key)
            .ok_or_else(|| ConfigError::MissingParameter {
                section: section.to_string(),
                key: key.to_string(),
            })
    }
}

fn section_values(
    table: &toml::Table,
    section: &str,
) -> Result<BTreeMap<String, String>, ConfigError> {
    let inner = table
        .get(section)
        .and_then(toml::Value::as_table)
        .ok_or_else(|| ConfigError::MissingSection(section.to_string()))?;

    Ok(inner
        .iter()
        .map(|(key, value)| (key.clone(), render_value(value)))
        .collect())
}

fn render_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Split a comma-separated settings value, dropping blank entries.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Typed configuration
// ---------------------------------------------------------------------------

/// The whole settings file, validated.
#[derive(Debug, Clone, Deserialize)]
pub struct LabConfig {
    #[serde(rename = "iot-lab-account")]
    pub account: AccountConfig,
    #[serde(default)]
    pub api: ApiConfig,
    pub experiment: ExperimentTiming,
    pub starting_port: StartingPort,
    pub build: BuildConfig,
    #[serde(rename = "openwsn-fw")]
    pub firmware: FirmwareSource,
    #[serde(rename = "openwsn-sw")]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    /// Every remaining section is a deployment site, keyed by site name.
    #[serde(flatten)]
    pub sites: BTreeMap<String, SiteConfig>,
}

#[derive(Clone, Deserialize)]
pub struct AccountConfig {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_url")]
    pub url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

/// Timing knobs. `extra_time` is in minutes, everything else in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentTiming {
    pub extra_time: u32,
    pub step_time: u64,
    pub openvisualizer_time: u64,
    /// Upper bound on waiting for a submitted reservation to start running.
    /// Unset means wait for as long as the scheduler takes.
    #[serde(default)]
    pub reservation_timeout: Option<u64>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

fn default_poll_interval() -> u64 {
    5
}

impl ExperimentTiming {
    pub fn step_delay(&self) -> Duration {
        Duration::from_secs(self.step_time)
    }

    pub fn monitor_delay(&self) -> Duration {
        Duration::from_secs(self.openvisualizer_time)
    }

    pub fn reservation_timeout(&self) -> Option<Duration> {
        self.reservation_timeout.map(Duration::from_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartingPort {
    pub port: u16,
}

/// Firmware build command templates. Each is rendered with `pan_id` and
/// `experiment` before running.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    pub build_command_node: String,
    pub build_command_sink: String,
}

impl BuildConfig {
    pub fn template_for(&self, role: Role) -> &str {
        match role {
            Role::Node => &self.build_command_node,
            Role::Sink => &self.build_command_sink,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FirmwareSource {
    /// Firmware source tree the build command runs in.
    pub fw_path: PathBuf,
    /// Image the build leaves behind.
    pub fw_firmware_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub sw_openvisualizer_path: PathBuf,
    pub sw_log_path: PathBuf,
    /// Web UI port of the monitor. When set, it is polled for readiness.
    #[serde(default)]
    pub web_port: Option<u16>,
}

/// Local paths used by the driver itself.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_tmux_helper")]
    pub tmux_helper: PathBuf,
    #[serde(default = "default_firmware_dir")]
    pub firmware_dir: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            tmux_helper: default_tmux_helper(),
            firmware_dir: default_firmware_dir(),
        }
    }
}

fn default_tmux_helper() -> PathBuf {
    PathBuf::from("scripts/open_tmux_sessions.sh")
}
fn default_firmware_dir() -> PathBuf {
    PathBuf::from("firmwares")
}

/// A deployment site: corridor ID ranges plus tunnel and exclusion settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    pub listening_port: u16,
    pub excluded_nodes: String,
    #[serde(default)]
    pub fixed_nodes: Option<String>,
    /// Corridor name to bracketed ID ranges, e.g. `a = "[1-10][20-30]"`.
    #[serde(flatten)]
    pub corridors: BTreeMap<String, String>,
}

impl SiteConfig {
    pub fn excluded(&self) -> Vec<String> {
        split_list(&self.excluded_nodes)
    }

    pub fn fixed(&self) -> Vec<String> {
        self.fixed_nodes.as_deref().map(split_list).unwrap_or_default()
    }

    /// Expand the corridor's ranges into individual node IDs.
    pub fn corridor_ids(&self, site: &str, corridor: &str) -> Result<Vec<u32>, ConfigError> {
        let raw = self
            .corridors
            .get(corridor)
            .ok_or_else(|| ConfigError::MissingParameter {
                section: site.to_string(),
                key: corridor.to_string(),
            })?;
        node::expand_id_ranges(raw).map_err(|e| ConfigError::Invalid {
            section: site.to_string(),
            key: corridor.to_string(),
            reason: e.to_string(),
        })
    }
}

impl LabConfig {
    /// Load, validate, and deserialize a settings file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let table = SettingsStore::new(path).load()?;
        Self::from_table(table)
    }

    /// Parse settings from a string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let table = s
            .parse::<toml::Table>()
            .map_err(|source| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        Self::from_table(table)
    }

    fn from_table(table: toml::Table) -> Result<Self, ConfigError> {
        let missing = missing_keys(&table);
        if !missing.is_empty() {
            return Err(ConfigError::MissingKeys(missing));
        }
        toml::Value::Table(table)
            .try_into()
            .map_err(ConfigError::Schema)
    }

    pub fn site(&self, site: &str) -> Result<&SiteConfig, ConfigError> {
        self.sites
            .get(site)
            .ok_or_else(|| ConfigError::MissingSection(site.to_string()))
    }

    /// Check everything a run against `site`/`corridor` needs, up front.
    pub fn require_site(&self, site: &str, corridor: &str) -> Result<&SiteConfig, ConfigError> {
        let cfg = self.site(site)?;
        if !cfg.corridors.contains_key(corridor) {
            return Err(ConfigError::MissingKeys(vec![format!("{site}.{corridor}")]));
        }
        cfg.corridor_ids(site, corridor)?;
        node::parse_node_ids(&cfg.excluded()).map_err(|e| ConfigError::Invalid {
            section: site.to_string(),
            key: "excluded_nodes".to_string(),
            reason: e.to_string(),
        })?;
        Ok(cfg)
    }
}

/// Every required `section.key` absent from `table`.
fn missing_keys(table: &toml::Table) -> Vec<String> {
    let mut missing = Vec::new();

    for (section, keys) in REQUIRED_SECTIONS {
        let inner = table.get(*section).and_then(toml::Value::as_table);
        for key in *keys {
            if !inner.is_some_and(|t| t.contains_key(*key)) {
                missing.push(format!("{section}.{key}"));
            }
        }
    }

    for (name, value) in table {
        let known = REQUIRED_SECTIONS.iter().any(|(s, _)| *s == name.as_str())
            || OPTIONAL_SECTIONS.contains(&name.as_str());
        if known {
            continue;
        }
        if let Some(inner) = value.as_table() {
            for key in SITE_KEYS {
                if !inner.contains_key(*key) {
                    missing.push(format!("{name}.{key}"));
                }
            }
        }
    }

    missing
}
