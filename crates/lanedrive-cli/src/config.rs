//! Console configuration – reads/writes `~/.lanedrive/config.toml`.

use lanedrive_middleware::SessionConfig;
use lanedrive_runtime::DEFAULT_LOW_BATTERY_PERCENT;
use lanedrive_types::{BridgeError, GatewayEndpoint, SubscriptionSpec, default_subscriptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persisted operator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Gateway WebSocket URI (`ws://` or `wss://`).
    #[serde(default = "default_gateway_uri")]
    pub gateway_uri: String,

    /// Delay between a connection failure and the next attempt.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Battery percentage at or below which driving is inhibited.
    #[serde(default = "default_battery_low_percent")]
    pub battery_low_percent: u8,

    /// Topics opened on every connect. Must stay the last field: TOML emits
    /// it as an array of tables.
    #[serde(default = "default_subscriptions")]
    pub subscriptions: Vec<SubscriptionSpec>,
}

fn default_gateway_uri() -> String {
    "ws://192.168.0.3:9090".to_string()
}
fn default_retry_delay_ms() -> u64 {
    5000
}
fn default_battery_low_percent() -> u8 {
    DEFAULT_LOW_BATTERY_PERCENT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway_uri: default_gateway_uri(),
            retry_delay_ms: default_retry_delay_ms(),
            battery_low_percent: default_battery_low_percent(),
            subscriptions: default_subscriptions(),
        }
    }
}

impl Config {
    /// Validate the URI and build the middleware's session config.
    pub fn session_config(&self) -> Result<SessionConfig, BridgeError> {
        let endpoint = GatewayEndpoint::parse(&self.gateway_uri)?;
        Ok(SessionConfig::new(endpoint)
            .with_retry_delay(Duration::from_millis(self.retry_delay_ms))
            .with_subscriptions(self.subscriptions.clone()))
    }
}

/// Return the path to `~/.lanedrive/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".lanedrive").join("config.toml")
}

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Read from the config file.
    File,
    /// No file existed; built by the first-run callback.
    FirstRun,
    /// The file could not be read or parsed; defaults are in use.
    Fallback(String),
}

/// Load `~/.lanedrive/config.toml`, calling `first_run` when it is absent
/// and falling back to defaults when it is unreadable.
///
/// The `LANEDRIVE_*` overrides apply whichever way the config was obtained.
pub fn load_or_init(first_run: impl FnOnce() -> Config) -> (Config, Origin) {
    load_or_init_from(&config_path(), first_run)
}

pub(crate) fn load_or_init_from(
    path: &Path,
    first_run: impl FnOnce() -> Config,
) -> (Config, Origin) {
    let (mut cfg, origin) = match load_from(path) {
        Ok(Some(cfg)) => return (cfg, Origin::File),
        Ok(None) => (first_run(), Origin::FirstRun),
        Err(e) => (Config::default(), Origin::Fallback(e)),
    };
    apply_env_overrides(&mut cfg);
    (cfg, origin)
}

/// Load the config at `path` with env overrides applied.  Returns `None` if
/// the file does not exist.

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `LANEDRIVE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `LANEDRIVE_GATEWAY_URI` | `gateway_uri` |
/// | `LANEDRIVE_RETRY_DELAY_MS` | `retry_delay_ms` |
/// | `LANEDRIVE_BATTERY_LOW_PERCENT` | `battery_low_percent` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("LANEDRIVE_GATEWAY_URI")
        && GatewayEndpoint::parse(v.as_str()).is_ok()
    {
        cfg.gateway_uri = v;
    }
    if let Ok(v) = std::env::var("LANEDRIVE_RETRY_DELAY_MS")
        && let Ok(ms) = v.trim().parse::<u64>()
    {
        cfg.retry_delay_ms = ms;
    }
    if let Ok(v) = std::env::var("LANEDRIVE_BATTERY_LOW_PERCENT")
        && let Ok(percent) = v.trim().parse::<u8>()
        && percent <= 100
    {
        cfg.battery_low_percent = percent;
    }
}

/// Save the config to disk, creating `~/.lanedrive/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
