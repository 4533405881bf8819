//! Shell configuration – reads/writes `~/.zwbridge/config.toml`.
//!
//! ```toml
//! mqtt_url = "tcp://broker.lan:1883"
//! topic_prefix = "gohome"
//! device_path = "/dev/ttyACM0"
//!
//! [[nodes]]
//! id = 5
//! capabilities = ["COMMAND_CLASS_DOOR_LOCK", "COMMAND_CLASS_ALARM"]
//! product = "Front door lock"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;
use zwbridge_middleware::MqttSettings;
use zwbridge_middleware::mqtt_adapter::{parse_mqtt_url, qos_from_level};
#[cfg(test)]
use zwbridge_middleware::mqtt_adapter::QoS;
use zwbridge_runtime::BridgeSettings;
use zwbridge_types::BridgeError;

/// One node of the simulated device bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: u32,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
}

/// Broker password.  Wiped from memory on drop and never printed.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Password {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Drop for Password {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Persisted bridge configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Broker URL, `tcp://host[:port]`.
    #[serde(default = "default_mqtt_url")]
    pub mqtt_url: String,

    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Backing-protocol tag matched against device `source` entries.
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Radio controller path handed to the device bus.
    ///
    /// Reserved for a real controller binding. The simulated bus only logs it.
    #[serde(default = "default_device_path")]
    pub device_path: String,

    #[serde(default)]
    pub qos: u8,

    /// MQTT client id; a random `zwbridge-<uuid>` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Password::is_empty")]
    pub password: Password,

    #[serde(default = "default_motion_off_secs")]
    pub motion_off_secs: u64,

    #[serde(default = "default_repeat_secs")]
    pub repeat_secs: u64,

    #[serde(default = "default_max_repeats")]
    pub max_repeats: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeConfig>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("mqtt_url", &self.mqtt_url)
            .field("topic_prefix", &self.topic_prefix)
            .field("protocol", &self.protocol)
            .field("device_path", &self.device_path)
            .field("qos", &self.qos)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("motion_off_secs", &self.motion_off_secs)
            .field("repeat_secs", &self.repeat_secs)
            .field("max_repeats", &self.max_repeats)
            .field("nodes", &self.nodes)
            .finish()
    }
}

fn default_mqtt_url() -> String {
    "tcp://localhost:1883".to_string()
}
fn default_topic_prefix() -> String {
    "gohome".to_string()
}
fn default_protocol() -> String {
    "zwave".to_string()
}
fn default_device_path() -> String {
    "/dev/ttyACM0".to_string()
}
fn default_motion_off_secs() -> u64 {
    60
}
fn default_repeat_secs() -> u64 {
    5
}
fn default_max_repeats() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt_url: default_mqtt_url(),
            topic_prefix: default_topic_prefix(),
            protocol: default_protocol(),
            device_path: default_device_path(),
            qos: 0,
            client_id: None,
            username: None,
            password: Password::default(),
            motion_off_secs: default_motion_off_secs(),
            repeat_secs: default_repeat_secs(),
            max_repeats: default_max_repeats(),
            nodes: Vec::new(),
        }
    }
}

impl Config {
    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            motion_off: Duration::from_secs(self.motion_off_secs),
            repeat_delay: Duration::from_secs(self.repeat_secs),
            max_repeats: self.max_repeats,
        }
    }

    /// Broker connection settings.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] for a malformed `mqtt_url` or an
    /// out-of-range `qos`.
    pub fn mqtt_settings(&self) -> Result<MqttSettings, BridgeError> {
        let client_id = self
            .client_id
            .clone()
            .unwrap_or_else(|| format!("zwbridge-{}", uuid::Uuid::new_v4()));
        let mut settings = MqttSettings::new(&self.mqtt_url, client_id, self.topic_prefix.clone())?;
        settings.qos = qos_from_level(self.qos)?;
        settings.username = self.username.clone();
        if !self.password.is_empty() {
            settings.password = Some(self.password.expose().to_string());
        }
        Ok(settings)
    }
}

/// Return the path to `~/.zwbridge/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".zwbridge").join("config.toml")
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        BridgeError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("failed to parse config: {e}")))?;
    Ok(Some(cfg))
}

/// Load `path`, fall back to defaults when it is missing, then apply the
/// environment overrides.
pub fn load_or_default(path: &Path) -> Result<Config, BridgeError> {
    let mut cfg = load_from(path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Apply environment variable overrides to `cfg`.  Invalid values are
/// ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `GOHOME_MQTT` | `mqtt_url` |
/// | `ZWBRIDGE_TOPIC_PREFIX` | `topic_prefix` |
/// | `ZWBRIDGE_DEVICE` | `device_path` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("GOHOME_MQTT")
        && parse_mqtt_url(&v).is_ok()
    {
        cfg.mqtt_url = v;
    }
    if let Ok(v) = std::env::var("ZWBRIDGE_TOPIC_PREFIX")
        && !v.is_empty()
    {
        cfg.topic_prefix = v;
    }
    if let Ok(v) = std::env::var("ZWBRIDGE_DEVICE")
        && !v.is_empty()
    {
        cfg.device_path = v;
    }
}

/// Write `cfg` to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), BridgeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| BridgeError::Config(format!("failed to create config directory: {e}")))?;
        // Owner only (rwx------); the file may hold the broker password.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                BridgeError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| BridgeError::Config(format!("failed to serialize config: {e}")))?;
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
            .map_err(|e| {
                BridgeError::Config(format!("failed to write config at {}: {e}", path.display()))
            })?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| {
        BridgeError::Config(format!("failed to write config at {}: {e}", path.display()))
    })?;
    Ok(())
}
