//! Relay configuration – reads/writes `~/.keyslot/config.toml`.
//!
//! Missing fields take their defaults, then `KEYSLOT_*` environment
//! variables override the file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use keyslot_hal::SerialSettings;
use keyslot_middleware::{PublisherSettings, validate_topic};
use keyslot_runtime::RelayOptions;
use keyslot_types::KeyslotError;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Persisted relay configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    /// Shared bearer secret.  Empty rejects every authenticated request.
    pub api_token: Zeroizing<String>,

    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_topic: String,
    pub mqtt_client_id: String,
    /// MQTT keep-alive announced to the broker; pings go out at half this.
    pub mqtt_keep_alive_secs: u16,

    pub reconnect_delay_secs: u64,
    pub connect_timeout_secs: u64,
    pub send_timeout_secs: u64,

    pub forward_color_events: bool,
    pub forward_reward_events: bool,

    /// Serial device for the legacy color output, e.g. `/dev/ttyUSB0`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_port: Option<String>,
    pub serial_baud: u32,
    /// Upper bound on one serial write.
    pub serial_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_host: "0.0.0.0".to_string(),
            api_port: 5000,
            api_token: Zeroizing::new(String::new()),
            mqtt_broker: "broker.hivemq.com".to_string(),
            mqtt_port: 1883,
            mqtt_topic: "/cc/escape/key_slot/key_colour".to_string(),
            mqtt_client_id: "keyslot-relay".to_string(),
            mqtt_keep_alive_secs: 60,
            reconnect_delay_secs: 5,
            connect_timeout_secs: 5,
            send_timeout_secs: 2,
            forward_color_events: true,
            forward_reward_events: true,
            serial_port: None,
            serial_baud: 115_200,
            serial_timeout_secs: 2,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_host", &self.api_host)
            .field("api_port", &self.api_port)
            .field(
                "api_token",
                if self.api_token.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("mqtt_broker", &self.mqtt_broker)
            .field("mqtt_port", &self.mqtt_port)
            .field("mqtt_topic", &self.mqtt_topic)
            .field("mqtt_client_id", &self.mqtt_client_id)
            .field("mqtt_keep_alive_secs", &self.mqtt_keep_alive_secs)
            .field("reconnect_delay_secs", &self.reconnect_delay_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("send_timeout_secs", &self.send_timeout_secs)
            .field("forward_color_events", &self.forward_color_events)
            .field("forward_reward_events", &self.forward_reward_events)
            .field("serial_port", &self.serial_port)
            .field("serial_baud", &self.serial_baud)
            .field("serial_timeout_secs", &self.serial_timeout_secs)
            .finish()
    }
}

impl Config {
    pub fn publisher_settings(&self) -> PublisherSettings {
        let keepalive_interval = match self.mqtt_keep_alive_secs {
            0 => None,
            secs => Some(Duration::from_secs(u64::from(secs / 2).max(1))),
        };
        PublisherSettings {
            topic: self.mqtt_topic.clone(),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            send_timeout: Duration::from_secs(self.send_timeout_secs),
            keepalive_interval,
        }
    }

    /// Serial line settings, when a port is configured.
    pub fn serial_settings(&self) -> Option<SerialSettings> {
        let path = self.serial_port.as_deref()?;
        Some(
            SerialSettings::new(path, self.serial_baud)
                .with_timeout(Duration::from_secs(self.serial_timeout_secs)),
        )
    }

    /// Reject settings the relay could never run with.
    ///
    /// # Errors
    ///
    /// [`KeyslotError::Config`] naming the offending field.
    pub fn validate(&self) -> Result<(), KeyslotError> {
        validate_topic(&self.mqtt_topic)
            .map_err(|e| KeyslotError::Config(format!("mqtt_topic: {e}")))?;
        if self.serial_port.is_some() && self.serial_baud == 0 {
            return Err(KeyslotError::Config("serial_baud must be positive".to_string()));
        }
        Ok(())
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            forward_color_events: self.forward_color_events,
            forward_reward_events: self.forward_reward_events,
        }
    }
}

/// `$KEYSLOT_CONFIG`, or `~/.keyslot/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(explicit) = std::env::var("KEYSLOT_CONFIG") {
        return PathBuf::from(explicit);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".keyslot").join("config.toml")
}

/// Load the config, falling back to defaults when no file exists.
/// Environment overrides apply in both cases, then the result is validated.
pub fn load() -> Result<Config, KeyslotError> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Parse the file at `path`.  `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, KeyslotError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        KeyslotError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| KeyslotError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `KEYSLOT_*` environment variables to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `KEYSLOT_API_TOKEN` | `api_token` |
/// | `KEYSLOT_API_HOST` | `api_host` |
/// | `KEYSLOT_API_PORT` | `api_port` |
/// | `KEYSLOT_MQTT_BROKER` | `mqtt_broker` |
/// | `KEYSLOT_MQTT_PORT` | `mqtt_port` |
/// | `KEYSLOT_MQTT_TOPIC` | `mqtt_topic` |
/// | `KEYSLOT_SERIAL_PORT` | `serial_port` |
///
/// Unparsable port numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("KEYSLOT_API_TOKEN") {
        cfg.api_token = Zeroizing::new(v);
    }
    if let Some(v) = lookup("KEYSLOT_API_HOST") {
        cfg.api_host = v;
    }
    if let Some(port) = lookup("KEYSLOT_API_PORT").and_then(|v| v.parse().ok()) {
        cfg.api_port = port;
    }
    if let Some(v) = lookup("KEYSLOT_MQTT_BROKER") {
        cfg.mqtt_broker = v;
    }
    if let Some(port) = lookup("KEYSLOT_MQTT_PORT").and_then(|v| v.parse().ok()) {
        cfg.mqtt_port = port;
    }
    if let Some(v) = lookup("KEYSLOT_MQTT_TOPIC") {
        cfg.mqtt_topic = v;
    }
    if let Some(v) = lookup("KEYSLOT_SERIAL_PORT") {
        cfg.serial_port = Some(v).filter(|p| !p.is_empty());
    }
}

/// Write `cfg` to `path` with owner-only permissions.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), KeyslotError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| KeyslotError::Config(format!("failed to create config directory: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                KeyslotError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| KeyslotError::Config(format!("failed to serialize config: {e}")))?;
    let write_err = |e: std::io::Error| {
        KeyslotError::Config(format!("failed to write {}: {e}", path.display()))
    };
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
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}
