//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Radio values here are boot defaults only: valid values in the persisted
//! settings store take precedence.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{LinkError, Result};
use crate::frame::payload::SensorSnapshot;
use crate::settings::{
    RadioConfig, SignalBandwidth, CODING_RATE_MAX, CODING_RATE_MIN, SPREADING_FACTOR_MAX,
    SPREADING_FACTOR_MIN, TELEMETRY_PERIOD_MAX_MS, TELEMETRY_PERIOD_MIN_MS, TX_POWER_MAX, TX_POWER_MIN,
};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "BIODRY_CONFIG";

/// Config file used when neither an argument nor the env var is given
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub node: NodeConfig,
    pub radio: RadioDefaults,
    pub serial: SerialConfig,
    pub backend: BackendConfig,
    pub settings: SettingsConfig,
    pub sensors: SensorConfig,
    pub telemetry: TelemetryConfig,
    pub logging: LoggingConfig,
}

/// Which node this process runs
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Transmitter,
    Receiver,
    /// Both nodes in one process over a simulated radio link
    Simulate,
}

/// Node configuration
#[derive(Debug, Deserialize, Clone)]
pub struct NodeConfig {
    #[serde(default = "default_role")]
    pub role: NodeRole,
}

/// Boot-default radio parameters
#[derive(Debug, Deserialize, Clone)]
pub struct RadioDefaults {
    #[serde(default = "default_tx_power")]
    pub tx_power: i32,

    #[serde(default = "default_spreading_factor")]
    pub spreading_factor: i32,

    #[serde(default = "default_coding_rate")]
    pub coding_rate: i32,

    #[serde(default = "default_bandwidth_hz")]
    pub bandwidth_hz: f32,

    #[serde(default = "default_telemetry_period_ms")]
    pub telemetry_period_ms: u32,
}

/// Serial link to the radio modem
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    /// Empty means auto-detect
    #[serde(default)]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_tx_timeout_ms")]
    pub tx_timeout_ms: u64,
}

/// Classification backend (Receiver only)
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_backend_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_backend_timeout_ms")]
    pub timeout_ms: u64,
}

/// Persisted settings store
#[derive(Debug, Deserialize, Clone)]
pub struct SettingsConfig {
    #[serde(default = "default_settings_path")]
    pub path: String,
}

/// Readings reported by the fixed sensor source
#[derive(Debug, Deserialize, Clone)]
pub struct SensorConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_humidity")]
    pub humidity: f32,

    #[serde(default = "default_ph")]
    pub ph: f32,
}

/// Exchange journal
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,
}

/// Application log output
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Daily-rolling log file directory; empty logs to stdout only
    #[serde(default)]
    pub file_dir: String,
}

// Default value functions
fn default_role() -> NodeRole { NodeRole::Simulate }

fn default_tx_power() -> i32 { 17 }
fn default_spreading_factor() -> i32 { 7 }
fn default_coding_rate() -> i32 { 5 }
fn default_bandwidth_hz() -> f32 { 125e3 }
fn default_telemetry_period_ms() -> u32 { 5000 }

fn default_baud_rate() -> u32 { 115200 }
fn default_tx_timeout_ms() -> u64 { 1000 }

fn default_backend_endpoint() -> String { "http://biodrying-server.local:5000/biodrying_data".to_string() }
fn default_backend_timeout_ms() -> u64 { 5000 }

fn default_settings_path() -> String { "./data/settings.bin".to_string() }

fn default_temperature() -> f32 { 28.3 }
fn default_humidity() -> f32 { 55.0 }
fn default_ph() -> f32 { 6.5 }

fn default_telemetry_enabled() -> bool { true }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }

fn default_log_level() -> String { "info".to_string() }

fn invalid(message: impl std::fmt::Display) -> LinkError {
    LinkError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use biodry_link::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Pick the config file: explicit argument, then `BIODRY_CONFIG`, then the default path
    pub fn resolve_path(argument: Option<String>, env_value: Option<String>) -> PathBuf {
        argument
            .filter(|a| !a.is_empty())
            .or_else(|| env_value.filter(|v| !v.is_empty()))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Boot-default radio configuration
    ///
    /// Loading already rejects bandwidths outside the fixed table.
    pub fn radio_defaults(&self) -> RadioConfig {
        RadioConfig {
            tx_power: self.radio.tx_power,
            spreading_factor: self.radio.spreading_factor,
            coding_rate_denominator: self.radio.coding_rate,
            signal_bandwidth: SignalBandwidth::from_hz(self.radio.bandwidth_hz).unwrap_or(SignalBandwidth::DEFAULT),
            telemetry_period_ms: self.radio.telemetry_period_ms,
        }
    }

    /// Readings for the fixed sensor source
    pub fn sensor_reading(&self) -> SensorSnapshot {
        SensorSnapshot {
            humidity: self.sensors.humidity,
            temperature: self.sensors.temperature,
            ph: self.sensors.ph,
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        // Radio defaults
        if !(TX_POWER_MIN..=TX_POWER_MAX).contains(&self.radio.tx_power) {
            return Err(invalid(format!("tx_power must be between {} and {}", TX_POWER_MIN, TX_POWER_MAX)));
        }

        if !(SPREADING_FACTOR_MIN..=SPREADING_FACTOR_MAX).contains(&self.radio.spreading_factor) {
            return Err(invalid(format!(
                "spreading_factor must be between {} and {}",
                SPREADING_FACTOR_MIN, SPREADING_FACTOR_MAX
            )));
        }

        if !(CODING_RATE_MIN..=CODING_RATE_MAX).contains(&self.radio.coding_rate) {
            return Err(invalid(format!(
                "coding_rate must be between {} and {}",
                CODING_RATE_MIN, CODING_RATE_MAX
            )));
        }

        if SignalBandwidth::from_hz(self.radio.bandwidth_hz).is_none() {
            return Err(invalid(
                "bandwidth_hz must be one of: 7800, 10400, 15600, 20800, 31250, 41700, 62500, 125000, 250000, 500000",
            ));
        }

        if !(TELEMETRY_PERIOD_MIN_MS..=TELEMETRY_PERIOD_MAX_MS).contains(&self.radio.telemetry_period_ms) {
            return Err(invalid(format!(
                "telemetry_period_ms must be between {} and {}",
                TELEMETRY_PERIOD_MIN_MS, TELEMETRY_PERIOD_MAX_MS
            )));
        }

        // Serial
        if ![9600, 57600, 115200, 230400, 460800, 921600].contains(&self.serial.baud_rate) {
            return Err(invalid("baud_rate must be one of: 9600, 57600, 115200, 230400, 460800, 921600"));
        }

        if self.serial.tx_timeout_ms == 0 || self.serial.tx_timeout_ms > 10000 {
            return Err(invalid("tx_timeout_ms must be between 1 and 10000"));
        }

        // Backend
        if !(self.backend.endpoint.starts_with("http://") || self.backend.endpoint.starts_with("https://")) {
            return Err(invalid("backend endpoint must be an http:// or https:// URL"));
        }

        if self.backend.timeout_ms == 0 || self.backend.timeout_ms > 60000 {
            return Err(invalid("backend timeout_ms must be between 1 and 60000"));
        }

        // Settings store
        if self.settings.path.is_empty() {
            return Err(invalid("settings path cannot be empty"));
        }

        // Simulated sensors
        if !(0.0..=100.0).contains(&self.sensors.humidity) {
            return Err(invalid("humidity must be between 0 and 100"));
        }

        if !(0.0..=14.0).contains(&self.sensors.ph) {
            return Err(invalid("ph must be between 0 and 14"));
        }

        // Telemetry journal
        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        if self.logging.level.is_empty() {
            return Err(invalid("logging level cannot be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_valid_config() -> Config {
        Config {
            node: NodeConfig { role: default_role() },
            radio: RadioDefaults {
                tx_power: default_tx_power(),
                spreading_factor: default_spreading_factor(),
                coding_rate: default_coding_rate(),
                bandwidth_hz: default_bandwidth_hz(),
                telemetry_period_ms: default_telemetry_period_ms(),
            },
            serial: SerialConfig {
                port: String::new(),
                baud_rate: default_baud_rate(),
                tx_timeout_ms: default_tx_timeout_ms(),
            },
            backend: BackendConfig {
                endpoint: default_backend_endpoint(),
                timeout_ms: default_backend_timeout_ms(),
            },
            settings: SettingsConfig {
                path: default_settings_path(),
            },
            sensors: SensorConfig {
                temperature: default_temperature(),
                humidity: default_humidity(),
                ph: default_ph(),
            },
            telemetry: TelemetryConfig {
                enabled: default_telemetry_enabled(),
                log_dir: default_log_dir(),
                max_records_per_file: default_max_records_per_file(),
                max_files_to_keep: default_max_files_to_keep(),
            },
            logging: LoggingConfig {
                level: default_log_level(),
                file_dir: String::new(),
            },
        }
    }

    #[test]
    fn test_default_config() {
        let config = create_valid_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.radio_defaults(), RadioConfig::default());
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[node]
role = "receiver"

[radio]
spreading_factor = 9
bandwidth_hz = 250000.0

[serial]
port = "/dev/ttyUSB0"

[backend]

[settings]

[sensors]

[telemetry]
enabled = false

[logging]
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.node.role, NodeRole::Receiver);
        assert_eq!(config.radio_defaults().spreading_factor, 9);
        assert_eq!(config.radio_defaults().signal_bandwidth.index(), 8);
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert!(!config.telemetry.enabled);
    }

    #[test]
    fn test_missing_section_is_error() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[node]\nrole = \"transmitter\"\n").unwrap();
        temp_file.flush().unwrap();

        assert!(matches!(Config::load(temp_file.path()), Err(LinkError::Config(_))));
    }

    #[test]
    fn test_unknown_role_is_error() {
        let result: std::result::Result<NodeConfig, _> = toml::from_str("role = \"relay\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_tx_power_out_of_range() {
        let mut config = create_valid_config();
        config.radio.tx_power = 21;
        assert!(config.validate().is_err());
        config.radio.tx_power = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_spreading_factor_out_of_range() {
        let mut config = create_valid_config();
        config.radio.spreading_factor = 6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_coding_rate_out_of_range() {
        let mut config = create_valid_config();
        config.radio.coding_rate = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bandwidth_not_in_table() {
        let mut config = create_valid_config();
        config.radio.bandwidth_hz = 100e3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_bandwidths() {
        for &hz in &crate::settings::BANDWIDTHS_HZ {
            let mut config = create_valid_config();
            config.radio.bandwidth_hz = hz;
            assert!(config.validate().is_ok(), "Bandwidth {} should be valid", hz);
        }
    }

    #[test]
    fn test_telemetry_period_bounds() {
        let mut config = create_valid_config();
        config.radio.telemetry_period_ms = 99;
        assert!(config.validate().is_err());
        config.radio.telemetry_period_ms = 100;
        assert!(config.validate().is_ok());
        config.radio.telemetry_period_ms = 3_600_001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_baud_rate() {
        let mut config = create_valid_config();
        config.serial.baud_rate = 420000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tx_timeout_zero() {
        let mut config = create_valid_config();
        config.serial.tx_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_endpoint_must_be_http() {
        let mut config = create_valid_config();
        config.backend.endpoint = "biodrying-server.local:5000".to_string();
        assert!(config.validate().is_err());
        config.backend.endpoint = "https://example.org/biodrying_data".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_timeout_range() {
        let mut config = create_valid_config();
        config.backend.timeout_ms = 0;
        assert!(config.validate().is_err());
        config.backend.timeout_ms = 60001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_settings_path() {
        let mut config = create_valid_config();
        config.settings.path = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sensor_ranges() {
        let mut config = create_valid_config();
        config.sensors.ph = 15.0;
        assert!(config.validate().is_err());

        let mut config = create_valid_config();
        config.sensors.humidity = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_log_dir_when_enabled() {
        let mut config = create_valid_config();
        config.telemetry.enabled = true;
        config.telemetry.log_dir = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_log_dir_when_disabled() {
        let mut config = create_valid_config();
        config.telemetry.enabled = false;
        config.telemetry.log_dir = String::new();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_file_limits() {
        let mut config = create_valid_config();
        config.telemetry.max_records_per_file = 0;
        assert!(config.validate().is_err());

        let mut config = create_valid_config();
        config.telemetry.max_files_to_keep = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_path_order() {
        assert_eq!(
            Config::resolve_path(Some("a.toml".into()), Some("b.toml".into())),
            PathBuf::from("a.toml")
        );
        assert_eq!(Config::resolve_path(None, Some("b.toml".into())), PathBuf::from("b.toml"));
        assert_eq!(Config::resolve_path(None, Some(String::new())), PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(Config::resolve_path(None, None), PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_role(), NodeRole::Simulate);
        assert_eq!(default_tx_power(), 17);
        assert_eq!(default_spreading_factor(), 7);
        assert_eq!(default_coding_rate(), 5);
        assert_eq!(default_bandwidth_hz(), 125e3);
        assert_eq!(default_telemetry_period_ms(), 5000);
        assert_eq!(default_baud_rate(), 115200);
        assert_eq!(default_tx_timeout_ms(), 1000);
        assert_eq!(default_backend_endpoint(), "http://biodrying-server.local:5000/biodrying_data");
        assert_eq!(default_backend_timeout_ms(), 5000);
        assert_eq!(default_settings_path(), "./data/settings.bin");
        assert_eq!(default_telemetry_enabled(), true);
        assert_eq!(default_log_dir(), "./logs");
        assert_eq!(default_max_records_per_file(), 10000);
        assert_eq!(default_max_files_to_keep(), 10);
        assert_eq!(default_log_level(), "info");
    }

    #[test]
    fn test_shipped_default_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let config = Config::load(path).unwrap();
        assert_eq!(config.radio_defaults(), RadioConfig::default());
    }
}
