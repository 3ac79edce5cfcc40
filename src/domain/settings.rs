use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            rotation: default_rotation(),
            ansi_colors: default_true(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "glowlink".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // GATT addressing
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,
    #[serde(default = "default_command_uuid")]
    pub ble_command_char_uuid: String,
    #[serde(default = "default_clock_uuid")]
    pub ble_clock_char_uuid: String,
    #[serde(default = "default_request_uuid")]
    pub ble_request_char_uuid: String,

    /// Largest single transport write until the link negotiates otherwise.
    #[serde(default = "default_mtu")]
    pub mtu: usize,

    // OTA pacing: the device needs settle time between protocol phases.
    #[serde(default = "default_ota_begin_delay_ms")]
    pub ota_begin_delay_ms: u64,
    #[serde(default = "default_ota_write_delay_ms")]
    pub ota_write_delay_ms: u64,
    #[serde(default = "default_ota_end_delay_ms")]
    pub ota_end_delay_ms: u64,

    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ble_service_uuid: default_service_uuid(),
            ble_command_char_uuid: default_command_uuid(),
            ble_clock_char_uuid: default_clock_uuid(),
            ble_request_char_uuid: default_request_uuid(),
            mtu: default_mtu(),
            ota_begin_delay_ms: default_ota_begin_delay_ms(),
            ota_write_delay_ms: default_ota_write_delay_ms(),
            ota_end_delay_ms: default_ota_end_delay_ms(),
            log_settings: LogSettings::default(),
        }
    }
}

fn default_service_uuid() -> String {
    crate::infrastructure::bluetooth::protocol::SERVICE_UUID.to_string()
}
fn default_command_uuid() -> String {
    crate::infrastructure::bluetooth::protocol::COMMAND_CHAR_UUID.to_string()
}
fn default_clock_uuid() -> String {
    crate::infrastructure::bluetooth::protocol::CLOCK_CHAR_UUID.to_string()
}
fn default_request_uuid() -> String {
    crate::infrastructure::bluetooth::protocol::REQUEST_CHAR_UUID.to_string()
}
fn default_mtu() -> usize {
    crate::infrastructure::bluetooth::protocol::DEFAULT_MTU
}
fn default_ota_begin_delay_ms() -> u64 {
    100
}
fn default_ota_write_delay_ms() -> u64 {
    10_000
}
fn default_ota_end_delay_ms() -> u64 {
    100
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::settings_path()?;
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();

        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("Glowlink");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
