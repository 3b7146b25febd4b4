//! # config.rs – Centralized Parameter Store
//!
//! This module holds all static program parameters used throughout the system,
//! and the [`Settings`] struct that lets a JSON file override them at start-up.
//! Keeping configuration in one place makes tuning, experimentation, and testing easier.
//!
//! Every field in [`Settings`] defaults to the matching constant below, so a config file
//! only has to name the values it wants to change.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

//
// ──────────────────────────────────────────────────────────────
//   1. LINK SETTINGS
// ──────────────────────────────────────────────────────────────
//

/// Default candidate endpoint (serial-to-TCP bridge on the local machine)
pub static DEFAULT_ENDPOINT: &str = "127.0.0.1:7000";

/// How long the handshake waits for `PONG` after sending `PING`
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Upper bound for a single framed write to the car controller
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between liveness pings while a session is up
pub const PING_INTERVAL: Duration = Duration::from_secs(5);

/// Silence on the link for longer than this marks the session dead
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(15);

/// Wait after opening a stream before the handshake (the controller resets on open)
pub const OPEN_SETTLE_DELAY: Duration = Duration::from_millis(2000);

/// Reconnection attempts after a lost link before giving up
pub const RECONNECT_ATTEMPTS: u32 = 3;

/// Delay between reconnection attempts
pub const RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// How long `close` waits for the I/O task to stop before aborting it
pub const CLOSE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Size of the read buffer used by the receive loop
pub const READ_BUFFER: usize = 256;

/// Longest line accepted from the car controller before the buffer is discarded
pub const MAX_LINE_LEN: usize = 256;

/// Capacity of the control-loop -> I/O command channel
pub const LINK_CMD_CAPACITY: usize = 32;

/// Capacity of the I/O -> control-loop event channel
pub const LINK_EVENT_CAPACITY: usize = 300;

/// Capacity of the presentation -> control-loop input channel
pub const CONTROL_INPUT_CAPACITY: usize = 100;

//
// ──────────────────────────────────────────────────────────────
//   2. BUILDING & DISPATCH PARAMETERS
// ──────────────────────────────────────────────────────────────
//

/// Lowest served floor
pub const LOWEST_FLOOR: i32 = 1;

/// Highest served floor
pub const HIGHEST_FLOOR: i32 = 3;

/// Floor the car is initialized to by `INIT`
pub const BASE_FLOOR: i32 = 1;

/// Period of the control loop
pub const TICK_PERIOD: Duration = Duration::from_millis(10);

/// Door-open emulation between an arrival and the next dispatch
pub const SETTLE_DELAY: Duration = Duration::from_millis(1000);

/// How often the control loop asks the car for a full `STATUS`
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(2000);

//
// ──────────────────────────────────────────────────────────────
//   3. OCCUPANCY SENSOR
// ──────────────────────────────────────────────────────────────
//

/// Occupancy ratio at or above which the automatic emergency is asserted
pub const OCCUPANCY_THRESHOLD: f64 = 0.15;

/// Lowest threshold the gate accepts
pub const OCCUPANCY_THRESHOLD_MIN: f64 = 0.05;

/// Highest threshold the gate accepts
pub const OCCUPANCY_THRESHOLD_MAX: f64 = 0.50;

/// Duration between sensor samples
pub const SENSOR_POLL: Duration = Duration::from_millis(100);

//
// ──────────────────────────────────────────────────────────────
//   4. LOGGING CONFIGURATION
// ──────────────────────────────────────────────────────────────
//

/// Enable/disable printing of the status box
pub static PRINT_STATUS_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of errors
pub static PRINT_ERR_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of warnings
pub static PRINT_WARN_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of success messages
pub static PRINT_OK_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of general info
pub static PRINT_INFO_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable link and dispatch trace prints
pub static PRINT_ELSE_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Sets a print switch, ignoring a poisoned lock.
pub fn set_print(switch: &Lazy<Mutex<bool>>, on: bool) {
    match switch.lock() {
        Ok(mut flag) => *flag = on,
        Err(poisoned) => *poisoned.into_inner() = on,
    }
}

/// Reads a print switch. A poisoned lock counts as "on".
pub fn print_enabled(switch: &Lazy<Mutex<bool>>) -> bool {
    switch.lock().map(|flag| *flag).unwrap_or(true)
}

//
// ──────────────────────────────────────────────────────────────
//   5. RUNTIME SETTINGS
// ──────────────────────────────────────────────────────────────
//

/// Timing of the link to the car controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// See [HANDSHAKE_TIMEOUT]
    pub handshake_timeout_ms: u64,
    /// See [WRITE_TIMEOUT]
    pub write_timeout_ms: u64,
    /// See [PING_INTERVAL]
    pub ping_interval_ms: u64,
    /// See [HEARTBEAT_TIMEOUT]
    pub heartbeat_timeout_ms: u64,
    /// See [OPEN_SETTLE_DELAY]
    pub open_settle_ms: u64,
    /// See [RECONNECT_ATTEMPTS]
    pub reconnect_attempts: u32,
    /// See [RECONNECT_DELAY]
    pub reconnect_delay_ms: u64,
    /// See [CLOSE_TIMEOUT]
    pub close_timeout_ms: u64,
    /// Send `INIT` and reset the car model on every (re)connection
    pub init_on_connect: bool,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: HANDSHAKE_TIMEOUT.as_millis() as u64,
            write_timeout_ms: WRITE_TIMEOUT.as_millis() as u64,
            ping_interval_ms: PING_INTERVAL.as_millis() as u64,
            heartbeat_timeout_ms: HEARTBEAT_TIMEOUT.as_millis() as u64,
            open_settle_ms: OPEN_SETTLE_DELAY.as_millis() as u64,
            reconnect_attempts: RECONNECT_ATTEMPTS,
            reconnect_delay_ms: RECONNECT_DELAY.as_millis() as u64,
            close_timeout_ms: CLOSE_TIMEOUT.as_millis() as u64,
            init_on_connect: true,
        }
    }
}

impl LinkSettings {
    #[allow(missing_docs)]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
    #[allow(missing_docs)]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
    #[allow(missing_docs)]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
    #[allow(missing_docs)]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
    #[allow(missing_docs)]
    pub fn open_settle(&self) -> Duration {
        Duration::from_millis(self.open_settle_ms)
    }
    #[allow(missing_docs)]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
    #[allow(missing_docs)]
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// Building layout and dispatch timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// See [LOWEST_FLOOR]
    pub lowest_floor: i32,
    /// See [HIGHEST_FLOOR]
    pub highest_floor: i32,
    /// See [BASE_FLOOR]
    pub base_floor: i32,
    /// See [SETTLE_DELAY]
    pub settle_delay_ms: u64,
    /// See [STATUS_POLL_INTERVAL]
    pub status_poll_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            lowest_floor: LOWEST_FLOOR,
            highest_floor: HIGHEST_FLOOR,
            base_floor: BASE_FLOOR,
            settle_delay_ms: SETTLE_DELAY.as_millis() as u64,
            status_poll_ms: STATUS_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl DispatchSettings {
    #[allow(missing_docs)]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
    #[allow(missing_docs)]
    pub fn status_poll(&self) -> Duration {
        Duration::from_millis(self.status_poll_ms)
    }
}

/// Occupancy sensor tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// See [OCCUPANCY_THRESHOLD]
    pub threshold: f64,
    /// See [SENSOR_POLL]
    pub poll_ms: u64,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            threshold: OCCUPANCY_THRESHOLD,
            poll_ms: SENSOR_POLL.as_millis() as u64,
        }
    }
}

/// All runtime settings. Missing fields fall back to the constants above.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Candidate endpoints, tried in order on every (re)connection
    pub endpoints: Vec<String>,
    #[allow(missing_docs)]
    pub link: LinkSettings,
    #[allow(missing_docs)]
    pub dispatch: DispatchSettings,
    #[allow(missing_docs)]
    pub sensor: SensorSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoints: vec![DEFAULT_ENDPOINT.to_string()],
            link: LinkSettings::default(),
            dispatch: DispatchSettings::default(),
            sensor: SensorSettings::default(),
        }
    }
}

impl Settings {
    /// Reads settings from a JSON file and validates them.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks that the floor range and endpoint list make sense.
    pub fn validate(&self) -> anyhow::Result<()> {
        let d = &self.dispatch;
        if d.lowest_floor > d.highest_floor {
            bail!("lowest_floor {} is above highest_floor {}", d.lowest_floor, d.highest_floor);
        }
        if d.base_floor < d.lowest_floor || d.base_floor > d.highest_floor {
            bail!("base_floor {} is outside {}..={}", d.base_floor, d.lowest_floor, d.highest_floor);
        }
        if self.endpoints.is_empty() {
            bail!("no endpoints configured");
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_json(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let f = write_json(r#"{ "endpoints": ["10.0.0.7:4000"], "dispatch": { "highest_floor": 5 } }"#);
        let settings = Settings::load(f.path()).unwrap();

        assert_eq!(settings.endpoints, vec!["10.0.0.7:4000".to_string()]);
        assert_eq!(settings.dispatch.highest_floor, 5);
        assert_eq!(settings.dispatch.lowest_floor, LOWEST_FLOOR);
        assert_eq!(settings.link, LinkSettings::default());
        assert_eq!(settings.link.ping_interval(), PING_INTERVAL);
    }

    #[test]
    fn base_floor_outside_range_is_rejected() {
        let f = write_json(r#"{ "dispatch": { "base_floor": 9 } }"#);
        let err = Settings::load(f.path()).unwrap_err();
        assert!(err.to_string().contains("base_floor"));
    }

    #[test]
    fn garbage_file_reports_path() {
        let f = write_json("not json");
        let err = Settings::load(f.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse config file"));
    }

    #[test]
    fn empty_endpoint_list_is_rejected() {
        let settings = Settings { endpoints: Vec::new(), ..Settings::default() };
        assert!(settings.validate().is_err());
    }
}
