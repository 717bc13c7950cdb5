//! Runtime configuration, loaded from TOML.
//!
//! Every field has a default so an absent or partial file still yields a usable
//! configuration. `validate()` catches combinations that would only fail mid-run.

use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::Path,
    time::{Duration, Instant},
};

use crate::control::control_loop::LoopSettings;
use crate::control::controller::Controller;
use crate::control::state::{Channel, ChannelMask, ControlState};
use crate::control::trajectory::{Trajectory, TrajectoryKind};
use crate::error::{Error, Result};
use crate::link::actuator::{LinkTimeouts, DEFAULT_BAUD_RATE};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub link: LinkConfig,
    pub control: ControlConfig,
    pub tracker: TrackerConfig,
    pub logging: LoggingConfig,
    pub dashboard: DashboardConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial port path, `"auto"` to search by `device_hint`, or `"sim"`.
    pub port: String,
    pub device_hint: String,
    pub baud_rate: u32,
    pub settle_ms: u64,
    pub setup_timeout_ms: u64,
    pub response_timeout_ms: u64,
    /// Channel indexes switched on at startup.
    pub enabled_channels: Vec<u8>,
    /// Channel driven by the PI loop.
    pub control_channel: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: "auto".into(),
            device_hint: "Arduino".into(),
            baud_rate: DEFAULT_BAUD_RATE,
            settle_ms: 10_000,
            setup_timeout_ms: 5_000,
            response_timeout_ms: 500,
            enabled_channels: vec![0],
            control_channel: 0,
        }
    }
}

impl LinkConfig {
    pub fn timeouts(&self) -> LinkTimeouts {
        LinkTimeouts {
            settle: Duration::from_millis(self.settle_ms),
            setup: Duration::from_millis(self.setup_timeout_ms),
            response: Duration::from_millis(self.response_timeout_ms),
        }
    }

    pub fn channel_mask(&self) -> Result<ChannelMask> {
        let mut flags = [false; 3];
        for &idx in &self.enabled_channels {
            flags[Channel::try_from(idx)?.index() as usize] = true;
        }
        Ok(ChannelMask::new(flags[0], flags[1], flags[2]))
    }

    pub fn control_channel(&self) -> Result<Channel> {
        Channel::try_from(self.control_channel)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlConfig {
    pub period_ms: u64,
    /// Integration step (s)
    pub dt: f64,
    pub k_p: f64,
    pub k_i: f64,
    pub initial_z_des: f64,
    pub initial_pressure: f64,
    pub trajectory: TrajectoryKind,
    /// 0 = never give up
    pub max_consecutive_failures: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            period_ms: 70,
            dt: 0.125,
            k_p: 0.012,
            k_i: 0.012,
            initial_z_des: 40.0,
            initial_pressure: 12.0,
            trajectory: TrajectoryKind::Ramp,
            max_consecutive_failures: 10,
        }
    }
}

impl ControlConfig {
    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            period: Duration::from_millis(self.period_ms),
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Serial port of the position bridge. Required in hardware mode; the simulated rig ignores it.
    pub port: String,
    pub baud_rate: u32,
    /// Field of a multi-axis sample holding the controlled axis.
    pub field: usize,
    pub timeout_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            field: 0,
            timeout_ms: 50,
        }
    }
}

impl TrackerConfig {
    /// The bridge port, or a config error when none is set.
    pub fn require_port(&self) -> Result<&str> {
        match self.port.trim() {
            "" => Err(Error::Config("tracker.port is required in hardware mode".into())),
            port => Ok(port),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub record_path: String,
    pub record_on_start: bool,
    pub summary_path: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            record_path: "data/logs/control_records.csv".into(),
            record_on_start: false,
            summary_path: "data/export/loop_summary.csv".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub address: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: "127.0.0.1:8080".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_priority: bool,
    /// Core the control loop is pinned to, if any.
    pub core: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_priority: true,
            core: None,
        }
    }
}

impl Config {
    /// Controller and initial state, with the controller clock starting at `started`.
    /// Call once the link is up so link setup time is not counted.
    pub fn controller_at(&self, started: Instant) -> Result<(Controller, ControlState)> {
        let control = &self.control;
        let controller = Controller::new(
            Trajectory::from_kind(control.trajectory),
            control.dt,
            self.link.control_channel()?,
            started,
        );
        let state = ControlState::new(control.initial_z_des, control.initial_pressure, control.k_p, control.k_i);
        Ok((controller, state))
    }

    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mask = self.link.channel_mask()?;
        let control = self.link.control_channel()?;
        if !mask.is_enabled(control) {
            return Err(Error::Config(format!(
                "control channel {} is not in enabled_channels {:?}",
                control, self.link.enabled_channels
            )));
        }
        if self.control.period_ms == 0 {
            return Err(Error::Config("control.period_ms must be positive".into()));
        }
        if !(self.control.dt.is_finite() && self.control.dt > 0.0) {
            return Err(Error::Config("control.dt must be a positive number".into()));
        }
        if self.link.response_timeout_ms == 0 {
            return Err(Error::Config("link.response_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Simulated microcontroller requested.
    pub fn is_simulated(&self) -> bool {
        self.link.port.eq_ignore_ascii_case("sim")
    }
}
