//! state.rs
//! Numeric state of the PI loop plus the value types it is built from.
//!
//! `ControlState` is owned by the control loop thread. Everything else sees it through
//! `ControlSnapshot`, a plain copy taken once per tick.

use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::error::{Error, Result};

/// Lower hardware bound for commanded pressure (psi).
pub const PRESSURE_MIN_PSI: f64 = 9.0;
/// Upper hardware bound for commanded pressure (psi).
pub const PRESSURE_MAX_PSI: f64 = 13.25;
/// Near-atmospheric pressure written to every enabled channel on shutdown.
pub const DEFAULT_PRESSURE_PSI: f64 = 12.25;
/// Anti-windup bound on the accumulated integral term.
pub const INTEGRAL_LIMIT: f64 = 3.0;

/// Microcontroller pressure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    C0,
    C1,
    C2,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::C0, Channel::C1, Channel::C2];

    #[inline]
    pub fn index(self) -> u8 {
        match self {
            Channel::C0 => 0,
            Channel::C1 => 1,
            Channel::C2 => 2,
        }
    }
}

impl TryFrom<u8> for Channel {
    type Error = Error;

    fn try_from(idx: u8) -> Result<Self> {
        match idx {
            0 => Ok(Channel::C0),
            1 => Ok(Channel::C1),
            2 => Ok(Channel::C2),
            other => Err(Error::Config(format!("channel {} out of range 0..=2", other))),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Which of the three channels are switched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelMask([bool; 3]);

impl ChannelMask {
    pub fn new(c0: bool, c1: bool, c2: bool) -> Self {
        Self([c0, c1, c2])
    }

    pub fn only(channel: Channel) -> Self {
        let mut flags = [false; 3];
        flags[channel.index() as usize] = true;
        Self(flags)
    }

    #[inline]
    pub fn is_enabled(&self, channel: Channel) -> bool {
        self.0[channel.index() as usize]
    }

    pub fn flags(&self) -> [bool; 3] {
        self.0
    }

    pub fn enabled(&self) -> impl Iterator<Item = Channel> + '_ {
        Channel::ALL.into_iter().filter(|c| self.is_enabled(*c))
    }
}

/// Commanded pressure, stored in hundredths of a psi and always inside
/// [`PRESSURE_MIN_PSI`, `PRESSURE_MAX_PSI`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PressureValue(u16);

impl PressureValue {
    /// Clamps into the hardware range and rounds to two decimals.
    /// A NaN request maps to the default near-atmospheric pressure.
    pub fn clamped(psi: f64) -> Self {
        let psi = if psi.is_nan() {
            DEFAULT_PRESSURE_PSI
        } else {
            psi.clamp(PRESSURE_MIN_PSI, PRESSURE_MAX_PSI)
        };
        Self((psi * 100.0).round() as u16)
    }

    pub fn default_pressure() -> Self {
        Self::clamped(DEFAULT_PRESSURE_PSI)
    }

    #[inline]
    pub fn psi(self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Hundredths of a psi, e.g. 1325 for 13.25.
    #[inline]
    pub fn centi_psi(self) -> u16 {
        self.0
    }
}

impl fmt::Display for PressureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} psi", self.psi())
    }
}

/// Mutable state of one PI channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlState {
    /// Desired position (mm)
    pub z_des: f64,
    /// Measured position (mm)
    pub z_act: f64,
    /// Last commanded pressure
    pub p_des: PressureValue,
    /// Last measured pressure (psi)
    pub p_act: f64,
    pub k_p: f64,
    pub k_i: f64,
    pub integral_sum: f64,
    pub epsilon_prev: f64,
    /// Set while a trajectory drives `z_des`
    pub trajectory_start: Option<Instant>,
}

impl ControlState {
    pub fn new(z_des: f64, p_initial: f64, k_p: f64, k_i: f64) -> Self {
        Self {
            z_des,
            z_act: 0.0,
            p_des: PressureValue::clamped(p_initial),
            p_act: 0.0,
            k_p,
            k_i,
            integral_sum: 0.0,
            epsilon_prev: 0.0,
            trajectory_start: None,
        }
    }

    /// Copy handed to status consumers; never aliases the live state.
    pub fn snapshot(&self, elapsed: Duration) -> ControlSnapshot {
        ControlSnapshot {
            elapsed_s: elapsed.as_secs_f64(),
            z_des: self.z_des,
            z_act: self.z_act,
            p_des: self.p_des.psi(),
            p_act: self.p_act,
            k_p: self.k_p,
            k_i: self.k_i,
            integral_sum: self.integral_sum,
            trajectory_active: self.trajectory_start.is_some(),
        }
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new(40.0, 12.0, 0.012, 0.012)
    }
}

/// Read-only view of the loop state at the end of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlSnapshot {
    pub elapsed_s: f64,
    pub z_des: f64,
    pub z_act: f64,
    pub p_des: f64,
    pub p_act: f64,
    pub k_p: f64,
    pub k_i: f64,
    pub integral_sum: f64,
    pub trajectory_active: bool,
}

impl fmt::Display for ControlSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Z desired: {:.3}", self.z_des)?;
        writeln!(f, "Z actual: {:.3}", self.z_act)?;
        writeln!(f, "P desired: {:.3}", self.p_des)?;
        writeln!(f, "P actual: {:.3}", self.p_act)?;
        writeln!(f, "int_sum: {:.3}", self.integral_sum)?;
        writeln!(f, "k_p: {:.3}  k_i: {:.3}", self.k_p, self.k_i)?;
        write!(f, "trajectory: {}", if self.trajectory_active { "running" } else { "idle" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressure_is_clamped_to_nearest_bound() {
        assert_eq!(PressureValue::clamped(20.0).psi(), PRESSURE_MAX_PSI);
        assert_eq!(PressureValue::clamped(-4.0).psi(), PRESSURE_MIN_PSI);
        assert_eq!(PressureValue::clamped(f64::INFINITY).psi(), PRESSURE_MAX_PSI);
        assert_eq!(PressureValue::clamped(f64::NEG_INFINITY).psi(), PRESSURE_MIN_PSI);
    }

    #[test]
    fn pressure_rounds_to_hundredths() {
        assert_eq!(PressureValue::clamped(12.3).centi_psi(), 1230);
        assert_eq!(PressureValue::clamped(9.504).centi_psi(), 950);
        assert_eq!(PressureValue::clamped(12.5149).centi_psi(), 1251);
    }

    #[test]
    fn nan_pressure_falls_back_to_default() {
        assert_eq!(PressureValue::clamped(f64::NAN), PressureValue::default_pressure());
    }

    #[test]
    fn channel_mask_lists_enabled_channels_in_order() {
        let mask = ChannelMask::new(true, false, true);
        let enabled: Vec<Channel> = mask.enabled().collect();
        assert_eq!(enabled, vec![Channel::C0, Channel::C2]);
        assert!(!mask.is_enabled(Channel::C1));
        assert_eq!(ChannelMask::only(Channel::C1).flags(), [false, true, false]);
    }

    #[test]
    fn channel_index_round_trips_and_rejects_out_of_range() {
        for ch in Channel::ALL {
            assert_eq!(Channel::try_from(ch.index()).ok(), Some(ch));
        }
        assert!(Channel::try_from(3).is_err());
    }

    #[test]
    fn snapshot_is_a_detached_copy() {
        let mut state = ControlState::default();
        let snap = state.snapshot(Duration::from_secs(2));
        state.z_des = 99.0;
        assert_eq!(snap.z_des, 40.0);
        assert_eq!(snap.elapsed_s, 2.0);
        assert!(!snap.trajectory_active);
    }
}
