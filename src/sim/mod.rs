//! sim/mod.rs
//! Simulated test rig: a microcontroller emulator and the pneumatic plant behind it.
//! - `SimTransport`: speaks the serial protocol (banner, acks, readings) as a `Transport`
//! - `SimPlant`: position follows channel pressure with first-order lag and sensor noise
//! - `SimRig`: shared handle used to inspect traffic and inject faults

pub mod device;
pub mod plant;

pub use device::{Fault, SimTransport};
pub use plant::SimPlant;

use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc, time::Instant};

use crate::control::state::{Channel, ChannelMask, DEFAULT_PRESSURE_PSI};
use crate::utils::metrics::push_capped;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimConfig {
    pub send_banner: bool,
    /// Emit a few lines of sensor-initialisation output before the banner.
    pub boot_chatter: bool,
    pub initial_pressure_psi: f64,
    pub pressure_time_constant_s: f64,
    pub position_time_constant_s: f64,
    /// Plant gain around the default pressure.
    pub mm_per_psi: f64,
    /// Steady-state position at the default pressure.
    pub reference_position_mm: f64,
    pub noise_mm: f64,
    /// Channel whose pressure moves the plant.
    pub plant_channel: Channel,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            send_banner: true,
            boot_chatter: true,
            initial_pressure_psi: 12.0,
            pressure_time_constant_s: 0.25,
            position_time_constant_s: 0.6,
            mm_per_psi: 25.0,
            reference_position_mm: 60.0,
            noise_mm: 0.05,
            plant_channel: Channel::C0,
        }
    }
}

impl SimConfig {
    /// No lag, no noise, no chatter. Readings equal the last command.
    pub fn instant() -> Self {
        Self {
            boot_chatter: false,
            pressure_time_constant_s: 0.0,
            position_time_constant_s: 0.0,
            noise_mm: 0.0,
            ..Self::default()
        }
    }
}

pub(crate) struct RigState {
    pub(crate) config: SimConfig,
    pub(crate) enabled: ChannelMask,
    pub(crate) commanded: [Option<f64>; 3],
    pub(crate) pressure: [f64; 3],
    pub(crate) position_mm: f64,
    pub(crate) held_position: Option<f64>,
    pub(crate) outbox: VecDeque<u8>,
    /// Most recent request frames, capped like the metric histories.
    pub(crate) frames: VecDeque<String>,
    pub(crate) faults: VecDeque<Fault>,
    last_update: Instant,
}

impl RigState {
    fn new(config: SimConfig) -> Self {
        let p0 = config.initial_pressure_psi;
        Self {
            config,
            enabled: ChannelMask::default(),
            commanded: [None; 3],
            pressure: [p0; 3],
            position_mm: steady_position(&config, p0),
            held_position: None,
            outbox: VecDeque::new(),
            frames: VecDeque::new(),
            faults: VecDeque::new(),
            last_update: Instant::now(),
        }
    }

    /// Integrates the plant up to `now`.
    pub(crate) fn advance(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.last_update = now;

        let tau_p = self.config.pressure_time_constant_s;
        for (p, cmd) in self.pressure.iter_mut().zip(self.commanded) {
            if let Some(target) = cmd {
                *p = approach(*p, target, dt, tau_p);
            }
        }

        let driving = self.pressure[self.config.plant_channel.index() as usize];
        let target = steady_position(&self.config, driving);
        self.position_mm = approach(self.position_mm, target, dt, self.config.position_time_constant_s);
    }

    pub(crate) fn log_frame(&mut self, frame: String) {
        push_capped(&mut self.frames, frame);
    }

    pub(crate) fn reply(&mut self, line: &str) {
        self.outbox.extend(line.as_bytes());
        self.outbox.extend(b"\r\n");
    }
}

fn steady_position(config: &SimConfig, psi: f64) -> f64 {
    config.reference_position_mm + config.mm_per_psi * (psi - DEFAULT_PRESSURE_PSI)
}

fn approach(current: f64, target: f64, dt: f64, tau: f64) -> f64 {
    if tau <= 0.0 {
        target
    } else {
        current + (target - current) * (1.0 - (-dt / tau).exp())
    }
}

/// Shared handle on one simulated rig. Clones refer to the same rig.
#[derive(Clone)]
pub struct SimRig {
    state: Arc<Mutex<RigState>>,
}

impl SimRig {
    /// Marker appended to `frames()` when a transport is dropped.
    pub const RELEASED: &'static str = "<released>";

    pub fn new(config: SimConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(RigState::new(config))),
        }
    }

    /// Opens a connection. The emulated board resets and replays its boot output.
    pub fn transport(&self) -> SimTransport {
        {
            let mut st = self.state.lock();
            st.outbox.clear();
            if st.config.boot_chatter {
                st.reply("Initialising pressure sensors...");
                st.reply("Sensors OK");
            }
            if st.config.send_banner {
                st.reply(crate::link::codec::SETUP_BANNER);
            }
        }
        SimTransport::new(Arc::clone(&self.state))
    }

    pub fn plant(&self) -> SimPlant {
        SimPlant::new(Arc::clone(&self.state))
    }

    /// The most recent request frames, in order, plus release markers.
    /// Older frames are discarded once `MAX_POINTS` is reached.
    pub fn frames(&self) -> Vec<String> {
        self.state.lock().frames.iter().cloned().collect()
    }

    /// Queues a one-shot fault consumed by the next request.
    pub fn inject(&self, fault: Fault) {
        self.state.lock().faults.push_back(fault);
    }

    /// Pins the reported position (no dynamics, no noise); `None` releases it.
    pub fn hold_position(&self, z_mm: Option<f64>) {
        self.state.lock().held_position = z_mm;
    }

    pub fn commanded(&self, channel: Channel) -> Option<f64> {
        self.state.lock().commanded[channel.index() as usize]
    }

    pub fn pressure(&self, channel: Channel) -> f64 {
        let mut st = self.state.lock();
        st.advance(Instant::now());
        st.pressure[channel.index() as usize]
    }

    pub fn enabled(&self) -> ChannelMask {
        self.state.lock().enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lag_moves_towards_target_without_overshoot() {
        let mut p = 12.0;
        for _ in 0..50 {
            p = approach(p, 13.0, 0.07, 0.25);
            assert!(p <= 13.0);
        }
        assert!((p - 13.0).abs() < 1e-3);
        assert_eq!(approach(12.0, 13.0, 0.07, 0.0), 13.0);
    }

    #[test]
    fn plant_gain_is_centred_on_default_pressure() {
        let cfg = SimConfig::default();
        assert_eq!(steady_position(&cfg, DEFAULT_PRESSURE_PSI), 60.0);
        assert!((steady_position(&cfg, 11.45) - 40.0).abs() < 1e-9);
    }
}
