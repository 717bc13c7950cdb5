//! trajectory.rs
//! Time-varying position setpoints. Pure functions of elapsed time and parameters.

use std::{f64::consts::PI, time::Duration};

use serde::{Deserialize, Serialize};

/// Trajectory selected in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrajectoryKind {
    #[default]
    Ramp,
    Sinusoid,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trajectory {
    /// Triangle wave between `offset - amplitude` and `offset + amplitude`.
    Ramp {
        amplitude_mm: f64,
        offset_mm: f64,
        period_s: f64,
    },
    Sinusoid {
        amplitude_mm: f64,
        offset_mm: f64,
        frequency_hz: f64,
    },
}

impl Trajectory {
    /// 50 mm .. 80 mm over 30 s.
    pub const RAMP: Trajectory = Trajectory::Ramp {
        amplitude_mm: 15.0,
        offset_mm: 65.0,
        period_s: 30.0,
    };

    pub const SINUSOID: Trajectory = Trajectory::Sinusoid {
        amplitude_mm: 5.0,
        offset_mm: 60.0,
        frequency_hz: 0.1,
    };

    pub fn from_kind(kind: TrajectoryKind) -> Self {
        match kind {
            TrajectoryKind::Ramp => Self::RAMP,
            TrajectoryKind::Sinusoid => Self::SINUSOID,
        }
    }

    /// Desired position (mm) `elapsed` after the trajectory was started.
    pub fn setpoint(&self, elapsed: Duration) -> f64 {
        let t = elapsed.as_secs_f64();
        match *self {
            Trajectory::Ramp {
                amplitude_mm,
                offset_mm,
                period_s,
            } => amplitude_mm * sawtooth(2.0 * PI / period_s * t, 0.5) + offset_mm,
            Trajectory::Sinusoid {
                amplitude_mm,
                offset_mm,
                frequency_hz,
            } => amplitude_mm * (2.0 * PI * frequency_hz * t).sin() + offset_mm,
        }
    }
}

/// Periodic sawtooth in [-1, 1] with period 2π. It rises from -1 to 1 over the first
/// `width` fraction of the period and falls back over the rest; `width = 0.5` is a
/// symmetric triangle.
pub fn sawtooth(phase: f64, width: f64) -> f64 {
    let width = width.clamp(0.0, 1.0);
    let t = phase.rem_euclid(2.0 * PI);
    if t < width * 2.0 * PI {
        t / (PI * width) - 1.0
    } else {
        (PI * (width + 1.0) - t) / (PI * (1.0 - width))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn ramp_spans_fifty_to_eighty_millimetres() {
        let ramp = Trajectory::RAMP;
        assert!((ramp.setpoint(Duration::ZERO) - 50.0).abs() < EPS);
        assert!((ramp.setpoint(Duration::from_millis(7_500)) - 65.0).abs() < EPS);
        assert!((ramp.setpoint(Duration::from_secs(15)) - 80.0).abs() < EPS);
        assert!((ramp.setpoint(Duration::from_millis(22_500)) - 65.0).abs() < EPS);
        assert!((ramp.setpoint(Duration::from_secs(30)) - 50.0).abs() < 1e-6);
    }

    #[test]
    fn sinusoid_has_ten_second_period() {
        let sine = Trajectory::SINUSOID;
        assert!((sine.setpoint(Duration::ZERO) - 60.0).abs() < EPS);
        assert!((sine.setpoint(Duration::from_millis(2_500)) - 65.0).abs() < EPS);
        assert!((sine.setpoint(Duration::from_millis(7_500)) - 55.0).abs() < EPS);
    }

    #[test]
    fn setpoints_are_deterministic() {
        for traj in [Trajectory::RAMP, Trajectory::SINUSOID] {
            for ms in [0u64, 125, 4_321, 29_999, 61_234] {
                let t = Duration::from_millis(ms);
                assert_eq!(traj.setpoint(t), traj.setpoint(t));
            }
        }
    }

    #[test]
    fn sawtooth_stays_in_unit_band() {
        for i in 0..1_000 {
            let v = sawtooth(i as f64 * 0.037, 0.5);
            assert!((-1.0..=1.0).contains(&v), "sawtooth out of band: {}", v);
        }
    }

    #[test]
    fn kind_maps_to_constants() {
        assert_eq!(Trajectory::from_kind(TrajectoryKind::Ramp), Trajectory::RAMP);
        assert_eq!(Trajectory::from_kind(TrajectoryKind::Sinusoid), Trajectory::SINUSOID);
    }
}
