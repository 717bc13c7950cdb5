//! controller.rs
//! One control tick: sense, run the PI law, actuate, emit a status record.
//!
//! The PI law works on pressure increments: the commanded pressure is the measured
//! pressure plus a correction, so the integral term only has to cover the residual.
//! - Trapezoidal integration of the position error over the fixed step `dT`
//! - Anti-windup: the integral is clamped to ±`INTEGRAL_LIMIT` after every update
//! - Output clamp: the command never leaves the hardware pressure range

use std::time::{Duration, Instant};

use crate::control::state::{Channel, ControlState, PressureValue, INTEGRAL_LIMIT};
use crate::control::trajectory::Trajectory;
use crate::error::Result;
use crate::link::{ActuatorLink, Transport};
use crate::position::PositionSource;
use crate::utils::record::StatusRecord;

#[derive(Debug, Clone, Copy)]
pub struct Controller {
    trajectory: Trajectory,
    /// Integration step (s); fixed, independent of the measured period
    dt: f64,
    channel: Channel,
    started: Instant,
}

impl Controller {
    pub fn new(trajectory: Trajectory, dt: f64, channel: Channel, started: Instant) -> Self {
        Self { trajectory, dt, channel, started }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn trajectory(&self) -> Trajectory {
        self.trajectory
    }

    /// Applies the PI law to `state` (with `p_act` and `z_act` already measured)
    /// and returns the clamped desired pressure.
    pub fn step(&self, state: &mut ControlState, now: Instant) -> PressureValue {
        if let Some(start) = state.trajectory_start {
            state.z_des = self.trajectory.setpoint(now.saturating_duration_since(start));
        }

        let epsilon = state.z_des - state.z_act;
        state.integral_sum = (state.integral_sum + 0.5 * (epsilon + state.epsilon_prev) * self.dt)
            .clamp(-INTEGRAL_LIMIT, INTEGRAL_LIMIT);

        let delta_p = state.k_p * epsilon + state.k_i * state.integral_sum;
        state.p_des = PressureValue::clamped(state.p_act + delta_p);
        state.epsilon_prev = epsilon;
        state.p_des
    }

    /// Time axis of the status record: since trajectory start while one runs,
    /// otherwise since the loop started.
    pub fn time_diff(&self, state: &ControlState, now: Instant) -> Duration {
        now.saturating_duration_since(state.trajectory_start.unwrap_or(self.started))
    }

    /// Full tick against the hardware. On error `state` is left as it was and the
    /// caller decides whether to skip the tick or stop.
    pub fn tick<T, P>(
        &self,
        link: &mut ActuatorLink<T>,
        position: &mut P,
        state: &mut ControlState,
        now: Instant,
    ) -> Result<StatusRecord>
    where
        T: Transport,
        P: PositionSource + ?Sized,
    {
        let mut next = *state;
        next.p_act = link.read_pressure(self.channel)?;
        next.z_act = position.read_position()?;

        let p_des = self.step(&mut next, now);
        link.write_desired_pressure(self.channel, p_des)?;

        *state = next;
        Ok(self.record(state, now))
    }

    pub fn record(&self, state: &ControlState, now: Instant) -> StatusRecord {
        StatusRecord {
            time_diff: self.time_diff(state, now).as_secs_f64(),
            z_des: state.z_des,
            z_act: state.z_act,
            p_des: state.p_des.psi(),
            p_act: state.p_act,
            k_p: state.k_p,
            k_i: state.k_i,
        }
    }
}
