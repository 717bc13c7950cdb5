//! command.rs
//! Operator commands and the FIFO that carries them into the control loop.
//!
//! The producer side (operator console, dashboard, tests) only ever holds a
//! `CommandSender`; the control loop owns the `CommandReceiver` and drains it
//! non-blockingly at the top of every tick. The channel is the only synchronisation
//! point between the two sides.

use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{debug, warn};
use std::time::Instant;

use crate::control::state::ControlState;
use crate::error::{Error, Result};

/// What a command acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Position,
    Trajectory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    AdjustBy,
    SetAbsolute,
    SetKp,
    SetKi,
    Start,
    Stop,
}

/// Immutable operator command, consumed exactly once by the control loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    target: Target,
    kind: CommandKind,
    value: f64,
}

impl Command {
    /// Shift the desired position by `delta_mm`.
    pub fn adjust_position(delta_mm: f64) -> Self {
        Self { target: Target::Position, kind: CommandKind::AdjustBy, value: delta_mm }
    }

    pub fn set_position(z_mm: f64) -> Self {
        Self { target: Target::Position, kind: CommandKind::SetAbsolute, value: z_mm }
    }

    pub fn set_kp(k_p: f64) -> Self {
        Self { target: Target::Position, kind: CommandKind::SetKp, value: k_p }
    }

    pub fn set_ki(k_i: f64) -> Self {
        Self { target: Target::Position, kind: CommandKind::SetKi, value: k_i }
    }

    pub fn start_trajectory() -> Self {
        Self { target: Target::Trajectory, kind: CommandKind::Start, value: 0.0 }
    }

    pub fn stop_trajectory() -> Self {
        Self { target: Target::Trajectory, kind: CommandKind::Stop, value: 0.0 }
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Mutates the loop state. Called only from the control loop thread.
    pub fn apply_to(&self, state: &mut ControlState, now: Instant) {
        match (self.target, self.kind) {
            (Target::Position, CommandKind::AdjustBy) => {
                state.z_des += self.value;
                debug!("z_des adjusted by {:+.3} to {:.3}", self.value, state.z_des);
            }
            (Target::Position, CommandKind::SetAbsolute) => {
                state.z_des = self.value;
                debug!("z_des set to {:.3}", state.z_des);
            }
            (Target::Position, CommandKind::SetKp) => {
                state.k_p = self.value;
                debug!("k_p set to {}", state.k_p);
            }
            (Target::Position, CommandKind::SetKi) => {
                state.k_i = self.value;
                debug!("k_i set to {}", state.k_i);
            }
            (Target::Trajectory, CommandKind::Start) => {
                state.trajectory_start = Some(now);
                debug!("trajectory started");
            }
            (Target::Trajectory, CommandKind::Stop) => {
                state.trajectory_start = None;
                debug!("trajectory stopped at z_des={:.3}", state.z_des);
            }
            (target, kind) => warn!("ignoring {:?} command for {:?}", kind, target),
        }
    }
}

/// Producer half. Cheap to clone; never blocks.
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<Command>,
}

impl CommandSender {
    pub fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| Error::CommandChannelClosed)
    }
}

/// Consumer half, owned by the control loop.
pub struct CommandReceiver {
    rx: Receiver<Command>,
}

impl CommandReceiver {
    /// Takes every command queued right now, oldest first, without blocking.
    pub fn drain(&self) -> impl Iterator<Item = Command> + '_ {
        self.rx.try_iter()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Unbounded FIFO so the operator side can never stall on a slow tick.
pub struct CommandChannel;

impl CommandChannel {
    pub fn new() -> (CommandSender, CommandReceiver) {
        let (tx, rx) = unbounded();
        (CommandSender { tx }, CommandReceiver { rx })
    }
}
