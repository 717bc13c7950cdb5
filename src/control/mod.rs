//! Closed-loop position control: state, commands, the PI controller and the loop.

pub mod command;
pub mod control_loop;
pub mod controller;
pub mod state;
pub mod trajectory;

pub use command::{Command, CommandChannel, CommandReceiver, CommandSender};
pub use control_loop::{ControlLoop, LoopContext, LoopSettings, LoopSummary};
pub use controller::Controller;
pub use state::{Channel, ChannelMask, ControlSnapshot, ControlState, PressureValue};
pub use trajectory::{Trajectory, TrajectoryKind};
