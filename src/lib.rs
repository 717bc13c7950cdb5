//! # pneumatic_control
//!
//! Closed-loop position control of a pneumatic actuator.
//!
//! A PI law with anti-windup turns the position error into a desired pressure,
//! which is sent to a pressure microcontroller over a line-oriented serial protocol.
//! Operator commands reach the loop through a non-blocking FIFO; status leaves it as
//! per-tick snapshots and CSV records.
//!
//! ## Layout
//! - `link`: serial transport, wire codec and the actuator link
//! - `position`: position sources (tracker bridge)
//! - `control`: state, commands, trajectories, controller and the periodic loop
//! - `utils`: metrics, record log, summary export
//! - `advanced`: HTTP status dashboard
//! - `sim`: simulated microcontroller and plant
//! - `operator`: console command source
//! - `config`: TOML configuration

pub mod advanced;
pub mod config;
pub mod control;
pub mod error;
pub mod link;
pub mod operator;
pub mod position;
pub mod sim;
pub mod utils;

pub use error::{Error, Result};
