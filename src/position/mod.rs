//! Position sources feeding `z_act` into the control loop.

pub mod line;

pub use line::LinePositionSource;

use crate::error::Result;

/// Anything that can report the actuator's current position in millimetres.
pub trait PositionSource: Send {
    /// Newest available sample. `Error::PositionUnavailable` when the source has
    /// nothing usable; the loop treats that as a skipped tick.
    fn read_position(&mut self) -> Result<f64>;
}

