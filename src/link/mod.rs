//! Serial plumbing between the host and the pressure microcontroller.

pub mod actuator;
pub mod codec;
pub mod transport;

pub use actuator::{ActuatorLink, LinkTimeouts};
pub use transport::{find_port, SerialTransport, Transport};
