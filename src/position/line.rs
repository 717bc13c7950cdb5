//! line.rs
//! Tracker bridge: a serial line carrying one position sample per line.
//!
//! Samples are decimal millimetres, optionally as comma or whitespace separated
//! fields (`dx, dy, dz`). Only the newest complete line is used; older ones are stale.

use log::debug;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::link::codec::LineBuffer;
use crate::link::transport::{SerialTransport, Transport};
use crate::position::PositionSource;

pub struct LinePositionSource<T: Transport> {
    transport: T,
    lines: LineBuffer,
    field: usize,
    timeout: Duration,
}

impl LinePositionSource<SerialTransport> {
    pub fn open(port: &str, baud_rate: u32, field: usize, timeout: Duration) -> Result<Self> {
        let transport = SerialTransport::open(port, baud_rate)?;
        Ok(Self::new(transport, field, timeout))
    }
}

impl<T: Transport> LinePositionSource<T> {
    pub fn new(transport: T, field: usize, timeout: Duration) -> Self {
        Self {
            transport,
            lines: LineBuffer::new(),
            field,
            timeout,
        }
    }

    fn parse(&self, line: &str) -> Result<f64> {
        let value = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .nth(self.field)
            .ok_or_else(|| Error::PositionUnavailable(format!("no field {} in {:?}", self.field, line.trim())))?;

        match value.parse::<f64>() {
            Ok(z) if z.is_finite() => Ok(z),
            _ => Err(Error::PositionUnavailable(format!("bad sample {:?}", value))),
        }
    }
}

impl<T: Transport> PositionSource for LinePositionSource<T> {
    fn read_position(&mut self) -> Result<f64> {
        let deadline = Instant::now() + self.timeout;
        let mut chunk = [0u8; 128];

        loop {
            // Pull everything already waiting, then keep only the newest line.
            loop {
                let n = self.transport.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                self.lines.extend(&chunk[..n]);
                if n < chunk.len() {
                    break;
                }
            }

            if let Some(line) = self.lines.last_line() {
                debug!("tracker <- {}", line.trim_end());
                return self.parse(&line);
            }

            if Instant::now() >= deadline {
                return Err(Error::PositionUnavailable(format!(
                    "no tracker sample within {:?}",
                    self.timeout
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Hands out one scripted chunk per read.
    struct Scripted(VecDeque<Vec<u8>>);

    impl Transport for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            match self.0.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => Ok(0),
            }
        }

        fn write_all(&mut self, _data: &[u8]) -> Result<()> {
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn source(chunks: &[&str], field: usize) -> LinePositionSource<Scripted> {
        let script = chunks.iter().map(|c| c.as_bytes().to_vec()).collect();
        LinePositionSource::new(Scripted(script), field, Duration::from_millis(20))
    }

    #[test]
    fn newest_complete_sample_wins() {
        let mut src = source(&["41.0\n42.", "5\n43.0\n"], 0);
        // First read only sees the first chunk: 41.0 is the newest complete line
        assert_eq!(src.read_position().unwrap(), 41.0);
        assert_eq!(src.read_position().unwrap(), 43.0);
    }

    #[test]
    fn selects_field_from_multi_axis_sample() {
        let mut src = source(&["1.5, -2.0, 38.25\r\n"], 2);
        assert_eq!(src.read_position().unwrap(), 38.25);
    }

    #[test]
    fn silence_is_position_unavailable() {
        let mut src = source(&[], 0);
        let err = src.read_position().unwrap_err();
        assert!(matches!(err, Error::PositionUnavailable(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn garbage_sample_is_rejected() {
        let mut src = source(&["abc\n"], 0);
        assert!(matches!(src.read_position(), Err(Error::PositionUnavailable(_))));
    }
}
