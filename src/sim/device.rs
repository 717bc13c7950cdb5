//! device.rs
//! Microcontroller emulator. Each `write_all` is treated as one request frame.

use log::debug;
use parking_lot::Mutex;
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crate::control::state::{Channel, ChannelMask};
use crate::error::Result;
use crate::link::codec::ACK_TOKEN;
use crate::link::transport::Transport;
use crate::sim::{RigState, SimRig};

/// One-shot faults, consumed by the next request in injection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The request is swallowed and never answered.
    Silent,
    /// The reply is corrupted.
    Garbage,
}

pub struct SimTransport {
    state: Arc<Mutex<RigState>>,
}

impl SimTransport {
    pub(crate) fn new(state: Arc<Mutex<RigState>>) -> Self {
        Self { state }
    }
}

impl Transport for SimTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        {
            let mut st = self.state.lock();
            if !st.outbox.is_empty() {
                let n = buf.len().min(st.outbox.len());
                for (dst, src) in buf.iter_mut().zip(st.outbox.drain(..n)) {
                    *dst = src;
                }
                return Ok(n);
            }
        }
        thread::sleep(Duration::from_millis(1));
        Ok(0)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let frame = String::from_utf8_lossy(data).into_owned();
        let mut st = self.state.lock();
        st.advance(Instant::now());
        handle_frame(&mut st, frame);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.state.lock().outbox.clear();
        Ok(())
    }
}

impl Drop for SimTransport {
    fn drop(&mut self) {
        self.state.lock().log_frame(SimRig::RELEASED.to_string());
    }
}

fn handle_frame(st: &mut RigState, frame: String) {
    st.log_frame(frame.clone());
    let fault = st.faults.pop_front();
    if fault == Some(Fault::Silent) {
        debug!("sim: swallowing {:?}", frame);
        return;
    }
    let garbage = fault == Some(Fault::Garbage);

    let reply = if let Some(flags) = frame.strip_prefix("sc") {
        parse_mask(flags).map(|mask| {
            st.enabled = mask;
            ACK_TOKEN.to_string()
        })
    } else if let Some(rest) = frame.strip_prefix('c') {
        let mut chars = rest.chars();
        let ch = chars.next().and_then(parse_channel);
        match (ch, chars.as_str()) {
            (Some(ch), "read") => {
                let psi = st.pressure[ch.index() as usize];
                Some(format!("{:.2}", psi))
            }
            (Some(ch), digits) if digits.len() == 4 && digits.bytes().all(|b| b.is_ascii_digit()) => {
                digits.parse::<u16>().ok().map(|centi| {
                    st.commanded[ch.index() as usize] = Some(centi as f64 / 100.0);
                    ACK_TOKEN.to_string()
                })
            }
            _ => None,
        }
    } else {
        None
    };

    match reply {
        Some(_) if garbage => st.reply("#?a"),
        Some(line) => st.reply(&line),
        None => debug!("sim: ignoring unknown frame {:?}", frame),
    }
}

fn parse_channel(digit: char) -> Option<Channel> {
    digit.to_digit(10).and_then(|i| Channel::try_from(i as u8).ok())
}

fn parse_mask(flags: &str) -> Option<ChannelMask> {
    let bits: Vec<bool> = flags
        .chars()
        .map(|c| match c {
            '0' => Some(false),
            '1' => Some(true),
            _ => None,
        })
        .collect::<Option<_>>()?;
    match bits.as_slice() {
        [c0, c1, c2] => Some(ChannelMask::new(*c0, *c1, *c2)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimConfig;
    use crate::utils::metrics::MAX_POINTS;

    fn read_all(t: &mut SimTransport) -> String {
        let mut out = Vec::new();
        let mut buf = [0u8; 16];
        loop {
            let n = t.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn boots_with_banner_and_answers_requests() {
        let rig = SimRig::new(SimConfig::instant());
        let mut t = rig.transport();
        assert_eq!(read_all(&mut t), "Arduino Setup Complete\r\n");

        t.write_all(b"sc101").unwrap();
        assert_eq!(read_all(&mut t), "rx\r\n");
        assert_eq!(rig.enabled(), ChannelMask::new(true, false, true));

        t.write_all(b"c21000").unwrap();
        assert_eq!(read_all(&mut t), "rx\r\n");
        assert_eq!(rig.commanded(Channel::C2), Some(10.0));

        t.write_all(b"c2read").unwrap();
        assert_eq!(read_all(&mut t), "10.00\r\n");
    }

    #[test]
    fn unknown_frames_get_no_reply() {
        let rig = SimRig::new(SimConfig::instant());
        let mut t = rig.transport();
        read_all(&mut t);
        for frame in ["c9read", "sc12", "c0abcd", "hello"] {
            t.write_all(frame.as_bytes()).unwrap();
            assert_eq!(read_all(&mut t), "", "frame {}", frame);
        }
    }

    #[test]
    fn faults_apply_in_order() {
        let rig = SimRig::new(SimConfig::instant());
        let mut t = rig.transport();
        read_all(&mut t);
        rig.inject(Fault::Silent);
        rig.inject(Fault::Garbage);

        t.write_all(b"c0read").unwrap();
        assert_eq!(read_all(&mut t), "");
        t.write_all(b"c0read").unwrap();
        assert_eq!(read_all(&mut t), "#?a\r\n");
        t.write_all(b"c0read").unwrap();
        assert_eq!(read_all(&mut t), "12.00\r\n");
    }

    #[test]
    fn frame_history_stays_bounded() {
        let rig = SimRig::new(SimConfig::instant());
        let mut t = rig.transport();
        for _ in 0..MAX_POINTS + 500 {
            t.write_all(b"c0read").unwrap();
            read_all(&mut t);
        }
        t.write_all(b"c01225").unwrap();

        let frames = rig.frames();
        assert_eq!(frames.len(), MAX_POINTS);
        assert_eq!(frames.last().map(String::as_str), Some("c01225"));
    }

    #[test]
    fn drop_marks_release() {
        let rig = SimRig::new(SimConfig::instant());
        drop(rig.transport());
        assert_eq!(rig.frames(), vec![SimRig::RELEASED.to_string()]);
    }
}
