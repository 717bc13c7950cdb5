//! Live loop metrics shared between the control loop and its observers.
//!
//! The loop thread writes once per tick; the console, dashboard and exporters read.
//! Histories are bounded to the most recent 1000 points per signal.

use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};

use crate::control::state::ControlSnapshot;
use crate::error::Error;

pub const MAX_POINTS: usize = 1_000;

/// Counters and recent history of one control run.
#[derive(Debug, Default, Clone)]
pub struct LoopMetrics {
    /// Copy of the state at the end of the last completed tick
    pub latest: ControlSnapshot,

    pub ticks: u64,
    pub skipped_ticks: u64,
    pub timeouts: u64,
    pub decode_errors: u64,
    pub position_errors: u64,
    /// Ticks that ran past their period
    pub overruns: u64,

    /// Tick execution time (microseconds)
    pub tick_us: VecDeque<u64>,

    pub time_s: VecDeque<f64>,
    pub z_des: VecDeque<f64>,
    pub z_act: VecDeque<f64>,
    pub p_des: VecDeque<f64>,
    pub p_act: VecDeque<f64>,
}

impl LoopMetrics {
    pub fn record_tick(&mut self, snapshot: ControlSnapshot, tick_us: u64) {
        self.latest = snapshot;
        self.ticks += 1;
        push_capped(&mut self.tick_us, tick_us);
        push_capped(&mut self.time_s, snapshot.elapsed_s);
        push_capped(&mut self.z_des, snapshot.z_des);
        push_capped(&mut self.z_act, snapshot.z_act);
        push_capped(&mut self.p_des, snapshot.p_des);
        push_capped(&mut self.p_act, snapshot.p_act);
    }

    /// Counts a tick that was skipped because of `err`.
    pub fn record_skip(&mut self, err: &Error) {
        self.skipped_ticks += 1;
        match err {
            Error::ProtocolTimeout { .. } => self.timeouts += 1,
            Error::ProtocolDecode(_) => self.decode_errors += 1,
            Error::PositionUnavailable(_) => self.position_errors += 1,
            _ => {}
        }
    }

    pub fn record_overrun(&mut self) {
        self.overruns += 1;
    }

    /// Recent history as `time_s,z_des,z_act,p_des,p_act` CSV.
    pub fn history_csv(&self) -> String {
        let mut out = String::from("time_s,z_des,z_act,p_des,p_act\n");
        let rows = self
            .time_s
            .iter()
            .zip(&self.z_des)
            .zip(&self.z_act)
            .zip(&self.p_des)
            .zip(&self.p_act);
        for ((((t, zd), za), pd), pa) in rows {
            out.push_str(&format!("{:.3},{:.3},{:.3},{:.3},{:.3}\n", t, zd, za, pd, pa));
        }
        out
    }
}

pub type SharedMetrics = Arc<Mutex<LoopMetrics>>;

pub fn shared_metrics() -> SharedMetrics {
    Arc::new(Mutex::new(LoopMetrics::default()))
}

/// Appends value to a bounded buffer; drops the oldest at capacity.
#[inline]
pub fn push_capped<T>(buf: &mut VecDeque<T>, val: T) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

/// Statistics summary for a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub rms: f64,
    pub p95: f64,
    pub count: usize,
}

/// Min, max, mean, RMS and 95th percentile.
pub fn calculate_stats<I>(data: I) -> Option<Stats>
where
    I: IntoIterator<Item = f64>,
{
    let mut values: Vec<f64> = data.into_iter().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);

    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let rms = (values.iter().map(|v| v * v).sum::<f64>() / count as f64).sqrt();
    let p95_idx = ((count as f64 * 0.95).ceil() as usize).clamp(1, count) - 1;

    Some(Stats {
        min: values[0],
        max: values[count - 1],
        mean,
        rms,
        p95: values[p95_idx],
        count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn histories_are_bounded() {
        let mut m = LoopMetrics::default();
        let snap = ControlSnapshot::default();
        for i in 0..(MAX_POINTS + 10) {
            m.record_tick(ControlSnapshot { elapsed_s: i as f64, ..snap }, 5);
        }
        assert_eq!(m.ticks, (MAX_POINTS + 10) as u64);
        assert_eq!(m.z_des.len(), MAX_POINTS);
        assert_eq!(m.time_s.front(), Some(&10.0));
    }

    #[test]
    fn skips_are_classified() {
        let mut m = LoopMetrics::default();
        m.record_skip(&Error::ProtocolTimeout {
            awaited: "ack",
            timeout: Duration::from_millis(500),
        });
        m.record_skip(&Error::ProtocolDecode("x".into()));
        m.record_skip(&Error::PositionUnavailable("x".into()));
        assert_eq!((m.skipped_ticks, m.timeouts, m.decode_errors, m.position_errors), (3, 1, 1, 1));
    }

    #[test]
    fn history_csv_has_one_row_per_tick() {
        let mut m = LoopMetrics::default();
        m.record_tick(ControlSnapshot { z_des: 40.0, p_des: 12.51, ..Default::default() }, 1);
        let csv = m.history_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "0.000,40.000,0.000,12.510,0.000");
    }

    #[test]
    fn stats_cover_rms_and_percentile() {
        let stats = calculate_stats((1..=100).map(|v| v as f64)).unwrap();
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 100.0);
        assert_eq!(stats.mean, 50.5);
        assert_eq!(stats.p95, 95.0);
        assert!(calculate_stats(Vec::<f64>::new()).is_none());

        let rms = calculate_stats([3.0, -3.0]).unwrap().rms;
        assert_eq!(rms, 3.0);
    }
}
