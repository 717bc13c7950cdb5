//! End-of-run summary export: `metric,value,description` rows.

use log::{error, info};
use std::{fs, path::Path};

use crate::control::control_loop::LoopSummary;
use crate::error::Result;
use crate::utils::metrics::{calculate_stats, LoopMetrics};

/// Builds the summary table for one run.
pub fn summary_csv(m: &LoopMetrics, summary: Option<&LoopSummary>, records_dropped: u64) -> String {
    let mut csv = String::from("metric,value,description\n");
    let mut row = |metric: &str, value: String, description: &str| {
        csv.push_str(&format!("{},{},{}\n", metric, value, description));
    };

    row("ticks", m.ticks.to_string(), "Completed control ticks");
    row("skipped_ticks", m.skipped_ticks.to_string(), "Ticks skipped on recoverable faults");
    row("timeouts", m.timeouts.to_string(), "Protocol response timeouts");
    row("decode_errors", m.decode_errors.to_string(), "Undecodable device responses");
    row("position_errors", m.position_errors.to_string(), "Missing position samples");
    row("overruns", m.overruns.to_string(), "Ticks longer than the period");
    row("records_dropped", records_dropped.to_string(), "Records lost to a full log queue");

    if let Some(s) = summary {
        row("commands_applied", s.commands_applied.to_string(), "Operator commands applied");
    }

    if let Some(tick) = calculate_stats(m.tick_us.iter().map(|&v| v as f64)) {
        row("tick_avg_us", format!("{:.2}", tick.mean), "Average tick execution time");
        row("tick_max_us", format!("{:.2}", tick.max), "Maximum tick execution time");
        row("tick_p95_us", format!("{:.2}", tick.p95), "95th percentile tick execution time");
    }

    let errors = m.z_des.iter().zip(&m.z_act).map(|(d, a)| d - a);
    if let Some(err) = calculate_stats(errors) {
        row("tracking_error_mean_mm", format!("{:.3}", err.mean), "Mean z_des - z_act over recent history");
        row("tracking_error_rms_mm", format!("{:.3}", err.rms), "RMS tracking error over recent history");
    }

    if let Some(p) = calculate_stats(m.p_des.iter().copied()) {
        row("p_des_min_psi", format!("{:.2}", p.min), "Minimum commanded pressure");
        row("p_des_max_psi", format!("{:.2}", p.max), "Maximum commanded pressure");
    }

    csv
}

pub fn export_summary_csv(
    path: impl AsRef<Path>,
    m: &LoopMetrics,
    summary: Option<&LoopSummary>,
    records_dropped: u64,
) -> Result<()> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    match fs::write(path, summary_csv(m, summary, records_dropped)) {
        Ok(()) => {
            info!("Summary metrics exported to: {:?}", path);
            Ok(())
        }
        Err(e) => {
            error!("Failed to export summary: {}", e);
            Err(e.into())
        }
    }
}
