//! Tracking analysis for recorded control runs.
//!
//! Reads the record log CSV (`ts_epoch_ms,time_diff,z_des,z_act,p_des,p_act,k_p,k_i`)
//! → prints tracking-error statistics → writes a two-panel HTML chart:
//! positions (desired vs actual) on top, pressures (desired vs actual) below.
//!
//! Usage: `analyze_tracking [records.csv] [report.html]`

use plotly::{
    common::Mode,
    layout::{Axis, GridPattern, Layout, LayoutGrid},
    Plot, Scatter,
};
use serde::Deserialize;
use std::{error::Error, fs, path::Path};

use pneumatic_control::utils::metrics::calculate_stats;

const DEFAULT_RECORDS: &str = "data/logs/control_records.csv";
const DEFAULT_REPORT: &str = "data/results/tracking_report.html";

#[derive(Debug, Deserialize)]
struct RecordRow {
    #[allow(dead_code)]
    ts_epoch_ms: u64,
    time_diff: f64,
    z_des: f64,
    z_act: f64,
    p_des: f64,
    p_act: f64,
    k_p: f64,
    k_i: f64,
}

#[derive(Debug, Default)]
struct Series {
    t: Vec<f64>,
    z_des: Vec<f64>,
    z_act: Vec<f64>,
    p_des: Vec<f64>,
    p_act: Vec<f64>,
    gains: Vec<(f64, f64)>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let records = args.next().unwrap_or_else(|| DEFAULT_RECORDS.into());
    let report = args.next().unwrap_or_else(|| DEFAULT_REPORT.into());

    let series = load_series(Path::new(&records))?;
    if series.t.is_empty() {
        println!("No records in {}", records);
        return Ok(());
    }

    print_summary(&series);

    if let Some(dir) = Path::new(&report).parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    write_chart(&series, &report);
    println!("Report written to {}", report);
    Ok(())
}

fn load_series(path: &Path) -> Result<Series, Box<dyn Error>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut s = Series::default();
    for row in rdr.deserialize() {
        let r: RecordRow = row?;
        s.t.push(r.time_diff);
        s.z_des.push(r.z_des);
        s.z_act.push(r.z_act);
        s.p_des.push(r.p_des);
        s.p_act.push(r.p_act);
        if s.gains.last() != Some(&(r.k_p, r.k_i)) {
            s.gains.push((r.k_p, r.k_i));
        }
    }
    Ok(s)
}

fn print_summary(s: &Series) {
    println!("\n=== Tracking Summary ({} records) ===", s.t.len());

    let errors = s.z_des.iter().zip(&s.z_act).map(|(d, a)| d - a);
    if let Some(e) = calculate_stats(errors) {
        println!("Error mean:   {:>8.3} mm", e.mean);
        println!("Error RMS:    {:>8.3} mm", e.rms);
        println!("Error P95:    {:>8.3} mm", e.p95);
        println!("Error range:  {:>8.3} .. {:.3} mm", e.min, e.max);
    }

    let abs_errors = s.z_des.iter().zip(&s.z_act).map(|(d, a)| (d - a).abs());
    if let Some(e) = calculate_stats(abs_errors) {
        println!("|Error| max:  {:>8.3} mm", e.max);
    }

    if let Some(p) = calculate_stats(s.p_des.iter().copied()) {
        println!("P_des range:  {:>8.2} .. {:.2} psi", p.min, p.max);
    }

    for (k_p, k_i) in &s.gains {
        println!("Gains used:   k_p={} k_i={}", k_p, k_i);
    }
}

fn write_chart(s: &Series, path: &str) {
    let mut plot = Plot::new();

    plot.add_trace(
        Scatter::new(s.t.clone(), s.z_des.clone())
            .name("z_des (mm)")
            .mode(Mode::Lines)
            .x_axis("x")
            .y_axis("y"),
    );
    plot.add_trace(
        Scatter::new(s.t.clone(), s.z_act.clone())
            .name("z_act (mm)")
            .mode(Mode::Lines)
            .x_axis("x")
            .y_axis("y"),
    );
    plot.add_trace(
        Scatter::new(s.t.clone(), s.p_des.clone())
            .name("p_des (psi)")
            .mode(Mode::Lines)
            .x_axis("x2")
            .y_axis("y2"),
    );
    plot.add_trace(
        Scatter::new(s.t.clone(), s.p_act.clone())
            .name("p_act (psi)")
            .mode(Mode::Lines)
            .x_axis("x2")
            .y_axis("y2"),
    );

    let layout = Layout::new()
        .title("Pneumatic Actuator Tracking")
        .height(900)
        .width(1400)
        .show_legend(true)
        .grid(LayoutGrid::new().rows(2).columns(1).pattern(GridPattern::Independent))
        .x_axis(Axis::new().title("Time (s)").domain(&[0.0, 1.0]))
        .y_axis(Axis::new().title("Position (mm)").domain(&[0.55, 1.0]))
        .x_axis2(Axis::new().title("Time (s)").domain(&[0.0, 1.0]))
        .y_axis2(Axis::new().title("Pressure (psi)").domain(&[0.0, 0.45]));

    plot.set_layout(layout);
    plot.write_html(path);
}
