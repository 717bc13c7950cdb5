//! # Pneumatic Control Entry Point
//!
//! Runs the closed-loop position controller against either the simulated rig or the
//! real microcontroller and tracker bridge.
//!
//! ## Modes
//! - **Simulated rig:** emulated microcontroller and plant, no hardware needed.
//! - **Hardware:** serial port from the config (`"auto"` searches by device hint).
//!
//! ## Threads
//! - Control loop: dedicated thread, max OS priority, optional core pinning.
//! - Operator console: main thread, fed by one stdin reader thread for the whole process.
//! - Record log consumer and dashboard server in the background.
//!
//! ## Outputs
//! - `data/logs/control_records.csv`: per-tick records while logging is on.
//! - `data/export/loop_summary.csv`: end-of-run counters and statistics.
//! - Dashboard: `http://127.0.0.1:8080/status`.

use crossbeam::channel::Receiver;
use log::{error, info, warn};
use std::{
    io::{self, stdin, stdout, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use pneumatic_control::{
    advanced::dashboard::start_dashboard,
    config::Config,
    control::{CommandChannel, CommandReceiver, ControlLoop, LoopContext, LoopSummary},
    error::{Error, Result},
    link::{ActuatorLink, LinkTimeouts, Transport},
    operator::{polled_lines, run_console, spawn_line_reader},
    position::{LinePositionSource, PositionSource},
    sim::{SimConfig, SimRig},
    utils::{export::export_summary_csv, metrics::shared_metrics, record::RecordLog},
};

const DEFAULT_CONFIG_PATH: &str = "pneumatic_control.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Simulated,
    Hardware,
}

fn main() {
    env_logger::init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.into());
    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration {}: {}", config_path, e);
            std::process::exit(2);
        }
    };

    let input = match spawn_line_reader(io::BufReader::new(stdin())) {
        Ok(rx) => rx,
        Err(e) => {
            error!("Cannot read operator input: {}", e);
            std::process::exit(1);
        }
    };

    info!("=== PNEUMATIC CONTROL START ===");
    if config.dashboard.enabled {
        println!("Status dashboard at: http://{}/status", config.dashboard.address);
    }

    loop {
        let Some(choice) = prompt_menu(&input) else {
            info!("Operator input closed");
            info!("=== PNEUMATIC CONTROL FINISHED ===");
            return;
        };
        let mode = match choice.as_str() {
            "1" | "" => Mode::Simulated,
            "2" if config.is_simulated() => {
                println!("link.port is \"sim\"; using the simulated rig.");
                Mode::Simulated
            }
            "2" => Mode::Hardware,
            "3" => {
                println!("Exiting. Goodbye!");
                info!("=== PNEUMATIC CONTROL FINISHED ===");
                return;
            }
            other => {
                println!("Unrecognized option '{}', please try again.", other);
                continue;
            }
        };

        match run_session(&config, mode, &input) {
            Ok(summary) => println!(
                "\nSession finished: {} ticks, {} skipped, {} overruns. Returning to menu...\n",
                summary.ticks, summary.skipped_ticks, summary.overruns
            ),
            Err(e) => {
                error!("Session failed: {}", e);
                println!("\nSession failed: {}. Returning to menu...\n", e);
            }
        }
    }
}

fn prompt_menu(input: &Receiver<String>) -> Option<String> {
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│     SELECT CONTROL MODE                     │");
    println!("├─────────────────────────────────────────────┤");
    println!("│  1) Simulated rig                           │");
    println!("│  2) Hardware (serial microcontroller)       │");
    println!("│  3) Exit                                    │");
    println!("└─────────────────────────────────────────────┘");
    print!("Select [1/2/3] (default: 1): ");
    let _ = stdout().flush();

    input.recv().ok().map(|line| line.trim().to_string())
}

/// One control session: connect, run the loop with the operator console in front,
/// then shut everything down and export the summary.
fn run_session(config: &Config, mode: Mode, input: &Receiver<String>) -> Result<LoopSummary> {
    let (commands, receiver) = CommandChannel::new();
    let metrics = shared_metrics();
    let records = Arc::new(RecordLog::new(&config.logging.record_path));
    records.set_enabled(config.logging.record_on_start);
    records.start_consumer()?;

    let running = Arc::new(AtomicBool::new(true));
    let ctx = LoopContext {
        running: running.clone(),
        metrics: metrics.clone(),
        records: records.clone(),
    };

    let dashboard = if config.dashboard.enabled {
        match start_dashboard(&config.dashboard.address, metrics.clone()) {
            Ok(d) => Some(d),
            Err(e) => {
                warn!("Dashboard disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let started = connect(config, mode, receiver, ctx);

    let outcome = match started {
        Ok(handle) => {
            let lines = polled_lines(input, &running);
            let console = run_console(lines, stdout(), &commands, &records, &metrics, &running);
            if let Err(e) = console {
                error!("Operator console failed: {}", e);
            }
            running.store(false, Ordering::Release);
            handle
                .join()
                .unwrap_or_else(|_| Err(Error::Io(io::Error::other("control loop thread panicked"))))
        }
        Err(e) => Err(e),
    };

    if let Some((handle, flag)) = dashboard {
        flag.store(false, Ordering::Release);
        if handle.join().is_err() {
            error!("Dashboard thread join failed");
        }
    }

    records.stop_consumer();
    let m = metrics.lock().clone();
    if let Err(e) = export_summary_csv(&config.logging.summary_path, &m, outcome.as_ref().ok(), records.dropped()) {
        warn!("Summary export failed: {}", e);
    }

    outcome
}

/// Opens the configured link and position source, then starts the loop thread.
fn connect(
    config: &Config,
    mode: Mode,
    receiver: CommandReceiver,
    ctx: LoopContext,
) -> Result<JoinHandle<Result<LoopSummary>>> {
    match mode {
        Mode::Simulated => {
            let rig = SimRig::new(SimConfig::default());
            let timeouts = LinkTimeouts {
                settle: Duration::ZERO,
                ..config.link.timeouts()
            };
            let link = ActuatorLink::establish(rig.transport(), timeouts)?;
            start_loop(config, link, rig.plant(), receiver, ctx)
        }
        Mode::Hardware => {
            let position = LinePositionSource::open(
                config.tracker.require_port()?,
                config.tracker.baud_rate,
                config.tracker.field,
                Duration::from_millis(config.tracker.timeout_ms),
            )?;
            let link = if config.link.port.eq_ignore_ascii_case("auto") {
                ActuatorLink::discover(&config.link.device_hint, config.link.baud_rate, config.link.timeouts())?
            } else {
                ActuatorLink::open(&config.link.port, config.link.baud_rate, config.link.timeouts())?
            };
            start_loop(config, link, position, receiver, ctx)
        }
    }
}

/// Enables the configured channels and hands the link to the control loop thread.
/// The controller clock starts here, after the link has settled.
fn start_loop<T, P>(
    config: &Config,
    mut link: ActuatorLink<T>,
    position: P,
    receiver: CommandReceiver,
    ctx: LoopContext,
) -> Result<JoinHandle<Result<LoopSummary>>>
where
    T: Transport + 'static,
    P: PositionSource + 'static,
{
    link.enable_channels(config.link.channel_mask()?)?;

    let (controller, state) = config.controller_at(Instant::now())?;
    ControlLoop::new(link, position, controller, state, receiver, ctx, config.control.loop_settings())
        .spawn(config.runtime.max_priority, config.runtime.core)
}
