//! operator.rs
//! Line-oriented operator console: the command source for the control loop.
//!
//! - `a` / `d`: raise / lower z_des by 0.5 mm
//! - `z <mm>`, `kp <v>`, `ki <v>`: set position or gains
//! - `start` / `stop`: run or halt the trajectory
//! - `log on`, `log off`, `log clear`: record persistence
//! - `s`: status, `q`: quit

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use log::{error, info, warn};
use std::{
    io::{self, BufRead, Write},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use crate::control::command::{Command, CommandSender};
use crate::control::state::DEFAULT_PRESSURE_PSI;
use crate::error::Result;
use crate::utils::metrics::SharedMetrics;
use crate::utils::record::RecordLog;

pub const ADJUST_STEP_MM: f64 = 0.5;
const INPUT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatorAction {
    Send(Command),
    Logging(LogControl),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogControl {
    Enable,
    Disable,
    Clear,
}

/// Parses one console line. Blank lines yield `Ok(None)`.
pub fn parse_operator_line(line: &str) -> std::result::Result<Option<OperatorAction>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();
    if let Some(extra) = words.next() {
        return Err(format!("unexpected argument '{}'", extra));
    }

    let number = |name: &str| -> std::result::Result<f64, String> {
        let raw = arg.ok_or_else(|| format!("'{}' needs a value", name))?;
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(format!("'{}' is not a number", raw)),
        }
    };
    let bare = |action: OperatorAction| match arg {
        None => Ok(action),
        Some(a) => Err(format!("'{}' takes no argument (got '{}')", verb, a)),
    };

    let action = match verb.to_ascii_lowercase().as_str() {
        "a" => bare(OperatorAction::Send(Command::adjust_position(ADJUST_STEP_MM)))?,
        "d" => bare(OperatorAction::Send(Command::adjust_position(-ADJUST_STEP_MM)))?,
        "z" => OperatorAction::Send(Command::set_position(number("z")?)),
        "kp" => OperatorAction::Send(Command::set_kp(number("kp")?)),
        "ki" => OperatorAction::Send(Command::set_ki(number("ki")?)),
        "start" => bare(OperatorAction::Send(Command::start_trajectory()))?,
        "stop" => bare(OperatorAction::Send(Command::stop_trajectory()))?,
        "log" => match arg {
            Some("on") => OperatorAction::Logging(LogControl::Enable),
            Some("off") => OperatorAction::Logging(LogControl::Disable),
            Some("clear") => OperatorAction::Logging(LogControl::Clear),
            _ => return Err("usage: log on|off|clear".into()),
        },
        "s" | "status" => bare(OperatorAction::Status)?,
        "h" | "help" | "?" => bare(OperatorAction::Help)?,
        "q" | "quit" | "exit" => bare(OperatorAction::Quit)?,
        other => return Err(format!("unknown command '{}' (h for help)", other)),
    };
    Ok(Some(action))
}

/// Forwards lines of `input` to a channel from a background thread.
/// One reader serves the whole process so no line is lost between sessions.
pub fn spawn_line_reader<R>(input: R) -> io::Result<Receiver<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = channel::unbounded();
    thread::Builder::new().name("operator-input".into()).spawn(move || {
        for line in input.lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Operator input failed: {}", e);
                    break;
                }
            }
        }
    })?;
    Ok(rx)
}

/// Lines from `rx` until the reader hangs up or `running` is cleared.
/// Polls so a loop that stops on its own ends the console without waiting for input.
pub fn polled_lines<'a>(
    rx: &'a Receiver<String>,
    running: &'a AtomicBool,
) -> impl Iterator<Item = io::Result<String>> + 'a {
    std::iter::from_fn(move || {
        loop {
            if !running.load(Ordering::Acquire) {
                return None;
            }
            match rx.recv_timeout(INPUT_POLL) {
                Ok(line) => return Some(Ok(line)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    })
}

/// Handles operator lines until `q`, end of input, or `running` is cleared.
/// Parse errors are reported on `out` and never reach the control loop.
/// When the loop stops by itself the operator is told the actuator was released.
pub fn run_console<I, W>(
    lines: I,
    mut out: W,
    commands: &CommandSender,
    records: &RecordLog,
    metrics: &SharedMetrics,
    running: &AtomicBool,
) -> Result<()>
where
    I: IntoIterator<Item = io::Result<String>>,
    W: Write,
{
    writeln!(out, "Operator console ready (h for help)")?;
    let mut quit = false;

    for line in lines {
        if !running.load(Ordering::Acquire) {
            break;
        }
        let line = line?;
        let action = match parse_operator_line(&line) {
            Ok(Some(action)) => action,
            Ok(None) => continue,
            Err(msg) => {
                writeln!(out, "Error: {}", msg)?;
                continue;
            }
        };

        match action {
            OperatorAction::Send(cmd) => {
                if let Err(e) = commands.send(cmd) {
                    warn!("Command {:?} not delivered: {}", cmd, e);
                    break;
                }
            }
            OperatorAction::Logging(LogControl::Enable) => records.set_enabled(true),
            OperatorAction::Logging(LogControl::Disable) => records.set_enabled(false),
            OperatorAction::Logging(LogControl::Clear) => records.clear(),
            OperatorAction::Status => {
                let m = metrics.lock();
                writeln!(out, "{}", m.latest)?;
                writeln!(out, "ticks: {}  skipped: {}  overruns: {}", m.ticks, m.skipped_ticks, m.overruns)?;
            }
            OperatorAction::Help => writeln!(out, "{}", HELP)?,
            OperatorAction::Quit => {
                info!("Operator requested shutdown");
                quit = true;
                break;
            }
        }
    }

    if !quit && !running.load(Ordering::Acquire) {
        writeln!(
            out,
            "Control loop stopped; enabled channels set to {:.2} psi.",
            DEFAULT_PRESSURE_PSI
        )?;
    }
    running.store(false, Ordering::Release);
    Ok(())
}

const HELP: &str = "a/d: z_des +/-0.5 mm | z <mm> | kp <v> | ki <v> | start/stop trajectory | \
log on|off|clear | s: status | q: quit";
