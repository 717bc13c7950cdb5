//! control_loop.rs
//! Periodic control loop: the only owner of the actuator link and the control state.
//!
//! Each period:
//! 1. Drain queued operator commands in FIFO order
//! 2. Run one controller tick (recoverable faults skip the tick)
//! 3. Publish the snapshot, persist the record, sleep until `tick_start + period`
//!
//! Cancellation is cooperative through `running`. Every exit path, including a fatal
//! tick error, drains the command queue and closes the link so the actuator is
//! returned to the default pressure before the port is released.

use log::{debug, error, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::control::command::CommandReceiver;
use crate::control::controller::Controller;
use crate::control::state::{ControlSnapshot, ControlState};
use crate::error::Result;
use crate::link::{ActuatorLink, Transport};
use crate::position::PositionSource;
use crate::utils::metrics::SharedMetrics;
use crate::utils::record::RecordLog;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    pub period: Duration,
    /// Consecutive skipped ticks tolerated before the loop gives up; 0 = unlimited
    pub max_consecutive_failures: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(70),
            max_consecutive_failures: 10,
        }
    }
}

/// Handles shared between the loop and the rest of the process.
#[derive(Clone)]
pub struct LoopContext {
    pub running: Arc<AtomicBool>,
    pub metrics: SharedMetrics,
    pub records: Arc<RecordLog>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSummary {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub overruns: u64,
    pub commands_applied: u64,
    pub final_state: ControlSnapshot,
}

pub struct ControlLoop<T: Transport, P: PositionSource> {
    link: ActuatorLink<T>,
    position: P,
    controller: Controller,
    state: ControlState,
    commands: CommandReceiver,
    ctx: LoopContext,
    settings: LoopSettings,
}

impl<T, P> ControlLoop<T, P>
where
    T: Transport + 'static,
    P: PositionSource + 'static,
{
    pub fn new(
        link: ActuatorLink<T>,
        position: P,
        controller: Controller,
        state: ControlState,
        commands: CommandReceiver,
        ctx: LoopContext,
        settings: LoopSettings,
    ) -> Self {
        Self { link, position, controller, state, commands, ctx, settings }
    }

    /// Runs on a dedicated thread, optionally at maximum OS priority and pinned to `core`.
    pub fn spawn(
        self,
        max_priority: bool,
        core: Option<usize>,
    ) -> Result<JoinHandle<Result<LoopSummary>>> {
        let builder = thread::Builder::new().name("control-loop".into());
        let body = move || {
            if let Some(core) = core {
                pin_to_core(core);
            }
            self.run()
        };

        let handle = if max_priority {
            builder.spawn_with_priority(ThreadPriority::Max, move |prio| {
                if let Err(e) = prio {
                    warn!("Could not raise control loop priority: {:?}", e);
                }
                body()
            })?
        } else {
            builder.spawn(body)?
        };
        Ok(handle)
    }

    /// Runs until `running` is cleared or a fatal error occurs, then shuts down.
    pub fn run(mut self) -> Result<LoopSummary> {
        let period = self.settings.period;
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        info!("Control loop started (period {:?}, channel {})", period, self.controller.channel());

        let mut commands_applied = 0u64;
        let mut consecutive_failures = 0u32;
        let mut outcome = Ok(());

        while self.ctx.running.load(Ordering::Acquire) {
            let tick_start = Instant::now();
            commands_applied += self.apply_commands(tick_start);

            match self
                .controller
                .tick(&mut self.link, &mut self.position, &mut self.state, tick_start)
            {
                Ok(record) => {
                    consecutive_failures = 0;
                    debug!("{}", record);
                    self.ctx.records.record(record);

                    let elapsed = self.controller.time_diff(&self.state, tick_start);
                    let snapshot = self.state.snapshot(elapsed);
                    let tick_us = tick_start.elapsed().as_micros() as u64;
                    self.ctx.metrics.lock().record_tick(snapshot, tick_us);
                }
                Err(e) if e.is_recoverable() => {
                    consecutive_failures += 1;
                    warn!("Tick skipped: {}", e);
                    self.ctx.metrics.lock().record_skip(&e);

                    let limit = self.settings.max_consecutive_failures;
                    if limit > 0 && consecutive_failures >= limit {
                        error!("{} consecutive tick failures; stopping control loop", consecutive_failures);
                        outcome = Err(e);
                        break;
                    }
                }
                Err(e) => {
                    error!("Control loop aborted: {}", e);
                    outcome = Err(e);
                    break;
                }
            }

            // Fixed delay: the next release is measured from this tick's start
            let next_release = tick_start + period;
            let now = Instant::now();
            if now < next_release {
                sleeper.sleep(next_release - now);
            } else {
                self.ctx.metrics.lock().record_overrun();
                debug!("Tick overran its period by {:?}", now - next_release);
            }
        }

        self.shutdown(commands_applied, outcome)
    }

    fn apply_commands(&mut self, now: Instant) -> u64 {
        let mut applied = 0;
        for cmd in self.commands.drain() {
            cmd.apply_to(&mut self.state, now);
            applied += 1;
        }
        applied
    }

    fn shutdown(mut self, mut commands_applied: u64, outcome: Result<()>) -> Result<LoopSummary> {
        // Commands queued during the last tick still reach the final state
        commands_applied += self.apply_commands(Instant::now());
        let closed = self.link.close();
        self.ctx.running.store(false, Ordering::Release);

        let summary = {
            let m = self.ctx.metrics.lock();
            LoopSummary {
                ticks: m.ticks,
                skipped_ticks: m.skipped_ticks,
                overruns: m.overruns,
                commands_applied,
                final_state: self.state.snapshot(self.controller.time_diff(&self.state, Instant::now())),
            }
        };
        info!(
            "Control loop stopped: {} ticks, {} skipped, {} overruns",
            summary.ticks, summary.skipped_ticks, summary.overruns
        );

        outcome?;
        closed?;
        Ok(summary)
    }
}

fn pin_to_core(core: usize) {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    match core_ids.get(core) {
        Some(core_id) if core_affinity::set_for_current(*core_id) => {
            info!("Control loop pinned to core {}", core);
        }
        Some(_) => error!("Failed to pin control loop to core {}", core),
        None => error!("Core {} not found among available system cores", core),
    }
}
