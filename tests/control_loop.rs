use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use pneumatic_control::{
    control::{
        Channel, ChannelMask, Command, CommandChannel, CommandSender, ControlLoop, ControlState,
        Controller, LoopContext, LoopSettings, LoopSummary, Trajectory,
    },
    error::Error,
    link::{ActuatorLink, LinkTimeouts},
    sim::{Fault, SimConfig, SimPlant, SimRig, SimTransport},
    utils::{metrics::shared_metrics, record::RecordLog},
    Result,
};

const PERIOD: Duration = Duration::from_millis(20);

struct Harness {
    rig: SimRig,
    commands: CommandSender,
    ctx: LoopContext,
    control_loop: ControlLoop<SimTransport, SimPlant>,
}

fn harness(mask: ChannelMask, max_failures: u32, record_path: &str) -> Harness {
    let rig = SimRig::new(SimConfig::instant());
    let timeouts = LinkTimeouts {
        settle: Duration::ZERO,
        setup: Duration::from_millis(200),
        response: Duration::from_millis(30),
    };
    let mut link = ActuatorLink::establish(rig.transport(), timeouts).unwrap();
    link.enable_channels(mask).unwrap();

    let (commands, receiver) = CommandChannel::new();
    let ctx = LoopContext {
        running: Arc::new(AtomicBool::new(true)),
        metrics: shared_metrics(),
        records: Arc::new(RecordLog::new(std::env::temp_dir().join(record_path))),
    };
    let controller = Controller::new(Trajectory::RAMP, 0.125, Channel::C0, Instant::now());
    let settings = LoopSettings {
        period: PERIOD,
        max_consecutive_failures: max_failures,
    };
    let control_loop = ControlLoop::new(
        link,
        rig.plant(),
        controller,
        ControlState::default(),
        receiver,
        ctx.clone(),
        settings,
    );

    Harness { rig, commands, ctx, control_loop }
}

fn run_for(control_loop: ControlLoop<SimTransport, SimPlant>, running: Arc<AtomicBool>, dur: Duration) -> Result<LoopSummary> {
    let handle = thread::spawn(move || control_loop.run());
    thread::sleep(dur);
    running.store(false, Ordering::Release);
    handle.join().unwrap()
}

fn tail(frames: &[String], n: usize) -> Vec<&str> {
    frames[frames.len().saturating_sub(n)..].iter().map(String::as_str).collect()
}

#[test]
fn cancellation_depressurises_every_enabled_channel_before_release() {
    let h = harness(ChannelMask::new(true, false, true), 10, "it_cancel.csv");
    let running = h.ctx.running.clone();

    let summary = run_for(h.control_loop, running, Duration::from_millis(200)).unwrap();

    assert!(summary.ticks > 0);
    assert_eq!(tail(&h.rig.frames(), 3), ["c01225", "c21225", SimRig::RELEASED]);
    assert_eq!(h.rig.commanded(Channel::C0), Some(12.25));
    assert_eq!(h.rig.commanded(Channel::C2), Some(12.25));
}

#[test]
fn first_tick_from_rest_commands_expected_pressure() {
    let h = harness(ChannelMask::only(Channel::C0), 10, "it_first_tick.csv");
    h.rig.hold_position(Some(0.0));
    let running = h.ctx.running.clone();
    let metrics = h.ctx.metrics.clone();

    let handle = thread::spawn(move || h.control_loop.run());
    let deadline = Instant::now() + Duration::from_secs(2);
    while metrics.lock().ticks == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    running.store(false, Ordering::Release);
    handle.join().unwrap().unwrap();

    let m = metrics.lock();
    assert_eq!(m.p_des.front(), Some(&12.51));
    assert_eq!(m.z_des.front(), Some(&40.0));
    assert!(h.rig.frames().contains(&"c01251".to_string()));
}

#[test]
fn queued_commands_apply_in_fifo_order() {
    let h = harness(ChannelMask::only(Channel::C0), 10, "it_fifo.csv");
    h.commands.send(Command::set_position(50.0)).unwrap();
    h.commands.send(Command::adjust_position(0.5)).unwrap();
    h.commands.send(Command::adjust_position(0.5)).unwrap();
    h.commands.send(Command::set_kp(0.02)).unwrap();
    let running = h.ctx.running.clone();

    let summary = run_for(h.control_loop, running, Duration::from_millis(100)).unwrap();

    assert_eq!(summary.commands_applied, 4);
    assert_eq!(summary.final_state.z_des, 51.0);
    assert_eq!(summary.final_state.k_p, 0.02);
}

#[test]
fn protocol_timeouts_skip_ticks_without_stopping() {
    let h = harness(ChannelMask::only(Channel::C0), 10, "it_skip.csv");
    h.rig.inject(Fault::Silent);
    h.rig.inject(Fault::Silent);
    let running = h.ctx.running.clone();

    let summary = run_for(h.control_loop, running, Duration::from_millis(400)).unwrap();

    assert!(summary.skipped_ticks >= 1);
    assert!(summary.ticks >= 2, "loop kept ticking: {:?}", summary);
    assert!(h.ctx.metrics.lock().timeouts >= 1);
    assert_eq!(tail(&h.rig.frames(), 2), ["c01225", SimRig::RELEASED]);
}

#[test]
fn persistent_silence_aborts_but_still_attempts_close() {
    let h = harness(ChannelMask::only(Channel::C0), 3, "it_abort.csv");
    for _ in 0..50 {
        h.rig.inject(Fault::Silent);
    }
    let running = h.ctx.running.clone();

    let handle = thread::spawn(move || h.control_loop.run());
    let result = handle.join().unwrap();

    assert!(matches!(result, Err(Error::ProtocolTimeout { .. })));
    assert!(!running.load(Ordering::Acquire), "loop clears the running flag on exit");
    assert_eq!(h.ctx.metrics.lock().skipped_ticks, 3);
    assert_eq!(tail(&h.rig.frames(), 2), ["c01225", SimRig::RELEASED]);
}

#[test]
fn enabled_record_log_persists_one_row_per_tick() {
    let h = harness(ChannelMask::only(Channel::C0), 10, "it_records.csv");
    let records = h.ctx.records.clone();
    records.set_enabled(true);
    records.start_consumer().unwrap();
    let running = h.ctx.running.clone();

    let summary = run_for(h.control_loop, running, Duration::from_millis(150)).unwrap();
    records.stop_consumer();

    let text = std::fs::read_to_string(records.path()).unwrap();
    let rows: Vec<&str> = text.lines().skip(1).collect();
    assert_eq!(rows.len() as u64, summary.ticks);
    let fields: Vec<&str> = rows[0].split(',').collect();
    assert_eq!(fields.len(), 8);
    assert_eq!(fields[2], "40.000");
    let _ = std::fs::remove_file(records.path());
}

#[test]
fn spawned_loop_runs_and_joins_with_and_without_priority() {
    for (max_priority, core) in [(false, None), (true, Some(0))] {
        let h = harness(ChannelMask::only(Channel::C0), 10, "it_spawn.csv");
        let running = h.ctx.running.clone();
        let metrics = h.ctx.metrics.clone();

        let handle = h.control_loop.spawn(max_priority, core).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while metrics.lock().ticks < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        running.store(false, Ordering::Release);
        let summary = handle.join().unwrap().unwrap();

        assert!(summary.ticks >= 2, "priority={} core={:?}: {:?}", max_priority, core, summary);
        assert_eq!(tail(&h.rig.frames(), 2), ["c01225", SimRig::RELEASED]);
    }
}
