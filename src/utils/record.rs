//! record.rs
//! Per-tick status records and the persistent record log.
//!
//! - The control loop pushes into a bounded lock-free queue and never blocks on disk
//! - A background consumer drains the queue into CSV, flushing in batches
//! - Enable/disable and clear only touch persistence; control is unaffected

use std::{
    fmt,
    fs::File,
    io::{self, BufWriter, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crossbeam_queue::ArrayQueue;
use csv::{Writer, WriterBuilder};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Result;

const RECORD_CAPACITY: usize = 8192;
const CONSUMER_POLL_MS: u64 = 5;
const FLUSH_BATCHES: usize = 8;

pub const RECORD_HEADER: [&str; 8] = [
    "ts_epoch_ms",
    "time_diff",
    "z_des",
    "z_act",
    "p_des",
    "p_act",
    "k_p",
    "k_i",
];

/// One line of control history, emitted at the end of every completed tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatusRecord {
    /// Seconds since trajectory start, or since loop start when no trajectory runs
    pub time_diff: f64,
    pub z_des: f64,
    pub z_act: f64,
    pub p_des: f64,
    pub p_act: f64,
    pub k_p: f64,
    pub k_i: f64,
}

impl fmt::Display for StatusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.3},{:.3},{:.3},{:.3},{:.3},{:.3},{:.3}",
            self.time_diff, self.z_des, self.z_act, self.p_des, self.p_act, self.k_p, self.k_i
        )
    }
}

#[derive(Debug, Serialize)]
struct CsvRow {
    ts_epoch_ms: u64,
    time_diff: String,
    z_des: String,
    z_act: String,
    p_des: String,
    p_act: String,
    k_p: String,
    k_i: String,
}

impl CsvRow {
    fn new(ts_epoch_ms: u64, r: &StatusRecord) -> Self {
        let f = |v: f64| format!("{:.3}", v);
        Self {
            ts_epoch_ms,
            time_diff: f(r.time_diff),
            z_des: f(r.z_des),
            z_act: f(r.z_act),
            p_des: f(r.p_des),
            p_act: f(r.p_act),
            k_p: f(r.k_p),
            k_i: f(r.k_i),
        }
    }
}

enum Entry {
    Record { ts_epoch_ms: u64, record: StatusRecord },
    /// Truncate the file and start over
    Clear,
}

pub struct RecordLog {
    path: PathBuf,
    queue: Arc<ArrayQueue<Entry>>,
    enabled: AtomicBool,
    dropped: Arc<AtomicU64>,
    written: Arc<AtomicU64>,
    consumer_running: Arc<AtomicBool>,
    consumer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RecordLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_capacity(path, RECORD_CAPACITY)
    }

    pub fn with_capacity(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            queue: Arc::new(ArrayQueue::new(capacity.max(1))),
            enabled: AtomicBool::new(false),
            dropped: Arc::new(AtomicU64::new(0)),
            written: Arc::new(AtomicU64::new(0)),
            consumer_running: Arc::new(AtomicBool::new(false)),
            consumer_handle: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // PRODUCER: control loop thread
    // ========================================================================

    /// Queues `record` if persistence is enabled. Never blocks; counts a drop when full.
    pub fn record(&self, record: StatusRecord) {
        if !self.is_enabled() {
            return;
        }
        let ts_epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        if self.queue.push(Entry::Record { ts_epoch_ms, record }).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    // ========================================================================
    // CONTROL: operator side
    // ========================================================================

    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            info!("Record logging {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Discards everything recorded so far. Older queued records are superseded,
    /// so evicting one of them to make room is harmless.
    pub fn clear(&self) {
        let _ = self.queue.force_push(Entry::Clear);
        info!("Record log cleared");
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Rows written to disk so far (reset by `clear`).
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    // ========================================================================
    // CONSUMER THREAD: drains the queue, batches writes
    // ========================================================================

    pub fn start_consumer(&self) -> Result<()> {
        let mut guard = self.consumer_handle.lock();
        if guard.is_some() {
            warn!("Record consumer already running");
            return Ok(());
        }

        let mut wtr = open_writer(&self.path)?;
        let path = self.path.clone();
        let queue = Arc::clone(&self.queue);
        let written = Arc::clone(&self.written);
        let dropped = Arc::clone(&self.dropped);
        let running = Arc::clone(&self.consumer_running);
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("record-log".into())
            .spawn(move || {
                let mut flush_counter = 0usize;

                while running.load(Ordering::SeqCst) {
                    let mut any = false;
                    for _ in 0..256 {
                        match queue.pop() {
                            Some(entry) => {
                                any = true;
                                write_entry(&mut wtr, &path, entry, &written);
                            }
                            None => break,
                        }
                    }
                    if any {
                        flush_counter += 1;
                        if flush_counter >= FLUSH_BATCHES {
                            wtr.flush().ok();
                            flush_counter = 0;
                        }
                    } else {
                        thread::sleep(Duration::from_millis(CONSUMER_POLL_MS));
                    }
                }

                // Final drain
                while let Some(entry) = queue.pop() {
                    write_entry(&mut wtr, &path, entry, &written);
                }
                wtr.flush().ok();
                debug!(
                    "[RecordLog::consumer] exiting. written={} dropped={}",
                    written.load(Ordering::Relaxed),
                    dropped.load(Ordering::Relaxed)
                );
            })?;

        *guard = Some(handle);
        info!("Recording control history to {}", self.path.display());
        Ok(())
    }

    /// Stops the consumer after it has drained and flushed everything queued.
    pub fn stop_consumer(&self) {
        self.consumer_running.store(false, Ordering::SeqCst);
        if let Some(h) = self.consumer_handle.lock().take() {
            if h.join().is_err() {
                error!("Record consumer panicked");
            }
        }
    }
}

impl Drop for RecordLog {
    fn drop(&mut self) {
        self.stop_consumer();
    }
}

fn open_writer(path: &Path) -> Result<Writer<BufWriter<File>>> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let file = File::create(path)?;
    let mut wtr = WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::new(file));
    wtr.write_record(RECORD_HEADER).map_err(io::Error::from)?;
    Ok(wtr)
}

/// Empties the file behind `wtr` in place and rewrites the header.
/// Buffered rows are flushed first so nothing lands past the new end later.
fn truncate_writer(wtr: &mut Writer<BufWriter<File>>) -> io::Result<()> {
    wtr.flush()?;
    let mut file: &File = wtr.get_ref().get_ref();
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    wtr.write_record(RECORD_HEADER).map_err(io::Error::from)?;
    Ok(())
}

fn write_entry(wtr: &mut Writer<BufWriter<File>>, path: &Path, entry: Entry, written: &AtomicU64) {
    match entry {
        Entry::Record { ts_epoch_ms, record } => {
            if let Err(e) = wtr.serialize(CsvRow::new(ts_epoch_ms, &record)) {
                error!("Failed to write record: {}", e);
                return;
            }
            written.fetch_add(1, Ordering::Relaxed);
        }
        Entry::Clear => match truncate_writer(wtr) {
            Ok(()) => written.store(0, Ordering::Relaxed),
            Err(e) => error!("Failed to truncate record log {}: {}", path.display(), e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_csv(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pneumatic_record_{}_{}.csv", std::process::id(), name))
    }

    fn record(t: f64) -> StatusRecord {
        StatusRecord {
            time_diff: t,
            z_des: 40.0,
            z_act: 39.5,
            p_des: 12.51,
            p_act: 12.0,
            k_p: 0.012,
            k_i: 0.012,
        }
    }

    fn data_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .skip(1)
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn display_uses_three_decimals() {
        assert_eq!(record(0.07).to_string(), "0.070,40.000,39.500,12.510,12.000,0.012,0.012");
    }

    #[test]
    fn records_only_while_enabled() {
        let path = temp_csv("enabled");
        let log = RecordLog::new(&path);
        log.start_consumer().unwrap();

        log.record(record(0.0));
        log.set_enabled(true);
        log.record(record(0.07));
        log.record(record(0.14));
        log.set_enabled(false);
        log.record(record(0.21));
        log.stop_consumer();

        let lines = data_lines(&path);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(",0.070,40.000,39.500,12.510,12.000,0.012,0.012"));
        let header = std::fs::read_to_string(&path).unwrap();
        assert!(header.starts_with("ts_epoch_ms,time_diff,z_des,z_act,p_des,p_act,k_p,k_i"));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn clear_discards_earlier_rows() {
        let path = temp_csv("clear");
        let log = RecordLog::new(&path);
        log.set_enabled(true);
        log.start_consumer().unwrap();

        log.record(record(1.0));
        log.record(record(2.0));
        log.clear();
        log.record(record(3.0));
        log.stop_consumer();

        let lines = data_lines(&path);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains(",3.000,"));
        assert_eq!(log.written(), 1);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn clear_after_long_run_leaves_header_and_new_rows_only() {
        let path = temp_csv("clear_long");
        let log = RecordLog::new(&path);
        log.set_enabled(true);
        log.start_consumer().unwrap();

        for i in 0..400 {
            log.record(record(i as f64 * 0.07));
            if i % 50 == 0 {
                thread::sleep(Duration::from_millis(1));
            }
        }
        thread::sleep(Duration::from_millis(50));
        log.clear();
        log.record(record(99.0));
        log.stop_consumer();

        let bytes = std::fs::read(&path).unwrap();
        assert!(!bytes.contains(&0), "no NUL padding after truncation");
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2, "{:?}", lines);
        assert_eq!(lines[0], RECORD_HEADER.join(","));
        assert!(lines[1].contains(",99.000,"));
        assert_eq!(log.written(), 1);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn full_queue_counts_drops() {
        let log = RecordLog::with_capacity(temp_csv("unused"), 2);
        log.set_enabled(true);
        for i in 0..5 {
            log.record(record(i as f64));
        }
        assert_eq!(log.dropped(), 3);
    }
}
