//! Status dashboard served over HTTP.
//!
//! - `/status`: current control snapshot plus loop counters (plain text)
//! - `/history.csv`: the bounded recent history of positions and pressures
//!
//! The server thread polls with a short receive timeout so clearing the shutdown flag
//! stops it promptly. Responses are built from a copy taken under the metrics lock.

use log::{error, info, warn};
use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};
use tiny_http::{Header, Response, Server};

use crate::error::{Error, Result};
use crate::utils::metrics::{LoopMetrics, SharedMetrics};

const POLL_MS: u64 = 100;

/// Starts the web server on `addr`.
/// Returns the server thread and a flag that stops it when set to false.
pub fn start_dashboard(
    addr: &str,
    metrics: SharedMetrics,
) -> Result<(thread::JoinHandle<()>, Arc<AtomicBool>)> {
    let server = Server::http(addr)
        .map_err(|e| Error::Io(io::Error::other(format!("dashboard bind {}: {}", addr, e))))?;
    info!("Dashboard listening on http://{}", addr);

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();

    let handle = thread::Builder::new()
        .name("dashboard".into())
        .spawn(move || {
            while flag.load(Ordering::Relaxed) {
                let request = match server.recv_timeout(Duration::from_millis(POLL_MS)) {
                    Ok(Some(rq)) => rq,
                    Ok(None) => continue,
                    Err(e) => {
                        error!("Dashboard receive failed: {}", e);
                        break;
                    }
                };

                let snapshot = metrics.lock().clone();
                let (status, content_type, body) = route(request.url(), &snapshot);
                let mut response = Response::from_string(body).with_status_code(status);
                if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes()) {
                    response = response.with_header(header);
                }
                if let Err(e) = request.respond(response) {
                    warn!("Dashboard response failed: {}", e);
                }
            }
            info!("Dashboard stopped");
        })?;

    Ok((handle, running))
}

/// Maps a request path to `(status, content type, body)`.
pub fn route(url: &str, m: &LoopMetrics) -> (u16, &'static str, String) {
    let path = url.split('?').next().unwrap_or(url);
    match path {
        "/" | "/status" => (200, "text/plain; charset=utf-8", status_text(m)),
        "/history.csv" => (200, "text/csv", m.history_csv()),
        _ => (404, "text/plain; charset=utf-8", format!("no such resource: {}\n", path)),
    }
}

fn status_text(m: &LoopMetrics) -> String {
    format!(
        "{}\n\nticks: {}\nskipped: {} (timeouts {}, decode {}, position {})\noverruns: {}\n",
        m.latest,
        m.ticks,
        m.skipped_ticks,
        m.timeouts,
        m.decode_errors,
        m.position_errors,
        m.overruns
    )
}
