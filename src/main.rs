mod attendance;
mod authz;
mod backup;
mod config;
mod courses;
mod db;
mod enrollments;
mod error;
mod ipc;
mod model;
mod reports;
mod stats;
mod users;

#[cfg(test)]
mod testutil;

use std::io::{self, BufRead, Write};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::DaemonConfig;

/// Logs go to stderr; stdout carries the protocol.
fn setup_logging(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn open_workspace(state: &mut ipc::AppState, cfg: &DaemonConfig) {
    let Some(path) = cfg.workspace.as_ref() else {
        return;
    };
    match db::open_db(path) {
        Ok(conn) => {
            if let Err(e) = db::seed_bootstrap_admin(&conn) {
                warn!(error = %format!("{e:#}"), "failed to seed bootstrap admin");
            }
            state.workspace = Some(path.clone());
            state.db = Some(conn);
        }
        Err(e) => error!(
            path = %path.display(),
            error = %format!("{e:#}"),
            "failed to open workspace from environment"
        ),
    }
}

fn main() {
    let cfg = DaemonConfig::from_env();
    setup_logging(&cfg.log_filter);
    info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let mut state = ipc::AppState::default();
    open_workspace(&mut state, &cfg);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                warn!(error = %e, "malformed request line");
                ipc::err("", "bad_json", e.to_string(), None)
            }
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    info!("stdin closed, shutting down");
}
