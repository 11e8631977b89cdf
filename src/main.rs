//! ==============================================================================
//! main.rs - attendance device sync loop
//! ==============================================================================
//!
//! purpose:
//!     keeps the device's teacher and student rosters in step with firestore
//!     and reports device status to the realtime database.
//!
//! responsibilities:
//!     - load device.toml (or defaults) and set up tracing
//!     - build the cloud client (rest or memory backend)
//!     - each cycle: probe the network, sync both rosters, push status
//!     - keep running on failure with whatever rosters it already has
//!
//! usage:
//!     attendance-sync [path/to/device.toml]
//!
//! ==============================================================================

use anyhow::Result;
use attendance_sync::config::{Backend, DeviceConfig};
use attendance_sync::{
    sync_collection, update_node, write_node, CloudProvider, DeviceFlags, Document, FailureLog,
    FirestoreRtdb, HeartbeatWatchdog, MemoryCloud, Roster, SyncContext,
};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);

    // the level lives in the config, so peek at it before tracing is up
    init_tracing(&DeviceConfig::startup_log_level(config_path.as_deref()));

    let config = DeviceConfig::load_or_default(config_path.as_deref());
    config.print_summary();

    match config.firebase.backend {
        Backend::Rest => run(&config, FirestoreRtdb::new(&config.firebase)?),
        Backend::Memory => run(&config, MemoryCloud::new()),
    }
}

fn run<C: CloudProvider>(config: &DeviceConfig, cloud: C) -> Result<()> {
    let flags = DeviceFlags {
        sd_mode: config.device.sd_mode,
        connected: false,
    };
    let mut ctx = SyncContext::new(
        flags,
        config.firebase.project_id.clone(),
        cloud,
        HeartbeatWatchdog::new(),
    );
    let write_log = if config.logging.log_write_failures {
        FailureLog::Log
    } else {
        FailureLog::Quiet
    };

    let mut teachers = Roster::new();
    let mut students = Roster::new();
    let status_path = format!("devices/{}/status", config.device.device_id);
    let rosters_path = format!("devices/{}/rosters", config.device.device_id);
    let interval = Duration::from_secs(config.polling.interval_seconds);

    tracing::info!("Starting sync loop ({}s interval)", interval.as_secs());

    loop {
        ctx.flags.connected = probe_network(
            &config.network.probe_host,
            Duration::from_millis(config.network.probe_timeout_ms),
        );

        tracing::debug!(
            since_last_feed_ms = ctx.watchdog.since_last_feed().as_millis() as u64,
            "sync cycle"
        );

        if !ctx.gate_open() {
            tracing::info!(
                sd_mode = ctx.flags.sd_mode,
                connected = ctx.flags.connected,
                "cloud unavailable, keeping current rosters"
            );
        } else {
            let collections = &config.collections;
            // failures are already logged; the stale roster stays in use
            let _ = sync_collection(
                &mut ctx,
                &collections.teachers,
                &mut teachers,
                collections.teacher_role.as_deref(),
            );
            let _ = sync_collection(
                &mut ctx,
                &collections.students,
                &mut students,
                collections.student_role.as_deref(),
            );

            let status = Document::from(serde_json::json!({
                "lastSync": timestamp_ms(),
                "teachers": teachers.len(),
                "students": students.len(),
            }));
            let _ = update_node(&mut ctx, &status_path, &status);

            let uids = Document::from(serde_json::json!({
                "teachers": teachers.keys().collect::<Vec<_>>(),
                "students": students.keys().collect::<Vec<_>>(),
            }));
            let _ = write_node(&mut ctx, &rosters_path, &uids, write_log);
        }

        std::thread::sleep(interval);
    }
}

/// network counts as up when a tcp connect to `host` succeeds in time
fn probe_network(host: &str, timeout: Duration) -> bool {
    let addrs = match host.to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::debug!("probe {} failed to resolve: {}", host, e);
            return false;
        }
    };
    addrs
        .into_iter()
        .any(|addr| TcpStream::connect_timeout(&addr, timeout).is_ok())
}

fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
