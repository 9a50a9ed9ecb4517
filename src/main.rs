// Multitrack Output
// Command line front end: probes the go-live endpoint and inspects local state

use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use multitrack_output::commands::{get_capabilities, get_recent_logs, probe_go_live_config, ProbeRequest};
use multitrack_output::services::{
    prune_logs, resolve_config_url, Identity, LaunchArgs, ReqwestTransport, SettingsManager,
};

const LOG_FILE_NAME: &str = "multitrack-output.log";
const RECENT_LOG_LINES: usize = 200;

// ============================================================================
// Logging
// ============================================================================

/// Writes every record to the log file and mirrors it to stderr
struct BroadcastLogger {
    file: Mutex<std::fs::File>,
    level: LevelFilter,
}

impl BroadcastLogger {
    fn new(log_dir: &Path, level: LevelFilter) -> Result<Self, Box<dyn std::error::Error>> {
        std::fs::create_dir_all(log_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(LOG_FILE_NAME))?;
        Ok(Self { file: Mutex::new(file), level })
    }
}

impl Log for BroadcastLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = Local::now();
        let date = timestamp.format("%Y-%m-%d");
        let time = timestamp.format("%H:%M:%S");
        let target = record.target();
        let level = record.level();
        let line = format!("[{date}][{time}][{target}][{level}] {}", record.args());

        if let Ok(mut file) = self.file.try_lock() {
            let _ = writeln!(file, "{line}");
        }

        // Keep stdout clean for command output
        if level <= Level::Warn || self.level >= LevelFilter::Debug {
            eprintln!("{line}");
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

fn init_logger(log_dir: &Path, level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
    let logger = BroadcastLogger::new(log_dir, level)?;
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(level);
    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = LaunchArgs::init(env::args().skip(1));

    // Load configuration from environment
    let data_dir = PathBuf::from(env::var("MULTITRACK_DATA_DIR").unwrap_or_else(|_| "data".to_string()));
    let log_dir = env::var("MULTITRACK_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.join("logs"));
    let debug = env::var("MULTITRACK_DEBUG")
        .ok()
        .and_then(|value| parse_bool(&value))
        .unwrap_or(args.multitrack_video_dev);

    init_logger(&log_dir, if debug { LevelFilter::Debug } else { LevelFilter::Info })?;
    log::info!("Multitrack output {} starting", env!("CARGO_PKG_VERSION"));

    let settings_manager = SettingsManager::new(data_dir.clone());
    let settings = settings_manager.load()?;

    match prune_logs(&log_dir, settings.log_retention_days) {
        Ok(0) => {}
        Ok(removed) => log::info!("Removed {removed} expired log files"),
        Err(e) => log::warn!("Failed to prune logs: {e}"),
    }

    match args.command.as_deref().unwrap_or("probe") {
        "probe" => {
            let config_url = resolve_config_url(args, &settings)?;
            let identity = Identity::process(&settings_manager);
            let request = ProbeRequest {
                config_url,
                stream_key: env::var("MULTITRACK_STREAM_KEY").unwrap_or_default(),
                rtmp_url: settings.multitrack_video_rtmp_url.clone(),
                maximum_aggregate_bitrate: settings.multitrack_video_maximum_aggregate_bitrate,
                maximum_video_tracks: settings.multitrack_video_maximum_video_tracks,
                capabilities: get_capabilities(env!("CARGO_PKG_VERSION"))?,
            };

            let report = probe_go_live_config(Arc::new(ReqwestTransport::new()), request, &identity).await?;
            log::info!(
                "Go-live config offers {} video and {} audio tracks",
                report.video_tracks.len(),
                report.audio_tracks.len()
            );
            print_json(&report)?;
        }
        "capabilities" => print_json(&get_capabilities(env!("CARGO_PKG_VERSION"))?)?,
        "logs" => {
            for line in get_recent_logs(&log_dir, RECENT_LOG_LINES)? {
                println!("{line}");
            }
        }
        other => {
            log::error!("Unknown command: {other}");
            eprintln!("Usage: multitrack-output [probe|capabilities|logs] [--config-url <url>] [--enable-multitrack-video-dev]");
            std::process::exit(2);
        }
    }

    log::logger().flush();
    Ok(())
}
