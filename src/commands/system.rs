// System Commands
// Host capabilities and log access for the command line front end

use std::path::Path;

use crate::models::Capabilities;
use crate::services::{read_recent_logs, system_info};

/// Capabilities this machine would report in a go-live request
pub fn get_capabilities(client_version: &str) -> Result<Capabilities, String> {
    let capabilities = system_info::collect_capabilities(client_version);
    log::debug!(
        "Collected capabilities: {} logical cores, {} bytes memory",
        capabilities.cpu.logical_cores,
        capabilities.memory.total
    );
    Ok(capabilities)
}

/// Tail of the newest log file
pub fn get_recent_logs(log_dir: &Path, max_lines: usize) -> Result<Vec<String>, String> {
    read_recent_logs(log_dir, max_lines)
}
