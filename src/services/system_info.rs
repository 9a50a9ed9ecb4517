// System Info
// Host capabilities reported in the go-live request

use std::fs;

use crate::models::{Capabilities, ClientInfo, CpuInfo, MemoryInfo, SystemDetails, CLIENT_NAME};

const MAX_VERSION_LEN: usize = 128;

/// Collect CPU, memory and OS details of this machine
pub fn collect_capabilities(client_version: &str) -> Capabilities {
    let cpuinfo = fs::read_to_string("/proc/cpuinfo").unwrap_or_default();
    let meminfo = fs::read_to_string("/proc/meminfo").unwrap_or_default();
    let os_release = fs::read_to_string("/etc/os-release").unwrap_or_default();
    let kernel = fs::read_to_string("/proc/sys/kernel/osrelease").unwrap_or_default();

    let mut cpu = parse_cpuinfo(&cpuinfo);
    if cpu.logical_cores <= 0 {
        cpu.logical_cores = std::thread::available_parallelism()
            .map(|n| n.get() as i32)
            .unwrap_or(1);
    }
    if cpu.physical_cores <= 0 {
        cpu.physical_cores = cpu.logical_cores;
    }
    if let Some(max_khz) = fs::read_to_string("/sys/devices/system/cpu/cpu0/cpufreq/cpuinfo_max_freq")
        .ok()
        .and_then(|text| text.trim().parse::<u64>().ok())
    {
        cpu.speed = Some((max_khz / 1000) as u32);
    }

    Capabilities {
        client: ClientInfo { name: CLIENT_NAME.to_string(), version: client_version.to_string() },
        cpu,
        memory: parse_meminfo(&meminfo),
        gaming_features: None,
        system: system_details(&os_release, kernel.trim()),
        gpu: None,
        extra_views: None,
    }
}

/// Core counts, model name and clock from `/proc/cpuinfo`
pub fn parse_cpuinfo(text: &str) -> CpuInfo {
    let mut logical = 0;
    let mut cores_per_package: Option<i32> = None;
    let mut packages = std::collections::BTreeSet::new();
    let mut name = None;
    let mut mhz: Option<f64> = None;

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        match key {
            "processor" => logical += 1,
            "model name" if name.is_none() => name = Some(value.to_string()),
            "physical id" => {
                packages.insert(value.to_string());
            }
            "cpu cores" if cores_per_package.is_none() => cores_per_package = value.parse().ok(),
            "cpu MHz" if mhz.is_none() => mhz = value.parse().ok(),
            _ => {}
        }
    }

    let physical = cores_per_package
        .map(|cores| cores * packages.len().max(1) as i32)
        .unwrap_or(logical);

    CpuInfo {
        physical_cores: physical,
        logical_cores: logical,
        speed: mhz.map(|mhz| mhz.round() as u32),
        name,
    }
}

/// Total and available memory (bytes) from `/proc/meminfo`
pub fn parse_meminfo(text: &str) -> MemoryInfo {
    let field = |name: &str| -> u64 {
        text.lines()
            .find_map(|line| line.strip_prefix(name))
            .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
            .unwrap_or(0)
    };
    MemoryInfo { total: field("MemTotal"), free: field("MemAvailable") }
}

fn os_release_field<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    text.lines()
        .find_map(|line| line.strip_prefix(key)?.strip_prefix('='))
        .map(|value| value.trim().trim_matches('"'))
        .filter(|value| !value.is_empty())
}

/// Distribution and kernel details
pub fn system_details(os_release: &str, kernel_version: &str) -> SystemDetails {
    let name = os_release_field(os_release, "NAME").unwrap_or("Linux").to_string();
    let release = os_release_field(os_release, "VERSION_ID").unwrap_or("unknown").to_string();

    let mut version = if kernel_version.is_empty() {
        "unknown".to_string()
    } else {
        kernel_version.to_string()
    };
    if version.len() > MAX_VERSION_LEN {
        let mut cut = MAX_VERSION_LEN;
        while !version.is_char_boundary(cut) {
            cut -= 1;
        }
        version.truncate(cut);
    }

    SystemDetails {
        version,
        name,
        build: 0,
        release,
        revision: 0,
        bits: (std::mem::size_of::<usize>() * 8) as i32,
        arm: cfg!(any(target_arch = "arm", target_arch = "aarch64")),
        arm_emulation: false,
    }
}
