//! # Cluster statistics snapshot.
//!
//! [`ClusterStats`] is the payload of `masterStatus` responses. Every OS probe is
//! best effort: a probe that fails leaves its field `null` (or empty) instead of
//! failing the snapshot.
//!
//! ```json
//! {
//!   "master":  { "coresUsed": 4, "pid": 4242, "uptimeSecs": 81 },
//!   "os":      { "platform": "linux", "arch": "x86_64", "release": "6.8.0", "name": "Linux 24.04 Ubuntu" },
//!   "osStats": { "averageLoad": [0.4, 0.3, 0.2], "memoryUsageAtBoot": 9437184,
//!                "totalMem": 16777216000, "currentMemoryUsage": 10485760, "cpu": [...] },
//!   "workers": { "1": { "id": 1, "pid": 4243, "state": "listening", ... } },
//!   "hostname": "build-07"
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;
use sysinfo::{ProcessesToUpdate, System};

use super::worker::WorkerStatus;
use crate::process::WorkerId;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStats {
    pub master: MasterStats,
    pub os: OsInfo,
    pub os_stats: OsStats,
    pub workers: BTreeMap<WorkerId, WorkerStatus>,
    pub hostname: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterStats {
    pub cores_used: usize,
    pub pid: u32,
    pub uptime_secs: u64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OsInfo {
    pub platform: &'static str,
    pub arch: &'static str,
    pub release: Option<String>,
    pub name: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OsStats {
    /// 1, 5 and 15 minute load averages.
    pub average_load: [f64; 3],
    /// Master resident memory (bytes) when the collector was created.
    pub memory_usage_at_boot: Option<u64>,
    /// Total system memory (bytes).
    pub total_mem: u64,
    /// Master resident memory (bytes) now.
    pub current_memory_usage: Option<u64>,
    pub cpu: Vec<CpuInfo>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuInfo {
    pub model: String,
    pub speed_mhz: u64,
}

/// Gathers [`ClusterStats`]; holds the `sysinfo` state between snapshots.
pub struct StatsCollector {
    started: Instant,
    boot_memory: Option<u64>,
    system: Mutex<System>,
}

impl StatsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        let boot_memory = process_memory(&mut system);
        Self {
            started: Instant::now(),
            boot_memory,
            system: Mutex::new(system),
        }
    }

    pub fn collect(&self, cores_used: usize, workers: BTreeMap<WorkerId, WorkerStatus>) -> ClusterStats {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory();
        system.refresh_cpu_all();

        let load = System::load_average();
        let cpu = system
            .cpus()
            .iter()
            .map(|c| CpuInfo {
                model: c.brand().to_string(),
                speed_mhz: c.frequency(),
            })
            .collect();

        ClusterStats {
            master: MasterStats {
                cores_used,
                pid: std::process::id(),
                uptime_secs: self.started.elapsed().as_secs(),
            },
            os: OsInfo {
                platform: std::env::consts::OS,
                arch: std::env::consts::ARCH,
                release: System::kernel_version(),
                name: System::long_os_version(),
            },
            os_stats: OsStats {
                average_load: [load.one, load.five, load.fifteen],
                memory_usage_at_boot: self.boot_memory,
                total_mem: system.total_memory(),
                current_memory_usage: process_memory(&mut system),
                cpu,
            },
            workers,
            hostname: System::host_name(),
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn process_memory(system: &mut System) -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|p| p.memory())
}
