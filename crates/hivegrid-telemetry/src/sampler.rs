//! Host and accelerator sampling.
//!
//! `HostSampler` reads CPU, memory, disk, network and process figures
//! through `sysinfo` and accelerator figures through `nvidia-smi`. Every
//! source that is missing on the current machine degrades to zero or an
//! empty list.

use std::path::Path;
use std::process::Command;
use std::sync::Mutex;

use sysinfo::{Disks, Networks, ProcessesToUpdate, System};
use tracing::debug;

use hivegrid_core::{GpuMetrics, SystemMetrics, epoch_secs};

const NVIDIA_SMI_QUERY: &str = "--query-gpu=index,name,memory.used,memory.total,memory.free,utilization.gpu,temperature.gpu,power.draw";

/// Produces one `SystemMetrics` sample per call. Implementations may block.
pub trait MetricsSource: Send + Sync {
    fn sample(&self) -> SystemMetrics;
}

/// Samples the machine the daemon runs on.
pub struct HostSampler {
    system: Mutex<System>,
    enable_gpu: bool,
    enable_bandwidth: bool,
}

impl HostSampler {
    pub fn new(enable_gpu: bool, enable_bandwidth: bool) -> Self {
        let mut system = System::new();
        // Prime the CPU counters so the first real sample has a baseline.
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
            enable_gpu,
            enable_bandwidth,
        }
    }
}

impl MetricsSource for HostSampler {
    fn sample(&self) -> SystemMetrics {
        let (cpu_percent, memory_percent, process_count) = {
            let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
            system.refresh_cpu_usage();
            system.refresh_memory();
            system.refresh_processes(ProcessesToUpdate::All, true);

            let total = system.total_memory();
            let memory_percent = if total > 0 {
                system.used_memory() as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            (
                f64::from(system.global_cpu_usage()),
                memory_percent,
                system.processes().len(),
            )
        };

        let (network_bytes_sent, network_bytes_recv) = if self.enable_bandwidth {
            network_totals()
        } else {
            (0, 0)
        };

        let gpu_metrics = if self.enable_gpu {
            query_nvidia_smi()
        } else {
            Vec::new()
        };

        SystemMetrics {
            timestamp: epoch_secs(),
            cpu_percent,
            memory_percent,
            disk_usage_percent: root_disk_usage(),
            network_bytes_sent,
            network_bytes_recv,
            process_count,
            load_average: load_average(),
            gpu_metrics,
        }
    }
}

fn root_disk_usage() -> f64 {
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))
        .or_else(|| disks.list().first());

    match disk {
        Some(d) if d.total_space() > 0 => {
            let used = d.total_space().saturating_sub(d.available_space());
            used as f64 / d.total_space() as f64 * 100.0
        }
        _ => 0.0,
    }
}

fn network_totals() -> (u64, u64) {
    let networks = Networks::new_with_refreshed_list();
    networks
        .list()
        .values()
        .fold((0, 0), |(sent, recv), data| {
            (
                sent + data.total_transmitted(),
                recv + data.total_received(),
            )
        })
}

#[cfg(not(windows))]
fn load_average() -> Vec<f64> {
    let load = System::load_average();
    vec![load.one, load.five, load.fifteen]
}

#[cfg(windows)]
fn load_average() -> Vec<f64> {
    Vec::new()
}

fn query_nvidia_smi() -> Vec<GpuMetrics> {
    let output = match Command::new("nvidia-smi")
        .args([NVIDIA_SMI_QUERY, "--format=csv,noheader,nounits"])
        .output()
    {
        Ok(output) => output,
        Err(e) => {
            debug!(error = %e, "nvidia-smi unavailable");
            return Vec::new();
        }
    };

    if !output.status.success() {
        debug!(status = %output.status, "nvidia-smi exited with failure");
        return Vec::new();
    }

    parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `nvidia-smi --format=csv,noheader,nounits` output for the
/// accelerator query. Lines that don't carry an index and memory figures
/// are skipped; unsupported readings (`[N/A]`) become zero.
pub fn parse_nvidia_smi(text: &str) -> Vec<GpuMetrics> {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < 8 {
                return None;
            }
            let index = fields[0].parse::<u32>().ok()?;
            let memory_used = fields[2].parse::<f64>().ok()?;
            let memory_total = fields[3].parse::<f64>().ok()?;
            let memory_free = fields[4].parse::<f64>().unwrap_or(memory_total - memory_used);
            let reading = |s: &str| s.parse::<f64>().unwrap_or(0.0);

            Some(GpuMetrics {
                index,
                name: fields[1].to_string(),
                memory_used,
                memory_total,
                memory_free,
                memory_percent: if memory_total > 0.0 {
                    memory_used / memory_total * 100.0
                } else {
                    0.0
                },
                utilization: reading(fields[5]),
                temperature: reading(fields[6]),
                power_draw: reading(fields[7]),
            })
        })
        .collect()
}
