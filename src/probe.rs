#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

//! Host utilization sampling.
//!
//! Controllers only see the [`SystemProbe`] trait, so they can be driven by the
//! real host ([`SysinfoProbe`]) or by scripted readings ([`StaticProbe`]).

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System, MINIMUM_CPU_UPDATE_INTERVAL};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct MemoryReading {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub percent: f32,
}

impl MemoryReading {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn from_totals(total_bytes: u64, available_bytes: u64) -> Self {
        let percent = if total_bytes == 0 {
            0.0
        } else {
            let used = total_bytes.saturating_sub(available_bytes) as f64 / total_bytes as f64;
            (used * 100.0) as f32
        };
        Self {
            total_bytes,
            available_bytes,
            percent,
        }
    }
}

pub trait SystemProbe: Send + Sync {
    /// Logical CPU count, never zero.
    fn cpu_count(&self) -> usize;

    /// Blocks for `interval` and returns global CPU utilization averaged over it.
    fn sample_cpu_percent(&self, interval: Duration) -> f32;

    /// Utilization since the previous instant sample. Does not block.
    fn instant_cpu_percent(&self) -> f32;

    fn memory(&self) -> MemoryReading;
}

pub struct SysinfoProbe {
    cpu_count: usize,
    instant: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let listed = System::new_with_specifics(
            RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing()),
        )
        .cpus()
        .len();
        let cpu_count = if listed > 0 {
            listed
        } else {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        };
        let mut instant = System::new();
        instant.refresh_cpu_usage();
        Self {
            cpu_count,
            instant: Mutex::new(instant),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for SysinfoProbe {
    fn cpu_count(&self) -> usize {
        self.cpu_count
    }

    fn sample_cpu_percent(&self, interval: Duration) -> f32 {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        std::thread::sleep(interval.max(MINIMUM_CPU_UPDATE_INTERVAL));
        sys.refresh_cpu_usage();
        sys.global_cpu_usage()
    }

    fn instant_cpu_percent(&self) -> f32 {
        let mut sys = self.instant.lock();
        sys.refresh_cpu_usage();
        sys.global_cpu_usage()
    }

    fn memory(&self) -> MemoryReading {
        let mut sys = System::new();
        sys.refresh_memory_specifics(MemoryRefreshKind::nothing().with_ram());
        MemoryReading::from_totals(sys.total_memory(), sys.available_memory())
    }
}

/// Probe returning whatever readings were last set on it.
///
/// `sample_cpu_percent` still sleeps for the requested interval so a monitor
/// loop paced by it behaves like one paced by the host.
pub struct StaticProbe {
    cpu_count: usize,
    cpu_percent: Mutex<f32>,
    memory: Mutex<MemoryReading>,
}

impl StaticProbe {
    pub fn new(cpu_count: usize, cpu_percent: f32, memory: MemoryReading) -> Self {
        Self {
            cpu_count: cpu_count.max(1),
            cpu_percent: Mutex::new(cpu_percent),
            memory: Mutex::new(memory),
        }
    }

    pub fn set_cpu_percent(&self, percent: f32) {
        *self.cpu_percent.lock() = percent;
    }

    pub fn set_memory(&self, memory: MemoryReading) {
        *self.memory.lock() = memory;
    }
}

impl SystemProbe for StaticProbe {
    fn cpu_count(&self) -> usize {
        self.cpu_count
    }

    fn sample_cpu_percent(&self, interval: Duration) -> f32 {
        std::thread::sleep(interval);
        *self.cpu_percent.lock()
    }

    fn instant_cpu_percent(&self) -> f32 {
        *self.cpu_percent.lock()
    }

    fn memory(&self) -> MemoryReading {
        *self.memory.lock()
    }
}
