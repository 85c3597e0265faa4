#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use anyhow::Result as AnyResult;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::AgentConfig;
use crate::domain::{ControlOutcome, ControlResponse, LoadRegistry};
use crate::lib_cpu::clamp_percent;
use crate::metrics::Metrics;
use crate::probe::SystemProbe;

/// Uncached point-in-time view of the host and both controllers.
#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub cpu_count: usize,
    pub cpu_test_running: bool,
    pub memory_test_running: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub cpu_test_running: bool,
    pub memory_test_running: bool,
    pub metrics_ok: bool,
    pub registry_metrics: usize,
}

/// Control surface over the registry, shared by every HTTP worker.
#[derive(Clone)]
pub struct LoadService {
    registry: LoadRegistry,
    probe: Arc<dyn SystemProbe>,
    metrics: Metrics,
    cpu_target_percent: i64,
    cpu_check_interval: Duration,
}

impl LoadService {
    pub fn new(
        registry: LoadRegistry,
        probe: Arc<dyn SystemProbe>,
        metrics: Metrics,
        cpu_target_percent: i64,
        cpu_check_interval: Duration,
    ) -> Self {
        Self {
            registry,
            probe,
            metrics,
            cpu_target_percent,
            cpu_check_interval,
        }
    }

    pub fn from_config(config: &AgentConfig, probe: Arc<dyn SystemProbe>, metrics: Metrics) -> Self {
        let registry = LoadRegistry::new(config, probe.clone(), &metrics);
        Self::new(
            registry,
            probe,
            metrics,
            config.cpu_target_percent,
            config.cpu_check_interval(),
        )
    }

    pub fn registry(&self) -> &LoadRegistry {
        &self.registry
    }

    /// Replace any running CPU load test with a fresh one at the configured target.
    pub fn start_cpu_load(&self) -> ControlResponse {
        let cpu = &self.registry.cpu;
        let replaced = cpu.stop();
        cpu.start(self.cpu_target_percent, self.cpu_check_interval);
        let target = clamp_percent(self.cpu_target_percent);
        let outcome = if replaced {
            ControlOutcome::Restarted
        } else {
            ControlOutcome::Started
        };
        info!(?outcome, target_percent = target, "cpu load requested");
        ControlResponse::new(
            outcome,
            format!("CPU load test started targeting {target}% utilization."),
        )
    }

    pub fn stop_cpu_load(&self) -> ControlResponse {
        if self.registry.cpu.stop() {
            ControlResponse::new(ControlOutcome::Stopped, "CPU load test stopped.")
        } else {
            ControlResponse::new(
                ControlOutcome::NotRunning,
                "No CPU load test currently running.",
            )
        }
    }

    pub fn start_memory_load(&self) -> ControlResponse {
        let memory = &self.registry.memory;
        let outcome = if memory.start() {
            ControlOutcome::Restarted
        } else {
            ControlOutcome::Started
        };
        let percent = memory.settings().target_fraction * 100.0;
        info!(?outcome, "memory load requested");
        ControlResponse::new(
            outcome,
            format!("Memory load test started targeting {percent:.0}% of available memory."),
        )
    }

    pub fn stop_memory_load(&self) -> ControlResponse {
        match self.registry.memory.stop() {
            Some(freed) => ControlResponse::new(
                ControlOutcome::Stopped,
                format!("Memory load test stopped, released {} MB.", freed / (1024 * 1024)),
            ),
            None => ControlResponse::new(
                ControlOutcome::NotRunning,
                "No memory load test currently running.",
            ),
        }
    }

    /// Stop both controllers.
    pub fn stop_all(&self) -> ControlResponse {
        let cpu_stopped = self.registry.cpu.stop();
        let memory_stopped = self.registry.memory.stop().is_some();
        info!(cpu_stopped, memory_stopped, "stop all requested");
        if cpu_stopped || memory_stopped {
            ControlResponse::new(ControlOutcome::Stopped, "All load tests have been stopped.")
        } else {
            ControlResponse::new(ControlOutcome::NotRunning, "No load test currently running.")
        }
    }

    pub fn status(&self) -> StatusReport {
        let memory = self.probe.memory();
        StatusReport {
            cpu_percent: self.probe.instant_cpu_percent(),
            memory_percent: memory.percent,
            cpu_count: self.probe.cpu_count(),
            cpu_test_running: self.registry.cpu.is_running(),
            memory_test_running: self.registry.memory.is_running(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn encode_metrics(&self) -> AnyResult<Vec<u8>> {
        self.metrics.encode_text()
    }

    pub fn health(&self) -> HealthReport {
        let metrics_ok = self.metrics.encode_text().is_ok();
        let registry_metrics = self.metrics.registry.gather().len();
        HealthReport {
            status: if metrics_ok { "ok" } else { "degraded" }.to_string(),
            cpu_test_running: self.registry.cpu.is_running(),
            memory_test_running: self.registry.memory.is_running(),
            metrics_ok,
            registry_metrics,
        }
    }
}
