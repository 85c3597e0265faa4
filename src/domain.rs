#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::AgentConfig;
use crate::lib_cpu::CpuLoadController;
use crate::lib_mem::MemoryLoadController;
use crate::metrics::Metrics;
use crate::probe::SystemProbe;

/// Cooperative cancellation flag shared between a control surface and one task.
///
/// Tasks poll it at their checkpoints; cancelling never interrupts work in flight.
#[derive(Clone, Debug)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide owner of the one CPU and the one memory controller.
#[derive(Clone)]
pub struct LoadRegistry {
    pub cpu: CpuLoadController,
    pub memory: MemoryLoadController,
}

impl LoadRegistry {
    pub fn new(config: &AgentConfig, probe: Arc<dyn SystemProbe>, metrics: &Metrics) -> Self {
        Self {
            cpu: CpuLoadController::new(probe.clone(), config.cpu_settings(), metrics.clone()),
            memory: MemoryLoadController::new(probe, config.memory_settings(), metrics.clone()),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub service: crate::service::LoadService,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlOutcome {
    Started,
    Restarted,
    Stopped,
    NotRunning,
}

#[derive(Clone, Debug, Serialize)]
pub struct ControlResponse {
    pub outcome: ControlOutcome,
    pub message: String,
}

impl ControlResponse {
    pub fn new(outcome: ControlOutcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
        }
    }
}
