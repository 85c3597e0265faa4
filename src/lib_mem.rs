#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

//! Memory load controller.
//!
//! A run fills fixed-size blocks of random bytes until it holds
//! `target_fraction` of the memory that was available when it started, then
//! holds them and reports periodically until stopped. Filling also ends early
//! when total system memory crosses the safety ceiling or the allocator
//! refuses a block.
//!
//! Every block is its own anonymous mapping, so dropping it on `stop` unmaps
//! the pages regardless of allocator state.

use memmap2::MmapMut;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::domain::CancelToken;
use crate::metrics::{gauge_value, Metrics};
use crate::probe::SystemProbe;

pub const DEFAULT_BLOCK_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_TARGET_FRACTION: f64 = 0.6;
pub const DEFAULT_CEILING_PERCENT: f32 = 80.0;
pub const DEFAULT_HOLD_INTERVAL: Duration = Duration::from_secs(5);

const HOLD_TICK: Duration = Duration::from_millis(100);
const MIB: f64 = 1024.0 * 1024.0;

#[derive(Clone, Copy, Debug)]
pub struct MemorySettings {
    pub block_bytes: usize,
    pub target_fraction: f64,
    /// Filling stops once total system memory use exceeds this percentage.
    pub ceiling_percent: f32,
    pub hold_interval: Duration,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            block_bytes: DEFAULT_BLOCK_BYTES,
            target_fraction: DEFAULT_TARGET_FRACTION,
            ceiling_percent: DEFAULT_CEILING_PERCENT,
            hold_interval: DEFAULT_HOLD_INTERVAL,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPhase {
    #[default]
    Idle,
    Filling,
    Holding,
}

#[derive(Default)]
struct MemState {
    run: Option<CancelToken>,
    blocks: Vec<MmapMut>,
    allocated_bytes: u64,
    target_bytes: u64,
    phase: MemoryPhase,
}

impl MemState {
    /// Cancel the current run and hand back its blocks for dropping outside the lock.
    fn teardown(&mut self) -> (Vec<MmapMut>, u64) {
        if let Some(run) = self.run.take() {
            run.cancel();
        }
        let freed = self.allocated_bytes;
        self.allocated_bytes = 0;
        self.target_bytes = 0;
        self.phase = MemoryPhase::Idle;
        (std::mem::take(&mut self.blocks), freed)
    }
}

struct Shared {
    probe: Arc<dyn SystemProbe>,
    settings: MemorySettings,
    state: Mutex<MemState>,
    metrics: Metrics,
}

#[derive(Clone)]
pub struct MemoryLoadController {
    shared: Arc<Shared>,
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn target_bytes(available_bytes: u64, fraction: f64) -> u64 {
    (available_bytes as f64 * fraction.clamp(0.0, 1.0)) as u64
}

#[allow(clippy::cast_precision_loss)]
fn mib(bytes: u64) -> f64 {
    bytes as f64 / MIB
}

fn allocate_block(len: usize, rng: &mut SmallRng) -> std::io::Result<MmapMut> {
    let mut block = MmapMut::map_anon(len)?;
    rng.fill_bytes(&mut block[..]);
    Ok(block)
}

impl MemoryLoadController {
    pub fn new(probe: Arc<dyn SystemProbe>, settings: MemorySettings, metrics: Metrics) -> Self {
        Self {
            shared: Arc::new(Shared {
                probe,
                settings,
                state: Mutex::new(MemState::default()),
                metrics,
            }),
        }
    }

    /// Start a fresh run. A run already in progress is torn down first, in
    /// which case this returns `true`.
    pub fn start(&self) -> bool {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        let released = if state.run.is_some() {
            info!("memory load test already running, restarting");
            Some(state.teardown())
        } else {
            None
        };

        let reading = shared.probe.memory();
        let run = CancelToken::new();
        state.run = Some(run.clone());
        state.target_bytes = target_bytes(reading.available_bytes, shared.settings.target_fraction);
        state.phase = MemoryPhase::Filling;
        info!(
            target_mb = mib(state.target_bytes),
            available_mb = mib(reading.available_bytes),
            memory_percent = f64::from(reading.percent),
            "memory load test started"
        );

        let worker = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name("memory-load".into())
            .spawn(move || worker.run(&run));
        let failed = match spawned {
            Ok(_) => None,
            Err(e) => {
                error!(error = %e, "spawn memory load thread failed");
                Some(state.teardown())
            }
        };
        shared.publish(&state);
        drop(state);
        drop(failed);
        released.is_some()
    }

    /// Stop the run and release every block. Returns the bytes released, or
    /// `None` if nothing was running.
    pub fn stop(&self) -> Option<u64> {
        let (blocks, freed) = {
            let mut state = self.shared.state.lock();
            if state.run.is_none() {
                debug!("memory load test not running");
                return None;
            }
            let released = state.teardown();
            self.shared.publish(&state);
            released
        };
        drop(blocks);
        info!(freed_mb = mib(freed), "memory load test stopped");
        Some(freed)
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().run.is_some()
    }

    pub fn phase(&self) -> MemoryPhase {
        self.shared.state.lock().phase
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.shared.state.lock().allocated_bytes
    }

    pub fn block_count(&self) -> usize {
        self.shared.state.lock().blocks.len()
    }

    pub fn target_bytes(&self) -> u64 {
        self.shared.state.lock().target_bytes
    }

    pub fn settings(&self) -> MemorySettings {
        self.shared.settings
    }
}

impl Shared {
    fn run(&self, run: &CancelToken) {
        if self.fill(run) {
            self.hold(run);
        }
    }

    /// Returns `false` if the run was cancelled while filling.
    fn fill(&self, run: &CancelToken) -> bool {
        let mut rng = SmallRng::from_entropy();
        let block_bytes = self.settings.block_bytes.max(1);
        loop {
            {
                let state = self.state.lock();
                if !run.is_running() {
                    return false;
                }
                if state.allocated_bytes >= state.target_bytes {
                    break;
                }
            }
            let block = match allocate_block(block_bytes, &mut rng) {
                Ok(block) => block,
                Err(e) => {
                    warn!(error = %e, "memory block allocation refused, ending fill early");
                    self.metrics.memory_alloc_failures_total.inc();
                    break;
                }
            };
            let allocated = {
                let mut state = self.state.lock();
                if !run.is_running() {
                    return false;
                }
                state.allocated_bytes += block.len() as u64;
                state.blocks.push(block);
                self.publish(&state);
                state.allocated_bytes
            };
            debug!(allocated_mb = mib(allocated), "allocated memory block");
            let reading = self.probe.memory();
            if reading.percent > self.settings.ceiling_percent {
                warn!(
                    memory_percent = f64::from(reading.percent),
                    ceiling = f64::from(self.settings.ceiling_percent),
                    allocated_mb = mib(allocated),
                    "system memory above safety ceiling, ending fill early"
                );
                break;
            }
        }

        let mut state = self.state.lock();
        if !run.is_running() {
            return false;
        }
        state.phase = MemoryPhase::Holding;
        info!(
            allocated_mb = mib(state.allocated_bytes),
            blocks = state.blocks.len(),
            "memory fill complete, holding"
        );
        true
    }

    fn hold(&self, run: &CancelToken) {
        let interval = self.settings.hold_interval;
        let tick = HOLD_TICK.min(interval).max(Duration::from_millis(1));
        let mut since_report = Duration::ZERO;
        while run.is_running() {
            thread::sleep(tick);
            since_report += tick;
            if since_report >= interval && run.is_running() {
                since_report = Duration::ZERO;
                let reading = self.probe.memory();
                info!(
                    memory_percent = f64::from(reading.percent),
                    "holding memory load"
                );
            }
        }
        debug!("memory hold loop exited");
    }

    fn publish(&self, state: &MemState) {
        let m = &self.metrics;
        m.memory_load_active.set(i64::from(state.run.is_some()));
        m.memory_allocated_bytes.set(gauge_value(state.allocated_bytes));
        m.memory_target_bytes.set(gauge_value(state.target_bytes));
    }
}
