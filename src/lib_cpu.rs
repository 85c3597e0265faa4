#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

//! Adaptive CPU load controller.
//!
//! A run consists of busy-work worker threads plus one monitor thread. The
//! monitor samples global CPU utilization over `check_interval` (the sample is
//! its only pacing) and after every sample tunes two knobs: the shared
//! `intensity` (work units per worker batch) on the tight ±5/±10 bands and the
//! worker population on the wide ±15 band.
//!
//! Cancellation is cooperative. A worker checks its flag once per batch, so it
//! may keep burning for up to one full batch of `intensity` units after
//! [`CpuLoadController::stop`] returns. Intensity is capped so that one batch
//! takes about [`DEFAULT_BATCH_BUDGET`] on the host, which bounds that latency
//! and how long an intensity cut takes to show up in the next sample.

use parking_lot::Mutex;
use serde::Serialize;
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::domain::CancelToken;
use crate::metrics::{gauge_value, Metrics};
use crate::probe::SystemProbe;

pub const INITIAL_INTENSITY: u64 = 5_000;
pub const MIN_INTENSITY: u64 = 100;
/// Fallback ceiling, about 1.5 s per batch at ~120 µs per unit.
pub const DEFAULT_MAX_INTENSITY: u64 = 12_000;
pub const DEFAULT_BATCH_BUDGET: Duration = Duration::from_millis(1500);
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

const MATRIX: usize = 20;
const SERIES_TERMS: usize = 100;
const CALIBRATION_UNITS: u64 = 32;

#[derive(Clone, Copy, Debug)]
pub struct CpuSettings {
    pub max_intensity: u64,
}

impl CpuSettings {
    /// Ceiling sized so one batch on this host takes about `budget`.
    pub fn for_batch_budget(budget: Duration) -> Self {
        Self {
            max_intensity: calibrate_max_intensity(budget),
        }
    }
}

impl Default for CpuSettings {
    fn default() -> Self {
        Self {
            max_intensity: DEFAULT_MAX_INTENSITY,
        }
    }
}

/// Time a short batch and return how many units fit in `budget`.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn calibrate_max_intensity(budget: Duration) -> u64 {
    let started = Instant::now();
    busy_work_batch(CALIBRATION_UNITS, 0);
    let per_unit = started.elapsed().as_secs_f64() / CALIBRATION_UNITS as f64;
    let units = if per_unit > 0.0 {
        (budget.as_secs_f64() / per_unit) as u64
    } else {
        DEFAULT_MAX_INTENSITY
    };
    units.max(MIN_INTENSITY)
}

/// Clamp a requested utilization target into `0..=100`.
pub fn clamp_percent(requested: i64) -> u8 {
    u8::try_from(requested.clamp(0, 100)).unwrap_or(100)
}

/// Intensity after one monitor sample. First matching band wins.
pub fn next_intensity(target: f32, current: f32, intensity: u64) -> u64 {
    if current < target - 10.0 {
        intensity.saturating_mul(3) / 2
    } else if current < target - 5.0 {
        intensity.saturating_mul(6) / 5
    } else if current > target + 10.0 {
        (intensity / 2).max(MIN_INTENSITY)
    } else if current > target + 5.0 {
        (intensity.saturating_mul(4) / 5).max(MIN_INTENSITY)
    } else {
        intensity
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerAdjustment {
    Spawn,
    Retire,
    Keep,
}

/// Population decision, independent of the intensity bands.
pub fn worker_adjustment(target: f32, current: f32, workers: usize, cores: usize) -> WorkerAdjustment {
    if current < target - 15.0 && workers < cores {
        WorkerAdjustment::Spawn
    } else if current > target + 15.0 && workers > 1 {
        WorkerAdjustment::Retire
    } else {
        WorkerAdjustment::Keep
    }
}

/// One unit of filler work: a 20x20 trigonometric matrix product plus a short
/// scalar series. Stack-only; `seed` keeps the optimizer from folding it.
#[allow(clippy::cast_precision_loss, clippy::needless_range_loop)]
pub fn busy_work_unit(seed: f64) -> f64 {
    let mut a = [[0.0_f64; MATRIX]; MATRIX];
    let mut c = [[0.0_f64; MATRIX]; MATRIX];
    for i in 0..MATRIX {
        for j in 0..MATRIX {
            a[i][j] = ((i * j) as f64 + seed).sin();
        }
    }
    for i in 0..MATRIX {
        for j in 0..MATRIX {
            let mut acc = 0.0;
            for k in 0..MATRIX {
                acc += a[i][k] * ((k * j) as f64).cos();
            }
            c[i][j] = acc;
        }
    }
    let mut series = 0.0;
    for i in 0..SERIES_TERMS {
        let x = i as f64;
        series += x.sin() * (x * 0.5).cos() / ((x + 1.0).sqrt() + 0.001);
    }
    black_box(&c);
    c[MATRIX - 1][MATRIX - 1] + series
}

/// Run `units` work units back to back.
#[allow(clippy::cast_precision_loss)]
pub fn busy_work_batch(units: u64, batch: u64) -> f64 {
    let seed = black_box(batch as f64 * 1e-9);
    let mut acc = 0.0;
    for _ in 0..units {
        acc += busy_work_unit(seed);
    }
    black_box(acc)
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct TickReport {
    pub current_percent: f32,
    pub target_percent: u8,
    pub previous_intensity: u64,
    pub intensity: u64,
    pub adjustment: WorkerAdjustment,
    pub workers: usize,
}

#[derive(Default)]
struct RunState {
    run: Option<CancelToken>,
    target_percent: u8,
    workers: Vec<CancelToken>,
    last_sample: Option<f32>,
    spawned_total: usize,
}

struct Shared {
    probe: Arc<dyn SystemProbe>,
    cores: usize,
    settings: CpuSettings,
    intensity: AtomicU64,
    state: Mutex<RunState>,
    metrics: Metrics,
}

#[derive(Clone)]
pub struct CpuLoadController {
    shared: Arc<Shared>,
}

impl CpuLoadController {
    pub fn new(probe: Arc<dyn SystemProbe>, settings: CpuSettings, metrics: Metrics) -> Self {
        let cores = probe.cpu_count().max(1);
        Self {
            shared: Arc::new(Shared {
                probe,
                cores,
                settings,
                intensity: AtomicU64::new(INITIAL_INTENSITY),
                state: Mutex::new(RunState::default()),
                metrics,
            }),
        }
    }

    /// Start a run. Does nothing if one is already active; replacing a run is
    /// up to the caller (`stop` first).
    pub fn start(&self, target_percent: i64, check_interval: Duration) {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.run.is_some() {
            info!(target_percent = state.target_percent, "cpu load test already running");
            return;
        }
        let check_interval = if check_interval.is_zero() {
            DEFAULT_CHECK_INTERVAL
        } else {
            check_interval
        };
        let run = CancelToken::new();
        state.run = Some(run.clone());
        state.target_percent = clamp_percent(target_percent);
        state.last_sample = None;
        shared.intensity.store(shared.clamp_intensity(INITIAL_INTENSITY), Ordering::Relaxed);

        let initial = (shared.cores / 2).max(1);
        for _ in 0..initial {
            if let Some(worker) = shared.spawn_worker(&mut state) {
                state.workers.push(worker);
            }
        }
        if state.workers.is_empty() {
            warn!("no cpu worker could be spawned");
        }
        info!(
            target_percent = state.target_percent,
            workers = state.workers.len(),
            cores = shared.cores,
            check_interval_ms = u64::try_from(check_interval.as_millis()).unwrap_or(u64::MAX),
            "cpu load test started"
        );

        let monitor = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name("cpu-monitor".into())
            .spawn(move || monitor.run_monitor(&run, check_interval));
        if let Err(e) = spawned {
            error!(error = %e, "spawn cpu monitor failed, tearing run down");
            shared.teardown(&mut state);
        }
        shared.publish(&state);
    }

    /// Signal the run to end. Returns `false` if nothing was running.
    /// Does not wait for workers to finish their current batch.
    pub fn stop(&self) -> bool {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.run.is_none() {
            debug!("cpu load test not running");
            return false;
        }
        shared.teardown(&mut state);
        shared.publish(&state);
        info!("cpu load test stopped");
        true
    }

    /// Apply one utilization reading as the monitor would. `None` when idle.
    pub fn apply_sample(&self, current_percent: f32) -> Option<TickReport> {
        let mut state = self.shared.state.lock();
        if state.run.is_none() {
            return None;
        }
        let report = self.shared.adjust(&mut state, current_percent);
        self.shared.publish(&state);
        Some(report)
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().run.is_some()
    }

    pub fn target_percent(&self) -> u8 {
        self.shared.state.lock().target_percent
    }

    pub fn intensity(&self) -> u64 {
        self.shared.intensity.load(Ordering::Relaxed)
    }

    pub fn worker_count(&self) -> usize {
        self.shared.state.lock().workers.len()
    }

    pub fn last_sample(&self) -> Option<f32> {
        self.shared.state.lock().last_sample
    }
}

impl Shared {
    fn clamp_intensity(&self, intensity: u64) -> u64 {
        intensity.clamp(MIN_INTENSITY, self.settings.max_intensity.max(MIN_INTENSITY))
    }

    fn spawn_worker(self: &Arc<Self>, state: &mut RunState) -> Option<CancelToken> {
        state.spawned_total += 1;
        let id = state.spawned_total;
        let token = CancelToken::new();
        let flag = token.clone();
        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("cpu-worker-{id}"))
            .spawn(move || {
                let mut batch = 0_u64;
                while flag.is_running() {
                    let units = shared.intensity.load(Ordering::Relaxed);
                    busy_work_batch(units, batch);
                    batch = batch.wrapping_add(1);
                }
                debug!(worker = id, batches = batch, "cpu worker exited");
            });
        match spawned {
            Ok(_) => Some(token),
            Err(e) => {
                error!(worker = id, error = %e, "spawn cpu worker failed");
                None
            }
        }
    }

    fn run_monitor(self: &Arc<Self>, run: &CancelToken, check_interval: Duration) {
        while run.is_running() {
            let current = self.probe.sample_cpu_percent(check_interval);
            let mut state = self.state.lock();
            // a stop may have landed while sampling
            if !run.is_running() {
                break;
            }
            self.adjust(&mut state, current);
            self.publish(&state);
        }
        debug!("cpu monitor exited");
    }

    fn adjust(self: &Arc<Self>, state: &mut RunState, current: f32) -> TickReport {
        let target = f32::from(state.target_percent);
        let previous = self.intensity.load(Ordering::Relaxed);
        let intensity = self.clamp_intensity(next_intensity(target, current, previous));
        self.intensity.store(intensity, Ordering::Relaxed);
        state.last_sample = Some(current);

        let adjustment = worker_adjustment(target, current, state.workers.len(), self.cores);
        match adjustment {
            WorkerAdjustment::Spawn => {
                if let Some(worker) = self.spawn_worker(state) {
                    state.workers.push(worker);
                    info!(workers = state.workers.len(), "added cpu worker");
                }
            }
            WorkerAdjustment::Retire => {
                if let Some(worker) = state.workers.pop() {
                    worker.cancel();
                    info!(workers = state.workers.len(), "removed cpu worker");
                }
            }
            WorkerAdjustment::Keep => {}
        }
        if intensity != previous {
            debug!(from = previous, to = intensity, "cpu intensity adjusted");
        }
        info!(
            current = f64::from(current),
            target_percent = state.target_percent,
            workers = state.workers.len(),
            intensity,
            "cpu monitor tick"
        );
        self.metrics.cpu_monitor_ticks_total.inc();
        self.metrics.cpu_observed_percent.set(f64::from(current));
        TickReport {
            current_percent: current,
            target_percent: state.target_percent,
            previous_intensity: previous,
            intensity,
            adjustment,
            workers: state.workers.len(),
        }
    }

    fn teardown(&self, state: &mut RunState) {
        if let Some(run) = state.run.take() {
            run.cancel();
        }
        for worker in state.workers.drain(..) {
            worker.cancel();
        }
    }

    fn publish(&self, state: &RunState) {
        let m = &self.metrics;
        m.cpu_load_active.set(i64::from(state.run.is_some()));
        m.cpu_target_percent.set(i64::from(state.target_percent));
        m.cpu_workers.set(gauge_value(state.workers.len()));
        m.cpu_intensity.set(gauge_value(self.intensity.load(Ordering::Relaxed)));
    }
}
