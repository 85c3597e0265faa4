#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use loadgen_agent::lib_cpu::{
    busy_work_batch, calibrate_max_intensity, clamp_percent, next_intensity, worker_adjustment,
    CpuLoadController, CpuSettings, WorkerAdjustment, INITIAL_INTENSITY, MIN_INTENSITY,
};
use loadgen_agent::{MemoryReading, Metrics, StaticProbe};

// keeps the background monitor asleep so ticks come only from apply_sample
const PARKED: Duration = Duration::from_secs(3600);

fn controller(cores: usize, max_intensity: u64) -> CpuLoadController {
    sampled_controller(cores, max_intensity, 50.0).0
}

fn sampled_controller(
    cores: usize,
    max_intensity: u64,
    cpu_percent: f32,
) -> (CpuLoadController, Arc<StaticProbe>) {
    let probe = Arc::new(StaticProbe::new(
        cores,
        cpu_percent,
        MemoryReading::from_totals(8 << 30, 4 << 30),
    ));
    let ctrl = CpuLoadController::new(
        probe.clone(),
        CpuSettings { max_intensity },
        Metrics::new().expect("metrics"),
    );
    (ctrl, probe)
}

fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(20);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn clamps_target_percent() {
    assert_eq!(clamp_percent(-20), 0);
    assert_eq!(clamp_percent(150), 100);
    assert_eq!(clamp_percent(60), 60);

    let c = controller(2, MIN_INTENSITY);
    c.start(150, PARKED);
    assert_eq!(c.target_percent(), 100);
    c.stop();
    c.start(-20, PARKED);
    assert_eq!(c.target_percent(), 0);
    c.stop();
}

#[test]
fn intensity_bands_first_match_wins() {
    assert_eq!(next_intensity(60.0, 49.0, 1000), 1500);
    assert_eq!(next_intensity(60.0, 50.0, 1000), 1200);
    assert_eq!(next_intensity(60.0, 54.0, 1000), 1200);
    assert_eq!(next_intensity(60.0, 55.0, 1000), 1000);
    assert_eq!(next_intensity(60.0, 62.0, 1000), 1000);
    assert_eq!(next_intensity(60.0, 66.0, 1000), 800);
    assert_eq!(next_intensity(60.0, 70.0, 1000), 800);
    assert_eq!(next_intensity(60.0, 71.0, 1000), 500);
}

#[test]
fn intensity_never_below_floor() {
    let mut intensity = INITIAL_INTENSITY;
    for _ in 0..64 {
        intensity = next_intensity(60.0, 100.0, intensity);
        assert!(intensity >= MIN_INTENSITY);
    }
    assert_eq!(intensity, MIN_INTENSITY);
    assert_eq!(next_intensity(60.0, 68.0, MIN_INTENSITY), MIN_INTENSITY);
    assert_eq!(next_intensity(60.0, 68.0, 110), MIN_INTENSITY);
}

#[test]
fn worker_population_uses_wide_band() {
    assert_eq!(worker_adjustment(60.0, 40.0, 2, 4), WorkerAdjustment::Spawn);
    assert_eq!(worker_adjustment(60.0, 40.0, 4, 4), WorkerAdjustment::Keep);
    assert_eq!(worker_adjustment(60.0, 45.0, 2, 4), WorkerAdjustment::Keep);
    assert_eq!(worker_adjustment(60.0, 80.0, 2, 4), WorkerAdjustment::Retire);
    assert_eq!(worker_adjustment(60.0, 80.0, 1, 4), WorkerAdjustment::Keep);
    assert_eq!(worker_adjustment(60.0, 75.0, 3, 4), WorkerAdjustment::Keep);
}

#[test]
fn far_below_target_raises_intensity_and_spawns() {
    let c = controller(4, 1_000_000);
    c.start(60, PARKED);
    assert_eq!(c.worker_count(), 2);
    assert_eq!(c.intensity(), INITIAL_INTENSITY);

    let tick = c.apply_sample(40.0).expect("running");
    assert_eq!(tick.adjustment, WorkerAdjustment::Spawn);
    assert_eq!(tick.previous_intensity, INITIAL_INTENSITY);
    assert_eq!(c.intensity(), INITIAL_INTENSITY * 3 / 2);
    assert_eq!(c.worker_count(), 3);
    assert_eq!(c.last_sample(), Some(40.0));
    c.stop();
}

#[test]
fn far_above_target_halves_intensity_and_retires() {
    let c = controller(4, 1_000_000);
    c.start(60, PARKED);
    assert_eq!(c.worker_count(), 2);

    let tick = c.apply_sample(80.0).expect("running");
    assert_eq!(tick.adjustment, WorkerAdjustment::Retire);
    assert_eq!(c.intensity(), INITIAL_INTENSITY / 2);
    assert_eq!(c.worker_count(), 1);

    // last worker stays
    c.apply_sample(80.0).expect("running");
    assert_eq!(c.worker_count(), 1);
    c.stop();
}

#[test]
fn spawning_capped_at_core_count() {
    let c = controller(2, MIN_INTENSITY);
    c.start(60, PARKED);
    assert_eq!(c.worker_count(), 1);
    c.apply_sample(0.0);
    c.apply_sample(0.0);
    c.apply_sample(0.0);
    assert_eq!(c.worker_count(), 2);
    c.stop();
}

#[test]
fn intensity_respects_ceiling() {
    let c = controller(1, 6_000);
    c.start(90, PARKED);
    for _ in 0..5 {
        c.apply_sample(0.0);
    }
    assert_eq!(c.intensity(), 6_000);
    c.stop();
}

#[test]
fn start_stop_lifecycle() {
    let c = controller(1, MIN_INTENSITY);
    assert!(!c.is_running());
    assert!(c.apply_sample(10.0).is_none());

    c.start(60, PARKED);
    assert!(c.is_running());
    assert!(c.worker_count() >= 1);

    assert!(c.stop());
    assert!(!c.is_running());
    assert_eq!(c.worker_count(), 0);
    assert!(c.apply_sample(10.0).is_none());
}

#[test]
fn stop_when_idle_is_noop() {
    let c = controller(4, MIN_INTENSITY);
    assert!(!c.stop());
    assert!(!c.stop());
    assert!(!c.is_running());
    assert_eq!(c.worker_count(), 0);
}

#[test]
fn second_start_leaves_run_untouched() {
    let c = controller(4, MIN_INTENSITY);
    c.start(60, PARKED);
    let workers = c.worker_count();
    c.start(20, PARKED);
    assert_eq!(c.target_percent(), 60);
    assert_eq!(c.worker_count(), workers);
    c.stop();
}

#[test]
fn restart_resets_intensity() {
    let c = controller(2, 1_000_000);
    c.start(60, PARKED);
    c.apply_sample(0.0);
    assert_ne!(c.intensity(), INITIAL_INTENSITY);
    c.stop();
    c.start(60, PARKED);
    assert_eq!(c.intensity(), INITIAL_INTENSITY);
    c.stop();
}

#[test]
fn busy_work_scales_with_units() {
    assert!(busy_work_batch(0, 0).abs() < f64::EPSILON);
    assert!(busy_work_batch(3, 7).is_finite());
}

#[test]
fn monitor_thread_steers_without_manual_samples() {
    let (c, probe) = sampled_controller(4, 1_000, 100.0);
    c.start(50, Duration::from_millis(30));
    assert_eq!(c.intensity(), 1_000);
    assert_eq!(c.worker_count(), 2);

    wait_for("backoff to floor", || c.intensity() == MIN_INTENSITY && c.worker_count() == 1);
    assert!(c.last_sample().is_some_and(|s| s > 99.0));

    probe.set_cpu_percent(0.0);
    wait_for("ramp to ceiling", || c.intensity() == 1_000 && c.worker_count() == 4);
    assert!(c.last_sample().is_some_and(|s| s < 1.0));

    assert!(c.stop());
    assert_eq!(c.worker_count(), 0);
}

#[test]
fn stopped_monitor_leaves_next_run_alone() {
    let (c, _probe) = sampled_controller(4, 1_000_000, 0.0);
    c.start(90, Duration::from_millis(200));
    assert!(c.stop());

    c.start(90, PARKED);
    let workers = c.worker_count();
    std::thread::sleep(Duration::from_millis(600));
    assert_eq!(c.intensity(), INITIAL_INTENSITY);
    assert_eq!(c.worker_count(), workers);
    assert!(c.last_sample().is_none());
    c.stop();
}

#[test]
fn calibrated_ceiling_keeps_batches_near_budget() {
    let budget = Duration::from_millis(200);
    let max = calibrate_max_intensity(budget);
    assert!(max >= MIN_INTENSITY);

    let started = Instant::now();
    busy_work_batch(max, 0);
    let took = started.elapsed();
    assert!(took < budget * 4 + Duration::from_millis(100), "batch of {max} took {took:?}");
}
