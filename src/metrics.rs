#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use anyhow::{Context, Result as AnyResult};
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,
    pub cpu_load_active: IntGauge,
    pub cpu_target_percent: IntGauge,
    pub cpu_workers: IntGauge,
    pub cpu_intensity: IntGauge,
    pub cpu_observed_percent: Gauge,
    pub cpu_monitor_ticks_total: IntCounter,
    pub memory_load_active: IntGauge,
    pub memory_allocated_bytes: IntGauge,
    pub memory_target_bytes: IntGauge,
    pub memory_alloc_failures_total: IntCounter,
}

fn int_gauge(registry: &Registry, name: &str, help: &str) -> AnyResult<IntGauge> {
    let gauge = IntGauge::with_opts(Opts::new(name, help)).with_context(|| format!("create {name}"))?;
    registry
        .register(Box::new(gauge.clone()))
        .with_context(|| format!("register {name}"))?;
    Ok(gauge)
}

fn int_counter(registry: &Registry, name: &str, help: &str) -> AnyResult<IntCounter> {
    let counter =
        IntCounter::with_opts(Opts::new(name, help)).with_context(|| format!("create {name}"))?;
    registry
        .register(Box::new(counter.clone()))
        .with_context(|| format!("register {name}"))?;
    Ok(counter)
}

impl Metrics {
    pub fn new() -> AnyResult<Self> {
        let registry = Registry::new();
        let cpu_load_active =
            int_gauge(&registry, "loadgen_cpu_load_active", "1 if the cpu load test is running")?;
        let cpu_target_percent =
            int_gauge(&registry, "loadgen_cpu_target_percent", "cpu utilization target")?;
        let cpu_workers = int_gauge(&registry, "loadgen_cpu_workers", "busy-work worker threads")?;
        let cpu_intensity = int_gauge(
            &registry,
            "loadgen_cpu_intensity",
            "work units per busy-work batch",
        )?;
        let cpu_observed_percent = Gauge::with_opts(Opts::new(
            "loadgen_cpu_observed_percent",
            "cpu utilization seen by the last monitor tick",
        ))
        .context("create cpu_observed_percent")?;
        registry
            .register(Box::new(cpu_observed_percent.clone()))
            .context("register cpu_observed_percent")?;
        let cpu_monitor_ticks_total =
            int_counter(&registry, "loadgen_cpu_monitor_ticks_total", "monitor ticks")?;
        let memory_load_active = int_gauge(
            &registry,
            "loadgen_memory_load_active",
            "1 if the memory load test is running",
        )?;
        let memory_allocated_bytes =
            int_gauge(&registry, "loadgen_memory_allocated_bytes", "bytes held in blocks")?;
        let memory_target_bytes =
            int_gauge(&registry, "loadgen_memory_target_bytes", "fill phase target")?;
        let memory_alloc_failures_total = int_counter(
            &registry,
            "loadgen_memory_alloc_failures_total",
            "block allocations refused by the allocator",
        )?;
        Ok(Self {
            registry,
            cpu_load_active,
            cpu_target_percent,
            cpu_workers,
            cpu_intensity,
            cpu_observed_percent,
            cpu_monitor_ticks_total,
            memory_load_active,
            memory_allocated_bytes,
            memory_target_bytes,
            memory_alloc_failures_total,
        })
    }

    pub fn encode_text(&self) -> AnyResult<Vec<u8>> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf).context("encode metrics")?;
        Ok(buf)
    }
}

pub(crate) fn gauge_value(value: impl TryInto<i64>) -> i64 {
    value.try_into().unwrap_or(i64::MAX)
}
