#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use anyhow::{anyhow, Result as AnyResult};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::lib_cpu::{CpuSettings, DEFAULT_BATCH_BUDGET, DEFAULT_CHECK_INTERVAL};
use crate::lib_mem::{
    MemorySettings, DEFAULT_CEILING_PERCENT, DEFAULT_HOLD_INTERVAL, DEFAULT_TARGET_FRACTION,
};
use crate::validation::validate_config;

pub const DEFAULT_BIND: &str = "0.0.0.0:5000";
pub const DEFAULT_CPU_TARGET_PERCENT: i64 = 60;
pub const DEFAULT_MEMORY_BLOCK_MB: usize = 10;

/// Agent settings, read from `LOADGEN_*` environment variables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    pub bind: String,
    /// Target for `/start-cpu-load`. Out-of-range values are clamped, not rejected.
    pub cpu_target_percent: i64,
    pub cpu_check_interval_secs: f64,
    /// Fixed intensity ceiling. When unset it is calibrated from `cpu_batch_budget_ms`.
    pub cpu_max_intensity: Option<u64>,
    pub cpu_batch_budget_ms: u64,
    pub memory_block_mb: usize,
    pub memory_target_fraction: f64,
    pub memory_ceiling_percent: f32,
    pub memory_hold_interval_secs: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            cpu_target_percent: DEFAULT_CPU_TARGET_PERCENT,
            cpu_check_interval_secs: DEFAULT_CHECK_INTERVAL.as_secs_f64(),
            cpu_max_intensity: None,
            cpu_batch_budget_ms: u64::try_from(DEFAULT_BATCH_BUDGET.as_millis()).unwrap_or(1500),
            memory_block_mb: DEFAULT_MEMORY_BLOCK_MB,
            memory_target_fraction: DEFAULT_TARGET_FRACTION,
            memory_ceiling_percent: DEFAULT_CEILING_PERCENT,
            memory_hold_interval_secs: DEFAULT_HOLD_INTERVAL.as_secs_f64(),
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> AnyResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid {key}={raw:?}: {e}")),
    }
}

impl AgentConfig {
    pub fn from_env() -> AnyResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AnyResult<Self> {
        let d = Self::default();
        let cfg = Self {
            bind: lookup("LOADGEN_BIND").unwrap_or(d.bind),
            cpu_target_percent: parse_var(&lookup, "LOADGEN_CPU_TARGET_PERCENT", d.cpu_target_percent)?,
            cpu_check_interval_secs: parse_var(
                &lookup,
                "LOADGEN_CPU_CHECK_INTERVAL_SECS",
                d.cpu_check_interval_secs,
            )?,
            cpu_max_intensity: match lookup("LOADGEN_CPU_MAX_INTENSITY") {
                None => d.cpu_max_intensity,
                Some(_) => Some(parse_var(&lookup, "LOADGEN_CPU_MAX_INTENSITY", 0_u64)?),
            },
            cpu_batch_budget_ms: parse_var(
                &lookup,
                "LOADGEN_CPU_BATCH_BUDGET_MS",
                d.cpu_batch_budget_ms,
            )?,
            memory_block_mb: parse_var(&lookup, "LOADGEN_MEMORY_BLOCK_MB", d.memory_block_mb)?,
            memory_target_fraction: parse_var(
                &lookup,
                "LOADGEN_MEMORY_TARGET_FRACTION",
                d.memory_target_fraction,
            )?,
            memory_ceiling_percent: parse_var(
                &lookup,
                "LOADGEN_MEMORY_CEILING_PERCENT",
                d.memory_ceiling_percent,
            )?,
            memory_hold_interval_secs: parse_var(
                &lookup,
                "LOADGEN_MEMORY_HOLD_INTERVAL_SECS",
                d.memory_hold_interval_secs,
            )?,
        };
        validate_config(&cfg)?;
        Ok(cfg)
    }

    pub fn cpu_check_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.cpu_check_interval_secs).unwrap_or(DEFAULT_CHECK_INTERVAL)
    }

    pub fn cpu_settings(&self) -> CpuSettings {
        match self.cpu_max_intensity {
            Some(max_intensity) => CpuSettings { max_intensity },
            None => CpuSettings::for_batch_budget(Duration::from_millis(self.cpu_batch_budget_ms)),
        }
    }

    pub fn memory_settings(&self) -> MemorySettings {
        MemorySettings {
            block_bytes: self.memory_block_mb.saturating_mul(1024 * 1024),
            target_fraction: self.memory_target_fraction,
            ceiling_percent: self.memory_ceiling_percent,
            hold_interval: Duration::try_from_secs_f64(self.memory_hold_interval_secs)
                .unwrap_or(DEFAULT_HOLD_INTERVAL),
        }
    }
}
