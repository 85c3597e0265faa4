#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use anyhow::{bail, Result as AnyResult};
use crate::config::AgentConfig;
use crate::lib_cpu::MIN_INTENSITY;

pub fn validate_config(cfg: &AgentConfig) -> AnyResult<()> {
    if cfg.bind.trim().is_empty() { bail!("bind address is empty"); }
    if !(cfg.cpu_check_interval_secs.is_finite() && cfg.cpu_check_interval_secs > 0.0) {
        bail!("cpu check interval must be > 0 seconds");
    }
    if cfg.cpu_max_intensity.is_some_and(|max| max < MIN_INTENSITY) {
        bail!(format!("cpu max intensity must be >= {MIN_INTENSITY}"));
    }
    if cfg.cpu_batch_budget_ms == 0 { bail!("cpu batch budget must be > 0 ms"); }
    if cfg.memory_block_mb == 0 { bail!("memory block size must be > 0 MB"); }
    if !(cfg.memory_target_fraction > 0.0 && cfg.memory_target_fraction <= 1.0) {
        bail!("memory target fraction must be in (0, 1]");
    }
    if !(cfg.memory_ceiling_percent > 0.0 && cfg.memory_ceiling_percent <= 100.0) {
        bail!("memory ceiling percent must be in (0, 100]");
    }
    if !(cfg.memory_hold_interval_secs.is_finite() && cfg.memory_hold_interval_secs > 0.0) {
        bail!("memory hold interval must be > 0 seconds");
    }
    Ok(())
}
