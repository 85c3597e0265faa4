#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod domain;
pub mod http;
pub mod lib_cpu;
pub mod lib_mem;
pub mod metrics;
pub mod probe;
pub mod service;
pub mod validation;

pub use config::AgentConfig;
pub use domain::{AppState, CancelToken, ControlOutcome, ControlResponse, LoadRegistry};
pub use http::serve;
pub use http::{
    configure, generate_load, healthz, no_cache_headers, scrape_metrics, start_cpu_load,
    start_memory_load, status, stop_all, stop_cpu_load, stop_memory_load,
};
pub use lib_cpu::CpuLoadController;
pub use lib_mem::MemoryLoadController;
pub use metrics::Metrics;
pub use probe::{MemoryReading, StaticProbe, SysinfoProbe, SystemProbe};
pub use service::{LoadService, StatusReport};
pub use validation::validate_config;
