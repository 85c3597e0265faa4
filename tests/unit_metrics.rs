#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use loadgen_agent::metrics::Metrics;

#[test]
fn create_and_encode() {
    let m = Metrics::new().expect("metrics");
    m.cpu_workers.set(3);
    let buf = m.encode_text().expect("encode");
    let text = String::from_utf8(buf).expect("utf8");
    assert!(text.contains("loadgen_cpu_workers 3"));
    assert!(text.contains("loadgen_memory_allocated_bytes"));
}
