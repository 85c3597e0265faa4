#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::sync::Arc;

use actix_web::http::header;
use actix_web::{test, web, App};
use loadgen_agent::{
    configure, no_cache_headers, AgentConfig, AppState, LoadService, MemoryReading, Metrics,
    StaticProbe,
};
use serde_json::Value;

fn state() -> AppState {
    let cfg = AgentConfig {
        cpu_check_interval_secs: 3600.0,
        cpu_max_intensity: Some(100),
        memory_block_mb: 1,
        memory_target_fraction: 0.01,
        ..AgentConfig::default()
    };
    let probe = Arc::new(StaticProbe::new(
        2,
        33.0,
        MemoryReading::from_totals(1024 * 1024 * 1024, 512 * 1024 * 1024),
    ));
    AppState {
        service: LoadService::from_config(&cfg, probe, Metrics::new().expect("metrics")),
    }
}

#[actix_web::test]
async fn control_surface_round_trip() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state()))
            .wrap(no_cache_headers())
            .configure(configure),
    )
    .await;

    // status before anything started
    let req = test::TestRequest::get().uri("/status").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers().get(header::CACHE_CONTROL).expect("cache-control"),
        "no-cache, no-store, must-revalidate"
    );
    assert_eq!(resp.headers().get(header::PRAGMA).expect("pragma"), "no-cache");
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["cpu_test_running"], false);
    assert_eq!(body["memory_test_running"], false);
    assert_eq!(body["memory_percent"], 50.0);
    assert!(body["timestamp"].is_string());

    // start cpu
    let req = test::TestRequest::get().uri("/start-cpu-load").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["outcome"], "started");
    assert!(body["message"].as_str().expect("message").contains("60%"));

    let req = test::TestRequest::get().uri("/status").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["cpu_test_running"], true);

    // start memory
    let req = test::TestRequest::get().uri("/start-memory-load").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["outcome"], "started");

    // metrics scrape
    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let text = test::read_body(resp).await;
    assert!(String::from_utf8_lossy(&text).contains("loadgen_cpu_load_active 1"));

    // stop cpu twice
    let req = test::TestRequest::get().uri("/stop-cpu-load").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["outcome"], "stopped");
    let req = test::TestRequest::get().uri("/stop-cpu-load").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["outcome"], "not_running");

    // emergency stop takes the memory run down
    let req = test::TestRequest::get().uri("/stop-all").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["outcome"], "stopped");

    let req = test::TestRequest::get().uri("/status").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["cpu_test_running"], false);
    assert_eq!(body["memory_test_running"], false);
}

#[actix_web::test]
async fn healthz_and_decoy() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state()))
            .wrap(no_cache_headers())
            .configure(configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/healthz").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");

    let req = test::TestRequest::get().uri("/generate-load").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert!(resp.headers().contains_key(header::EXPIRES));

    let req = test::TestRequest::get().uri("/stop-memory-load").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["outcome"], "not_running");
}
