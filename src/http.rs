#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use actix_web::http::header;
use actix_web::error::BlockingError;
use actix_web::middleware::DefaultHeaders;
use actix_web::{get, web, App, HttpResponse, HttpServer};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::AgentConfig;
use crate::domain::{AppState, ControlResponse};
use crate::lib_cpu::busy_work_batch;
use crate::metrics::Metrics;
use crate::probe::SysinfoProbe;
use crate::service::LoadService;

/// Work units burnt per `/generate-load` hit.
const GENERATE_LOAD_UNITS: u64 = 50;

#[get("/start-cpu-load")]
pub async fn start_cpu_load(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.service.start_cpu_load())
}

#[get("/stop-cpu-load")]
pub async fn stop_cpu_load(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.service.stop_cpu_load())
}

#[get("/start-memory-load")]
pub async fn start_memory_load(data: web::Data<AppState>) -> HttpResponse {
    let service = data.service.clone();
    control(web::block(move || service.start_memory_load()).await)
}

#[get("/stop-memory-load")]
pub async fn stop_memory_load(data: web::Data<AppState>) -> HttpResponse {
    let service = data.service.clone();
    control(web::block(move || service.stop_memory_load()).await)
}

#[get("/stop-all")]
pub async fn stop_all(data: web::Data<AppState>) -> HttpResponse {
    let service = data.service.clone();
    control(web::block(move || service.stop_all()).await)
}

#[get("/status")]
pub async fn status(data: web::Data<AppState>) -> HttpResponse {
    let service = data.service.clone();
    // sysinfo refreshes read procfs
    match web::block(move || service.status()).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => {
            error!(error = %e, "status sampling failed");
            json_error(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR, "status unavailable")
        }
    }
}

#[get("/healthz")]
pub async fn healthz(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.service.health())
}

#[get("/metrics")]
pub async fn scrape_metrics(data: web::Data<AppState>) -> HttpResponse {
    match data.service.encode_metrics() {
        Ok(buf) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buf),
        Err(e) => {
            error!(error=%format!("{e:#}"), "encode metrics failed");
            HttpResponse::InternalServerError().body("encode metrics failed")
        }
    }
}

/// Target for external traffic drivers: a small CPU-bound batch per request.
#[get("/generate-load")]
pub async fn generate_load() -> HttpResponse {
    match web::block(|| busy_work_batch(GENERATE_LOAD_UNITS, 0)).await {
        Ok(result) => HttpResponse::Ok().json(json!({"status":"ok","result":result})),
        Err(e) => {
            error!(error = %e, "generate-load batch failed");
            json_error(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR, "generate-load failed")
        }
    }
}

/// Marks every response as uncacheable; status readings must never be reused.
pub fn no_cache_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add((header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"))
        .add((header::PRAGMA, "no-cache"))
        .add((header::EXPIRES, "0"))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(start_cpu_load)
        .service(stop_cpu_load)
        .service(start_memory_load)
        .service(stop_memory_load)
        .service(stop_all)
        .service(status)
        .service(healthz)
        .service(scrape_metrics)
        .service(generate_load);
}

pub async fn serve(config: AgentConfig) -> std::io::Result<()> {
    let metrics = Metrics::new().map_err(|e| std::io::Error::other(format!("metrics init: {e:#}")))?;
    let service = LoadService::from_config(&config, Arc::new(SysinfoProbe::new()), metrics);
    let state = AppState { service };
    info!(bind = %config.bind, "http control surface listening");
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(no_cache_headers())
            .configure(configure)
    })
    .bind(config.bind.as_str())?
    .run()
    .await
}

/// Render a control response produced on the blocking pool.
fn control(result: Result<ControlResponse, BlockingError>) -> HttpResponse {
    match result {
        Ok(resp) => HttpResponse::Ok().json(resp),
        Err(e) => {
            error!(error = %e, "control request failed");
            json_error(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR, "control request failed")
        }
    }
}

fn json_error(code: actix_web::http::StatusCode, reason: &str) -> HttpResponse {
    HttpResponse::build(code).json(json!({"status":"error","reason":reason}))
}
