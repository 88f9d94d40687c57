//! handlers/scheduler_handler.rs
use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::handlers::error_response;
use crate::services::scheduler_service::Scheduler;

/// POST /api/scheduler/tick
/// Fuerza un ciclo inmediato; convive con el loop periódico gracias al lock por run.
pub async fn tick_endpoint(scheduler: web::Data<Scheduler>) -> HttpResponse {
    match scheduler.tick().await {
        Ok(report) => HttpResponse::Ok().json(json!({
            "success": true,
            "report": report
        })),
        Err(e) => error_response(&e),
    }
}

/// GET /api/scheduler/status
pub async fn status_endpoint(scheduler: web::Data<Scheduler>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "running": scheduler.is_running()
    }))
}
