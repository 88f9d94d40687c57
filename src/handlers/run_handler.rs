//! handlers/run_handler.rs
//! Endpoints de runs: alta, consulta, historial y operaciones externas.

use actix_web::{web, HttpResponse};

use crate::handlers::error_response;
use crate::models::run_model::{CreateRunRequest, ListRunsQuery, RunEventRequest};
use crate::services::outbox_service::OutboxService;
use crate::services::run_control_service::RunControlService;
use crate::services::run_service::RunService;

/// POST /api/runs
pub async fn create_run_endpoint(
    control: web::Data<RunControlService>,
    body: web::Json<CreateRunRequest>,
) -> HttpResponse {
    match control.create_run(body.into_inner()).await {
        Ok(run) => HttpResponse::Created().json(run),
        Err(e) => error_response(&e),
    }
}

/// GET /api/runs?sequence_id=&status=
pub async fn list_runs_endpoint(
    run_service: web::Data<RunService>,
    query: web::Query<ListRunsQuery>,
) -> HttpResponse {
    match run_service.list_runs(&query.into_inner()).await {
        Ok(list) => HttpResponse::Ok().json(list),
        Err(e) => error_response(&e),
    }
}

/// GET /api/runs/{id}
pub async fn get_run_endpoint(
    run_service: web::Data<RunService>,
    path: web::Path<String>,
) -> HttpResponse {
    match run_service.get_run(&path.into_inner()).await {
        Ok(run) => HttpResponse::Ok().json(run),
        Err(e) => error_response(&e),
    }
}

/// GET /api/runs/{id}/history
pub async fn run_history_endpoint(
    run_service: web::Data<RunService>,
    path: web::Path<String>,
) -> HttpResponse {
    let run_id = path.into_inner();
    if let Err(e) = run_service.get_run(&run_id).await {
        return error_response(&e);
    }
    match run_service.history(&run_id).await {
        Ok(entries) => HttpResponse::Ok().json(entries),
        Err(e) => error_response(&e),
    }
}

/// GET /api/runs/{id}/outbox
pub async fn run_outbox_endpoint(
    run_service: web::Data<RunService>,
    outbox_service: web::Data<OutboxService>,
    path: web::Path<String>,
) -> HttpResponse {
    let run_id = path.into_inner();
    if let Err(e) = run_service.get_run(&run_id).await {
        return error_response(&e);
    }
    match outbox_service.list_for_run(&run_id).await {
        Ok(messages) => HttpResponse::Ok().json(messages),
        Err(e) => error_response(&e),
    }
}

/// POST /api/runs/{id}/complete-task
pub async fn complete_task_endpoint(
    control: web::Data<RunControlService>,
    path: web::Path<String>,
) -> HttpResponse {
    match control.complete_manual_task(&path.into_inner()).await {
        Ok(run) => HttpResponse::Ok().json(run),
        Err(e) => error_response(&e),
    }
}

/// POST /api/runs/{id}/events  body: {"event": "reply" | "unsubscribe"}
pub async fn run_event_endpoint(
    control: web::Data<RunControlService>,
    path: web::Path<String>,
    body: web::Json<RunEventRequest>,
) -> HttpResponse {
    match control
        .record_event(&path.into_inner(), body.into_inner().event)
        .await
    {
        Ok(run) => HttpResponse::Ok().json(run),
        Err(e) => error_response(&e),
    }
}

/// POST /api/runs/{id}/cancel
pub async fn cancel_run_endpoint(
    control: web::Data<RunControlService>,
    path: web::Path<String>,
) -> HttpResponse {
    match control.cancel_run(&path.into_inner()).await {
        Ok(run) => HttpResponse::Ok().json(run),
        Err(e) => error_response(&e),
    }
}
