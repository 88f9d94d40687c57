//! handlers/sequence_handler.rs
use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::handlers::error_response;
use crate::models::sequence_model::SequenceRequest;
use crate::services::sequence_service::SequenceService;

/// POST /api/sequences
pub async fn create_sequence_endpoint(
    sequence_service: web::Data<SequenceService>,
    body: web::Json<SequenceRequest>,
) -> HttpResponse {
    match sequence_service.create_sequence(body.into_inner()).await {
        Ok(sequence) => HttpResponse::Created().json(sequence),
        Err(e) => error_response(&e),
    }
}

/// GET /api/sequences
pub async fn list_sequences_endpoint(sequence_service: web::Data<SequenceService>) -> HttpResponse {
    match sequence_service.list_sequences().await {
        Ok(list) => HttpResponse::Ok().json(list),
        Err(e) => error_response(&e),
    }
}

/// GET /api/sequences/{id}
pub async fn get_sequence_endpoint(
    sequence_service: web::Data<SequenceService>,
    path: web::Path<String>,
) -> HttpResponse {
    match sequence_service.get_sequence(&path.into_inner()).await {
        Ok(sequence) => HttpResponse::Ok().json(sequence),
        Err(e) => error_response(&e),
    }
}

/// PUT /api/sequences/{id}
/// Los runs ya creados conservan su copia de los pasos.
pub async fn update_sequence_endpoint(
    sequence_service: web::Data<SequenceService>,
    path: web::Path<String>,
    body: web::Json<SequenceRequest>,
) -> HttpResponse {
    match sequence_service
        .update_sequence(&path.into_inner(), body.into_inner())
        .await
    {
        Ok(sequence) => HttpResponse::Ok().json(sequence),
        Err(e) => error_response(&e),
    }
}

/// DELETE /api/sequences/{id}
pub async fn delete_sequence_endpoint(
    sequence_service: web::Data<SequenceService>,
    path: web::Path<String>,
) -> HttpResponse {
    let sequence_id = path.into_inner();
    match sequence_service.delete_sequence(&sequence_id).await {
        Ok(()) => HttpResponse::Ok().json(json!({
            "success": true,
            "id": sequence_id
        })),
        Err(e) => error_response(&e),
    }
}
