//! handlers/template_handler.rs
use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::handlers::error_response;
use crate::models::template_model::{PreviewRequest, TemplateRequest};
use crate::services::template_service::TemplateService;

/// POST /api/templates
pub async fn create_template_endpoint(
    template_service: web::Data<TemplateService>,
    body: web::Json<TemplateRequest>,
) -> HttpResponse {
    match template_service.create_template(body.into_inner()).await {
        Ok(template) => HttpResponse::Created().json(template),
        Err(e) => error_response(&e),
    }
}

/// GET /api/templates
pub async fn list_templates_endpoint(template_service: web::Data<TemplateService>) -> HttpResponse {
    match template_service.list_templates().await {
        Ok(list) => HttpResponse::Ok().json(list),
        Err(e) => error_response(&e),
    }
}

/// GET /api/templates/{id}
pub async fn get_template_endpoint(
    template_service: web::Data<TemplateService>,
    path: web::Path<String>,
) -> HttpResponse {
    match template_service.get_template(&path.into_inner()).await {
        Ok(template) => HttpResponse::Ok().json(template),
        Err(e) => error_response(&e),
    }
}

/// PUT /api/templates/{id}
pub async fn update_template_endpoint(
    template_service: web::Data<TemplateService>,
    path: web::Path<String>,
    body: web::Json<TemplateRequest>,
) -> HttpResponse {
    match template_service
        .update_template(&path.into_inner(), body.into_inner())
        .await
    {
        Ok(template) => HttpResponse::Ok().json(template),
        Err(e) => error_response(&e),
    }
}

/// DELETE /api/templates/{id}
pub async fn delete_template_endpoint(
    template_service: web::Data<TemplateService>,
    path: web::Path<String>,
) -> HttpResponse {
    let template_id = path.into_inner();
    match template_service.delete_template(&template_id).await {
        Ok(()) => HttpResponse::Ok().json(json!({
            "success": true,
            "id": template_id
        })),
        Err(e) => error_response(&e),
    }
}

/// POST /api/templates/{id}/preview
/// Render sin tracking: no genera ids ni toca el outbox.
pub async fn preview_template_endpoint(
    template_service: web::Data<TemplateService>,
    path: web::Path<String>,
    body: web::Json<PreviewRequest>,
) -> HttpResponse {
    match template_service
        .preview(&path.into_inner(), body.into_inner())
        .await
    {
        Ok(rendered) => HttpResponse::Ok().json(rendered),
        Err(e) => error_response(&e),
    }
}
