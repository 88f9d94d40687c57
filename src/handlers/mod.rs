//! handlers/mod.rs
//! Handlers HTTP de la API (cuentas, plantillas, secuencias, runs, tracking).

use actix_web::HttpResponse;
use serde_json::json;

use crate::errors::{Conflict, Invalid, NotFound};

pub mod account_handler;
pub mod run_handler;
pub mod scheduler_handler;
pub mod sequence_handler;
pub mod template_handler;
pub mod tracking_handler;

/// Traduce los errores tipados del dominio al status HTTP que corresponde.
pub fn error_response(e: &anyhow::Error) -> HttpResponse {
    if let Some(not_found) = e.downcast_ref::<NotFound>() {
        return HttpResponse::NotFound().json(json!({
            "success": false,
            "error": not_found.to_string()
        }));
    }
    if let Some(conflict) = e.downcast_ref::<Conflict>() {
        return HttpResponse::Conflict().json(json!({
            "success": false,
            "error": conflict.to_string()
        }));
    }
    if let Some(invalid) = e.downcast_ref::<Invalid>() {
        return HttpResponse::BadRequest().json(json!({
            "success": false,
            "error": invalid.to_string()
        }));
    }

    log::error!("Internal error: {:?}", e);
    HttpResponse::InternalServerError().json(json!({
        "success": false,
        "error": "Internal server error",
        "details": format!("{:#}", e)
    }))
}
