//! handlers/tracking_handler.rs
//! Pixel de apertura y redirect de clicks. El pixel se sirve siempre; el
//! redirect solo para tracking ids conocidos y destinos del propio mensaje.

use actix_web::{http::header, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::handlers::error_response;
use crate::services::clock::Clock;
use crate::services::outbox_service::OutboxService;
use crate::services::tracking::{links_to, tracking_id_from_pixel, TRANSPARENT_GIF_BASE64};

#[derive(Deserialize)]
pub struct ClickQuery {
    url: Option<String>,
}

/// GET /api/track/open/{tracking_id}.gif
pub async fn open_pixel_endpoint(
    outbox_service: web::Data<OutboxService>,
    clock: web::Data<dyn Clock>,
    path: web::Path<String>,
) -> HttpResponse {
    let segment = path.into_inner();
    let tracking_id = tracking_id_from_pixel(&segment);

    match outbox_service.record_open(tracking_id, clock.now()).await {
        Ok(true) => log::debug!("(open_pixel) Apertura registrada para {}", tracking_id),
        Ok(false) => log::warn!("(open_pixel) Tracking id desconocido: {}", tracking_id),
        Err(e) => log::error!("(open_pixel) No se pudo registrar la apertura: {:?}", e),
    }

    match base64::decode(TRANSPARENT_GIF_BASE64) {
        Ok(gif) => HttpResponse::Ok()
            .content_type("image/gif")
            .insert_header((header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"))
            .body(gif),
        Err(e) => {
            log::error!("(open_pixel) GIF embebido inválido: {}", e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// GET /api/track/click/{tracking_id}?url=...
/// Solo redirige a links que estaban en el mensaje de ese tracking id.
pub async fn click_redirect_endpoint(
    outbox_service: web::Data<OutboxService>,
    path: web::Path<String>,
    query: web::Query<ClickQuery>,
) -> HttpResponse {
    let tracking_id = path.into_inner();
    let target = match query.into_inner().url {
        Some(url) if is_redirectable(&url) => url,
        _ => {
            return HttpResponse::BadRequest().json(json!({
                "success": false,
                "error": "missing or unsupported redirect url"
            }))
        }
    };

    let message = match outbox_service.find_by_tracking_id(&tracking_id).await {
        Ok(Some(message)) => message,
        Ok(None) => {
            log::warn!("(click_redirect) Tracking id desconocido: {}", tracking_id);
            return HttpResponse::NotFound().json(json!({
                "success": false,
                "error": "unknown tracking id"
            }));
        }
        Err(e) => return error_response(&e),
    };

    if !links_to(&message.html, &tracking_id, &target) {
        log::warn!(
            "(click_redirect) Destino ajeno al mensaje {} rechazado: {}",
            message.id,
            target
        );
        return HttpResponse::BadRequest().json(json!({
            "success": false,
            "error": "redirect url does not belong to this message"
        }));
    }

    match outbox_service.record_click(&tracking_id).await {
        Ok(_) => log::debug!("(click_redirect) Click registrado para {}", tracking_id),
        Err(e) => log::error!("(click_redirect) No se pudo registrar el click: {:?}", e),
    }

    HttpResponse::Found()
        .insert_header((header::LOCATION, target))
        .finish()
}

/// Solo destinos http/https.
fn is_redirectable(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
