//! handlers/account_handler.rs
use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::handlers::error_response;
use crate::models::account_model::CreateAccountRequest;
use crate::services::account_service::AccountService;

/// POST /api/accounts
pub async fn create_account_endpoint(
    account_service: web::Data<AccountService>,
    body: web::Json<CreateAccountRequest>,
) -> HttpResponse {
    match account_service.create_account(body.into_inner()).await {
        Ok(account) => HttpResponse::Created().json(account),
        Err(e) => error_response(&e),
    }
}

/// GET /api/accounts
pub async fn list_accounts_endpoint(account_service: web::Data<AccountService>) -> HttpResponse {
    match account_service.list_accounts().await {
        Ok(list) => HttpResponse::Ok().json(list),
        Err(e) => error_response(&e),
    }
}

/// GET /api/accounts/{id}
pub async fn get_account_endpoint(
    account_service: web::Data<AccountService>,
    path: web::Path<String>,
) -> HttpResponse {
    match account_service.get_account(&path.into_inner()).await {
        Ok(account) => HttpResponse::Ok().json(account),
        Err(e) => error_response(&e),
    }
}

/// DELETE /api/accounts/{id}
pub async fn delete_account_endpoint(
    account_service: web::Data<AccountService>,
    path: web::Path<String>,
) -> HttpResponse {
    let account_id = path.into_inner();
    match account_service.delete_account(&account_id).await {
        Ok(()) => HttpResponse::Ok().json(json!({
            "success": true,
            "id": account_id
        })),
        Err(e) => error_response(&e),
    }
}
