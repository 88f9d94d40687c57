//! app.rs
use crate::handlers::{
    account_handler, run_handler, scheduler_handler, sequence_handler, template_handler,
    tracking_handler,
};
use actix_web::web;

pub fn init_app(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(
                web::scope("/accounts")
                    .route("", web::post().to(account_handler::create_account_endpoint))
                    .route("", web::get().to(account_handler::list_accounts_endpoint))
                    .route("/{id}", web::get().to(account_handler::get_account_endpoint))
                    .route(
                        "/{id}",
                        web::delete().to(account_handler::delete_account_endpoint),
                    ),
            )
            .service(
                web::scope("/templates")
                    .route(
                        "",
                        web::post().to(template_handler::create_template_endpoint),
                    )
                    .route("", web::get().to(template_handler::list_templates_endpoint))
                    .route("/{id}", web::get().to(template_handler::get_template_endpoint))
                    .route(
                        "/{id}",
                        web::put().to(template_handler::update_template_endpoint),
                    )
                    .route(
                        "/{id}",
                        web::delete().to(template_handler::delete_template_endpoint),
                    )
                    .route(
                        "/{id}/preview",
                        web::post().to(template_handler::preview_template_endpoint),
                    ),
            )
            .service(
                web::scope("/sequences")
                    .route(
                        "",
                        web::post().to(sequence_handler::create_sequence_endpoint),
                    )
                    .route("", web::get().to(sequence_handler::list_sequences_endpoint))
                    .route("/{id}", web::get().to(sequence_handler::get_sequence_endpoint))
                    .route(
                        "/{id}",
                        web::put().to(sequence_handler::update_sequence_endpoint),
                    )
                    .route(
                        "/{id}",
                        web::delete().to(sequence_handler::delete_sequence_endpoint),
                    ),
            )
            .service(
                web::scope("/runs")
                    .route("", web::post().to(run_handler::create_run_endpoint))
                    .route("", web::get().to(run_handler::list_runs_endpoint))
                    .route("/{id}", web::get().to(run_handler::get_run_endpoint))
                    .route(
                        "/{id}/history",
                        web::get().to(run_handler::run_history_endpoint),
                    )
                    .route("/{id}/outbox", web::get().to(run_handler::run_outbox_endpoint))
                    .route(
                        "/{id}/complete-task",
                        web::post().to(run_handler::complete_task_endpoint),
                    )
                    .route("/{id}/events", web::post().to(run_handler::run_event_endpoint))
                    .route("/{id}/cancel", web::post().to(run_handler::cancel_run_endpoint)),
            )
            .service(
                web::scope("/scheduler")
                    .route("/tick", web::post().to(scheduler_handler::tick_endpoint))
                    .route("/status", web::get().to(scheduler_handler::status_endpoint)),
            )
            .service(
                web::scope("/track")
                    .route(
                        "/open/{tracking_id}",
                        web::get().to(tracking_handler::open_pixel_endpoint),
                    )
                    .route(
                        "/click/{tracking_id}",
                        web::get().to(tracking_handler::click_redirect_endpoint),
                    ),
            ),
    );
}
