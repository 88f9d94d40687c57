use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use dotenv::dotenv;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

use crate::config::engine_config::EngineConfig;
use crate::logger::init_logger;
use crate::services::account_service::AccountService;
use crate::services::clock::{Clock, SystemClock};
use crate::services::outbox_service::OutboxService;
use crate::services::run_control_service::RunControlService;
use crate::services::run_locks::RunLocks;
use crate::services::run_service::RunService;
use crate::services::scheduler_service::Scheduler;
use crate::services::sequence_service::SequenceService;
use crate::services::step_executor::StepExecutor;
use crate::services::template_service::TemplateService;
use crate::services::transport::TransportRegistry;

mod app;
mod config;
mod errors;
mod handlers;
mod logger;
mod models;
mod services;
#[cfg(test)]
mod tests;

async fn setup_database(database_path: &str) -> Result<Pool<Sqlite>> {
    // 1) Crear la carpeta contenedora si hace falta
    if let Some(parent) = Path::new(database_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }

    let db_url = format!("sqlite:{}", database_path);
    log::info!("Conectando a SQLite en {}", db_url);

    // 2) WAL para que los lectores HTTP no bloqueen al scheduler
    let options = SqliteConnectOptions::from_str(&db_url)
        .context("Invalid database path")?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .context("Failed to connect to SQLite")
}

async fn run() -> Result<()> {
    let config = Arc::new(EngineConfig::from_env()?);
    let db_pool = setup_database(&config.database_path).await?;

    let run_service = RunService::new(db_pool.clone());
    run_service.run_migrations().await?;

    let account_service = AccountService::new(db_pool.clone());
    let template_service = TemplateService::new(db_pool.clone());
    let sequence_service = SequenceService::new(db_pool.clone());
    let outbox_service = OutboxService::new(db_pool.clone());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let locks = RunLocks::new();

    let executor = StepExecutor::new(
        run_service.clone(),
        sequence_service.clone(),
        template_service.clone(),
        account_service.clone(),
        outbox_service.clone(),
        TransportRegistry::with_defaults(),
        locks.clone(),
        clock.clone(),
        config.clone(),
    );
    let run_control = RunControlService::new(
        run_service.clone(),
        sequence_service.clone(),
        account_service.clone(),
        locks.clone(),
        clock.clone(),
        config.clone(),
    );
    let scheduler = Scheduler::new(
        executor,
        run_service.clone(),
        locks,
        clock.clone(),
        config.clone(),
    );
    scheduler.start();

    let bind = (config.bind_host.clone(), config.bind_port);
    log::info!("Levantando servidor en {}:{}", bind.0, bind.1);

    let scheduler_data = scheduler.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(account_service.clone()))
            .app_data(web::Data::new(template_service.clone()))
            .app_data(web::Data::new(sequence_service.clone()))
            .app_data(web::Data::new(run_service.clone()))
            .app_data(web::Data::new(outbox_service.clone()))
            .app_data(web::Data::new(run_control.clone()))
            .app_data(web::Data::new(scheduler_data.clone()))
            .app_data(web::Data::from(clock.clone()))
            .configure(app::init_app)
    })
    .bind(bind)
    .context("Failed to bind HTTP server")?
    .run();

    let result = server.await.context("HTTP server failed");

    // El servidor ya paró; esperamos a que termine el tick en curso.
    scheduler.stop().await;
    result
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok(); // Cargar .env al inicio
    init_logger();

    run().await.map_err(|e| {
        log::error!("Fallo al iniciar el servicio: {:?}", e);
        std::io::Error::new(std::io::ErrorKind::Other, format!("{e:#}"))
    })
}
