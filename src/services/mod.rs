//! services/mod.rs
//! Capas de negocio del motor: persistencia, render, ejecución y scheduler.

pub mod account_service;
pub mod clock;
pub mod outbox_service;
pub mod run_control_service;
pub mod run_locks;
pub mod run_service;
pub mod scheduler_service;
pub mod send_window;
pub mod sequence_service;
pub mod step_executor;
pub mod template_renderer;
pub mod template_service;
pub mod tracking;
pub mod transport;
