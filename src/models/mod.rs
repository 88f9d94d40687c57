//! models/mod.rs
//! Módulo raíz para modelos/estructuras compartidas.

pub mod account_model;
pub mod outbox_model;
pub mod run_model;
pub mod sequence_model;
pub mod template_model;
