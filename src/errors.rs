//! errors.rs
//! Taxonomía de errores del motor: resolución, transporte y almacenamiento.

use thiserror::Error;

/// Fallos al hablar con el proveedor externo. Todos son reintentables.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport timed out after {0}s")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("provider rejected message: {0}")]
    Rejected(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("credential does not match transport: {0}")]
    Credential(String),
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Run, secuencia, plantilla o cuenta inexistente. No se modifica nada.
    #[error("resolution failed: {0}")]
    Resolution(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Entidad no encontrada; los handlers la traducen a 404.
#[derive(Debug, Error)]
#[error("{entity} not found: {id}")]
pub struct NotFound {
    pub entity: &'static str,
    pub id: String,
}

impl NotFound {
    pub fn new(entity: &'static str, id: impl Into<String>) -> Self {
        NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// Operación rechazada por el estado actual; los handlers la traducen a 409.
#[derive(Debug, Error)]
#[error("conflict: {0}")]
pub struct Conflict(pub String);

/// Datos de entrada inválidos; los handlers la traducen a 400.
#[derive(Debug, Error)]
#[error("invalid request: {0}")]
pub struct Invalid(pub String);
