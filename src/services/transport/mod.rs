//! services/transport/mod.rs
//! Contrato único hacia proveedores externos. La cuenta decide qué
//! implementación se usa; el modo dry-run es solo otra implementación.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::TransportError;
use crate::models::account_model::{Account, Credential, ProviderKind};
use crate::models::outbox_model::{OutboundMessage, OutboxStatus};

pub mod http_api_transport;
pub mod simulated_transport;
pub mod smtp_transport;

pub use http_api_transport::HttpApiTransport;
pub use simulated_transport::SimulatedTransport;
pub use smtp_transport::SmtpTransport;

#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Envía el mensaje y devuelve el id asignado por el proveedor.
    async fn send(
        &self,
        credential: &Credential,
        message: &OutboundMessage,
    ) -> Result<String, TransportError>;

    /// Estado con el que se registra el outbox antes de despachar
    fn initial_status(&self) -> OutboxStatus {
        OutboxStatus::Pending
    }

    /// Estado del outbox cuando el despacho termina bien
    fn delivered_status(&self) -> OutboxStatus {
        OutboxStatus::Sent
    }

    fn name(&self) -> &'static str;
}

#[derive(Clone)]
pub struct TransportRegistry {
    live: HashMap<ProviderKind, Arc<dyn TransportClient>>,
    simulated: Arc<dyn TransportClient>,
}

impl TransportRegistry {
    pub fn new(simulated: Arc<dyn TransportClient>) -> Self {
        TransportRegistry {
            live: HashMap::new(),
            simulated,
        }
    }

    /// SMTP (lettre) + API HTTP (reqwest) + simulado
    pub fn with_defaults() -> Self {
        TransportRegistry::new(Arc::new(SimulatedTransport))
            .register(ProviderKind::Smtp, Arc::new(SmtpTransport))
            .register(ProviderKind::HttpApi, Arc::new(HttpApiTransport::new()))
    }

    pub fn register(mut self, kind: ProviderKind, client: Arc<dyn TransportClient>) -> Self {
        self.live.insert(kind, client);
        self
    }

    pub fn for_account(&self, account: &Account) -> Result<Arc<dyn TransportClient>, TransportError> {
        if account.dry_run {
            return Ok(self.simulated.clone());
        }
        self.live.get(&account.provider).cloned().ok_or_else(|| {
            TransportError::Credential(format!(
                "no transport registered for provider '{}'",
                account.provider.as_str()
            ))
        })
    }
}
