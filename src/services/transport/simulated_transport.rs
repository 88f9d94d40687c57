//! services/transport/simulated_transport.rs
//! Transporte para cuentas en dry-run: no sale a la red, pero deja el
//! mismo rastro (outbox + historial) que un envío real.

use async_trait::async_trait;
use uuid::Uuid;

use super::TransportClient;
use crate::errors::TransportError;
use crate::models::account_model::Credential;
use crate::models::outbox_model::{OutboundMessage, OutboxStatus};

#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedTransport;

#[async_trait]
impl TransportClient for SimulatedTransport {
    async fn send(
        &self,
        _credential: &Credential,
        message: &OutboundMessage,
    ) -> Result<String, TransportError> {
        log::info!(
            "(simulated_send) Dry-run: '{}' para {} no se envía",
            message.subject,
            message.to
        );
        Ok(format!("sim-{}", Uuid::new_v4()))
    }

    fn initial_status(&self) -> OutboxStatus {
        OutboxStatus::Scheduled
    }

    fn delivered_status(&self) -> OutboxStatus {
        OutboxStatus::Scheduled
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}
