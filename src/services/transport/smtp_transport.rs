//! services/transport/smtp_transport.rs
//! Envío por SMTP con lettre.

use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use uuid::Uuid;

use super::TransportClient;
use crate::errors::TransportError;
use crate::models::account_model::Credential;
use crate::models::outbox_model::OutboundMessage;

/// Puerto de TLS implícito; el resto usa STARTTLS obligatorio
const SMTPS_PORT: u16 = 465;

#[derive(Debug, Default, Clone, Copy)]
pub struct SmtpTransport;

#[async_trait]
impl TransportClient for SmtpTransport {
    async fn send(
        &self,
        credential: &Credential,
        message: &OutboundMessage,
    ) -> Result<String, TransportError> {
        let Credential::Smtp {
            host,
            port,
            username,
            password,
        } = credential
        else {
            return Err(TransportError::Credential(
                "smtp transport requires an smtp credential".to_string(),
            ));
        };

        let from: Mailbox = message
            .from
            .parse()
            .map_err(|e| TransportError::InvalidMessage(format!("invalid from address: {e}")))?;
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| TransportError::InvalidMessage(format!("invalid recipient address: {e}")))?;

        // Generamos nuestro propio Message-ID para usarlo como id del proveedor
        let message_id = format!("<{}@{}>", Uuid::new_v4(), from.email.domain());

        let email = Message::builder()
            .message_id(Some(message_id.clone()))
            .from(from)
            .to(to)
            .subject(&message.subject)
            .multipart(MultiPart::alternative_plain_html(
                message.text.clone(),
                message.html.clone(),
            ))
            .map_err(|e| TransportError::InvalidMessage(e.to_string()))?;

        let tls_params = TlsParameters::new(host.clone())
            .map_err(|e| TransportError::Network(format!("tls setup failed: {e}")))?;
        let tls = if *port == SMTPS_PORT {
            Tls::Wrapper(tls_params)
        } else {
            Tls::Required(tls_params)
        };

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| TransportError::Network(e.to_string()))?
            .port(*port)
            .credentials(Credentials::new(username.clone(), password.clone()))
            .tls(tls)
            .build();

        mailer.send(email).await.map_err(|e| {
            if e.is_permanent() {
                TransportError::Rejected(e.to_string())
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        log::info!("(smtp_send) Correo entregado al relay {} con id {}", host, message_id);
        Ok(message_id)
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}
