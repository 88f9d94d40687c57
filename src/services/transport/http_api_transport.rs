//! services/transport/http_api_transport.rs
//! Envío por una API HTTP de correo transaccional: `POST {base_url}/messages`
//! con bearer token, respuesta `{ "id": "..." }`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::TransportClient;
use crate::errors::TransportError;
use crate::models::account_model::Credential;
use crate::models::outbox_model::OutboundMessage;

#[derive(Clone, Default)]
pub struct HttpApiTransport {
    http_client: Client,
}

impl HttpApiTransport {
    pub fn new() -> Self {
        HttpApiTransport {
            http_client: Client::new(),
        }
    }
}

#[async_trait]
impl TransportClient for HttpApiTransport {
    async fn send(
        &self,
        credential: &Credential,
        message: &OutboundMessage,
    ) -> Result<String, TransportError> {
        let Credential::HttpApi { base_url, api_key } = credential else {
            return Err(TransportError::Credential(
                "http api transport requires an http_api credential".to_string(),
            ));
        };

        let url = format!("{}/messages", base_url.trim_end_matches('/'));
        let payload = json!({
            "from": message.from,
            "to": message.to,
            "subject": message.subject,
            "html": message.html,
            "text": message.text,
        });

        let resp = self
            .http_client
            .post(&url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body_txt = resp.text().await.unwrap_or_default();
            log::error!(
                "(http_api_send) El proveedor respondió {} para {}: '{}'",
                status,
                message.to,
                body_txt
            );
            return Err(if status.is_client_error() {
                TransportError::Rejected(format!("{status}: {body_txt}"))
            } else {
                TransportError::Network(format!("{status}: {body_txt}"))
            });
        }

        let json_val = resp
            .json::<serde_json::Value>()
            .await
            .map_err(|e| TransportError::Network(format!("invalid provider response: {e}")))?;

        json_val
            .get("id")
            .or_else(|| json_val.get("message_id"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| TransportError::Rejected("provider response has no message id".to_string()))
    }

    fn name(&self) -> &'static str {
        "http_api"
    }
}
