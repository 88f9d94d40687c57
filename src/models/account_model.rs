//! models/account_model.rs
//! Identidad de envío y su credencial de transporte.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Smtp,
    HttpApi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Smtp => "smtp",
            ProviderKind::HttpApi => "http_api",
        }
    }
}

/// Credencial según proveedor. Nunca se devuelve por la API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    Smtp {
        host: String,
        port: u16,
        username: String,
        password: String,
    },
    HttpApi {
        base_url: String,
        api_key: String,
    },
}

impl Credential {
    pub fn provider(&self) -> ProviderKind {
        match self {
            Credential::Smtp { .. } => ProviderKind::Smtp,
            Credential::HttpApi { .. } => ProviderKind::HttpApi,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub from_address: String,
    pub from_name: Option<String>,
    pub provider: ProviderKind,
    #[serde(skip_serializing)]
    pub credential: Credential,
    /// Si es true, nunca se contacta al transporte externo
    pub dry_run: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// "Nombre <correo>" o solo el correo
    pub fn sender(&self) -> String {
        match &self.from_name {
            Some(name) if !name.trim().is_empty() => format!("{} <{}>", name, self.from_address),
            _ => self.from_address.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
    pub from_address: String,
    pub from_name: Option<String>,
    pub credential: Credential,
    #[serde(default)]
    pub dry_run: bool,
}
