//! models/outbox_model.rs
//! Registro de auditoría de cada intento de despacho.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Scheduled,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Scheduled => "scheduled",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "scheduled" => Ok(OutboxStatus::Scheduled),
            "sent" => Ok(OutboxStatus::Sent),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(format!("unknown outbox status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboxMessage {
    pub id: String,
    pub run_id: String,
    pub step_index: usize,
    pub account_id: String,
    pub recipient: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    pub status: OutboxStatus,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub tracking_id: Option<String>,
    pub pixel_url: String,
    pub open_count: i64,
    pub click_count: i64,
    pub first_opened_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mensaje ya compuesto que se entrega al transporte
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Conteos de envíos recientes de una cuenta, usados por la ventana de envío
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendCounts {
    pub today: u32,
    pub last_hour: u32,
    pub oldest_in_last_hour: Option<DateTime<Utc>>,
}
