//! models/run_model.rs
//! Instancia de una secuencia para un contacto, y su historial de intentos.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::sequence_model::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Pausado en un paso manual hasta que alguien lo complete
    AwaitingTask,
    Stopped,
    /// Se agotaron los reintentos del paso actual
    FailedPermanently,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::AwaitingTask => "awaiting_task",
            RunStatus::Stopped => "stopped",
            RunStatus::FailedPermanently => "failed_permanently",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Stopped | RunStatus::FailedPermanently)
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "awaiting_task" => Ok(RunStatus::AwaitingTask),
            "stopped" => Ok(RunStatus::Stopped),
            "failed_permanently" => Ok(RunStatus::FailedPermanently),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    Replied,
    Unsubscribed,
    Cancelled,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Completed => "completed",
            StopReason::Replied => "replied",
            StopReason::Unsubscribed => "unsubscribed",
            StopReason::Cancelled => "cancelled",
        }
    }
}

impl FromStr for StopReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(StopReason::Completed),
            "replied" => Ok(StopReason::Replied),
            "unsubscribed" => Ok(StopReason::Unsubscribed),
            "cancelled" => Ok(StopReason::Cancelled),
            other => Err(format!("unknown stop reason '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    A,
    B,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::A => "a",
            Variant::B => "b",
        }
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "a" => Ok(Variant::A),
            "b" => Ok(Variant::B),
            other => Err(format!("unknown variant '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SequenceRun {
    pub id: String,
    pub sequence_id: String,
    pub account_id: String,
    pub variables: BTreeMap<String, String>,
    /// Copia de los pasos de la secuencia al momento de crear el run
    pub steps: Vec<Step>,
    pub variant: Variant,
    pub current_step_index: usize,
    pub status: RunStatus,
    pub stop_reason: Option<StopReason>,
    pub replied: bool,
    pub unsubscribed: bool,
    pub next_send_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SequenceRun {
    pub fn current_step(&self) -> Option<&Step> {
        self.steps.get(self.current_step_index)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == RunStatus::Running && self.next_send_at.map_or(true, |at| at <= now)
    }

    /// Dirección del destinatario tomada de las variables ("Email", sin importar mayúsculas).
    pub fn recipient(&self) -> Option<&str> {
        self.variables
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("email"))
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: String,
    pub run_id: String,
    pub step_index: usize,
    pub step_kind: String,
    pub outbox_id: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request para crear un run
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRunRequest {
    pub sequence_id: String,
    pub account_id: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// Eventos externos que pueden disparar un guard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEvent {
    Reply,
    Unsubscribe,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunEventRequest {
    pub event: RunEvent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListRunsQuery {
    pub sequence_id: Option<String>,
    pub status: Option<String>,
}
