//! models/sequence_model.rs
//! Definición declarativa de una secuencia: pasos ordenados + reglas de envío.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Hora del día (UTC) en formato "HH:MM".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TryFrom<String> for TimeOfDay {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (h, m) = value
            .split_once(':')
            .ok_or_else(|| format!("invalid time of day '{value}', expected HH:MM"))?;
        let hour: u32 = h.trim().parse().map_err(|_| format!("invalid hour in '{value}'"))?;
        let minute: u32 = m.trim().parse().map_err(|_| format!("invalid minute in '{value}'"))?;
        if hour > 23 || minute > 59 {
            return Err(format!("time of day out of range: '{value}'"));
        }
        Ok(TimeOfDay { hour, minute })
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[default]
    Email,
}

/// Tipos de paso soportados. El vocabulario es fijo a propósito.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    SendMessage {
        template_id: String,
        #[serde(default)]
        channel: Channel,
        /// Plantilla alternativa para runs asignados a la variante B
        #[serde(default)]
        variant_b_template_id: Option<String>,
        #[serde(default)]
        delay_days: u32,
        #[serde(default)]
        send_at: Option<TimeOfDay>,
    },
    Wait {
        days: u32,
    },
    ManualTask {
        title: String,
        #[serde(default)]
        notes: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub kind: StepKind,
    #[serde(default)]
    pub stop_on_reply: bool,
    #[serde(default)]
    pub stop_on_unsubscribe: bool,
}

impl Step {
    pub fn send(template_id: impl Into<String>) -> Self {
        Step {
            kind: StepKind::SendMessage {
                template_id: template_id.into(),
                channel: Channel::Email,
                variant_b_template_id: None,
                delay_days: 0,
                send_at: None,
            },
            stop_on_reply: true,
            stop_on_unsubscribe: true,
        }
    }

    pub fn wait(days: u32) -> Self {
        Step {
            kind: StepKind::Wait { days },
            stop_on_reply: true,
            stop_on_unsubscribe: true,
        }
    }

    pub fn manual_task(title: impl Into<String>) -> Self {
        Step {
            kind: StepKind::ManualTask {
                title: title.into(),
                notes: None,
            },
            stop_on_reply: false,
            stop_on_unsubscribe: false,
        }
    }

    /// "send_message", "wait" o "manual_task"
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            StepKind::SendMessage { .. } => "send_message",
            StepKind::Wait { .. } => "wait",
            StepKind::ManualTask { .. } => "manual_task",
        }
    }

    /// Desplazamiento en días que se aplica al entrar en este paso.
    pub fn delay(&self) -> Duration {
        match self.kind {
            StepKind::SendMessage { delay_days, .. } => Duration::days(delay_days as i64),
            StepKind::Wait { days } => Duration::days(days as i64),
            StepKind::ManualTask { .. } => Duration::zero(),
        }
    }

    pub fn time_of_day(&self) -> Option<TimeOfDay> {
        match self.kind {
            StepKind::SendMessage { send_at, .. } => send_at,
            _ => None,
        }
    }
}

/// Reglas de envío declaradas en la secuencia.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rules {
    #[serde(default)]
    pub throttle_per_hour: Option<u32>,
    #[serde(default)]
    pub daily_cap: Option<u32>,
    #[serde(default)]
    pub quiet_hours: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    pub id: String,
    pub name: String,
    pub steps: Vec<Step>,
    pub rules: Rules,
    /// Porcentaje (0-100) de runs asignados a la variante B
    pub ab_split_percent: Option<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Máximo desplazamiento aceptado por paso (unos diez años)
pub const MAX_STEP_DELAY_DAYS: u32 = 3650;

/// Request para crear o reemplazar una secuencia
#[derive(Debug, Clone, Deserialize)]
pub struct SequenceRequest {
    pub name: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub rules: Rules,
    #[serde(default)]
    pub ab_split_percent: Option<u8>,
}

impl SequenceRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("sequence name must not be empty".to_string());
        }
        if let Some(split) = self.ab_split_percent {
            if split > 100 {
                return Err(format!("ab_split_percent must be <= 100, got {split}"));
            }
        }
        if self.rules.throttle_per_hour == Some(0) || self.rules.daily_cap == Some(0) {
            return Err("throttle_per_hour and daily_cap must be at least 1 when set".to_string());
        }
        for (index, step) in self.steps.iter().enumerate() {
            if let StepKind::SendMessage { template_id, .. } = &step.kind {
                if template_id.trim().is_empty() {
                    return Err(format!("step {index}: template_id must not be empty"));
                }
            }
            let days = match step.kind {
                StepKind::SendMessage { delay_days, .. } => delay_days,
                StepKind::Wait { days } => days,
                StepKind::ManualTask { .. } => 0,
            };
            if days > MAX_STEP_DELAY_DAYS {
                return Err(format!(
                    "step {index}: delay of {days} days exceeds the maximum of {MAX_STEP_DELAY_DAYS}"
                ));
            }
        }
        Ok(())
    }
}
