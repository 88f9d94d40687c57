//! services/step_executor.rs
//! Ejecuta el paso actual de un run: resuelve, renderiza, instrumenta,
//! despacha y deja escrita la transición (avance o reintento).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::engine_config::{EngineConfig, QuietWindow};
use crate::errors::{ExecutorError, TransportError};
use crate::models::outbox_model::{OutboundMessage, OutboxMessage, OutboxStatus};
use crate::models::run_model::{HistoryEntry, RunStatus, SequenceRun, StopReason, Variant};
use crate::models::sequence_model::{Rules, Sequence, Step, StepKind};
use crate::services::account_service::AccountService;
use crate::services::clock::Clock;
use crate::services::outbox_service::OutboxService;
use crate::services::run_locks::RunLocks;
use crate::services::run_service::{OutboxResolution, RunService, RunTransition};
use crate::services::sequence_service::SequenceService;
use crate::services::template_service::TemplateService;
use crate::services::transport::TransportRegistry;
use crate::services::{send_window, template_renderer, tracking};

/// Resultado de una invocación del executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// El run estaba ocupado o ya no estaba vencido
    Skipped,
    Sent { outbox_id: String },
    /// `retry_at` es None cuando se agotaron los intentos
    Failed {
        outbox_id: String,
        error: String,
        retry_at: Option<DateTime<Utc>>,
    },
    /// La ventana de envío no lo permite todavía
    Deferred { until: DateTime<Utc> },
    Waited,
    AwaitingTask,
    Completed,
    Stopped(StopReason),
}

/// Avanza al siguiente paso y calcula su `next_send_at` (None si no hay más pasos).
pub fn advance_run(run: &mut SequenceRun, rules: &Rules, quiet: QuietWindow, now: DateTime<Utc>) {
    run.current_step_index += 1;
    run.next_send_at = run
        .current_step()
        .map(|step| send_window::next_time(step, now, rules, quiet));
    run.updated_at = now;
}

/// Guard que aplica al paso según los eventos ya recibidos por el run.
pub fn guard_reason(run: &SequenceRun, step: &Step) -> Option<StopReason> {
    if run.replied && step.stop_on_reply {
        Some(StopReason::Replied)
    } else if run.unsubscribed && step.stop_on_unsubscribe {
        Some(StopReason::Unsubscribed)
    } else {
        None
    }
}

pub fn stop_run(run: &mut SequenceRun, reason: StopReason, now: DateTime<Utc>) {
    run.status = RunStatus::Stopped;
    run.stop_reason = Some(reason);
    run.next_send_at = None;
    run.updated_at = now;
}

pub fn history_entry(
    run: &SequenceRun,
    step: &Step,
    outbox_id: Option<String>,
    error: Option<String>,
    now: DateTime<Utc>,
) -> HistoryEntry {
    HistoryEntry {
        id: Uuid::new_v4().to_string(),
        run_id: run.id.clone(),
        step_index: run.current_step_index,
        step_kind: step.kind_name().to_string(),
        outbox_id,
        success: error.is_none(),
        error,
        created_at: now,
    }
}

#[derive(Clone)]
pub struct StepExecutor {
    run_service: RunService,
    sequence_service: SequenceService,
    template_service: TemplateService,
    account_service: AccountService,
    outbox_service: OutboxService,
    transports: TransportRegistry,
    locks: RunLocks,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
}

impl StepExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_service: RunService,
        sequence_service: SequenceService,
        template_service: TemplateService,
        account_service: AccountService,
        outbox_service: OutboxService,
        transports: TransportRegistry,
        locks: RunLocks,
        clock: Arc<dyn Clock>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            run_service,
            sequence_service,
            template_service,
            account_service,
            outbox_service,
            transports,
            locks,
            clock,
            config,
        }
    }

    /// Ejecuta el paso actual del run. Si el run está tomado por otra
    /// invocación, no hace nada.
    pub async fn execute_step(&self, run_id: &str) -> Result<StepOutcome, ExecutorError> {
        let Some(_guard) = self.locks.try_lock(run_id) else {
            log::debug!("(execute_step) Run {} ocupado, se salta", run_id);
            return Ok(StepOutcome::Skipped);
        };

        let now = self.clock.now();
        let mut run = self
            .run_service
            .find_run(run_id)
            .await?
            .ok_or_else(|| ExecutorError::Resolution(format!("run {run_id} not found")))?;

        // Otra invocación pudo haberlo movido entre la selección y el lock
        if !run.is_due(now) {
            return Ok(StepOutcome::Skipped);
        }

        let sequence = self
            .sequence_service
            .find_sequence(&run.sequence_id)
            .await?
            .ok_or_else(|| {
                ExecutorError::Resolution(format!(
                    "sequence {} of run {} not found",
                    run.sequence_id, run.id
                ))
            })?;

        // Un wait vencido encadena el paso siguiente si ya toca
        let mut outcome = StepOutcome::Skipped;
        for _ in 0..=run.steps.len() {
            outcome = self.execute_current(&mut run, &sequence, now).await?;
            if outcome != StepOutcome::Waited || !run.is_due(now) {
                break;
            }
        }
        Ok(outcome)
    }

    async fn execute_current(
        &self,
        run: &mut SequenceRun,
        sequence: &Sequence,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, ExecutorError> {
        let Some(step) = run.current_step().cloned() else {
            log::info!(
                "(execute_step) Run {} completó sus {} pasos, se detiene",
                run.id,
                run.steps.len()
            );
            stop_run(run, StopReason::Completed, now);
            self.commit(run, None, None).await?;
            return Ok(StepOutcome::Completed);
        };

        if let Some(reason) = guard_reason(run, &step) {
            log::info!(
                "(execute_step) Guard '{}' detiene el run {} en el paso {}",
                reason.as_str(),
                run.id,
                run.current_step_index
            );
            stop_run(run, reason, now);
            self.commit(run, None, None).await?;
            return Ok(StepOutcome::Stopped(reason));
        }

        match &step.kind {
            StepKind::SendMessage {
                template_id,
                variant_b_template_id,
                ..
            } => {
                let template_id = match (run.variant, variant_b_template_id) {
                    (Variant::B, Some(variant_b)) => variant_b.as_str(),
                    _ => template_id.as_str(),
                };
                self.execute_send(run, sequence, &step, template_id, now).await
            }
            StepKind::Wait { days } => {
                log::info!(
                    "(execute_step) Run {} termina espera de {} días (paso {})",
                    run.id,
                    days,
                    run.current_step_index
                );
                let entry = history_entry(run, &step, None, None, now);
                advance_run(run, &sequence.rules, self.config.quiet_window, now);
                self.commit(run, Some(entry), None).await?;
                Ok(StepOutcome::Waited)
            }
            StepKind::ManualTask { title, .. } => {
                log::info!(
                    "(execute_step) Run {} espera la tarea manual '{}'",
                    run.id,
                    title
                );
                run.status = RunStatus::AwaitingTask;
                run.next_send_at = None;
                run.updated_at = now;
                self.commit(run, None, None).await?;
                Ok(StepOutcome::AwaitingTask)
            }
        }
    }

    async fn execute_send(
        &self,
        run: &mut SequenceRun,
        sequence: &Sequence,
        step: &Step,
        template_id: &str,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, ExecutorError> {
        let account = self
            .account_service
            .find_account(&run.account_id)
            .await?
            .ok_or_else(|| {
                ExecutorError::Resolution(format!(
                    "account {} of run {} not found",
                    run.account_id, run.id
                ))
            })?;
        let template = self
            .template_service
            .find_template(template_id)
            .await?
            .ok_or_else(|| {
                ExecutorError::Resolution(format!(
                    "template {} for step {} of run {} not found",
                    template_id, run.current_step_index, run.id
                ))
            })?;
        let recipient = run
            .recipient()
            .ok_or_else(|| {
                ExecutorError::Resolution(format!("run {} has no Email variable", run.id))
            })?
            .to_string();
        let transport = self
            .transports
            .for_account(&account)
            .map_err(|e| ExecutorError::Resolution(e.to_string()))?;

        let counts = self.outbox_service.send_counts(&account.id, now).await?;
        let allowed = send_window::next_allowed(now, &sequence.rules, self.config.quiet_window, &counts);
        if allowed > now {
            log::info!(
                "(execute_send) Run {} diferido hasta {} por reglas de envío (hoy={}, última hora={})",
                run.id,
                allowed,
                counts.today,
                counts.last_hour
            );
            run.next_send_at = Some(allowed);
            run.updated_at = now;
            self.commit(run, None, None).await?;
            return Ok(StepOutcome::Deferred { until: allowed });
        }

        let orphans = self
            .outbox_service
            .fail_orphans(&run.id, run.current_step_index, now)
            .await?;
        if orphans > 0 {
            log::warn!(
                "(execute_send) {} mensaje(s) sin resolver del run {} marcados como failed",
                orphans,
                run.id
            );
        }

        let rendered = template_renderer::render(&template, &run.variables);
        let tracking_id = Uuid::new_v4().simple().to_string();
        let base_url = &self.config.tracking_base_url;
        let html = tracking::instrument(&rendered.html, Some(&tracking_id), base_url);

        let outbox = OutboxMessage {
            id: Uuid::new_v4().to_string(),
            run_id: run.id.clone(),
            step_index: run.current_step_index,
            account_id: account.id.clone(),
            recipient: recipient.clone(),
            subject: rendered.subject.clone(),
            html: html.clone(),
            text: rendered.text.clone(),
            status: transport.initial_status(),
            provider_message_id: None,
            error: None,
            tracking_id: Some(tracking_id.clone()),
            pixel_url: tracking::pixel_url(base_url, Some(&tracking_id)),
            open_count: 0,
            click_count: 0,
            first_opened_at: None,
            created_at: now,
            updated_at: now,
        };
        self.outbox_service.insert_message(&outbox).await?;

        let message = OutboundMessage {
            from: account.sender(),
            to: recipient,
            subject: rendered.subject,
            html,
            text: rendered.text,
        };

        log::info!(
            "(execute_send) Run {} paso {}: despachando '{}' a {} vía {}",
            run.id,
            run.current_step_index,
            message.subject,
            message.to,
            transport.name()
        );

        let limit = self.config.transport_timeout;
        let result = match timeout(limit, transport.send(&account.credential, &message)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(limit.as_secs())),
        };

        match result {
            Ok(provider_message_id) => {
                let entry = history_entry(run, step, Some(outbox.id.clone()), None, now);
                let resolution = OutboxResolution {
                    outbox_id: outbox.id.clone(),
                    status: transport.delivered_status(),
                    provider_message_id: Some(provider_message_id),
                    error: None,
                };
                advance_run(run, &sequence.rules, self.config.quiet_window, now);
                self.commit(run, Some(entry), Some(resolution)).await?;
                Ok(StepOutcome::Sent {
                    outbox_id: outbox.id,
                })
            }
            Err(err) => {
                let error = err.to_string();
                let failures = self
                    .run_service
                    .failed_attempts(&run.id, run.current_step_index)
                    .await?
                    + 1;
                let entry = history_entry(run, step, Some(outbox.id.clone()), Some(error.clone()), now);
                let resolution = OutboxResolution {
                    outbox_id: outbox.id.clone(),
                    status: OutboxStatus::Failed,
                    provider_message_id: None,
                    error: Some(error.clone()),
                };

                let retry_at = if failures >= self.config.max_attempts {
                    log::error!(
                        "(execute_send) Run {} paso {} falló {} veces, queda failed_permanently: {}",
                        run.id,
                        run.current_step_index,
                        failures,
                        error
                    );
                    run.status = RunStatus::FailedPermanently;
                    run.next_send_at = None;
                    None
                } else {
                    let backoff = Duration::from_std(self.config.retry_backoff)
                        .unwrap_or_else(|_| Duration::hours(6));
                    let retry_at = send_window::add_saturating(now, backoff);
                    log::warn!(
                        "(execute_send) Run {} paso {} falló (intento {}/{}), reintento en {}: {}",
                        run.id,
                        run.current_step_index,
                        failures,
                        self.config.max_attempts,
                        retry_at,
                        error
                    );
                    run.next_send_at = Some(retry_at);
                    Some(retry_at)
                };
                run.updated_at = now;
                self.commit(run, Some(entry), Some(resolution)).await?;

                Ok(StepOutcome::Failed {
                    outbox_id: outbox.id,
                    error,
                    retry_at,
                })
            }
        }
    }

    async fn commit(
        &self,
        run: &SequenceRun,
        history: Option<HistoryEntry>,
        outbox: Option<OutboxResolution>,
    ) -> Result<(), ExecutorError> {
        self.run_service
            .commit_transition(RunTransition {
                run,
                history,
                outbox,
            })
            .await?;
        Ok(())
    }
}
