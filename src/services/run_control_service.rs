//! services/run_control_service.rs
//! Operaciones externas sobre runs: creación, completar tareas manuales,
//! eventos de respuesta/baja y cancelación. Todas pasan por el lock del run.

use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use crate::config::engine_config::EngineConfig;
use crate::errors::Conflict;
use crate::models::run_model::{
    CreateRunRequest, RunEvent, RunStatus, SequenceRun, StopReason, Variant,
};
use crate::models::sequence_model::StepKind;
use crate::services::account_service::AccountService;
use crate::services::clock::Clock;
use crate::services::run_locks::RunLocks;
use crate::services::run_service::{RunService, RunTransition};
use crate::services::send_window;
use crate::services::sequence_service::SequenceService;
use crate::services::step_executor::{advance_run, guard_reason, history_entry, stop_run};

/// Asignación A/B determinista a partir del id del run.
pub fn assign_variant(run_id: &Uuid, split_percent: Option<u8>) -> Variant {
    let Some(split) = split_percent else {
        return Variant::A;
    };
    let bytes = run_id.as_bytes();
    let bucket = u16::from_be_bytes([bytes[0], bytes[1]]) % 100;
    if bucket < u16::from(split) {
        Variant::B
    } else {
        Variant::A
    }
}

#[derive(Clone)]
pub struct RunControlService {
    run_service: RunService,
    sequence_service: SequenceService,
    account_service: AccountService,
    locks: RunLocks,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
}

impl RunControlService {
    pub fn new(
        run_service: RunService,
        sequence_service: SequenceService,
        account_service: AccountService,
        locks: RunLocks,
        clock: Arc<dyn Clock>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            run_service,
            sequence_service,
            account_service,
            locks,
            clock,
            config,
        }
    }

    /// Crea el run con una copia de los pasos actuales de la secuencia.
    pub async fn create_run(&self, req: CreateRunRequest) -> Result<SequenceRun> {
        let sequence = self.sequence_service.get_sequence(&req.sequence_id).await?;
        let account = self.account_service.get_account(&req.account_id).await?;

        let now = self.clock.now();
        let id = Uuid::new_v4();
        let next_send_at = sequence
            .steps
            .first()
            .map(|step| send_window::next_time(step, now, &sequence.rules, self.config.quiet_window));

        let run = SequenceRun {
            id: id.to_string(),
            sequence_id: sequence.id.clone(),
            account_id: account.id,
            variables: req.variables,
            steps: sequence.steps.clone(),
            variant: assign_variant(&id, sequence.ab_split_percent),
            current_step_index: 0,
            status: RunStatus::Running,
            stop_reason: None,
            replied: false,
            unsubscribed: false,
            next_send_at,
            created_at: now,
            updated_at: now,
        };
        self.run_service.insert_run(&run).await?;

        log::info!(
            "(create_run) Run {} creado para la secuencia '{}' (variante {}, primer envío {:?})",
            run.id,
            sequence.name,
            run.variant.as_str(),
            run.next_send_at
        );
        Ok(run)
    }

    /// Marca como hecha la tarea manual del paso actual y reanuda el run.
    pub async fn complete_manual_task(&self, run_id: &str) -> Result<SequenceRun> {
        let _guard = self.locks.lock(run_id).await;
        let mut run = self.run_service.get_run(run_id).await?;

        if !matches!(run.status, RunStatus::AwaitingTask | RunStatus::Running) {
            return Err(Conflict(format!(
                "run {run_id} is {} and cannot complete a task",
                run.status.as_str()
            ))
            .into());
        }
        let step = match run.current_step() {
            Some(step) if matches!(step.kind, StepKind::ManualTask { .. }) => step.clone(),
            _ => {
                return Err(Conflict(format!(
                    "current step {} of run {run_id} is not a manual task",
                    run.current_step_index
                ))
                .into())
            }
        };

        let sequence = self.sequence_service.get_sequence(&run.sequence_id).await?;
        let now = self.clock.now();
        let entry = history_entry(&run, &step, None, None, now);
        run.status = RunStatus::Running;
        advance_run(&mut run, &sequence.rules, self.config.quiet_window, now);

        self.run_service
            .commit_transition(RunTransition {
                run: &run,
                history: Some(entry),
                outbox: None,
            })
            .await?;

        log::info!(
            "(complete_manual_task) Run {} reanudado en el paso {}",
            run.id,
            run.current_step_index
        );
        Ok(run)
    }

    /// Registra una respuesta o baja. Si el paso actual tiene el guard
    /// correspondiente, el run se detiene en el acto.
    pub async fn record_event(&self, run_id: &str, event: RunEvent) -> Result<SequenceRun> {
        let _guard = self.locks.lock(run_id).await;
        let mut run = self.run_service.get_run(run_id).await?;

        if run.status.is_terminal() {
            log::info!(
                "(record_event) Run {} ya terminó ({}), evento {:?} ignorado",
                run.id,
                run.status.as_str(),
                event
            );
            return Ok(run);
        }

        let now = self.clock.now();
        match event {
            RunEvent::Reply => run.replied = true,
            RunEvent::Unsubscribe => run.unsubscribed = true,
        }
        run.updated_at = now;

        if let Some(reason) = run.current_step().and_then(|step| guard_reason(&run, step)) {
            log::info!(
                "(record_event) Guard '{}' detiene el run {}",
                reason.as_str(),
                run.id
            );
            stop_run(&mut run, reason, now);
        }

        self.run_service
            .commit_transition(RunTransition {
                run: &run,
                history: None,
                outbox: None,
            })
            .await?;
        Ok(run)
    }

    pub async fn cancel_run(&self, run_id: &str) -> Result<SequenceRun> {
        let _guard = self.locks.lock(run_id).await;
        let mut run = self.run_service.get_run(run_id).await?;

        if run.status.is_terminal() {
            return Err(Conflict(format!(
                "run {run_id} already finished ({})",
                run.status.as_str()
            ))
            .into());
        }

        stop_run(&mut run, StopReason::Cancelled, self.clock.now());
        self.run_service
            .commit_transition(RunTransition {
                run: &run,
                history: None,
                outbox: None,
            })
            .await?;

        log::info!("(cancel_run) Run {} cancelado", run.id);
        Ok(run)
    }
}
