//! services/scheduler_service.rs
//! Tick periódico: selecciona los runs vencidos y los ejecuta con
//! concurrencia acotada. El scheduler no guarda estado de negocio; todo
//! el progreso vive en los runs y su historial.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use futures_util::{stream, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::engine_config::EngineConfig;
use crate::services::clock::Clock;
use crate::services::run_locks::RunLocks;
use crate::services::run_service::RunService;
use crate::services::step_executor::{StepExecutor, StepOutcome};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub selected: usize,
    pub executed: usize,
    pub skipped: usize,
    pub failed: usize,
}

struct RunningLoop {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct Scheduler {
    executor: StepExecutor,
    run_service: RunService,
    locks: RunLocks,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
    running: Arc<Mutex<Option<RunningLoop>>>,
}

impl Scheduler {
    pub fn new(
        executor: StepExecutor,
        run_service: RunService,
        locks: RunLocks,
        clock: Arc<dyn Clock>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            executor,
            run_service,
            locks,
            clock,
            config,
            running: Arc::new(Mutex::new(None)),
        }
    }

    /// Un ciclo completo. El error de un run se registra y no corta el resto.
    pub async fn tick(&self) -> Result<TickReport> {
        let now = self.clock.now();
        let due = self
            .run_service
            .due_run_ids(now, self.config.batch_size)
            .await?;

        let mut report = TickReport {
            selected: due.len(),
            ..TickReport::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        log::debug!("(tick) {} run(s) vencidos", due.len());

        let results: Vec<_> = stream::iter(due)
            .map(|run_id| {
                let executor = self.executor.clone();
                async move {
                    let result = executor.execute_step(&run_id).await;
                    (run_id, result)
                }
            })
            .buffer_unordered(self.config.worker_count.max(1))
            .collect()
            .await;

        for (run_id, result) in results {
            match result {
                Ok(StepOutcome::Skipped) => report.skipped += 1,
                Ok(outcome) => {
                    log::debug!("(tick) Run {} -> {:?}", run_id, outcome);
                    report.executed += 1;
                }
                Err(e) => {
                    log::error!("(tick) Error ejecutando run {}: {}", run_id, e);
                    report.failed += 1;
                }
            }
        }

        self.locks.prune();
        log::info!(
            "(tick) Seleccionados={} ejecutados={} saltados={} con error={}",
            report.selected,
            report.executed,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    /// Arranca el loop en segundo plano. Devuelve false si ya estaba corriendo.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            return false;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let scheduler = self.clone();
        let period = self.config.tick_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            log::info!("(scheduler) Iniciado con intervalo de {:?}", period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // el tick corre completo aunque llegue la señal de parada;
                        // en su propia tarea para que un panic no mate el loop
                        let current = scheduler.clone();
                        match tokio::spawn(async move { current.tick().await }).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => log::error!("(scheduler) Falló el tick: {:?}", e),
                            Err(e) => log::error!("(scheduler) El tick terminó en panic: {}", e),
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            log::info!("(scheduler) Detenido");
        });

        *running = Some(RunningLoop { handle, shutdown });
        true
    }

    /// Detiene el loop esperando a que termine el tick en curso.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(RunningLoop { handle, shutdown }) = running {
            let _ = shutdown.send(true);
            if let Err(e) = handle.await {
                log::error!("(scheduler) La tarea del scheduler terminó con error: {:?}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}
