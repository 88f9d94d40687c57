//! tests/support.rs
//! Base SQLite en memoria, reloj falso y transportes de prueba.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};

use crate::config::engine_config::EngineConfig;
use crate::errors::TransportError;
use crate::models::account_model::{Account, CreateAccountRequest, Credential, ProviderKind};
use crate::models::outbox_model::OutboundMessage;
use crate::models::run_model::{CreateRunRequest, SequenceRun};
use crate::models::sequence_model::{Rules, Sequence, SequenceRequest, Step};
use crate::models::template_model::{Template, TemplateRequest};
use crate::services::account_service::AccountService;
use crate::services::clock::{Clock, FakeClock};
use crate::services::outbox_service::OutboxService;
use crate::services::run_control_service::RunControlService;
use crate::services::run_locks::RunLocks;
use crate::services::run_service::RunService;
use crate::services::scheduler_service::Scheduler;
use crate::services::sequence_service::SequenceService;
use crate::services::step_executor::StepExecutor;
use crate::services::template_service::TemplateService;
use crate::services::transport::{TransportClient, TransportRegistry};

/// Lunes 2025-03-03 10:00 UTC, fuera de las quiet hours por defecto.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 10, 0, 0).unwrap()
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, hour, minute, 0).unwrap()
}

/// Una sola conexión que nunca se recicla: la base en memoria vive con ella.
pub async fn memory_pool() -> Pool<Sqlite> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    RunService::new(pool.clone()).run_migrations().await.unwrap();
    pool
}

/// Guarda cada mensaje que recibe y responde con un id incremental.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingTransport {
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl TransportClient for RecordingTransport {
    async fn send(
        &self,
        _credential: &Credential,
        message: &OutboundMessage,
    ) -> Result<String, TransportError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(message.clone());
        Ok(format!("rec-{}", sent.len()))
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Siempre falla con un error de red.
#[derive(Default)]
pub struct FailingTransport {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl TransportClient for FailingTransport {
    async fn send(
        &self,
        _credential: &Credential,
        _message: &OutboundMessage,
    ) -> Result<String, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Network("connection refused".to_string()))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Tarda `delay` antes de aceptar el mensaje.
pub struct SlowTransport {
    pub delay: StdDuration,
    pub sent: AtomicUsize,
}

impl SlowTransport {
    pub fn new(delay: StdDuration) -> Self {
        SlowTransport {
            delay,
            sent: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TransportClient for SlowTransport {
    async fn send(
        &self,
        _credential: &Credential,
        _message: &OutboundMessage,
    ) -> Result<String, TransportError> {
        tokio::time::sleep(self.delay).await;
        let n = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("slow-{n}"))
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        tick_interval: StdDuration::from_millis(20),
        transport_timeout: StdDuration::from_secs(5),
        tracking_base_url: "http://track.test".to_string(),
        ..EngineConfig::default()
    }
}

/// Todos los servicios cableados contra la misma base y el mismo reloj.
pub struct Harness {
    pub clock: Arc<FakeClock>,
    pub config: Arc<EngineConfig>,
    pub accounts: AccountService,
    pub templates: TemplateService,
    pub sequences: SequenceService,
    pub runs: RunService,
    pub outbox: OutboxService,
    pub locks: RunLocks,
    pub executor: StepExecutor,
    pub control: RunControlService,
    pub scheduler: Scheduler,
}

impl Harness {
    pub async fn new(live: Arc<dyn TransportClient>) -> Self {
        Harness::with_config(live, test_config()).await
    }

    pub async fn with_config(live: Arc<dyn TransportClient>, config: EngineConfig) -> Self {
        let pool = memory_pool().await;
        let clock = Arc::new(FakeClock::new(t0()));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let config = Arc::new(config);

        let accounts = AccountService::new(pool.clone());
        let templates = TemplateService::new(pool.clone());
        let sequences = SequenceService::new(pool.clone());
        let runs = RunService::new(pool.clone());
        let outbox = OutboxService::new(pool.clone());
        let locks = RunLocks::new();

        let transports = TransportRegistry::with_defaults().register(ProviderKind::Smtp, live);
        let executor = StepExecutor::new(
            runs.clone(),
            sequences.clone(),
            templates.clone(),
            accounts.clone(),
            outbox.clone(),
            transports,
            locks.clone(),
            dyn_clock.clone(),
            config.clone(),
        );
        let control = RunControlService::new(
            runs.clone(),
            sequences.clone(),
            accounts.clone(),
            locks.clone(),
            dyn_clock.clone(),
            config.clone(),
        );
        let scheduler = Scheduler::new(
            executor.clone(),
            runs.clone(),
            locks.clone(),
            dyn_clock,
            config.clone(),
        );

        Harness {
            clock,
            config,
            accounts,
            templates,
            sequences,
            runs,
            outbox,
            locks,
            executor,
            control,
            scheduler,
        }
    }

    pub async fn account(&self, dry_run: bool) -> Account {
        self.accounts
            .create_account(CreateAccountRequest {
                name: "Ventas".to_string(),
                from_address: "ventas@acme.test".to_string(),
                from_name: Some("Acme".to_string()),
                credential: Credential::Smtp {
                    host: "smtp.acme.test".to_string(),
                    port: 587,
                    username: "ventas".to_string(),
                    password: "secret".to_string(),
                },
                dry_run,
            })
            .await
            .unwrap()
    }

    pub async fn template(&self, subject: &str, body: &str) -> Template {
        self.templates
            .create_template(TemplateRequest {
                name: subject.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            })
            .await
            .unwrap()
    }

    pub async fn sequence(&self, steps: Vec<Step>, rules: Rules) -> Sequence {
        self.sequences
            .create_sequence(SequenceRequest {
                name: "Onboarding".to_string(),
                steps,
                rules,
                ab_split_percent: None,
            })
            .await
            .unwrap()
    }

    pub async fn run(&self, sequence: &Sequence, account: &Account) -> SequenceRun {
        self.control
            .create_run(CreateRunRequest {
                sequence_id: sequence.id.clone(),
                account_id: account.id.clone(),
                variables: contact("ana@example.test", "Ana"),
            })
            .await
            .unwrap()
    }
}

pub fn contact(email: &str, first_name: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    vars.insert("Email".to_string(), email.to_string());
    vars.insert("FirstName".to_string(), first_name.to_string());
    vars
}
