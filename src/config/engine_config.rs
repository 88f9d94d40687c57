//! config/engine_config.rs
//! Configuración global del motor, con valores por defecto
//! (se puede sobreescribir con variables de entorno o un .env).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Ventana de silencio en horas UTC. Puede cruzar la medianoche (p.e. 20 -> 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for QuietWindow {
    fn default() -> Self {
        QuietWindow {
            start_hour: 20,
            end_hour: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database_path: String,
    pub bind_host: String,
    pub bind_port: u16,
    pub tick_interval: Duration,
    pub retry_backoff: Duration,
    /// Intentos fallidos de un mismo paso antes de `failed_permanently`
    pub max_attempts: u32,
    pub worker_count: usize,
    pub batch_size: u32,
    pub transport_timeout: Duration,
    pub tracking_base_url: String,
    pub quiet_window: QuietWindow,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            database_path: "data/outreach.db".to_string(),
            bind_host: "0.0.0.0".to_string(),
            bind_port: 5022,
            tick_interval: Duration::from_secs(5),
            retry_backoff: Duration::from_secs(6 * 60 * 60),
            max_attempts: 5,
            worker_count: 4,
            batch_size: 100,
            transport_timeout: Duration::from_secs(30),
            tracking_base_url: "http://localhost:5022".to_string(),
            quiet_window: QuietWindow::default(),
        }
    }
}

impl EngineConfig {
    /// Lee las variables `OUTREACH_*`; las ausentes toman el valor por defecto.
    pub fn from_env() -> Result<Self> {
        let defaults = EngineConfig::default();

        let bind = env::var("OUTREACH_BIND")
            .unwrap_or_else(|_| format!("{}:{}", defaults.bind_host, defaults.bind_port));
        let (bind_host, bind_port) = bind
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("OUTREACH_BIND must be HOST:PORT, got '{bind}'"))?;
        let bind_port: u16 = bind_port
            .parse()
            .map_err(|_| anyhow!("invalid port in OUTREACH_BIND: '{bind}'"))?;

        let config = EngineConfig {
            database_path: env::var("OUTREACH_DATABASE_PATH").unwrap_or(defaults.database_path),
            bind_host: bind_host.to_string(),
            bind_port,
            tick_interval: Duration::from_secs(env_or("OUTREACH_TICK_SECS", 5u64)?),
            retry_backoff: Duration::from_secs(
                env_or("OUTREACH_RETRY_BACKOFF_HOURS", 6u64)? * 60 * 60,
            ),
            max_attempts: env_or("OUTREACH_MAX_ATTEMPTS", defaults.max_attempts)?,
            worker_count: env_or("OUTREACH_WORKERS", defaults.worker_count)?,
            batch_size: env_or("OUTREACH_BATCH_SIZE", defaults.batch_size)?,
            transport_timeout: Duration::from_secs(env_or(
                "OUTREACH_TRANSPORT_TIMEOUT_SECS",
                30u64,
            )?),
            tracking_base_url: env::var("OUTREACH_TRACKING_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.tracking_base_url),
            quiet_window: QuietWindow {
                start_hour: env_or("OUTREACH_QUIET_START", defaults.quiet_window.start_hour)?,
                end_hour: env_or("OUTREACH_QUIET_END", defaults.quiet_window.end_hour)?,
            },
        };

        if config.worker_count == 0 {
            return Err(anyhow!("OUTREACH_WORKERS must be at least 1"));
        }
        if config.max_attempts == 0 {
            return Err(anyhow!("OUTREACH_MAX_ATTEMPTS must be at least 1"));
        }
        if config.quiet_window.start_hour > 23 || config.quiet_window.end_hour > 23 {
            return Err(anyhow!("quiet hours must be in 0..=23"));
        }
        Ok(config)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow!("invalid value for {key}: '{raw}'")),
        Err(_) => Ok(default),
    }
}
