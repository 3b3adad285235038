//! Configuração do replayd carregada de `replayd.toml`.
//!
//! [`ReplayConfig`] reúne os parâmetros do engine, do coordenador e da porta
//! de execução HTTP. Chaves ausentes usam os valores padrão.
//! `REPLAYD_EXECUTOR_URL` tem precedência sobre o arquivo para o endpoint do executor.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{ReplayLimits, RetryPolicy};
use crate::error::Result;

pub const CONFIG_FILE: &str = "replayd.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    /// Arquivo onde os jobs são persistidos.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Endpoint da porta de execução HTTP.
    #[serde(default)]
    pub executor_url: String,

    #[serde(default = "default_allowed_speeds")]
    pub allowed_speeds: Vec<f64>,

    #[serde(default = "default_min_timeout_ms")]
    pub min_timeout_ms: u64,

    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,

    #[serde(default = "default_speed")]
    pub default_speed: f64,

    #[serde(default = "default_retry_count")]
    pub default_retry_count: u32,

    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Delay base em milissegundos para o backoff exponencial entre tentativas.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Intervalo de atualização do status enquanto `replayd run` aguarda o job.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Jobs finalizados mais antigos que isso são removidos.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Timeout das requisições da porta de execução HTTP.
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("replayd-state.json")
}

fn default_allowed_speeds() -> Vec<f64> {
    vec![0.5, 1.0, 1.5, 2.0]
}

fn default_min_timeout_ms() -> u64 {
    5_000
}

fn default_max_timeout_ms() -> u64 {
    300_000
}

fn default_speed() -> f64 {
    1.0
}

fn default_retry_count() -> u32 {
    3
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_retention_hours() -> u64 {
    24
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_dispatch_timeout_ms() -> u64 {
    30_000
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            executor_url: String::new(),
            allowed_speeds: default_allowed_speeds(),
            min_timeout_ms: default_min_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            default_speed: default_speed(),
            default_retry_count: default_retry_count(),
            default_timeout_ms: default_timeout_ms(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            poll_interval_ms: default_poll_interval_ms(),
            retention_hours: default_retention_hours(),
            sweep_interval_secs: default_sweep_interval_secs(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
        }
    }
}

impl ReplayConfig {
    /// Carrega `replayd.toml` do diretório atual, ou os padrões se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<ReplayConfig>(&contents)?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var("REPLAYD_EXECUTOR_URL")
            && !url.is_empty()
        {
            config.executor_url = url;
        }

        Ok(config)
    }

    pub fn limits(&self) -> ReplayLimits {
        ReplayLimits {
            allowed_speeds: self.allowed_speeds.clone(),
            min_timeout_ms: self.min_timeout_ms,
            max_timeout_ms: self.max_timeout_ms,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay_ms: self.base_delay_ms,
            backoff_multiplier: self.backoff_multiplier,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours as i64)
    }
}
