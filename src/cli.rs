//! Interface de linha de comando do replayd baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, status, prune, serve)
//! e flags globais que sobrescrevem opções de replay e endpoints.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use replayd::ReplayConfig;
use replayd::engine::PartialOptions;

/// replayd: reprodução de ações de UI gravadas como jobs persistidos e controláveis.
#[derive(Debug, Parser)]
#[command(name = "replayd", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Multiplicador de velocidade (uma das velocidades configuradas).
    #[arg(long, global = true)]
    pub speed: Option<f64>,

    /// Retentativas por ação após a primeira tentativa.
    #[arg(long, global = true)]
    pub retry_count: Option<u32>,

    /// Prazo total da execução em milissegundos.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Arquivo de estado dos jobs, sobrescreve `state_path`.
    #[arg(long, global = true)]
    pub state: Option<PathBuf>,

    /// Endpoint do executor, sobrescreve `executor_url`.
    #[arg(long, global = true)]
    pub executor_url: Option<String>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reproduz as ações de um arquivo JSON e aguarda o fim do job.
    Run {
        /// Array JSON com as ações gravadas.
        file: PathBuf,

        /// Contexto de execução enviado junto de cada ação, em JSON.
        #[arg(long)]
        context: Option<String>,
    },

    /// Mostra os jobs persistidos, ou apenas um.
    Status {
        job_id: Option<String>,
    },

    /// Remove jobs finalizados mais antigos que a janela de retenção.
    Prune,

    /// Responde requisições de controle em JSON, uma por linha, via stdin.
    Serve,
}

impl Cli {
    /// Opções informadas na linha de comando; campos ausentes usam os padrões da configuração.
    pub fn options(&self) -> PartialOptions {
        PartialOptions {
            speed: self.speed,
            retry_count: self.retry_count,
            timeout_ms: self.timeout_ms,
        }
    }

    /// Aplica os caminhos e endpoints informados sobre a configuração carregada.
    pub fn apply(&self, config: &mut ReplayConfig) {
        if let Some(state) = &self.state {
            config.state_path = state.clone();
        }
        if let Some(url) = &self.executor_url {
            config.executor_url = url.clone();
        }
    }
}
