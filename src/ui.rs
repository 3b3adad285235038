//! Interface de terminal do replayd: spinner e saída colorida.
//!
//! Usa a crate `indicatif` para o spinner enquanto o job executa e `console`
//! para estilizar as linhas de resumo com cores.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use replayd::{JobSnapshot, JobStatus};

/// Indicador visual que acompanha um job até um status terminal.
pub struct JobSpinner {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobSpinner {
    pub fn start(job_id: &str, total: usize) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("{job_id}: 0/{total}"));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    pub fn update(&self, snapshot: &JobSnapshot) {
        let p = &snapshot.progress;
        let mut message = format!(
            "{}: {}/{} [{}]",
            snapshot.id,
            p.completed + p.failed,
            p.total,
            snapshot.status
        );
        if p.failed > 0 {
            message.push_str(&format!(" {}", self.yellow.apply_to(format!("{} failed", p.failed))));
        }
        self.pb.set_message(message);
    }

    /// Finaliza o spinner e exibe o resultado final do job.
    pub fn complete(&self, snapshot: &JobSnapshot) {
        self.pb.finish_and_clear();
        let p = &snapshot.progress;
        match snapshot.status {
            JobStatus::Complete => println!(
                "  {} Replayed {}/{} actions in {}ms",
                self.green.apply_to("✓"),
                p.completed,
                p.total,
                snapshot.duration_ms
            ),
            JobStatus::Stopped => println!(
                "  {} Stopped after {}/{} actions",
                self.yellow.apply_to("■"),
                p.completed + p.failed,
                p.total
            ),
            _ => println!(
                "  {} Job ended {}: {} completed, {} failed of {}",
                self.red.apply_to("✗"),
                snapshot.status,
                p.completed,
                p.failed,
                p.total
            ),
        }
    }
}

/// Imprime uma linha colorida por job.
pub fn print_snapshots(snapshots: &[JobSnapshot]) {
    if snapshots.is_empty() {
        println!("No jobs.");
        return;
    }
    for snapshot in snapshots {
        let style = match snapshot.status {
            JobStatus::Complete => Style::new().green(),
            JobStatus::Error => Style::new().red(),
            JobStatus::Stopped | JobStatus::Paused => Style::new().yellow(),
            JobStatus::Running => Style::new().cyan(),
        };
        let p = &snapshot.progress;
        println!(
            "{:<28} {} {}/{} done, {} failed, {} errors, {}ms",
            snapshot.id,
            style.apply_to(format!("{:<9}", snapshot.status)),
            p.completed,
            p.total,
            p.failed,
            snapshot.error_count,
            snapshot.duration_ms
        );
    }
}
