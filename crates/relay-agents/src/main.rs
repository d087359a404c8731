use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relay_agents::{telemetry, RelayConfig, TaskRequest, TaskRunner};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Plan-driven multi-agent task runner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file (RELAY_* environment variables override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Plan and execute a task, then print the final report
    Run {
        /// The task to complete
        #[arg(long)]
        task: String,

        /// Reuse the workspace of an existing session
        #[arg(long)]
        session_id: Option<String>,

        /// Project name used in the workspace directory name
        #[arg(long, default_value = "project")]
        project: String,
    },
    /// Forget a session's workspace allocation
    Reset {
        #[arg(long)]
        session_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init_tracing(args.json_logs);

    let config =
        RelayConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let runner = TaskRunner::from_config(config)?;

    match args.command {
        Command::Run {
            task,
            session_id,
            project,
        } => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, cancelling run");
                    on_signal.cancel();
                }
            });

            let request = TaskRequest {
                task,
                session_id,
                project,
            };
            let report = runner.run(request, cancel).await?;
            let summary = &report.summary;

            match report.final_report() {
                Ok(text) => {
                    println!("{text}");
                    info!(
                        session_id = %summary.session_id,
                        workspace = %report.workspace.display(),
                        "Task complete"
                    );
                }
                Err(e) => {
                    eprintln!(
                        "Progress: {}/{} steps executed, {} plan(s), {} messages. Session saved to {}",
                        summary.steps_executed,
                        summary.steps_total,
                        summary.plan_iterations,
                        summary.messages,
                        report.workspace.join("session.json").display()
                    );
                    return Err(e);
                }
            }
        }
        Command::Reset { session_id } => match runner.reset(&session_id)? {
            Some(path) => println!(
                "Session {session_id} reset; previous workspace left at {}",
                path.display()
            ),
            None => println!("Session {session_id} had no workspace"),
        },
    }

    Ok(())
}
