//! greenline — blue/green rolling updates for stack-managed
//! autoscaling groups.
//!
//! The binary wires the orchestration crates to an in-memory cloud
//! seeded from a scenario file, for rehearsing rollouts and exercising
//! the control loops end to end. Real provider integrations plug in
//! through the traits in `greenline-cloud`.
//!
//! Exit codes on the action-wait paths (`apply`, `delete`, `wait`):
//! 0 success, 2 no start event, 3 no end event, 1 failed terminal
//! status.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use greenline_events::WaitConfig;
use greenline_rollout::UpdateConfig;

mod commands;
mod scenario;

#[derive(Parser)]
#[command(
    name = "greenline",
    about = "Blue/green rolling updates for stack-managed autoscaling groups",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Roll every autoscaling group of a stack onto its current launch
    /// configuration.
    Update {
        /// Scenario file seeding the in-memory cloud.
        #[arg(long)]
        scenario: PathBuf,
        /// Stack whose autoscaling groups get updated.
        stack: String,
        /// Seconds between convergence polls.
        #[arg(long, default_value = "1")]
        poll_interval: u64,
        /// Deadline in seconds for the replacement fleet to become healthy.
        #[arg(long, default_value = "600")]
        healthy_timeout: u64,
    },
    /// Create or update a stack from a template and wait for the
    /// resulting action to finish.
    Apply {
        #[arg(long)]
        scenario: PathBuf,
        stack: String,
        /// Template file to push.
        #[arg(long)]
        template: PathBuf,
        /// Template parameters as key=value pairs.
        #[arg(long = "param", value_parser = parse_key_val)]
        parameters: Vec<(String, String)>,
        #[command(flatten)]
        wait: WaitArgs,
    },
    /// Delete a stack and wait for the delete to finish.
    Delete {
        #[arg(long)]
        scenario: PathBuf,
        stack: String,
        #[command(flatten)]
        wait: WaitArgs,
    },
    /// Wait for the next action on a stack to run to completion.
    Wait {
        #[arg(long)]
        scenario: PathBuf,
        stack: String,
        #[command(flatten)]
        wait: WaitArgs,
    },
    /// Print a stack's event history.
    Events {
        #[arg(long)]
        scenario: PathBuf,
        stack: String,
        /// Only show events newer than this epoch-millisecond timestamp.
        #[arg(long, default_value = "0")]
        since_ms: u64,
        /// Output format: text or json.
        #[arg(long, default_value = "text")]
        format: String,
    },
}

/// Timeout flags shared by the waiting commands.
#[derive(Args)]
struct WaitArgs {
    /// Seconds the action gets to produce its first progress event.
    #[arg(long, default_value = "120")]
    warmup_timeout: u64,
    /// Look-back window in seconds for actions that began just before
    /// the call.
    #[arg(long, default_value = "60")]
    look_back: u64,
    /// Seconds the action gets to finish, measured from the last
    /// observed event.
    #[arg(long, default_value = "600")]
    action_timeout: u64,
}

impl WaitArgs {
    fn to_config(&self) -> WaitConfig {
        WaitConfig {
            warmup_timeout: Duration::from_secs(self.warmup_timeout),
            lenient_look_back: Duration::from_secs(self.look_back),
            action_timeout: Duration::from_secs(self.action_timeout),
            poll_interval: Duration::from_secs(1),
        }
    }
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,greenline=debug".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Update {
            scenario,
            stack,
            poll_interval,
            healthy_timeout,
        } => {
            let config = UpdateConfig {
                poll_interval: Duration::from_secs(poll_interval),
                healthy_timeout: Duration::from_secs(healthy_timeout),
            };
            commands::update::run(&scenario, &stack, config).await?
        }
        Commands::Apply {
            scenario,
            stack,
            template,
            parameters,
            wait,
        } => {
            commands::apply::run(&scenario, &stack, &template, parameters, wait.to_config())
                .await?
        }
        Commands::Delete {
            scenario,
            stack,
            wait,
        } => commands::delete::run(&scenario, &stack, wait.to_config()).await?,
        Commands::Wait {
            scenario,
            stack,
            wait,
        } => commands::wait::run(&scenario, &stack, wait.to_config()).await?,
        Commands::Events {
            scenario,
            stack,
            since_ms,
            format,
        } => commands::events::run(&scenario, &stack, since_ms, &format).await?,
    };

    std::process::exit(code);
}
