mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::Overrides;
use reaper_core::classifier::TriggerPolicy;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pod-reaper",
    about = "Delete pods once they are labeled for deletion",
    version,
    propagate_version = true
)]
struct Cli {
    /// YAML config file (default: built-in defaults)
    #[arg(long, global = true, env = "POD_REAPER_CONFIG")]
    config: Option<PathBuf>,

    /// Kubeconfig to use instead of in-cluster or ~/.kube/config
    #[arg(long, global = true, env = "POD_REAPER_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Watch a single namespace (default: all namespaces)
    #[arg(long, short = 'n', global = true)]
    namespace: Option<String>,

    /// Label whose presence marks a pod for deletion
    #[arg(long, global = true)]
    marker_label: Option<String>,

    /// When a labeled update qualifies: level or edge
    #[arg(long, global = true)]
    trigger: Option<TriggerPolicy>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log level, used only when RUST_LOG is unset or empty
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller until SIGINT or SIGTERM (default)
    Run,

    /// Validate the effective configuration
    CheckConfig,

    /// Print the default configuration
    DefaultConfig,
}

/// RUST_LOG wins outright when set; otherwise `--log-level` applies.
fn env_filter(level: tracing::Level) -> EnvFilter {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::default().add_directive(level.into()),
    }
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(cli.log_level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let overrides = Overrides {
        namespace: cli.namespace,
        marker_label: cli.marker_label,
        trigger: cli.trigger,
    };
    let config_path = cli.config.as_deref();

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd::load_config(config_path, overrides)
            .and_then(|config| cmd::run::run(config, cli.kubeconfig, cli.json)),
        Commands::CheckConfig => cmd::config::check(config_path, overrides, cli.json),
        Commands::DefaultConfig => cmd::config::print_default(cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
