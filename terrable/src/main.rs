//! terrable - local serverless handler execution engine
//!
//! Reads newline-terminated JavaScript code units on stdin, runs each in a
//! fresh isolated context and prints `CODE_EXECUTION_COMPLETE` on stdout when
//! the invocation finishes. Logs go to stderr so stdout stays a clean control
//! channel for the orchestrator.

mod config;

use clap::Parser;
use std::path::PathBuf;
use terrable_engine::{Engine, Output};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{parse_assignment, unicode_environment, Config, Overrides};

#[derive(Parser, Debug)]
#[command(name = "terrable")]
#[command(about = "Local serverless handler execution engine", long_about = None)]
struct Args {
    /// Configuration file (defaults to ./terrable.toml when present)
    #[arg(short, long, env = "TERRABLE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory `require` and `process.cwd()` resolve against
    #[arg(long, env = "TERRABLE_MODULE_ROOT")]
    module_root: Option<PathBuf>,

    /// Dotenv-style file merged into `process.env`
    #[arg(long, env = "TERRABLE_ENV_FILE")]
    env_file: Option<PathBuf>,

    /// Extra `process.env` entries, as KEY=VALUE
    #[arg(short, long = "env", value_parser = parse_assignment)]
    env: Vec<(String, String)>,

    /// Do not inherit the engine's own environment into `process.env`
    #[arg(long, env = "TERRABLE_CLEAR_ENV")]
    clear_env: bool,

    /// Do not print a Result Envelope when a code unit fails
    #[arg(long, env = "TERRABLE_NO_ENVELOPE")]
    no_envelope: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TERRABLE_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let inherited = unicode_environment(std::env::vars_os());
    let config = Config::load(args.config.as_deref(), &inherited)?;

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("terrable={log_level},terrable_engine={log_level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let overrides = Overrides {
        module_root: args.module_root,
        env_file: args.env_file,
        env: args.env,
        clear_env: args.clear_env,
        no_envelope: args.no_envelope,
    };
    let engine_config = config.engine_config(overrides, inherited)?;

    info!("Starting terrable engine...");
    info!("  Module root: {}", engine_config.module_root.display());
    info!("  Environment: {} variables", engine_config.environment.len());
    info!(
        "  Failure envelope: {}",
        if engine_config.envelope_on_failure {
            "enabled"
        } else {
            "disabled"
        }
    );

    let mut engine = Engine::new(engine_config, Output::stdio())?;
    engine.run(tokio::io::stdin()).await?;

    Ok(())
}
