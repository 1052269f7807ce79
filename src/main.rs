//! Cantor CLI - Layered Robotic Vocal Renderer
//!
//! Command-line interface for rendering text into mixed vocal arrangements.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cantor::cli::commands::{self, RenderOptions};
use cantor::cli::{Cli, Commands};
use cantor::CantorError;

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    // RUST_LOG takes precedence over -v
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    info!("Cantor v{}", env!("CARGO_PKG_VERSION"));

    match handle_command(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

fn handle_command(cmd: Commands) -> anyhow::Result<()> {
    match cmd {
        Commands::Render {
            text,
            output,
            config,
            duration,
            stems,
        } => {
            let options = RenderOptions {
                text: &text,
                output: &output,
                config: config.as_deref(),
                duration_secs: duration,
                stems,
            };
            commands::render(&options)
                .with_context(|| format!("rendering {} to {}", text.display(), output.display()))?;
        }
        Commands::ValidateConfig { path } => {
            commands::validate_config(&path)
                .with_context(|| format!("validating {}", path.display()))?;
        }
        Commands::Engines => commands::list_engines()?,
    }
    Ok(())
}

fn report(err: &anyhow::Error) {
    eprintln!("error: {:#}", err);
    if let Some(cantor) = err.downcast_ref::<CantorError>() {
        eprintln!("  code:  {}", cantor.error_code());
        if let Some(stage) = cantor.stage_name() {
            eprintln!("  stage: {}", stage);
        }
        if let Some(engine) = cantor.engine_name() {
            eprintln!("  engine: {}", engine);
        }
        for suggestion in cantor.recovery_suggestions() {
            eprintln!("  hint:  {}", suggestion);
        }
    }
}
