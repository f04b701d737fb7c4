//! `helmctl`: the command-line shell over the helmsman runtime (spec.md §6).

mod app;
mod config;
mod exit;
mod repl;
mod single_shot;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use app::App;
use config::Config;

#[derive(Parser, Debug)]
#[command(name = "helmctl", about = "Interactive shell and single-shot runner for the helmsman DB daemon")]
struct Cli {
    /// Path to a TOML config file. Defaults apply if omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (stackable: -v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Command and arguments to run once and exit. With none given, starts
    /// the interactive REPL.
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("error: {error}");
            std::process::exit(exit::USAGE);
        }
    };

    let app = match App::bootstrap(config).await {
        Ok(app) => Arc::new(app),
        Err(error) => {
            eprintln!("error: failed to start: {error}");
            std::process::exit(exit::FAILURE);
        }
    };

    let code = if cli.command.is_empty() {
        run_with_shutdown_signal(app, |app| Box::pin(repl::run(app))).await
    } else {
        run_with_shutdown_signal(app, move |app| Box::pin(single_shot::run(app, cli.command))).await
    };

    std::process::exit(code);
}

/// Race a mode's run future against SIGTERM. On SIGTERM, give the run future
/// a bounded grace period to wind down before forcing an interrupted exit.
async fn run_with_shutdown_signal<F>(app: Arc<App>, make_run: F) -> i32
where
    F: FnOnce(Arc<App>) -> std::pin::Pin<Box<dyn std::future::Future<Output = i32>>>,
{
    const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

    let mut run = make_run(app.clone());

    #[cfg(unix)]
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(signal) => signal,
        Err(_) => {
            return run.await;
        }
    };

    #[cfg(unix)]
    {
        tokio::select! {
            code = &mut run => code,
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, draining");
                match tokio::time::timeout(SHUTDOWN_GRACE, run).await {
                    Ok(code) => code,
                    Err(_) => {
                        app.shutdown().await;
                        exit::INTERRUPTED
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        run.await
    }
}

fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}
