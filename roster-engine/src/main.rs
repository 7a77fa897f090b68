//! `roster-engine` — the reconciliation daemon's CLI entry point.
//!
//! Wires `roster-core`'s `Store`/`RemoteClient`/`Engine` together behind a
//! small `clap` surface: `serve` runs the continuous sweep loop (the
//! default), `cycle` runs exactly one sweep for operational debugging,
//! and `migrate` applies pending SQL migrations and exits.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use roster_core::config::Config;
use roster_core::engine::Engine;
use roster_core::remote::HttpRemoteClient;
use roster_core::store::PgStore;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "roster-engine")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconciliation loop continuously (default).
    Serve,
    /// Run exactly one reconciliation sweep and exit.
    Cycle,
    /// Apply pending SQL migrations and exit.
    Migrate,
}

/// Default tracing directives enabling info-level logs for this crate and roster-core.
const DEFAULT_DIRECTIVES: &[&str] = &["roster_engine=info", "roster_core=info"];

/// Build the default `EnvFilter`: `RUST_LOG` (if set) plus our default directives.
fn default_env_filter() -> anyhow::Result<tracing_subscriber::EnvFilter> {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in DEFAULT_DIRECTIVES {
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

/// Initialize the tracing subscriber.
///
/// When `config.log_dir` is `Some`, creates a layered subscriber with both
/// stdout and rolling file output. When `None`, uses stdout-only.
///
/// Returns the non-blocking writer guard that must be held for the
/// process lifetime.
fn init_tracing(config: &Config) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(log_dir) = &config.log_dir else {
        tracing_subscriber::fmt().with_env_filter(default_env_filter()?).init();
        return Ok(None);
    };

    if let Err(error) = std::fs::create_dir_all(log_dir) {
        eprintln!(
            "Warning: failed to create log directory '{log_dir}': {error}. Falling back to stdout-only."
        );
        tracing_subscriber::fmt().with_env_filter(default_env_filter()?).init();
        return Ok(None);
    }

    let rotation = match config.log_rotation.as_str() {
        "daily" => tracing_appender::rolling::Rotation::DAILY,
        "hourly" => tracing_appender::rolling::Rotation::HOURLY,
        "never" => tracing_appender::rolling::Rotation::NEVER,
        other => {
            eprintln!("Warning: unknown log rotation '{other}', falling back to daily");
            tracing_appender::rolling::Rotation::DAILY
        }
    };

    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix("roster-engine")
        .filename_suffix("log")
        .build(log_dir)
        .context("failed to create rolling file appender")?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = default_env_filter()?;
    let stdout_layer = tracing_subscriber::fmt::layer();
    let file_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Serve);

    // 1. Load configuration first — tracing init depends on it.
    let config = Config::from_env().context("failed to load configuration")?;

    // 2. Initialize tracing (stdout-only or stdout+file based on config).
    let _guard = init_tracing(&config)?;

    tracing::info!("starting roster-engine");

    // 3. Connect the store. Pool init failure is the one fatal error
    // (spec §7) — sqlx::migrate! runs as part of PgStore::connect, so
    // `migrate` and `serve`/`cycle` share this step.
    let store: Arc<PgStore> = Arc::new(
        PgStore::connect(&config.database_url)
            .await
            .context("failed to connect to the database / apply migrations")?,
    );

    match command {
        Command::Migrate => {
            tracing::info!("migrations applied, exiting");
        }
        Command::Cycle => {
            let remote = Arc::new(HttpRemoteClient::new());
            let engine = Engine::new(store, remote, config);
            tracing::info!("running a single reconciliation sweep");
            engine.run_cycle().await.context("reconciliation cycle failed")?;
            tracing::info!("sweep complete, exiting");
        }
        Command::Serve => {
            let remote = Arc::new(HttpRemoteClient::new());
            let interval = config.service_interval;
            let engine = Engine::new(store, remote, config);
            run_forever(engine, interval).await?;
        }
    }

    Ok(())
}

/// The continuous sweep loop (spec §4.5): one cycle, then sleep
/// `service_interval`, repeat — cancellable between cycles via
/// `SIGINT`/`SIGTERM` (spec §5: a cycle itself is not cancellable
/// mid-pass).
async fn run_forever(engine: Engine, interval: std::time::Duration) -> anyhow::Result<()> {
    tracing::info!(interval_secs = interval.as_secs(), "entering reconciliation loop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received, exiting after current cycle");
                return Ok(());
            }
            result = engine.run_cycle() => {
                if let Err(error) = result {
                    tracing::error!(%error, "reconciliation cycle failed, will retry next interval");
                }
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                return Ok(());
            }
            () = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_env_filter_parses() {
        default_env_filter().unwrap();
    }

    #[test]
    fn test_init_tracing_stdout_only_when_no_log_dir() {
        // Subscriber init is process-global and can only happen once per
        // test binary; exercise the config branch selection logic
        // directly instead of calling init_tracing (which would panic on
        // a second `.init()` if other tests in this binary also called it).
        let config = Config {
            database_url: "postgres://unused".to_string(),
            service_interval: std::time::Duration::from_secs(30),
            updates_lookback_hours: 24,
            welcome_message: "welcome".to_string(),
            removed_message: "removed".to_string(),
            concurrency: 1,
            log_dir: None,
            log_rotation: "daily".to_string(),
        };
        assert!(config.log_dir.is_none());
    }
}
