//! DB Registry - command line entry point.
//!
//! Renders the connection string for a database (`dsn`), or connects to it
//! through a connection registry and reports the server version (`check`).

use clap::Parser;
use db_registry::config::{Command, Config};
use db_registry::db::{ConnectionRegistry, RelationalDatabaseManager, SqlxDriver, server_version};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    let descriptor = config.descriptor()?;

    match config.command() {
        Command::Dsn => {
            let dsn = descriptor.masked_connection_string();
            if config.json {
                let out = serde_json::json!({
                    "engine": descriptor.engine(),
                    "connection_string": dsn,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{}", dsn);
            }
            Ok(())
        }
        Command::Check => {
            info!(
                engine = %descriptor.engine(),
                "Starting DB Registry v{}",
                env!("CARGO_PKG_VERSION")
            );

            let registry = Arc::new(ConnectionRegistry::with_policy(
                SqlxDriver::new(),
                config.retry_policy(),
            ));

            // Ctrl-C aborts the retry loop
            let signal_registry = Arc::clone(&registry);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, cancelling connection attempts");
                    signal_registry.shutdown();
                }
            });

            let result = async {
                let pool = registry.acquire(&descriptor).await?;
                let version = server_version(&pool).await?;
                let info = registry.info(&descriptor.connection_string()).await;
                Ok::<_, db_registry::DbError>((version, info))
            }
            .await;

            registry.close_all().await;

            match result {
                Ok((version, info)) => {
                    if config.json {
                        let out = serde_json::json!({
                            "connection": info,
                            "server_version": version,
                        });
                        println!("{}", serde_json::to_string_pretty(&out)?);
                    } else {
                        println!("{} {}", descriptor.engine(), version);
                    }
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, suggestion = ?e.suggestion(), "Check failed");
                    Err(e.into())
                }
            }
        }
    }
}
