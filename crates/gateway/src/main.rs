use anyhow::Context;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use wick_domain::config::{ConfigSeverity, GatewayConfig};

use wick_gateway::api;
use wick_gateway::bootstrap;
use wick_gateway::cli::{Cli, Command, ConfigCommand};
use wick_gateway::config_store::ConfigStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, store) = ConfigStore::load(&cli.config)
                .with_context(|| format!("loading config from {}", cli.config.display()))?;
            run_server(config, store).await
        }
        Some(Command::Config {
            command: ConfigCommand::Validate,
        }) => {
            let (config, _store) = ConfigStore::load(&cli.config)?;
            let issues = config.validate();
            for issue in &issues {
                match issue.severity {
                    ConfigSeverity::Warning => eprintln!("warning: {issue}"),
                    ConfigSeverity::Error => eprintln!("error: {issue}"),
                }
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            println!("configuration OK");
            Ok(())
        }
        Some(Command::Version) => {
            println!("wick {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing (only for the serve path).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,wick_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: GatewayConfig, store: ConfigStore) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "wick gateway starting");

    // ── Config validation ────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let state = bootstrap::build_state(config, store).await;

    // ── Serve ────────────────────────────────────────────────────
    let app = api::router(state.clone()).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&state.config.listen)
        .await
        .with_context(|| format!("binding {}", state.config.listen))?;
    tracing::info!(listen = %state.config.listen, "gateway listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
