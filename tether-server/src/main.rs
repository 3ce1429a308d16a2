//! tether binary

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use tether_config::{ConfigLoader, TetherConfig};
use tether_logging::{init_logging_from_config, init_simple_tracing};
use tether_runtime::JobSource;
use tether_server::startup::{build_engine, load_scripts, serve, shutdown_signal};
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config = cli.command {
        print!("{}", TetherConfig::generate_sample());
        return Ok(());
    }

    let mut config = ConfigLoader::new()
        .load(cli.config.as_ref())
        .context("Failed to load configuration")?;
    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }

    match &cli.log_level {
        Some(level) => init_simple_tracing(level)?,
        None => init_logging_from_config(&config.logging)?,
    }
    debug!("Configuration loaded");

    match cli.command {
        Commands::Serve { bind, scripts } => {
            if let Some(bind) = bind {
                apply_bind(&mut config, &bind)?;
            }
            info!("Starting tether {}", env!("CARGO_PKG_VERSION"));

            let engine = build_engine(&config).await?;
            load_scripts(&engine, &scripts).await?;
            serve(engine, &config, shutdown_signal()).await
        }
        Commands::Run { file, session } => {
            let code = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let engine = build_engine(&config).await?;
            let result = engine.execute(code, JobSource::File, session).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            engine.shutdown().await;

            if !result.is_success() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Config => Ok(()),
    }
}

/// `host` replaces the bind address; `host:port` replaces both
fn apply_bind(config: &mut TetherConfig, bind: &str) -> Result<()> {
    match bind.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.ends_with(':') => {
            config.server.bind_address = host.trim_matches(['[', ']']).to_string();
            config.server.port = port
                .parse()
                .with_context(|| format!("Invalid port in bind address {bind}"))?;
        }
        _ => config.server.bind_address = bind.to_string(),
    }
    Ok(())
}
