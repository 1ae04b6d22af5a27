//! switchboard - routing core for an AI-model gateway
//!
//! A proxy that picks the best provider/credential combination for each
//! model request, reserves budget before metered calls, and falls back
//! across providers transparently.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use switchboard::config::Config;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Routing core for an AI-model gateway")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchboard=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            tracing::info!(config = %config, "Loading configuration");
            let mut config = Config::from_file(&config)?;

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                config.server.listen = addr;
            }

            switchboard::proxy::run_server(config).await
        }

        Commands::Check { config } => {
            match Config::from_file(&config) {
                Ok(parsed) => {
                    tracing::info!(
                        listen = %parsed.server.listen,
                        registry = %parsed.registry.url,
                        platform_keys = parsed.platform.keys.len(),
                        "Configuration is valid"
                    );
                    Ok(())
                }
                Err(error) => {
                    tracing::error!(error = %error, "Configuration is invalid");
                    Err(error.into())
                }
            }
        }
    }
}
