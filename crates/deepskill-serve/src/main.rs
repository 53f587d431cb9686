//! deepskill-serve entry point.

use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use deepskill::PredictorConfig;
use deepskill_serve::config::resolve_config_path;
use deepskill_serve::protocol::ProtocolHandler;
use deepskill_serve::session::PredictionSession;
use deepskill_serve::transport::StdioTransport;
use deepskill_serve::types::ServerInfo;

#[derive(Parser)]
#[command(
    name = "deepskill-serve",
    about = "JSON-RPC server for 3-way match outcome prediction",
    version
)]
struct Cli {
    /// Path to the predictor configuration (JSON).
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve predictions over stdio (default).
    Serve {
        /// Path to the predictor configuration (JSON).
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Load the configuration and every artifact, then exit.
    Validate,

    /// Print server name, version and methods as JSON.
    Info,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   deepskill-serve completions bash > ~/.local/share/bash-completion/completions/deepskill-serve
    ///   deepskill-serve completions zsh > ~/.zfunc/_deepskill-serve
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Commands::Serve { config: None }) {
        Commands::Serve { config } => {
            let effective_config = config.or(cli.config);
            let config_path = resolve_config_path(effective_config.as_deref());
            tracing::info!("deepskill-serve {}", env!("CARGO_PKG_VERSION"));
            tracing::info!("Config: {}", config_path.display());
            let session = Arc::new(PredictionSession::open(&config_path)?);
            let handler = ProtocolHandler::new(session);
            let transport = StdioTransport::new(handler);
            transport.run().await?;
        }

        Commands::Validate => {
            let config_path = resolve_config_path(cli.config.as_deref());
            match PredictionSession::open(&config_path).and_then(|s| s.status()) {
                Ok(status) => {
                    println!("Valid configuration: {}", config_path.display());
                    println!("  Backend: {:?}", status.backend);
                    println!("  Entities: {}", status.entities);
                    if let Some(engine) = status.engine {
                        println!("  Interactions: {}", engine.interactions);
                        println!("  Horizon: {}", engine.horizon);
                    }
                }
                Err(e) => {
                    eprintln!("Invalid configuration: {e}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Info => {
            let config_path = resolve_config_path(cli.config.as_deref());
            let backend = PredictorConfig::from_file(&config_path)
                .map(|c| c.backend)
                .ok();
            println!("{}", serde_json::to_string_pretty(&ServerInfo::current(backend))?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "deepskill-serve", &mut std::io::stdout());
        }
    }

    Ok(())
}
