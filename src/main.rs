use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use rhetor::server::rest::run_rest_server;
use rhetor::shared::{logging, Config};

#[derive(Parser)]
#[command(name = "rhetor")]
#[command(about = "Rhetor - per-student development environment provisioner", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true, env = "RHETOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the provisioning API server (default command)
    Serve {
        /// Host for API server
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port for API server
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the effective configuration as YAML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    let command = cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
    });

    match command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            let _guards = logging::init_logging(&config.logging)?;
            run_rest_server(config).await?;
        }
        Commands::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
        }
    }

    Ok(())
}
