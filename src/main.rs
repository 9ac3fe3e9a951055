use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dhcpdir::{BindingTable, Config, DhcpServer, Result};

#[derive(Parser)]
#[command(name = "dhcpdir")]
#[command(author, version, about = "A directory-backed DHCP server", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Run,
    ShowConfig,
    ShowBindings,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Config::load_or_create(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!("Starting DHCP server with config: {:?}", cli.config);
            let bindings = BindingTable::load(
                &config.directory_file,
                config.network_prefix,
                config.directory_strictness,
            )?;
            let mut server = DhcpServer::new(config, bindings)?;

            tokio::select! {
                result = server.run() => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal, stopping server...");
                    Ok(())
                }
            }
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::ShowBindings => {
            let bindings = BindingTable::load(
                &config.directory_file,
                config.network_prefix,
                config.directory_strictness,
            )?;

            if bindings.is_empty() {
                println!("No static bindings.");
            } else {
                let mut rows: Vec<_> = bindings.iter().collect();
                rows.sort_by_key(|&(_, &ip)| ip);

                println!("{:<20} {:<16}", "Hardware Address", "IP Address");
                println!("{}", "-".repeat(36));
                for (mac, ip) in rows {
                    println!("{:<20} {:<16}", mac.to_string(), ip.to_string());
                }
            }

            Ok(())
        }
    }
}
