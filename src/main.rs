// Main entry point for the OIDC login gateway

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use login_gateway::config::{self, Config};
use login_gateway::gateway;

/// Authentication gateway fronting an embedded OIDC provider engine
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Listen port (overrides the configuration file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address (overrides the configuration file)
    #[arg(short, long)]
    address: Option<String>,

    /// Use the production issuer base URL
    #[arg(long)]
    production: bool,

    /// Print the configuration JSON schema and exit
    #[arg(long)]
    show_config_schema: bool,
}

#[rocket::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.show_config_schema {
        return config::output_config_schema();
    }

    let mut config = Config::from_file(&args.config)?;
    config.apply_args(args.port, args.address, args.production);

    log::info!(
        "Starting gateway on {}:{} (issuer {})",
        config.gateway.address,
        config.gateway.port,
        config.gateway.issuer_url()
    );

    let figment = gateway::figment_for(&config);
    let rocket = gateway::build_rocket(figment, &config).await?;
    rocket.ignite().await?.launch().await?;

    Ok(())
}
