use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

mod auth;
mod mining;
mod models;
mod repositories;
pub mod services;
pub mod settings;

use repositories::{MemoryRepository, PostgresRepository, Storage};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Overrides `server.listen` from the config file.
    #[arg(short, long)]
    listen: Option<String>,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let settings = settings::Settings::new(&args.config)?;

    init_logging(&args.log4rs)?;
    log::info!("Starting Au miner.");

    let storage: Arc<dyn Storage> = match &settings.storage {
        settings::Storage::Postgres(postgres) => {
            log::info!("Connecting to database.");
            Arc::new(PostgresRepository::connect(postgres).await?)
        }
        settings::Storage::Memory => {
            log::warn!("Using in-memory storage, data is lost on restart.");
            Arc::new(MemoryRepository::new())
        }
    };
    let verifier = Arc::from(auth::verifier_from_settings(&settings.auth)?);

    let listen = args
        .listen
        .clone()
        .unwrap_or_else(|| settings.server.listen.clone());

    services::start_services(storage, verifier, settings, &listen).await
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    match log4rs::init_file(path, Default::default()) {
        Ok(_) => {
            println!("[*] Logging initialized successfully.");
            Ok(())
        }
        Err(e) => {
            println!("[ERROR] Failed to initialize logging: {}", e);
            Err(anyhow::anyhow!("Could not initialize logging: {}", e))
        }
    }
}
