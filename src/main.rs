mod api;
mod auth;
mod config;
mod db;
mod i18n;
mod ingest;
mod manual;
mod models;
mod parser;
mod presentation;
mod units;
mod worker;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use crate::api::AppState;
use crate::config::AppConfig;
use crate::db::Database;
use crate::i18n::Translator;

#[derive(Debug, Parser)]
#[command(name = "workout-tracker", version, about = "Self-hosted workout tracker")]
struct Cli {
    /// Extra configuration file, merged over the default ones
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the web server and the background worker (default)
    Serve,
    /// Re-ingest every workout marked for refresh, then exit
    Refresh,
}

fn init_logging(config: &AppConfig) {
    let level = match (config.logging, config.debug) {
        (false, _) => "off",
        (true, true) => "debug",
        (true, false) => "info",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if level == "off" {
            EnvFilter::new("off")
        } else {
            EnvFilter::new(format!("warn,workout_tracker={level},tower_http={level}"))
        }
    });

    fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_target(config.debug)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_logging(&config);

    let db = Database::open(&config.database_file)
        .with_context(|| format!("opening database {}", config.database_file))?;
    db.ensure_admin_user().context("creating admin user")?;
    let database = Arc::new(Mutex::new(db));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Refresh => {
            let db = database.lock().await;
            let refreshed = worker::refresh_dirty(&db)?;
            info!("Refreshed {} workouts", refreshed);
        }
        Command::Serve => {
            let translator = Translator::load()?;
            let views = presentation::base_registry(&translator)?;

            tokio::spawn(worker::run(database.clone(), config.worker_interval()));

            let state = AppState {
                database,
                translator: Arc::new(translator),
                views: Arc::new(views),
                config: Arc::new(config),
            };
            api::run_server(state).await?;
        }
    }

    Ok(())
}
