use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gator::commands::{register_handlers, Command, Commands, State};
use gator::config::Config;
use gator::db::Database;

#[derive(Parser, Debug)]
#[command(name = "gator", about = "Command-line RSS aggregator")]
struct Args {
    /// register, login, reset, users, agg, addfeed, feeds, follow, unfollow, following or browse
    command: String,

    /// Arguments passed to the command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr so command output stays clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config_path = Config::default_path()?;
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    debug!("Loaded config from {}", config_path.display());

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| config.db_url.clone());
    let db = Database::new(&database_url)
        .await
        .with_context(|| format!("failed to open database {}", database_url))?;
    db.initialize().await?;

    let mut commands = Commands::new();
    register_handlers(&mut commands);

    let state = Arc::new(State::new(Arc::new(db), config));
    let command = Command::new(args.command, args.args);
    let name = command.name.clone();

    if let Err(e) = commands.run(state, command).await {
        eprintln!("error running command '{}': {}", name, e);
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}
