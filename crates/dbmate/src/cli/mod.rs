mod database;
mod migrate;
mod new;

pub use new::NewCommand;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use dbmate_core::config::{DbmateConfig, TransactionMode, DEFAULT_ENV_VAR, DEFAULT_MIGRATIONS_DIR};
use dbmate_runtime::MigrationExecutor;

/// dbmate - lightweight, framework-agnostic database migrations
#[derive(Parser)]
#[command(name = "dbmate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub options: GlobalOptions,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalOptions {
    /// Directory containing migration files.
    #[arg(short = 'd', long, default_value = DEFAULT_MIGRATIONS_DIR, global = true)]
    pub migrations_dir: PathBuf,

    /// Environment variable holding the database URL.
    #[arg(short, long = "env", default_value = DEFAULT_ENV_VAR, global = true)]
    pub env: String,

    /// Transaction grouping: per-migration or batch.
    #[arg(long, default_value = "per-migration", global = true)]
    pub transaction_mode: TransactionMode,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Generate a new migration file.
    New(NewCommand),

    /// Create the database (if necessary) and apply pending migrations.
    Up,

    /// Create the database.
    Create,

    /// Drop the database.
    Drop,

    /// Apply pending migrations.
    Migrate,

    /// Roll back the most recent migration.
    #[command(alias = "down")]
    Rollback,

    /// Show applied and pending migrations.
    Status,
}

impl GlobalOptions {
    /// Resolved configuration for this invocation.
    pub fn config(&self) -> DbmateConfig {
        DbmateConfig::default()
            .with_migrations_dir(&self.migrations_dir)
            .with_env_var(&self.env)
            .with_transaction_mode(self.transaction_mode)
    }

    fn executor(&self) -> Result<MigrationExecutor> {
        let executor = MigrationExecutor::from_config(&self.config())?;
        debug!(
            "Using {} driver, migrations in {:?}",
            executor.driver().name(),
            executor.migrations_dir()
        );
        Ok(executor)
    }
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        // `.env` may set RUST_LOG, so it is loaded before tracing starts.
        let env_file = load_dotenv()?;
        init_tracing(self.options.verbose);
        if let Some(path) = env_file {
            debug!("Loaded environment from {:?}", path);
        }

        match self.command {
            Commands::New(cmd) => cmd.execute(&self.options.config()),
            Commands::Up => migrate::up(&self.options.executor()?).await,
            Commands::Create => database::create(&self.options.executor()?).await,
            Commands::Drop => database::drop(&self.options.executor()?).await,
            Commands::Migrate => migrate::migrate(&self.options.executor()?).await,
            Commands::Rollback => migrate::rollback(&self.options.executor()?).await,
            Commands::Status => migrate::status(&self.options.executor()?).await,
        }
    }
}

fn init_tracing(verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter("RUST_LOG", verbose))
        .with_writer(std::io::stderr)
        .try_init();
}

/// Log filter from `var`, falling back to `warn` (or `debug` when verbose).
fn env_filter(var: &str, verbose: bool) -> EnvFilter {
    let default_level = if verbose { "debug" } else { "warn" };
    EnvFilter::try_from_env(var).unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Load `.env` from the working directory. A missing file is fine.
fn load_dotenv() -> Result<Option<PathBuf>> {
    match dotenvy::dotenv() {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(anyhow::anyhow!("failed to load .env: {}", e)),
    }
}
