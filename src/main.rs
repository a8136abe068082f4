use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{warn, Level};

use pgqueue::config::ProviderConfig;
use pgqueue::db::{ConnState, Query, RequestId, SqlResult};
use pgqueue::driver::postgres::PgDriver;
use pgqueue::error::SqlError;
use pgqueue::export;
use pgqueue::host::runtime::{drive, TokioHost};
use pgqueue::provider::SqlProvider;

/// Run queries through the pgqueue provider
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Database config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log protocol steps to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List configured databases
    List,
    /// Run one query and print its result
    Query {
        /// Id of the database to run on
        #[arg(long)]
        db: String,
        /// Value for the next `?` placeholder; repeatable
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,
        /// Queue ahead of normal queries
        #[arg(long)]
        priority: bool,
        #[arg(long, value_enum, default_value_t = Format::Table)]
        format: Format,
        /// Seconds to wait for the result
        #[arg(long, default_value_t = 30)]
        timeout: u64,
        template: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Table,
    Csv,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .init();

    let config = match &cli.config {
        Some(path) => ProviderConfig::load_from(path)?,
        None => ProviderConfig::load()?,
    };
    for id in config.duplicate_ids() {
        warn!("database id '{}' is defined more than once", id);
    }

    match cli.command {
        Command::List => {
            list(&config);
            Ok(())
        }
        Command::Query {
            db,
            params,
            priority,
            format,
            timeout,
            template,
        } => {
            let mut query = Query::new(db, template).params(params);
            if priority {
                query = query.priority();
            }
            let result = run_query(config, query, Duration::from_secs(timeout)).await?;
            let output = match format {
                Format::Table => export::to_table(&result),
                Format::Csv => export::to_csv(&result),
                Format::Json => export::to_json(&result),
            };
            print!("{}", output);
            if !output.ends_with('\n') {
                println!();
            }
            Ok(())
        }
    }
}

fn list(config: &ProviderConfig) {
    if config.databases.is_empty() {
        println!("No databases configured ({})", ProviderConfig::get_config_path().display());
        return;
    }
    for db in &config.databases {
        println!(
            "{:<16} {}{}",
            db.id,
            db.display_string(),
            if db.ssl { " (ssl)" } else { "" }
        );
    }
}

async fn run_query(mut config: ProviderConfig, query: Query, timeout: Duration) -> Result<SqlResult> {
    // A failed connection should end the wait instead of running into the timeout.
    config.settings.notify_abandoned = true;

    let (host, mut events) = TokioHost::new()?;
    let driver = PgDriver::new(&host);
    let mut provider = SqlProvider::new(host, Box::new(driver), config);

    let outcome: Rc<RefCell<Option<Result<SqlResult, SqlError>>>> = Rc::default();
    let slot = Rc::clone(&outcome);
    let sink = move |_id: RequestId, result: Result<SqlResult, SqlError>| {
        *slot.borrow_mut() = Some(result);
    };
    let owner = provider.register_owner(Box::new(sink));

    let backend = query.backend.clone();
    provider
        .submit(query, Some(owner))
        .with_context(|| format!("Failed to submit query to '{}'", backend))?;

    let finished = tokio::time::timeout(
        timeout,
        drive(&mut provider, &mut events, |p| {
            outcome.borrow().is_some()
                || p.status()
                    .iter()
                    .any(|s| s.id == backend && s.state == ConnState::Closed)
        }),
    )
    .await;

    provider.remove_owner(owner);
    provider.shutdown();

    if finished.is_err() {
        bail!("No result from '{}' within {}s", backend, timeout.as_secs());
    }
    let result = outcome.borrow_mut().take();
    match result {
        Some(result) => Ok(result?),
        None => bail!("Connection to '{}' failed", backend),
    }
}
