use nl2sql_refiner::execution_loop::Orchestrator;
use nl2sql_refiner::knowledge_base::DEFAULT_THRESHOLD;
use nl2sql_refiner::response::{write_csv, QueryResponse};
use nl2sql_refiner::{EngineConfig, Session};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nl2sql")]
#[command(about = "Ask a database questions in plain English")]
#[command(version)]
struct Args {
    /// Database URL (sqlite:<path> or postgres://...), overrides NL2SQL_DATABASE_URL
    #[arg(long, global = true)]
    database: Option<String>,

    /// Maximum refinement iterations per question
    #[arg(long, global = true)]
    max_iterations: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a question to SQL, run it and print the result
    Query {
        /// The question in natural language
        query: String,

        /// Print the full JSON response instead of CSV
        #[arg(long)]
        json: bool,
    },
    /// Print the schema description used in prompts
    Schema,
    /// Inspect or rebuild the autocorrect knowledge base
    Kb {
        #[command(subcommand)]
        command: KbCommands,
    },
}

#[derive(Subcommand)]
enum KbCommands {
    /// Re-sample the database and replace the persisted knowledge base
    Refresh,
    /// Print a summary of the knowledge base and correction history
    Report,
    /// Show the closest known value for a column
    Match {
        value: String,
        table: String,
        column: String,

        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = EngineConfig::from_env().context("Failed to load configuration")?;
    if let Some(database) = args.database {
        config.database_url = Some(database);
    }
    if let Some(max_iterations) = args.max_iterations {
        config.max_iterations = max_iterations;
    }

    let session = Arc::new(
        Session::connect(&config)
            .await
            .context("Failed to open database")?,
    );

    match args.command {
        Commands::Query { query, json } => run_query(&config, session, &query, json).await,
        Commands::Schema => {
            let schema = session.schema().await?;
            println!("{}", schema.text);
            Ok(())
        }
        Commands::Kb { command } => run_kb(session, command).await,
    }
}

async fn run_query(config: &EngineConfig, session: Arc<Session>, query: &str, json: bool) -> Result<()> {
    let oracle = Arc::new(config.llm_client()?);
    info!("Using {} model {}", oracle.provider(), oracle.model());

    let orchestrator =
        Orchestrator::new(Arc::clone(&session), oracle).with_max_iterations(config.max_iterations);
    let response = QueryResponse::from(orchestrator.process(query).await);

    if let Ok(kb) = session.knowledge_base().await {
        if let Err(e) = kb.flush_history() {
            warn!("Could not save correction history: {}", e);
        }
    }

    if json {
        println!("{}", response.to_json()?);
    } else {
        for correction in &response.corrections {
            eprintln!("Autocorrected {}", correction.describe());
        }
        for warning in &response.warnings {
            eprintln!("Warning: {}", warning);
        }
        if let Some(sql) = &response.sql {
            eprintln!("SQL: {}", sql);
        }
        match (&response.result, &response.error) {
            (Some(result), _) => write_csv(result, std::io::stdout().lock())?,
            (None, Some(error)) => eprintln!("Error: {}", error),
            (None, None) => {}
        }
    }

    if !response.success {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_kb(session: Arc<Session>, command: KbCommands) -> Result<()> {
    match command {
        KbCommands::Refresh => {
            session.refresh().await.context("Knowledge base refresh failed")?;
            let kb = session.knowledge_base().await?;
            let snapshot = kb.snapshot();
            println!(
                "Knowledge base rebuilt: {} tables, {} relationships",
                snapshot.schema.len(),
                snapshot.relationships.len()
            );
        }
        KbCommands::Report => {
            let kb = session.knowledge_base().await?;
            println!("{}", kb.report());
        }
        KbCommands::Match {
            value,
            table,
            column,
            threshold,
        } => {
            let kb = session.knowledge_base().await?;
            match kb.find_best_match(&value, &table, &column, threshold) {
                Some((matched, confidence)) => println!("{} ({:.2})", matched, confidence),
                None => println!("No match for '{}' in {}.{}", value, table, column),
            }
        }
    }
    Ok(())
}
