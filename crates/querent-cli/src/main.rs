//! CLI binary for loading data, inspecting the schema, and asking questions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use querent_api::AppState;
use querent_llm::DeepSeekAdapter;
use querent_pipeline::{Orchestrator, PipelineConfig};
use querent_store::{introspect, load_csv, SchemaCache, SqliteEngine};

#[derive(Parser)]
#[command(
    name = "querent",
    version,
    about = "Natural-language analytics agent over a local service-request dataset"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Address to bind
        #[arg(short, long, default_value = "0.0.0.0:8000")]
        bind: String,

        /// Path to the SQLite database
        #[arg(long, default_value = "data/nyc_311.db")]
        db: PathBuf,

        /// Queryable table name
        #[arg(long, default_value = "nyc_311")]
        table: String,
    },

    /// Ask a single question from the terminal
    Ask {
        /// The natural-language question
        question: String,

        /// Path to the SQLite database
        #[arg(long, default_value = "data/nyc_311.db")]
        db: PathBuf,

        /// Queryable table name
        #[arg(long, default_value = "nyc_311")]
        table: String,
    },

    /// Load a CSV export into the database (replaces the table)
    Load {
        /// Path to the CSV file
        csv: PathBuf,

        /// Path to the SQLite database
        #[arg(long, default_value = "data/nyc_311.db")]
        db: PathBuf,

        /// Queryable table name
        #[arg(long, default_value = "nyc_311")]
        table: String,
    },

    /// Print the introspected schema of the queryable table
    Schema {
        /// Path to the SQLite database
        #[arg(long, default_value = "data/nyc_311.db")]
        db: PathBuf,

        /// Queryable table name
        #[arg(long, default_value = "nyc_311")]
        table: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve { bind, db, table } => cmd_serve(&bind, &db, &table).await?,
        Commands::Ask {
            question,
            db,
            table,
        } => cmd_ask(&question, &db, &table).await?,
        Commands::Load { csv, db, table } => cmd_load(&csv, &db, &table).await?,
        Commands::Schema { db, table } => cmd_schema(&db, &table).await?,
    }

    Ok(())
}

fn build_orchestrator(db: &Path) -> anyhow::Result<Orchestrator> {
    let generator = Arc::new(DeepSeekAdapter::from_env()?);
    let engine = Arc::new(SqliteEngine::new(db));
    Ok(Orchestrator::new(generator, engine, PipelineConfig::default()))
}

async fn cmd_serve(bind: &str, db: &Path, table: &str) -> anyhow::Result<()> {
    tracing::info!(db = %db.display(), table, "starting server");
    let state = Arc::new(AppState {
        orchestrator: build_orchestrator(db)?,
        schema: SchemaCache::new(db, table),
    });
    querent_api::run(bind, state).await?;
    Ok(())
}

async fn cmd_ask(question: &str, db: &Path, table: &str) -> anyhow::Result<()> {
    anyhow::ensure!(!question.trim().is_empty(), "question must not be empty");

    let orchestrator = build_orchestrator(db)?;
    let cache = SchemaCache::new(db, table);
    let schema = cache.current().await?;

    let report = orchestrator.ask(question.trim(), schema).await;

    println!("{}", report.answer_text);
    if !report.sql.is_empty() {
        println!("\nSQL: {}", report.sql);
    }
    if !report.rows.is_empty() {
        println!(
            "Rows: {} ({})",
            report.rows.len(),
            report.columns.join(", ")
        );
        for row in report.rows.iter().take(10) {
            println!("  {}", serde_json::Value::Object(row.clone()));
        }
        if report.rows.len() > 10 {
            println!("  ... {} more", report.rows.len() - 10);
        }
    }
    if let Some(error) = report.error {
        println!("\nError: {error}");
    }
    Ok(())
}

async fn cmd_load(csv: &Path, db: &Path, table: &str) -> anyhow::Result<()> {
    let csv = csv.to_path_buf();
    let db_path = db.to_path_buf();
    let table_name = table.to_string();

    let summary =
        tokio::task::spawn_blocking(move || load_csv(&csv, &db_path, &table_name)).await??;

    println!(
        "Loaded {} rows into '{}' ({} columns)",
        summary.rows, summary.table, summary.columns
    );
    println!("You can now start the server and ask questions.");
    Ok(())
}

async fn cmd_schema(db: &Path, table: &str) -> anyhow::Result<()> {
    let db_path = db.to_path_buf();
    let table_name = table.to_string();
    let schema =
        tokio::task::spawn_blocking(move || introspect(&db_path, &table_name)).await??;

    println!("Table: {} ({} rows)", schema.table, schema.total_rows);
    for column in &schema.columns {
        println!("  {:<30} {}", column.name, column.data_type);
    }
    Ok(())
}
