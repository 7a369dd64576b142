//! # Deckhand CLI
//!
//! The `deckhand` binary drives the document pipeline: database setup,
//! document upload and ingestion, conversational Q&A, and slide deck
//! generation.
//!
//! ## Usage
//!
//! ```bash
//! deckhand --config ./deckhand.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `deckhand init` | Create the SQLite database and run schema migrations |
//! | `deckhand upload <project> <path>` | Store a document and ingest it |
//! | `deckhand ingest <file_id>` | Re-run ingestion for an uploaded file |
//! | `deckhand ask <project> "<message>"` | Ask a question over project documents |
//! | `deckhand deck <project> --topic <t>` | Generate a PPTX deck from project context |
//! | `deckhand status <project>` | Show file and artifact states |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! deckhand init
//!
//! # Upload and ingest a PDF
//! deckhand upload acme ./reports/q2.pdf
//!
//! # Ask a question (continues a chat with --chat-id)
//! deckhand ask acme "What were the Q2 revenue drivers?"
//!
//! # Generate an 8-slide deck
//! deckhand deck acme --topic "Q2 results" --audience executives
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sqlx::Row;
use uuid::Uuid;

use deckhand::answer::generate_answer;
use deckhand::bedrock::BedrockClient;
use deckhand::config::{load_config, Config};
use deckhand::jobs::{run_deck_job, run_ingest_job};
use deckhand::models::{DeckParams, Role, Turn};
use deckhand::sigv4::AwsCredentials;
use deckhand::storage::S3Store;

/// Deckhand — a document-grounded assistant pipeline.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. AWS credentials are read from the environment
/// (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`).
#[derive(Parser)]
#[command(
    name = "deckhand",
    about = "Upload documents, ask questions over them, and generate slide decks",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./deckhand.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (files,
    /// chunks, embeddings, artifacts, chats, messages). Idempotent.
    Init,

    /// Upload a document into a project and ingest it.
    ///
    /// Stores the raw bytes in the uploads bucket, records a pending file
    /// row, then runs the ingestion pipeline (extract, chunk, embed).
    /// Supported formats: .txt, .csv, .pdf, .pptx, .xlsx, .docx.
    Upload {
        /// Project the document belongs to.
        project_id: String,
        /// Path to the local file to upload.
        path: PathBuf,
    },

    /// Re-run ingestion for an already-uploaded file.
    ///
    /// Safe to repeat: each run replaces the file's previous chunks and
    /// embeddings.
    Ingest {
        /// File id printed by `upload`.
        file_id: String,
    },

    /// Ask a question over a project's documents.
    ///
    /// Retrieves the most relevant chunks, asks the text model, and
    /// prints the answer with per-chunk source citations. Pass
    /// `--chat-id` to continue an earlier conversation.
    Ask {
        /// Project whose documents should ground the answer.
        project_id: String,
        /// The question to ask.
        message: String,
        /// Existing chat to continue; a new chat is created when omitted.
        #[arg(long)]
        chat_id: Option<String>,
    },

    /// Generate a PPTX slide deck grounded in project documents.
    Deck {
        /// Project whose documents provide the deck context.
        project_id: String,
        /// Deck topic; also the retrieval query.
        #[arg(long, default_value = "Presentation")]
        topic: String,
        /// Intended audience, woven into the outline prompt.
        #[arg(long, default_value = "general")]
        audience: String,
        /// Content slides to request (3-30).
        #[arg(long, default_value_t = 8)]
        num_slides: u32,
        /// Presentation style, e.g. "professional" or "casual".
        #[arg(long, default_value = "professional")]
        style: String,
    },

    /// Show file and artifact states for a project.
    Status {
        /// Project to report on.
        project_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => cmd_init(&config).await,
        Commands::Upload { project_id, path } => cmd_upload(&config, &project_id, &path).await,
        Commands::Ingest { file_id } => cmd_ingest(&config, &file_id).await,
        Commands::Ask {
            project_id,
            message,
            chat_id,
        } => cmd_ask(&config, &project_id, &message, chat_id).await,
        Commands::Deck {
            project_id,
            topic,
            audience,
            num_slides,
            style,
        } => {
            cmd_deck(
                &config,
                &project_id,
                DeckParams {
                    topic,
                    audience,
                    num_slides,
                    style,
                },
            )
            .await
        }
        Commands::Status { project_id } => cmd_status(&config, &project_id).await,
    }
}

async fn cmd_init(config: &Config) -> Result<()> {
    let pool = deckhand::db::connect(&config.db).await?;
    deckhand::migrate::run_migrations(&pool).await?;
    println!("Database initialized at {}", config.db.path.display());
    Ok(())
}

/// Build the production provider pair from config and environment.
fn providers(config: &Config) -> Result<(S3Store, BedrockClient)> {
    let creds = AwsCredentials::from_env()?;
    let store = S3Store::new(config.storage.clone(), creds.clone());
    let bedrock = BedrockClient::new(config.bedrock.clone(), creds)?;
    Ok((store, bedrock))
}

async fn cmd_upload(config: &Config, project_id: &str, path: &PathBuf) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    let original_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
        .with_context(|| format!("Path has no usable file name: {}", path.display()))?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default();

    let (store, bedrock) = providers(config)?;
    let pool = deckhand::db::connect(&config.db).await?;

    use deckhand::traits::BlobStore;
    let file_id = Uuid::new_v4().to_string();
    let key = format!("{}/{}{}", project_id, file_id, extension);
    let storage_path = store
        .put(
            &config.storage.uploads_bucket,
            &key,
            bytes,
            content_type_for(&extension),
        )
        .await?;

    sqlx::query(
        "INSERT INTO files (id, project_id, original_name, storage_path, extension, status, created_at)
         VALUES (?, ?, ?, ?, ?, 'pending', ?)",
    )
    .bind(&file_id)
    .bind(project_id)
    .bind(&original_name)
    .bind(&storage_path)
    .bind(&extension)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(&pool)
    .await?;

    println!("Uploaded {} as file {}", original_name, file_id);

    let report = run_ingest_job(&pool, &store, &bedrock, config, &file_id).await?;
    println!(
        "Ingested: {} sections, {} chunks",
        report.sections, report.chunks
    );
    Ok(())
}

async fn cmd_ingest(config: &Config, file_id: &str) -> Result<()> {
    let (store, bedrock) = providers(config)?;
    let pool = deckhand::db::connect(&config.db).await?;
    let report = run_ingest_job(&pool, &store, &bedrock, config, file_id).await?;
    println!(
        "Ingested: {} sections, {} chunks",
        report.sections, report.chunks
    );
    Ok(())
}

async fn cmd_ask(
    config: &Config,
    project_id: &str,
    message: &str,
    chat_id: Option<String>,
) -> Result<()> {
    if message.trim().is_empty() {
        bail!("message must not be empty");
    }

    let (_, bedrock) = providers(config)?;
    let pool = deckhand::db::connect(&config.db).await?;
    let now = chrono::Utc::now().to_rfc3339();

    let chat_id = match chat_id {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            sqlx::query("INSERT INTO chats (id, project_id, created_at) VALUES (?, ?, ?)")
                .bind(&id)
                .bind(project_id)
                .bind(&now)
                .execute(&pool)
                .await?;
            id
        }
    };

    sqlx::query(
        "INSERT INTO messages (id, chat_id, role, content, citations_json, created_at)
         VALUES (?, ?, 'user', ?, '[]', ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&chat_id)
    .bind(message)
    .bind(&now)
    .execute(&pool)
    .await?;

    let history = load_history(&pool, &chat_id).await?;
    let (reply, citations) = generate_answer(
        &pool,
        &bedrock,
        &bedrock,
        project_id,
        &history,
        config.retrieval.answer_top_k,
    )
    .await?;

    sqlx::query(
        "INSERT INTO messages (id, chat_id, role, content, citations_json, created_at)
         VALUES (?, ?, 'assistant', ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&chat_id)
    .bind(&reply)
    .bind(serde_json::to_string(&citations)?)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(&pool)
    .await?;

    println!("[chat {}]", chat_id);
    println!("{}", reply);
    if !citations.is_empty() {
        println!("\nSources:");
        for citation in &citations {
            println!("  - {}", citation.file_name);
        }
    }
    Ok(())
}

async fn load_history(pool: &sqlx::SqlitePool, chat_id: &str) -> Result<Vec<Turn>> {
    let rows = sqlx::query(
        "SELECT role, content FROM messages WHERE chat_id = ? ORDER BY created_at, rowid",
    )
    .bind(chat_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .filter_map(|row| {
            let role: String = row.get("role");
            Role::parse(&role).map(|role| Turn {
                role,
                content: row.get("content"),
            })
        })
        .collect())
}

async fn cmd_deck(config: &Config, project_id: &str, params: DeckParams) -> Result<()> {
    if !(3..=30).contains(&params.num_slides) {
        bail!("num_slides must be between 3 and 30");
    }

    let (store, bedrock) = providers(config)?;
    let pool = deckhand::db::connect(&config.db).await?;

    let artifact_id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO artifacts (id, project_id, artifact_type, status, metadata_json, created_at)
         VALUES (?, ?, 'deck', 'pending', ?, ?)",
    )
    .bind(&artifact_id)
    .bind(project_id)
    .bind(serde_json::to_string(&params)?)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(&pool)
    .await?;

    run_deck_job(&pool, &store, &bedrock, &bedrock, config, &artifact_id).await?;

    let storage_path: String =
        sqlx::query("SELECT storage_path FROM artifacts WHERE id = ?")
            .bind(&artifact_id)
            .fetch_one(&pool)
            .await?
            .get("storage_path");
    println!("Deck {} ready at {}", artifact_id, storage_path);
    Ok(())
}

async fn cmd_status(config: &Config, project_id: &str) -> Result<()> {
    let pool = deckhand::db::connect(&config.db).await?;

    let files = sqlx::query(
        "SELECT id, original_name, status FROM files WHERE project_id = ? ORDER BY created_at",
    )
    .bind(project_id)
    .fetch_all(&pool)
    .await?;

    println!("Files:");
    for row in &files {
        let id: String = row.get("id");
        let name: String = row.get("original_name");
        let status: String = row.get("status");
        println!("  {}  {}  [{}]", id, name, status);
    }

    let artifacts = sqlx::query(
        "SELECT id, artifact_type, status, storage_path FROM artifacts
         WHERE project_id = ? ORDER BY created_at",
    )
    .bind(project_id)
    .fetch_all(&pool)
    .await?;

    println!("Artifacts:");
    for row in &artifacts {
        let id: String = row.get("id");
        let kind: String = row.get("artifact_type");
        let status: String = row.get("status");
        let path: String = row.get("storage_path");
        println!("  {}  {}  [{}]  {}", id, kind, status, path);
    }
    Ok(())
}

/// MIME type recorded for uploaded documents.
fn content_type_for(extension: &str) -> &'static str {
    match extension {
        ".txt" => "text/plain",
        ".csv" => "text/csv",
        ".pdf" => "application/pdf",
        ".pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        ".xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ".docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}
