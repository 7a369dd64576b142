//! Slide deck generation pipeline.
//!
//! Two model-facing stages: retrieve project context and ask the text
//! model for a structured outline, then render the outline to PPTX and
//! store it. The artifact row mirrors the file status machine:
//! `pending` → `processing` → `ready` | `error`. An outline the model
//! returns as invalid JSON is a content failure — regenerating would
//! burn tokens on the same prompt, so it is not retried.

use sqlx::Row;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::answer::format_context;
use crate::config::Config;
use crate::error::PipelineError;
use crate::models::{DeckOutline, DeckParams, Role, Status, Turn};
use crate::pptx::{build_deck, PPTX_MIME};
use crate::retrieval::retrieve;
use crate::traits::{BlobStore, Embedder, TextModel};

const OUTLINE_MAX_TOKENS: u32 = 4096;

const OUTLINE_SYSTEM: &str =
    "You are a presentation designer. Return only valid JSON, no markdown formatting.";

struct ArtifactRecord {
    id: String,
    project_id: String,
    metadata_json: String,
}

/// Generate the deck for one artifact.
pub async fn run_deck(
    pool: &SqlitePool,
    blobs: &dyn BlobStore,
    embedder: &dyn Embedder,
    model: &dyn TextModel,
    config: &Config,
    artifact_id: &str,
) -> Result<(), PipelineError> {
    let Some(artifact) = load_artifact(pool, artifact_id).await? else {
        warn!(artifact_id, "deck generation skipped: artifact not found");
        return Ok(());
    };

    set_artifact_status(pool, artifact_id, Status::Processing).await?;

    match generate_deck(pool, blobs, embedder, model, config, &artifact).await {
        Ok(storage_path) => {
            sqlx::query("UPDATE artifacts SET status = ?, storage_path = ? WHERE id = ?")
                .bind(Status::Ready.as_str())
                .bind(&storage_path)
                .bind(artifact_id)
                .execute(pool)
                .await?;
            info!(artifact_id, storage_path, "deck generated");
            Ok(())
        }
        Err(e) => {
            set_artifact_status(pool, artifact_id, Status::Error).await?;
            Err(e)
        }
    }
}

async fn generate_deck(
    pool: &SqlitePool,
    blobs: &dyn BlobStore,
    embedder: &dyn Embedder,
    model: &dyn TextModel,
    config: &Config,
    artifact: &ArtifactRecord,
) -> Result<String, PipelineError> {
    let params: DeckParams =
        serde_json::from_str(&artifact.metadata_json).unwrap_or_default();

    let retrieved = retrieve(
        pool,
        embedder,
        &artifact.project_id,
        &params.topic,
        config.retrieval.deck_top_k,
    )
    .await?;
    let context = if retrieved.is_empty() {
        "No project documents available.".to_string()
    } else {
        format_context(&retrieved)
    };

    let prompt = format!(
        "Create a presentation outline on the topic: {}\n\
Audience: {}\n\
Style: {}\n\
Number of content slides: {}\n\n\
Use the following project context where relevant:\n{}\n\n\
Return ONLY valid JSON in this format: \
{{\"title\": \"...\", \"slides\": [{{\"title\": \"...\", \
\"bullet_points\": [\"...\"], \"speaker_notes\": \"...\"}}]}}",
        params.topic, params.audience, params.style, params.num_slides, context
    );

    let reply = model
        .complete(
            &[Turn {
                role: Role::User,
                content: prompt,
            }],
            Some(OUTLINE_SYSTEM),
            OUTLINE_MAX_TOKENS,
        )
        .await?;

    let outline: DeckOutline =
        serde_json::from_str(strip_code_fences(&reply)).map_err(|e| {
            PipelineError::content(format!("model returned invalid outline JSON: {}", e))
        })?;

    let bytes = build_deck(&outline)?;

    let key = format!("{}/{}.pptx", artifact.project_id, artifact.id);
    blobs
        .put(&config.storage.artifacts_bucket, &key, bytes, PPTX_MIME)
        .await
}

/// Drop a leading ```` ```json ```` line and a trailing ```` ``` ```` fence,
/// which models emit despite the no-markdown instruction.
fn strip_code_fences(reply: &str) -> &str {
    let mut text = reply.trim();
    if text.starts_with("```") {
        text = match text.split_once('\n') {
            Some((_, rest)) => rest,
            None => "",
        };
    }
    if let Some(stripped) = text.trim_end().strip_suffix("```") {
        text = stripped;
    }
    text.trim()
}

async fn load_artifact(
    pool: &SqlitePool,
    artifact_id: &str,
) -> Result<Option<ArtifactRecord>, PipelineError> {
    let row = sqlx::query("SELECT id, project_id, metadata_json FROM artifacts WHERE id = ?")
        .bind(artifact_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| ArtifactRecord {
        id: r.get("id"),
        project_id: r.get("project_id"),
        metadata_json: r.get("metadata_json"),
    }))
}

pub async fn set_artifact_status(
    pool: &SqlitePool,
    artifact_id: &str,
    status: Status,
) -> Result<(), PipelineError> {
    sqlx::query("UPDATE artifacts SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(artifact_id)
        .execute(pool)
        .await?;
    Ok(())
}
