//! File ingestion pipeline: fetch, extract, chunk, embed, store.
//!
//! Ingestion is idempotent per file. Every run first deletes the file's
//! previous chunks and embeddings, so a retried or re-triggered ingest
//! overwrites instead of duplicating. Status moves `pending` →
//! `processing` → `ready`, or `error` on any failure; the `processing`
//! transition is committed before the heavy work starts so observers see
//! the file in flight.

use sqlx::Row;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::error::PipelineError;
use crate::extract::extract_sections;
use crate::models::{FileRecord, Status};
use crate::retrieval::vec_to_blob;
use crate::traits::{BlobStore, Embedder};

/// Outcome counters for one ingest run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub sections: usize,
    pub chunks: usize,
}

/// Ingest one uploaded file.
///
/// A missing file id is logged and ignored (the row may have been deleted
/// after the job was queued). Any other failure marks the file `error`
/// and propagates, so the caller can decide whether to retry.
pub async fn run_ingest(
    pool: &SqlitePool,
    blobs: &dyn BlobStore,
    embedder: &dyn Embedder,
    chunking: &ChunkingConfig,
    file_id: &str,
) -> Result<IngestReport, PipelineError> {
    let Some(file) = load_file(pool, file_id).await? else {
        warn!(file_id, "ingest skipped: file record not found");
        return Ok(IngestReport::default());
    };

    set_file_status(pool, file_id, Status::Processing).await?;

    match ingest_file(pool, blobs, embedder, chunking, &file).await {
        Ok(report) => {
            set_file_status(pool, file_id, Status::Ready).await?;
            info!(
                file_id,
                sections = report.sections,
                chunks = report.chunks,
                "ingest complete"
            );
            Ok(report)
        }
        Err(e) => {
            set_file_status(pool, file_id, Status::Error).await?;
            Err(e)
        }
    }
}

async fn ingest_file(
    pool: &SqlitePool,
    blobs: &dyn BlobStore,
    embedder: &dyn Embedder,
    chunking: &ChunkingConfig,
    file: &FileRecord,
) -> Result<IngestReport, PipelineError> {
    clear_file_derivatives(pool, &file.id).await?;

    let (bucket, key) = parse_storage_path(&file.storage_path)?;
    let bytes = blobs.get(bucket, key).await?;

    let sections = extract_sections(&bytes, &file.extension)?;

    let mut report = IngestReport {
        sections: sections.len(),
        chunks: 0,
    };

    let mut ordinal: i64 = 0;
    for section in &sections {
        let metadata_json = section.label.to_json();
        for piece in chunk_text(&section.text, chunking.max_chars, chunking.overlap_chars) {
            if piece.trim().is_empty() {
                continue;
            }

            let chunk_id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO chunks (id, file_id, ordinal, text, metadata_json)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk_id)
            .bind(&file.id)
            .bind(ordinal)
            .bind(&piece)
            .bind(&metadata_json)
            .execute(pool)
            .await?;

            let vector = embedder.embed(&piece).await?;
            sqlx::query(
                "INSERT INTO embeddings (id, chunk_id, project_id, embedding)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&chunk_id)
            .bind(&file.project_id)
            .bind(vec_to_blob(&vector))
            .execute(pool)
            .await?;

            ordinal += 1;
            report.chunks += 1;
        }
    }

    Ok(report)
}

/// Drop any chunks and embeddings left over from a previous run of this
/// file, inside one transaction.
async fn clear_file_derivatives(pool: &SqlitePool, file_id: &str) -> Result<(), PipelineError> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE file_id = ?)",
    )
    .bind(file_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM chunks WHERE file_id = ?")
        .bind(file_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

pub async fn load_file(
    pool: &SqlitePool,
    file_id: &str,
) -> Result<Option<FileRecord>, PipelineError> {
    let row = sqlx::query(
        "SELECT id, project_id, original_name, storage_path, extension, status
         FROM files WHERE id = ?",
    )
    .bind(file_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| {
        let status: String = r.get("status");
        FileRecord {
            id: r.get("id"),
            project_id: r.get("project_id"),
            original_name: r.get("original_name"),
            storage_path: r.get("storage_path"),
            extension: r.get("extension"),
            status: Status::parse(&status).unwrap_or(Status::Error),
        }
    }))
}

pub async fn set_file_status(
    pool: &SqlitePool,
    file_id: &str,
    status: Status,
) -> Result<(), PipelineError> {
    sqlx::query("UPDATE files SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(file_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Split an `s3://bucket/key` storage path into bucket and key.
fn parse_storage_path(path: &str) -> Result<(&str, &str), PipelineError> {
    path.strip_prefix("s3://")
        .and_then(|rest| rest.split_once('/'))
        .filter(|(bucket, key)| !bucket.is_empty() && !key.is_empty())
        .ok_or_else(|| PipelineError::content(format!("malformed storage path: {}", path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_path_parses_bucket_and_key() {
        let (bucket, key) = parse_storage_path("s3://uploads/p1/f1.pdf").unwrap();
        assert_eq!(bucket, "uploads");
        assert_eq!(key, "p1/f1.pdf");
    }

    #[test]
    fn storage_path_rejects_malformed_values() {
        assert!(parse_storage_path("uploads/p1/f1.pdf").is_err());
        assert!(parse_storage_path("s3://uploads").is_err());
        assert!(parse_storage_path("s3:///key").is_err());
    }
}
