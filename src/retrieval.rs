//! Vector retrieval.
//!
//! Embeddings are stored as little-endian `f32` BLOBs. Retrieval embeds
//! the query, scans the project's embeddings, and ranks chunks by cosine
//! distance (`1 - cosine similarity`), ascending. Projects at this scale
//! are thousands of chunks, so a full scan per query is fine; an ANN
//! index is a later optimization.

use sqlx::Row;
use sqlx::SqlitePool;

use crate::error::PipelineError;
use crate::models::RetrievedChunk;
use crate::traits::Embedder;

/// Encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage.
pub fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode a little-endian BLOB back into an `f32` vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity between two vectors. Returns 0.0 when either vector
/// has zero norm or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Retrieve the `top_k` chunks of `project_id` nearest to `query`.
///
/// A project with no embeddings yields an empty result, not an error.
pub async fn retrieve(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    project_id: &str,
    query: &str,
    top_k: i64,
) -> Result<Vec<RetrievedChunk>, PipelineError> {
    let query_vec = embedder.embed(query).await?;

    let rows = sqlx::query(
        r#"
        SELECT e.embedding, c.text, c.metadata_json, f.original_name
        FROM embeddings e
        JOIN chunks c ON c.id = e.chunk_id
        JOIN files f ON f.id = c.file_id
        WHERE e.project_id = ?
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    let mut scored: Vec<RetrievedChunk> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let candidate = blob_to_vec(&blob);
            let distance = 1.0 - cosine_similarity(&query_vec, &candidate) as f64;
            RetrievedChunk {
                chunk_text: row.get("text"),
                file_name: row.get("original_name"),
                metadata_json: row.get("metadata_json"),
                distance,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(top_k.max(0) as usize);
    Ok(scored)
}
