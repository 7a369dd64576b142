//! End-to-end pipeline tests over a temporary database and in-memory
//! blob store, with scripted model providers.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::Row;
use sqlx::SqlitePool;
use uuid::Uuid;

use deckhand::answer::generate_answer;
use deckhand::config::{
    BedrockConfig, ChunkingConfig, Config, DbConfig, JobsConfig, RetrievalConfig, StorageConfig,
};
use deckhand::deck::run_deck;
use deckhand::error::PipelineError;
use deckhand::ingest::run_ingest;
use deckhand::jobs::{run_deck_job, run_ingest_job};
use deckhand::models::{Role, Turn};
use deckhand::retrieval::retrieve;
use deckhand::traits::{BlobStore, Embedder, MemoryBlobStore, TextModel};

// ============ Test providers ============

/// Deterministic embedder: orthogonal axes for a few keywords, so
/// retrieval ordering is predictable without a real model.
struct KeywordEmbedder;

fn keyword_vec(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; 4];
    if text.contains("alpha") {
        v[0] = 1.0;
    }
    if text.contains("beta") {
        v[1] = 1.0;
    }
    if text.contains("gamma") {
        v[2] = 1.0;
    }
    if v.iter().all(|x| *x == 0.0) {
        v[3] = 1.0;
    }
    v
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        Ok(keyword_vec(text))
    }
}

/// Embedder that fails a fixed number of calls before recovering.
struct FlakyEmbedder {
    remaining_failures: Mutex<u32>,
}

impl FlakyEmbedder {
    fn failing(n: u32) -> Self {
        Self {
            remaining_failures: Mutex::new(n),
        }
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let mut remaining = self.remaining_failures.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(PipelineError::transient(anyhow::anyhow!(
                "embedding service unavailable"
            )));
        }
        Ok(keyword_vec(text))
    }
}

/// Text model that replays scripted replies and records the system
/// prompts it was called with.
#[derive(Default)]
struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    systems: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn replying(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            systems: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.systems.lock().unwrap().len()
    }

    fn last_system(&self) -> Option<String> {
        self.systems.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TextModel for ScriptedModel {
    async fn complete(
        &self,
        _messages: &[Turn],
        system: Option<&str>,
        _max_tokens: u32,
    ) -> Result<String, PipelineError> {
        self.systems
            .lock()
            .unwrap()
            .push(system.unwrap_or_default().to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PipelineError::transient(anyhow::anyhow!("no scripted reply left")))
    }
}

// ============ Fixtures ============

fn test_config(dir: &tempfile::TempDir) -> Config {
    Config {
        db: DbConfig {
            path: dir.path().join("deckhand.sqlite"),
            max_connections: 5,
        },
        chunking: ChunkingConfig::default(),
        retrieval: RetrievalConfig::default(),
        storage: StorageConfig {
            region: "us-east-1".to_string(),
            endpoint_url: None,
            uploads_bucket: "uploads".to_string(),
            artifacts_bucket: "artifacts".to_string(),
        },
        bedrock: BedrockConfig::default(),
        jobs: JobsConfig {
            ingest_max_attempts: 3,
            ingest_countdown_secs: 0,
            deck_max_attempts: 2,
            deck_countdown_secs: 0,
        },
    }
}

async fn setup(dir: &tempfile::TempDir) -> (SqlitePool, Config, MemoryBlobStore) {
    let config = test_config(dir);
    let pool = deckhand::db::connect(&config.db).await.unwrap();
    deckhand::migrate::run_migrations(&pool).await.unwrap();
    (pool, config, MemoryBlobStore::new())
}

fn make_zip(entries: &[(&str, &str)]) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, content) in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    buf
}

/// Store bytes in the blob store and record a pending file row.
async fn upload(
    pool: &SqlitePool,
    store: &MemoryBlobStore,
    project_id: &str,
    name: &str,
    bytes: &[u8],
) -> String {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| format!(".{}", ext))
        .unwrap_or_default();
    let file_id = Uuid::new_v4().to_string();
    let key = format!("{}/{}{}", project_id, file_id, extension);
    let storage_path = store
        .put("uploads", &key, bytes.to_vec(), "application/octet-stream")
        .await
        .unwrap();

    sqlx::query(
        "INSERT INTO files (id, project_id, original_name, storage_path, extension, status, created_at)
         VALUES (?, ?, ?, ?, ?, 'pending', ?)",
    )
    .bind(&file_id)
    .bind(project_id)
    .bind(name)
    .bind(&storage_path)
    .bind(&extension)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .unwrap();

    file_id
}

async fn file_status(pool: &SqlitePool, file_id: &str) -> String {
    sqlx::query("SELECT status FROM files WHERE id = ?")
        .bind(file_id)
        .fetch_one(pool)
        .await
        .unwrap()
        .get("status")
}

async fn chunk_rows(pool: &SqlitePool, file_id: &str) -> Vec<(i64, String)> {
    sqlx::query("SELECT ordinal, text FROM chunks WHERE file_id = ? ORDER BY ordinal")
        .bind(file_id)
        .fetch_all(pool)
        .await
        .unwrap()
        .iter()
        .map(|r| (r.get("ordinal"), r.get("text")))
        .collect()
}

async fn embedding_count(pool: &SqlitePool, project_id: &str) -> i64 {
    sqlx::query("SELECT COUNT(*) AS n FROM embeddings WHERE project_id = ?")
        .bind(project_id)
        .fetch_one(pool)
        .await
        .unwrap()
        .get("n")
}

// ============ Ingestion ============

#[tokio::test]
async fn ingest_txt_file_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, config, store) = setup(&dir).await;

    let file_id = upload(&pool, &store, "p1", "notes.txt", b"alpha facts here.").await;
    let report = run_ingest(&pool, &store, &KeywordEmbedder, &config.chunking, &file_id)
        .await
        .unwrap();

    assert_eq!(report.sections, 1);
    assert_eq!(report.chunks, 1);
    assert_eq!(file_status(&pool, &file_id).await, "ready");

    let chunks = chunk_rows(&pool, &file_id).await;
    assert_eq!(chunks, vec![(0, "alpha facts here.".to_string())]);
    assert_eq!(embedding_count(&pool, "p1").await, 1);

    let metadata: String =
        sqlx::query("SELECT metadata_json FROM chunks WHERE file_id = ?")
            .bind(&file_id)
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("metadata_json");
    assert_eq!(metadata, r#"{"type":"text"}"#);
}

#[tokio::test]
async fn ingest_numbers_chunks_across_sections() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, config, store) = setup(&dir).await;

    // Blank paragraphs split the document into three sections.
    let doc = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:r><w:t>alpha opening remarks.</w:t></w:r></w:p>
<w:p/>
<w:p><w:r><w:t>beta middle findings.</w:t></w:r></w:p>
<w:p/>
<w:p><w:r><w:t>gamma closing summary.</w:t></w:r></w:p>
</w:body></w:document>"#;
    let bytes = make_zip(&[("word/document.xml", doc)]);

    let file_id = upload(&pool, &store, "p1", "report.docx", &bytes).await;
    let report = run_ingest(&pool, &store, &KeywordEmbedder, &config.chunking, &file_id)
        .await
        .unwrap();

    assert_eq!(report.sections, 3);
    assert_eq!(report.chunks, 3);
    assert_eq!(file_status(&pool, &file_id).await, "ready");
    assert_eq!(embedding_count(&pool, "p1").await, 3);

    // Ordinals run 0..N across sections, not per section.
    let chunks = chunk_rows(&pool, &file_id).await;
    assert_eq!(
        chunks,
        vec![
            (0, "alpha opening remarks.".to_string()),
            (1, "beta middle findings.".to_string()),
            (2, "gamma closing summary.".to_string()),
        ]
    );

    let labels: Vec<String> =
        sqlx::query("SELECT metadata_json FROM chunks WHERE file_id = ? ORDER BY ordinal")
            .bind(&file_id)
            .fetch_all(&pool)
            .await
            .unwrap()
            .iter()
            .map(|r| r.get("metadata_json"))
            .collect();
    assert_eq!(
        labels,
        vec![
            r#"{"section":1}"#.to_string(),
            r#"{"section":2}"#.to_string(),
            r#"{"section":3}"#.to_string(),
        ]
    );
}

#[tokio::test]
async fn ingest_unknown_extension_marks_error_and_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, config, store) = setup(&dir).await;

    let file_id = upload(&pool, &store, "p1", "blob.bin", b"opaque").await;
    let err = run_ingest_job(&pool, &store, &KeywordEmbedder, &config, &file_id)
        .await
        .unwrap_err();

    assert!(!err.is_retryable());
    assert_eq!(file_status(&pool, &file_id).await, "error");
    assert!(chunk_rows(&pool, &file_id).await.is_empty());
}

#[tokio::test]
async fn reingest_replaces_chunks_instead_of_duplicating() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, config, store) = setup(&dir).await;

    let file_id = upload(&pool, &store, "p1", "notes.txt", b"alpha one. beta two.").await;
    run_ingest(&pool, &store, &KeywordEmbedder, &config.chunking, &file_id)
        .await
        .unwrap();
    let first = chunk_rows(&pool, &file_id).await;

    run_ingest(&pool, &store, &KeywordEmbedder, &config.chunking, &file_id)
        .await
        .unwrap();
    let second = chunk_rows(&pool, &file_id).await;

    assert_eq!(first.len(), second.len());
    assert_eq!(
        embedding_count(&pool, "p1").await,
        second.len() as i64
    );
}

#[tokio::test]
async fn transient_embed_failure_recovers_on_retry() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, config, store) = setup(&dir).await;

    let file_id = upload(&pool, &store, "p1", "notes.txt", b"alpha recovery.").await;
    let embedder = FlakyEmbedder::failing(1);
    let report = run_ingest_job(&pool, &store, &embedder, &config, &file_id)
        .await
        .unwrap();

    assert_eq!(report.chunks, 1);
    assert_eq!(file_status(&pool, &file_id).await, "ready");
    // The failed attempt's partial chunks must not survive.
    assert_eq!(chunk_rows(&pool, &file_id).await.len(), 1);
    assert_eq!(embedding_count(&pool, "p1").await, 1);
}

#[tokio::test]
async fn exhausted_retries_leave_file_in_error() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, config, store) = setup(&dir).await;

    let file_id = upload(&pool, &store, "p1", "notes.txt", b"alpha never lands.").await;
    let embedder = FlakyEmbedder::failing(100);
    let err = run_ingest_job(&pool, &store, &embedder, &config, &file_id)
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(file_status(&pool, &file_id).await, "error");
    assert_eq!(embedding_count(&pool, "p1").await, 0);
}

#[tokio::test]
async fn long_text_chunks_respect_size_bound() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, mut config, store) = setup(&dir).await;
    config.chunking = ChunkingConfig {
        max_chars: 500,
        overlap_chars: 50,
    };

    let text = "The alpha metric improved across the quarter. ".repeat(90); // ~4100 chars
    let file_id = upload(&pool, &store, "p1", "report.txt", text.as_bytes()).await;
    let report = run_ingest(&pool, &store, &KeywordEmbedder, &config.chunking, &file_id)
        .await
        .unwrap();

    assert!(report.chunks > 1);
    for (_, chunk) in chunk_rows(&pool, &file_id).await {
        assert!(chunk.chars().count() <= 550, "chunk exceeds max + overlap");
    }
}

// ============ Retrieval ============

#[tokio::test]
async fn retrieval_is_project_scoped_and_distance_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, config, store) = setup(&dir).await;

    let f1 = upload(&pool, &store, "p1", "a.txt", b"alpha topic.").await;
    let f2 = upload(&pool, &store, "p1", "b.txt", b"beta topic.").await;
    let f3 = upload(&pool, &store, "p2", "c.txt", b"alpha elsewhere.").await;
    for id in [&f1, &f2, &f3] {
        run_ingest(&pool, &store, &KeywordEmbedder, &config.chunking, id)
            .await
            .unwrap();
    }

    let results = retrieve(&pool, &KeywordEmbedder, "p1", "alpha", 5)
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].file_name, "a.txt");
    assert!(results[0].distance < results[1].distance);
    assert!(results.iter().all(|r| r.file_name != "c.txt"));
}

#[tokio::test]
async fn retrieval_from_empty_project_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, _config, _store) = setup(&dir).await;
    let results = retrieve(&pool, &KeywordEmbedder, "ghost", "anything", 5)
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn retrieval_respects_top_k() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, config, store) = setup(&dir).await;

    for i in 0..4 {
        let id = upload(
            &pool,
            &store,
            "p1",
            &format!("f{}.txt", i),
            b"alpha repeated.",
        )
        .await;
        run_ingest(&pool, &store, &KeywordEmbedder, &config.chunking, &id)
            .await
            .unwrap();
    }

    let results = retrieve(&pool, &KeywordEmbedder, "p1", "alpha", 2)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
}

// ============ Answering ============

#[tokio::test]
async fn answer_without_user_turn_skips_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, _config, _store) = setup(&dir).await;
    let model = ScriptedModel::replying(&[]);

    let history = vec![Turn {
        role: Role::Assistant,
        content: "welcome".to_string(),
    }];
    let (reply, citations) =
        generate_answer(&pool, &KeywordEmbedder, &model, "p1", &history, 5)
            .await
            .unwrap();

    assert_eq!(reply, "I need a question to help you.");
    assert!(citations.is_empty());
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn answer_with_no_documents_uses_empty_project_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, _config, _store) = setup(&dir).await;
    let model = ScriptedModel::replying(&["No documents have been uploaded yet."]);

    let history = vec![Turn {
        role: Role::User,
        content: "what do we know about alpha?".to_string(),
    }];
    let (reply, citations) =
        generate_answer(&pool, &KeywordEmbedder, &model, "p1", &history, 5)
            .await
            .unwrap();

    assert_eq!(reply, "No documents have been uploaded yet.");
    assert!(citations.is_empty());
    assert!(model
        .last_system()
        .unwrap()
        .contains("No project documents have been uploaded yet"));
}

#[tokio::test]
async fn answer_cites_retrieved_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, config, store) = setup(&dir).await;

    let file_id = upload(&pool, &store, "p1", "facts.txt", b"alpha grew by ten percent.").await;
    run_ingest(&pool, &store, &KeywordEmbedder, &config.chunking, &file_id)
        .await
        .unwrap();

    let model = ScriptedModel::replying(&["Per facts.txt, alpha grew by ten percent."]);
    let history = vec![Turn {
        role: Role::User,
        content: "how did alpha do?".to_string(),
    }];
    let (reply, citations) =
        generate_answer(&pool, &KeywordEmbedder, &model, "p1", &history, 5)
            .await
            .unwrap();

    assert!(reply.contains("alpha"));
    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0].file_name, "facts.txt");
    assert_eq!(citations[0].chunk_text, "alpha grew by ten percent.");

    let system = model.last_system().unwrap();
    assert!(system.contains("[Source: facts.txt]"));
    assert!(system.contains("alpha grew by ten percent."));
}

// ============ Deck generation ============

async fn insert_artifact(pool: &SqlitePool, project_id: &str, metadata_json: &str) -> String {
    let artifact_id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO artifacts (id, project_id, artifact_type, status, metadata_json, created_at)
         VALUES (?, ?, 'deck', 'pending', ?, ?)",
    )
    .bind(&artifact_id)
    .bind(project_id)
    .bind(metadata_json)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .unwrap();
    artifact_id
}

async fn artifact_row(pool: &SqlitePool, artifact_id: &str) -> (String, String) {
    let row = sqlx::query("SELECT status, storage_path FROM artifacts WHERE id = ?")
        .bind(artifact_id)
        .fetch_one(pool)
        .await
        .unwrap();
    (row.get("status"), row.get("storage_path"))
}

const OUTLINE_JSON: &str = r#"{
  "title": "Alpha Review",
  "slides": [
    {"title": "Growth", "bullet_points": ["up ten percent"], "speaker_notes": "lead with this"},
    {"title": "Risks", "bullet_points": ["beta exposure"]}
  ]
}"#;

#[tokio::test]
async fn deck_generation_stores_a_pptx_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, config, store) = setup(&dir).await;

    let file_id = upload(&pool, &store, "p1", "facts.txt", b"alpha grew by ten percent.").await;
    run_ingest(&pool, &store, &KeywordEmbedder, &config.chunking, &file_id)
        .await
        .unwrap();

    let fenced = format!("```json\n{}\n```", OUTLINE_JSON);
    let model = ScriptedModel::replying(&[fenced.as_str()]);
    let artifact_id = insert_artifact(&pool, "p1", r#"{"topic": "alpha results"}"#).await;

    run_deck(&pool, &store, &KeywordEmbedder, &model, &config, &artifact_id)
        .await
        .unwrap();

    let (status, storage_path) = artifact_row(&pool, &artifact_id).await;
    assert_eq!(status, "ready");
    assert_eq!(
        storage_path,
        format!("s3://artifacts/p1/{}.pptx", artifact_id)
    );

    // Title slide plus two content slides, readable as a ZIP package.
    let bytes = store
        .get("artifacts", &format!("p1/{}.pptx", artifact_id))
        .await
        .unwrap();
    let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.as_slice())).unwrap();
    let slides = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .count();
    assert_eq!(slides, 3);

    // The outline prompt carried the retrieved project context.
    let system = model.last_system().unwrap();
    assert!(system.contains("presentation designer"));
}

#[tokio::test]
async fn deck_with_no_documents_still_generates() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, config, store) = setup(&dir).await;

    let model = ScriptedModel::replying(&[OUTLINE_JSON]);
    let artifact_id = insert_artifact(&pool, "p1", "{}").await;

    run_deck(&pool, &store, &KeywordEmbedder, &model, &config, &artifact_id)
        .await
        .unwrap();

    let (status, _) = artifact_row(&pool, &artifact_id).await;
    assert_eq!(status, "ready");
}

#[tokio::test]
async fn invalid_outline_json_fails_without_retry() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, config, store) = setup(&dir).await;

    let model = ScriptedModel::replying(&["this is not JSON", "this is not JSON either"]);
    let artifact_id = insert_artifact(&pool, "p1", "{}").await;

    let err = run_deck_job(
        &pool,
        &store,
        &KeywordEmbedder,
        &model,
        &config,
        &artifact_id,
    )
    .await
    .unwrap_err();

    assert!(!err.is_retryable());
    // A bad outline is a content error, so the second scripted reply
    // must never be consumed.
    assert_eq!(model.calls(), 1);
    let (status, _) = artifact_row(&pool, &artifact_id).await;
    assert_eq!(status, "error");
}

#[tokio::test]
async fn transient_model_failure_retries_deck_generation() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, config, store) = setup(&dir).await;

    struct FailOnce {
        inner: ScriptedModel,
        failed: Mutex<bool>,
    }

    #[async_trait]
    impl TextModel for FailOnce {
        async fn complete(
            &self,
            messages: &[Turn],
            system: Option<&str>,
            max_tokens: u32,
        ) -> Result<String, PipelineError> {
            {
                let mut failed = self.failed.lock().unwrap();
                if !*failed {
                    *failed = true;
                    return Err(PipelineError::transient(anyhow::anyhow!("throttled")));
                }
            }
            self.inner.complete(messages, system, max_tokens).await
        }
    }

    let model = FailOnce {
        inner: ScriptedModel::replying(&[OUTLINE_JSON]),
        failed: Mutex::new(false),
    };
    let artifact_id = insert_artifact(&pool, "p1", "{}").await;

    run_deck_job(
        &pool,
        &store,
        &KeywordEmbedder,
        &model,
        &config,
        &artifact_id,
    )
    .await
    .unwrap();

    let (status, _) = artifact_row(&pool, &artifact_id).await;
    assert_eq!(status, "ready");
}
