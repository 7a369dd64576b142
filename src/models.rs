//! Core data models flowing through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};

/// Lifecycle status shared by files and artifacts.
///
/// `Pending → Processing → {Ready | Error}`. The pipeline that owns the
/// entity is its sole writer after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Processing,
    Ready,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Processing => "processing",
            Status::Ready => "ready",
            Status::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "pending" => Some(Status::Pending),
            "processing" => Some(Status::Processing),
            "ready" => Some(Status::Ready),
            "error" => Some(Status::Error),
            _ => None,
        }
    }
}

/// An uploaded document awaiting or finished with ingestion.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: String,
    pub project_id: String,
    pub original_name: String,
    /// Full storage location, `s3://bucket/key`.
    pub storage_path: String,
    /// Lowercased extension including the dot, e.g. `".pdf"`.
    pub extension: String,
    pub status: Status,
}

/// Provenance attached to an extracted section and copied onto its chunks.
///
/// Serializes to the flat shapes stored in `chunks.metadata_json`:
/// `{"page": 3}`, `{"slide": 1}`, `{"sheet": "Q2"}`, `{"section": 2}`,
/// `{"type": "text"}`, `{"type": "csv"}`, or `{}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SectionLabel {
    Page { page: u32 },
    Slide { slide: u32 },
    Sheet { sheet: String },
    Section { section: u32 },
    Kind {
        #[serde(rename = "type")]
        kind: String,
    },
    Empty {},
}

impl SectionLabel {
    pub fn text() -> Self {
        SectionLabel::Kind {
            kind: "text".to_string(),
        }
    }

    pub fn csv() -> Self {
        SectionLabel::Kind {
            kind: "csv".to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A labeled span of extracted text. In-memory only; exists within one
/// ingestion run and is never persisted directly.
#[derive(Debug, Clone)]
pub struct Section {
    pub text: String,
    pub label: SectionLabel,
}

/// A persisted passage of retrievable text. Immutable once written.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub file_id: String,
    /// 0-based order of emission across all sections of one file.
    pub ordinal: i64,
    pub text: String,
    pub metadata_json: String,
}

/// One retrieval hit: chunk text joined back to its source file.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_text: String,
    pub file_name: String,
    pub metadata_json: String,
    /// Cosine distance to the query (1 − similarity); lower is closer.
    pub distance: f64,
}

/// Source attribution returned alongside an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub file_name: String,
    /// Bounded excerpt of the cited chunk.
    pub chunk_text: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One turn of a conversation, read by the answer synthesizer.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Deck generation request parameters, stored on the artifact row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckParams {
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_audience")]
    pub audience: String,
    #[serde(default = "default_num_slides")]
    pub num_slides: u32,
    #[serde(default = "default_style")]
    pub style: String,
}

fn default_topic() -> String {
    "Presentation".to_string()
}
fn default_audience() -> String {
    "general".to_string()
}
fn default_num_slides() -> u32 {
    8
}
fn default_style() -> String {
    "professional".to_string()
}

impl Default for DeckParams {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            audience: default_audience(),
            num_slides: default_num_slides(),
            style: default_style(),
        }
    }
}

/// Structured outline the model must return for a deck.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckOutline {
    pub title: String,
    #[serde(default)]
    pub slides: Vec<OutlineSlide>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineSlide {
    pub title: String,
    #[serde(default)]
    pub bullet_points: Vec<String>,
    #[serde(default)]
    pub speaker_notes: String,
}
