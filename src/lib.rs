//! # Deckhand
//!
//! A document-grounded assistant pipeline: upload project documents,
//! extract and chunk their text, embed the chunks, and answer questions
//! or generate slide decks from what was retrieved.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────┐   ┌──────────┐
//! │ Uploads  │──▶│     Ingest       │──▶│  SQLite   │
//! │ (S3)     │   │ Extract+Chunk    │   │ chunks +  │
//! └──────────┘   │     +Embed       │   │ vectors   │
//!                └──────────────────┘   └────┬─────┘
//!                                            │ retrieve
//!                         ┌──────────────────┤
//!                         ▼                  ▼
//!                   ┌──────────┐       ┌──────────┐
//!                   │  Answer  │       │   Deck   │
//!                   │ (chat)   │       │ (.pptx)  │
//!                   └──────────┘       └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Content vs. transient failure taxonomy |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`extract`] | Format-specific text extraction |
//! | [`chunk`] | Sentence-aware text chunking |
//! | [`sigv4`] | AWS request signing |
//! | [`storage`] | S3-compatible blob storage |
//! | [`bedrock`] | Bedrock embedding and completion client |
//! | [`traits`] | Provider seams ([`traits::Embedder`], [`traits::TextModel`], [`traits::BlobStore`]) |
//! | [`ingest`] | File ingestion pipeline |
//! | [`retrieval`] | Cosine-distance vector retrieval |
//! | [`answer`] | Conversational answering with citations |
//! | [`deck`] | Outline generation and deck assembly |
//! | [`pptx`] | Minimal PPTX writer |
//! | [`jobs`] | Retrying job runners |

pub mod answer;
pub mod bedrock;
pub mod chunk;
pub mod config;
pub mod db;
pub mod deck;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod jobs;
pub mod migrate;
pub mod models;
pub mod pptx;
pub mod retrieval;
pub mod sigv4;
pub mod storage;
pub mod traits;
