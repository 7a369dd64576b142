//! Conversational answering over retrieved project context.

use sqlx::SqlitePool;

use crate::error::PipelineError;
use crate::models::{Citation, RetrievedChunk, Role, Turn};
use crate::retrieval::retrieve;
use crate::traits::{Embedder, TextModel};

/// Token budget for answer completions.
const MAX_ANSWER_TOKENS: u32 = 1024;

/// Maximum characters of chunk text carried into a citation.
const CITATION_EXCERPT_CHARS: usize = 300;

const NO_QUESTION_REPLY: &str = "I need a question to help you.";

const NO_DOCUMENTS_SYSTEM: &str = "You are a helpful assistant for a project. \
No project documents have been uploaded yet. Let the user know.";

/// Answer the latest user question in `history` against the project's
/// documents.
///
/// Returns the assistant reply and one citation per retrieved chunk. A
/// history without a user turn gets a canned nudge, with no model call.
pub async fn generate_answer(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    model: &dyn TextModel,
    project_id: &str,
    history: &[Turn],
    top_k: i64,
) -> Result<(String, Vec<Citation>), PipelineError> {
    let Some(question) = latest_user_content(history) else {
        return Ok((NO_QUESTION_REPLY.to_string(), Vec::new()));
    };

    let retrieved = retrieve(pool, embedder, project_id, question, top_k).await?;

    if retrieved.is_empty() {
        let reply = model
            .complete(history, Some(NO_DOCUMENTS_SYSTEM), MAX_ANSWER_TOKENS)
            .await?;
        return Ok((reply, Vec::new()));
    }

    let system = format!(
        "You are a helpful assistant for a project. \
Answer questions based on the provided context from project documents.\n\
Always cite your sources by referring to the file names.\n\
If the context doesn't contain enough information to answer, say so clearly.\n\n\
Context from project documents:\n{}",
        format_context(&retrieved)
    );

    let reply = model
        .complete(history, Some(&system), MAX_ANSWER_TOKENS)
        .await?;

    let citations = retrieved.iter().map(to_citation).collect();
    Ok((reply, citations))
}

fn latest_user_content(history: &[Turn]) -> Option<&str> {
    history
        .iter()
        .rev()
        .find(|turn| turn.role == Role::User)
        .map(|turn| turn.content.as_str())
}

/// `[Source: name]` blocks separated by `---` rules, the shape the model
/// is prompted to cite from.
pub fn format_context(retrieved: &[RetrievedChunk]) -> String {
    retrieved
        .iter()
        .map(|r| format!("[Source: {}]\n{}", r.file_name, r.chunk_text))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

fn to_citation(r: &RetrievedChunk) -> Citation {
    let metadata =
        serde_json::from_str(&r.metadata_json).unwrap_or(serde_json::Value::Object(Default::default()));
    Citation {
        file_name: r.file_name.clone(),
        chunk_text: r.chunk_text.chars().take(CITATION_EXCERPT_CHARS).collect(),
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retrieved(file: &str, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk_text: text.to_string(),
            file_name: file.to_string(),
            metadata_json: r#"{"page":2}"#.to_string(),
            distance: 0.1,
        }
    }

    #[test]
    fn latest_user_turn_wins_over_earlier_ones() {
        let history = vec![
            Turn {
                role: Role::User,
                content: "first".to_string(),
            },
            Turn {
                role: Role::Assistant,
                content: "reply".to_string(),
            },
            Turn {
                role: Role::User,
                content: "second".to_string(),
            },
        ];
        assert_eq!(latest_user_content(&history), Some("second"));
    }

    #[test]
    fn assistant_only_history_has_no_question() {
        let history = vec![Turn {
            role: Role::Assistant,
            content: "hello".to_string(),
        }];
        assert_eq!(latest_user_content(&history), None);
    }

    #[test]
    fn context_blocks_are_labeled_and_separated() {
        let ctx = format_context(&[retrieved("a.pdf", "alpha"), retrieved("b.txt", "beta")]);
        assert_eq!(ctx, "[Source: a.pdf]\nalpha\n\n---\n\n[Source: b.txt]\nbeta");
    }

    #[test]
    fn citation_excerpt_is_bounded_and_char_safe() {
        let long = "é".repeat(400);
        let citation = to_citation(&retrieved("a.pdf", &long));
        assert_eq!(citation.chunk_text.chars().count(), 300);
        assert_eq!(citation.metadata["page"], 2);
    }
}
