//! Core data models used throughout the engine.
//!
//! These types represent the documents, chunks, retrieval hits, and
//! conversation turns that flow through the ingestion and answer pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A source document accepted for ingestion.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    /// Origin name shown in citations, e.g. a file name or logical label.
    pub source_label: String,
    pub text: String,
    pub ingested_at: DateTime<Utc>,
}

impl Document {
    pub fn new(source_label: impl Into<String>, text: impl Into<String>) -> Self {
        Document {
            id: uuid::Uuid::new_v4().to_string(),
            source_label: source_label.into(),
            text: text.into(),
            ingested_at: Utc::now(),
        }
    }
}

/// A contiguous window of a document's text. Offsets are counted in
/// characters and remain stable for the life of the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub source_label: String,
    pub chunk_index: i64,
    pub char_start: usize,
    pub char_end: usize,
    pub text: String,
}

/// One knowledge-base match, ordered by descending similarity.
#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub chunk_id: String,
    pub source_label: String,
    pub text: String,
    pub score: f32,
}

/// One live web search result, in provider order. Web snippets carry no
/// similarity score.
#[derive(Debug, Clone)]
pub struct WebSnippet {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

/// Where a piece of context came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    KnowledgeBase,
    Web,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::KnowledgeBase => "knowledge_base",
            SourceKind::Web => "web",
        }
    }
}

/// Provenance entry attached to an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub label: String,
    pub kind: SourceKind,
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
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
}

/// One utterance in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

/// Append-only conversation history. The caller owns it and hands it to the
/// orchestrator one turn at a time; turns are never reordered or rewritten.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    pub fn new() -> Self {
        Conversation { turns: Vec::new() }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(ConversationTurn {
            role: Role::User,
            text: text.into(),
        });
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(ConversationTurn {
            role: Role::Assistant,
            text: text.into(),
        });
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Drop all history, starting the session fresh.
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Plain-text export, one `ROLE: text` block per turn.
    pub fn transcript(&self) -> String {
        self.turns
            .iter()
            .map(|t| format!("{}: {}", t.role.as_str().to_uppercase(), t.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Verbosity requested for an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    #[default]
    Concise,
    Detailed,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Concise => "concise",
            ResponseMode::Detailed => "detailed",
        }
    }
}

/// One question posed to the orchestrator.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub question: String,
    pub mode: ResponseMode,
    /// Overrides the configured web-search flag for this turn when set.
    pub use_web: Option<bool>,
    /// Overrides the configured LLM backend for this turn when set.
    pub provider: Option<String>,
}

impl TurnRequest {
    pub fn new(question: impl Into<String>) -> Self {
        TurnRequest {
            question: question.into(),
            mode: ResponseMode::default(),
            use_web: None,
            provider: None,
        }
    }
}

/// Outcome of one orchestrated turn. On failure `answer` holds the
/// user-visible error message and `error` is set.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub error: bool,
}
