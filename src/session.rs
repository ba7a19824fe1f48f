//! Per-conversation turn orchestration.
//!
//! A [`Session`] owns one conversation and drives each turn through a fixed
//! state machine:
//!
//! ```text
//! Idle -> RetrievalPending -> ContextReady -> AwaitingCompletion -> Answered
//!                                                               \-> Failed
//! ```
//!
//! Retrieval is knowledge-base-first. The index is queried whenever it holds
//! anything; web search joins in only when the configuration (or a per-turn
//! override) asks for it, or when the knowledge base comes back empty or
//! below the confidence floor. A failing web search degrades the turn to
//! knowledge-base-only context. Embedding and LLM faults end the turn in
//! `Failed` with the user message preserved and an error message recorded as
//! the assistant turn, so history stays consistent for the next question.
//!
//! Every external call is bounded by the timeout its config section carries;
//! a timeout is reported as that provider's unavailable error rather than
//! hanging the turn.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::context::{assemble, AssembledContext, AssemblyPolicy};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::gateway::{Gateway, PromptInputs};
use crate::index::VectorIndex;
use crate::models::{Citation, Conversation, RetrievalHit, TurnRequest, TurnResponse, WebSnippet};
use crate::websearch::{DuckDuckGoSearch, SearchProvider};

/// Upper bound on assembled context size, in characters. Holds the default
/// top-k of full-size chunks plus a handful of web snippets.
pub const MAX_CONTEXT_CHARS: usize = 8000;

/// Where the current turn is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    RetrievalPending,
    ContextReady,
    AwaitingCompletion,
    Answered,
    Failed,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::RetrievalPending => "retrieval_pending",
            TurnState::ContextReady => "context_ready",
            TurnState::AwaitingCompletion => "awaiting_completion",
            TurnState::Answered => "answered",
            TurnState::Failed => "failed",
        }
    }
}

/// One user's conversation against a shared index.
pub struct Session {
    config: Config,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    search: Box<dyn SearchProvider>,
    gateway: Gateway,
    conversation: Conversation,
    state: TurnState,
}

impl Session {
    pub fn new(
        config: Config,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        search: Box<dyn SearchProvider>,
        gateway: Gateway,
    ) -> Self {
        Session {
            config,
            index,
            embedder,
            search,
            gateway,
            conversation: Conversation::new(),
            state: TurnState::Idle,
        }
    }

    /// Wire up a session from configuration: embedding provider from the
    /// `[embedding]` section, DuckDuckGo search, and every LLM backend whose
    /// API key is present in the environment.
    pub fn from_config(config: Config, index: Arc<VectorIndex>) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);
        let search = Box::new(DuckDuckGoSearch::new(&config.web_search)?);
        let gateway = Gateway::from_env(config.gateway.clone())?;
        Ok(Session::new(config, index, embedder, search, gateway))
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Forget all history, starting the conversation fresh.
    pub fn clear_history(&mut self) {
        self.conversation.clear();
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Run one full turn. Always returns a well-formed response; recoverable
    /// provider faults surface through the `error` flag instead of bubbling
    /// out, and the conversation stays consistent either way.
    pub async fn ask(&mut self, request: TurnRequest) -> TurnResponse {
        if request.question.trim().is_empty() {
            let err = Error::InvalidArgument("question must not be empty".to_string());
            tracing::debug!(error = %err, "rejecting blank question");
            return TurnResponse {
                answer: err.to_string(),
                citations: Vec::new(),
                error: true,
            };
        }

        let outcome = self.run_turn(&request).await;
        let response = match outcome {
            Ok((answer, context)) => {
                self.conversation.push_user(&request.question);
                self.conversation.push_assistant(&answer);
                self.transition(TurnState::Answered);
                TurnResponse {
                    answer,
                    citations: dedup_citations(context.citations),
                    error: false,
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "turn failed");
                let message = format!("Unable to answer right now: {err}");
                self.conversation.push_user(&request.question);
                self.conversation.push_assistant(&message);
                self.transition(TurnState::Failed);
                TurnResponse {
                    answer: message,
                    citations: Vec::new(),
                    error: true,
                }
            }
        };
        self.transition(TurnState::Idle);
        response
    }

    async fn run_turn(&mut self, request: &TurnRequest) -> Result<(String, AssembledContext)> {
        self.transition(TurnState::RetrievalPending);
        let hits = self.retrieve_kb(&request.question).await?;

        let threshold = self.config.retrieval.web_fallback_threshold;
        let low_confidence = hits.first().map_or(true, |best| best.score < threshold);
        let want_web = request
            .use_web
            .unwrap_or(self.config.web_search.enabled || low_confidence);
        let snippets = if want_web {
            self.retrieve_web(&request.question).await
        } else {
            Vec::new()
        };

        // Hits below the confidence floor are dropped wholesale; weak
        // matches would dilute the context the fallback exists to replace.
        let context_hits: &[RetrievalHit] = if low_confidence { &[] } else { &hits };
        let context = assemble(
            context_hits,
            &snippets,
            MAX_CONTEXT_CHARS,
            AssemblyPolicy::KnowledgeFirst,
        );
        self.transition(TurnState::ContextReady);
        tracing::debug!(
            kb_hits = context_hits.len(),
            web_snippets = snippets.len(),
            context_chars = context.text.chars().count(),
            low_confidence,
            "context assembled"
        );

        self.transition(TurnState::AwaitingCompletion);
        let provider = request
            .provider
            .as_deref()
            .unwrap_or_else(|| self.gateway.default_provider())
            .to_string();
        let inputs = PromptInputs {
            question: &request.question,
            context: &context.text,
            history: self.conversation.turns(),
            mode: request.mode,
        };
        let secs = self.config.gateway.timeout_secs;
        let answer = match tokio::time::timeout(
            Duration::from_secs(secs),
            self.gateway.complete(&provider, inputs),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::ProviderUnavailable {
                    provider,
                    reason: format!("completion timed out after {secs}s"),
                })
            }
        };
        Ok((answer, context))
    }

    /// Query the index for the turn's question. An empty index yields no
    /// hits without touching the embedding provider.
    async fn retrieve_kb(&self, question: &str) -> Result<Vec<RetrievalHit>> {
        if self.index.is_empty() {
            return Ok(Vec::new());
        }
        let secs = self.config.embedding.timeout_secs;
        let vector = match tokio::time::timeout(
            Duration::from_secs(secs),
            self.embedder.embed_query(question),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::EmbeddingUnavailable(format!(
                    "query embedding timed out after {secs}s"
                )))
            }
        };
        self.index.query(&vector, self.config.retrieval.top_k)
    }

    /// Run web search, absorbing failure: a turn never dies because the
    /// search backend is down.
    async fn retrieve_web(&self, question: &str) -> Vec<WebSnippet> {
        let secs = self.config.web_search.timeout_secs;
        match tokio::time::timeout(
            Duration::from_secs(secs),
            self.search
                .search(question, self.config.web_search.max_results),
        )
        .await
        {
            Ok(Ok(snippets)) => snippets,
            Ok(Err(err)) => {
                tracing::warn!(
                    provider = self.search.name(),
                    error = %err,
                    "web search failed, continuing with knowledge base only"
                );
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(
                    provider = self.search.name(),
                    timeout_secs = secs,
                    "web search timed out, continuing without it"
                );
                Vec::new()
            }
        }
    }

    fn transition(&mut self, next: TurnState) {
        tracing::debug!(from = self.state.as_str(), to = next.as_str(), "turn state");
        self.state = next;
    }
}

/// Collapse repeated `(label, kind)` pairs, keeping first-seen order.
fn dedup_citations(citations: Vec<Citation>) -> Vec<Citation> {
    let mut out: Vec<Citation> = Vec::new();
    for citation in citations {
        let seen = out
            .iter()
            .any(|c| c.label == citation.label && c.kind == citation.kind);
        if !seen {
            out.push(citation);
        }
    }
    out
}
