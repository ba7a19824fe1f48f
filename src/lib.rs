//! # medrag
//!
//! A hybrid retrieval-augmented question-answering engine.
//!
//! medrag keeps a persistent similarity index over chunked plain-text
//! documents, arbitrates between knowledge-base retrieval and live web
//! search, assembles a bounded context block, and dispatches one normalized
//! completion request per turn to an interchangeable LLM backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌───────────────┐
//! │  Loader  │──▶│  Pipeline    │──▶│  VectorIndex   │
//! │  (.txt)  │   │ Chunk+Embed │   │ manifest+f32s │
//! └──────────┘   └─────────────┘   └──────┬────────┘
//!                                         │ top-k
//!                ┌──────────┐      ┌──────▼────────┐
//!    question ──▶│ Session  │─────▶│   Context      │
//!                │ (turns)  │◀──┐  │   Assembler    │
//!                └────┬─────┘   │  └──────▲────────┘
//!                     │         │         │ snippets
//!                ┌────▼─────┐   │  ┌──────┴────────┐
//!                │ Gateway  │   └──│  Web Search    │
//!                │ LLM APIs │      │  (DuckDuckGo)  │
//!                └──────────┘      └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! medrag init                        # create the index directory
//! medrag ingest docs/                # chunk + embed + index .txt files
//! medrag search "fever in children"  # raw retrieval with scores
//! medrag ask "What eases a sore throat?" --mode concise
//! medrag chat                        # multi-turn REPL
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`chunk`] | Overlapping-window text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Persistent brute-force vector index |
//! | [`websearch`] | Live web search provider |
//! | [`context`] | Bounded context assembly |
//! | [`gateway`] | Normalized multi-provider LLM gateway |
//! | [`session`] | Per-conversation turn orchestration |
//! | [`loader`] | Plain-text document loading |
//! | [`ingest`] | Ingestion pipeline |

pub mod chunk;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod gateway;
pub mod index;
pub mod ingest;
pub mod loader;
pub mod models;
pub mod session;
pub mod websearch;

pub use error::{Error, Result};
