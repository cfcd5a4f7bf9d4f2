//! # Embeddings
//!
//! The embedding collaborator boundary for Toolforge. Tool descriptions are
//! embedded once at promotion time and cached on the registry entry; search
//! queries are embedded on demand and ranked by cosine similarity.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Embeddings System                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider ──► Embedding ──► similarity ranking         │
//! │       │                                                         │
//! │       ▼                                                         │
//! │  Ollama /api/embeddings                                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod provider;
pub mod similarity;

pub use error::{EmbeddingError, Result};
pub use provider::{EmbeddingProvider, OllamaEmbedder};
pub use similarity::{RankedMatch, cosine_similarity, normalize, rank_top_k};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;
