//! Semantic search over registry entries.
//!
//! Entries cache their description embedding at promotion time; a search
//! embeds the query once and ranks cached vectors by cosine similarity, ties
//! broken by most recent promotion. Without a provider the search falls back
//! to keyword scoring over names and docstrings.

use tracing::debug;

use toolforge_embeddings::{EmbeddingProvider, cosine_similarity};

use crate::entry::RegistryEntry;
use crate::error::Result;
use crate::store::Registry;

/// One search result: the entry and its relevance score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub entry: RegistryEntry,
    pub score: f32,
}

impl Registry {
    /// Rank entries against a free-text query.
    ///
    /// With a provider, scores are cosine similarities between the query
    /// embedding and each entry's cached embedding (entries promoted without
    /// one are skipped). Without a provider, keyword scoring applies: a name
    /// hit outweighs a docstring hit.
    pub async fn search(
        &self,
        query: &str,
        provider: Option<&dyn EmbeddingProvider>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let entries = self.list().await?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits = match provider {
            Some(provider) => {
                let query_embedding = provider.embed(query).await?;
                let mut hits = Vec::new();
                for entry in entries {
                    let Some(embedding) = entry.embedding.as_deref() else {
                        continue;
                    };
                    let score = cosine_similarity(&query_embedding, embedding)?;
                    hits.push(SearchHit { entry, score });
                }
                hits
            }
            None => {
                debug!("no embedding provider configured; using keyword search");
                entries
                    .into_iter()
                    .filter_map(|entry| {
                        let score = keyword_score(query, &entry);
                        (score > 0.0).then_some(SearchHit { entry, score })
                    })
                    .collect()
            }
        };

        // Descending by score, ties broken by most recent promotion.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.entry.promoted_at.cmp(&a.entry.promoted_at))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Keyword relevance: whole-query name hits dominate, then docstring hits,
/// then per-word name hits.
fn keyword_score(query: &str, entry: &RegistryEntry) -> f32 {
    let query = query.to_lowercase();
    let name = entry.spec.name.to_lowercase();
    let docstring = entry.spec.docstring.to_lowercase();

    let mut score = 0.0;
    if name.contains(&query) {
        score += 3.0;
    }
    if docstring.contains(&query) {
        score += 1.0;
    }
    for word in query.split_whitespace() {
        if name.contains(word) {
            score += 1.0;
        }
    }
    score
}
