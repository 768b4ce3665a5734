//! Search: vector, full-text and hybrid queries at chunk granularity.
//!
//! Hybrid search fuses the two inner queries with Reciprocal Rank Fusion
//! (Cormack, Clarke, Buettcher 2009): `score(c) = Σ 1/(k + rank(c))` over
//! the methods that returned the chunk.

use crate::embedding::Embedder;
use crate::error::{Result, VitenError};
use crate::store::{
    Chunk, ChunkResult, Document, DocumentResult, MatchType, SqliteStore,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Search mode selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    Vector,
    Fts,
    #[default]
    Hybrid,
}

/// Options for a search call.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Metadata equality filters on the parent document.
    pub filters: Vec<(String, Value)>,
    pub limit: usize,
    /// Neighboring chunks to pull in around each match (0 = none).
    pub context_window: i64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            limit: 10,
            context_window: 0,
        }
    }
}

/// Chunk-level Reciprocal Rank Fusion over ranked id lists.
///
/// Ranks are 1-based; ids missing from a list contribute nothing. The
/// result is sorted by fused score descending, chunk id ascending.
pub fn reciprocal_rank_fusion(ranked_lists: &[&[i64]], k: u32) -> Vec<(i64, f64)> {
    let mut scores: HashMap<i64, f64> = HashMap::new();

    for list in ranked_lists {
        for (rank0, id) in list.iter().enumerate() {
            let score = 1.0 / f64::from(k + rank0 as u32 + 1);
            *scores.entry(*id).or_insert(0.0) += score;
        }
    }

    let mut results: Vec<(i64, f64)> = scores.into_iter().collect();
    results.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    results
}

/// Theoretical RRF ceiling for two-method fusion: both ranks at 1.
pub fn rrf_max_score(k: u32) -> f64 {
    2.0 / f64::from(k + 1)
}

/// Rescale an RRF score to 0..100 against the theoretical ceiling.
pub fn normalized_score(score: f64, k: u32) -> f64 {
    (score / rrf_max_score(k)).min(1.0) * 100.0
}

/// Chunk and document search over the store.
pub struct SearchEngine {
    store: Arc<SqliteStore>,
    embedder: Arc<dyn Embedder>,
    rrf_k: u32,
}

impl SearchEngine {
    pub fn new(store: Arc<SqliteStore>, embedder: Arc<dyn Embedder>, rrf_k: u32) -> Self {
        Self {
            store,
            embedder,
            rrf_k,
        }
    }

    pub fn rrf_k(&self) -> u32 {
        self.rrf_k
    }

    /// Granular search returning chunk results.
    #[instrument(skip(self, options), fields(mode = ?mode))]
    pub async fn search_chunks(
        &self,
        query: &str,
        mode: SearchMode,
        options: &SearchOptions,
    ) -> Result<Vec<ChunkResult>> {
        if query.trim().is_empty() {
            return Err(VitenError::InvalidInput {
                field: "query",
                reason: "empty search query".to_string(),
            });
        }

        let scored: Vec<(i64, f64, MatchType)> = match mode {
            SearchMode::Vector => {
                let query_vec = self.embedder.embed_query(query).await?;
                self.store
                    .search_vector(&query_vec, &options.filters, options.limit)?
                    .into_iter()
                    .map(|(id, distance)| (id, distance, MatchType::Vector))
                    .collect()
            }
            SearchMode::Fts => self
                .store
                .search_fts(query, &options.filters, options.limit)?
                .into_iter()
                .map(|(id, score)| (id, score, MatchType::Fts))
                .collect(),
            SearchMode::Hybrid => {
                let query_vec = self.embedder.embed_query(query).await?;
                self.store
                    .search_hybrid(
                        &query_vec,
                        query,
                        &options.filters,
                        options.limit,
                        self.rrf_k,
                    )?
                    .into_iter()
                    .map(|(id, score)| (id, score, MatchType::Hybrid))
                    .collect()
            }
        };

        let mut documents: HashMap<i64, Document> = HashMap::new();
        let mut results: Vec<ChunkResult> = Vec::with_capacity(scored.len());
        for (chunk_id, score, match_type) in scored {
            let Some(chunk) = self.store.get_chunk(chunk_id)? else {
                continue;
            };
            let document = self.document_for(&chunk, &mut documents)?;
            results.push(ChunkResult {
                chunk,
                document,
                score,
                match_type,
            });
        }

        debug!("Search returned {} chunks", results.len());

        if options.context_window > 0 {
            return self.expand_context(results, options.context_window, &mut documents);
        }
        Ok(results)
    }

    /// Aggregated search returning one result per document.
    pub async fn search_documents(
        &self,
        query: &str,
        mode: SearchMode,
        options: &SearchOptions,
    ) -> Result<Vec<DocumentResult>> {
        let chunk_results = self.search_chunks(query, mode, options).await?;

        let mut order: Vec<i64> = Vec::new();
        let mut grouped: HashMap<i64, DocumentResult> = HashMap::new();

        for result in chunk_results {
            let Some(document) = result.document else {
                continue;
            };
            let Some(doc_id) = document.id else { continue };

            match grouped.get_mut(&doc_id) {
                Some(entry) => {
                    entry.matched_chunks += 1;
                    // Chunk results arrive best-first, so the first score
                    // for a document is already its best.
                }
                None => {
                    order.push(doc_id);
                    grouped.insert(
                        doc_id,
                        DocumentResult {
                            document,
                            score: result.score,
                            matched_chunks: 1,
                            match_type: result.match_type,
                        },
                    );
                }
            }
        }

        Ok(order.into_iter().filter_map(|id| grouped.remove(&id)).collect())
    }

    fn document_for(
        &self,
        chunk: &Chunk,
        cache: &mut HashMap<i64, Document>,
    ) -> Result<Option<Document>> {
        let Some(doc_id) = chunk.document_id else {
            return Ok(None);
        };
        if let Some(document) = cache.get(&doc_id) {
            return Ok(Some(document.clone()));
        }
        let document = self.store.get_document(doc_id)?;
        if let Some(document) = &document {
            cache.insert(doc_id, document.clone());
        }
        Ok(document)
    }

    /// Pull sibling chunks in around each match.
    ///
    /// Matched chunks keep their score and match type; new siblings join
    /// with score 0 and `match_type = context`. Order is original rank,
    /// then chunk index within each window.
    fn expand_context(
        &self,
        results: Vec<ChunkResult>,
        window: i64,
        documents: &mut HashMap<i64, Document>,
    ) -> Result<Vec<ChunkResult>> {
        let matched: HashMap<i64, ChunkResult> = results
            .iter()
            .filter_map(|r| r.chunk.id.map(|id| (id, r.clone())))
            .collect();
        let order: Vec<i64> = results.iter().filter_map(|r| r.chunk.id).collect();

        let mut seen: HashSet<i64> = HashSet::new();
        let mut expanded: Vec<ChunkResult> = Vec::new();

        for id in order {
            for sibling in self.store.get_sibling_chunks(id, window)? {
                let Some(sibling_id) = sibling.id else { continue };
                if !seen.insert(sibling_id) {
                    continue;
                }
                match matched.get(&sibling_id) {
                    Some(result) => expanded.push(result.clone()),
                    None => {
                        let document = self.document_for(&sibling, documents)?;
                        expanded.push(ChunkResult {
                            chunk: sibling,
                            document,
                            score: 0.0,
                            match_type: MatchType::Context,
                        });
                    }
                }
            }
        }

        Ok(expanded)
    }
}
