//! Hybrid vector-graph retriever with score fusion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::knowledge::bm25::{reciprocal_rank_fusion, Bm25Index};
use crate::knowledge::embeddings::EmbeddingFn;
use crate::knowledge::graph::{Claim, EntityKey, GraphStore};

/// Configuration for hybrid retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridRetrieverConfig {
    /// Weight for the vector similarity signal.
    pub vector_weight: f64,
    /// Weight for the graph expansion signal.
    pub graph_weight: f64,
    /// Maximum hops for graph expansion.
    pub max_hops: usize,
    /// Minimum vector similarity threshold.
    pub min_similarity: f64,
    /// Minimum graph score threshold.
    pub min_graph_score: f64,
    /// Whether to filter entities by temporal validity.
    pub temporal_filter: bool,
    /// Point in time for temporal filtering; None means now.
    pub as_of: Option<DateTime<Utc>>,
}

impl Default for HybridRetrieverConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.6,
            graph_weight: 0.4,
            max_hops: 2,
            min_similarity: 0.3,
            min_graph_score: 0.1,
            temporal_filter: false,
            as_of: None,
        }
    }
}

impl HybridRetrieverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.vector_weight < 0.0 {
            return Err(Error::Config("vector_weight must be non-negative".to_string()));
        }
        if self.graph_weight < 0.0 {
            return Err(Error::Config("graph_weight must be non-negative".to_string()));
        }
        if self.max_hops == 0 {
            return Err(Error::Config("max_hops must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(Error::Config(
                "min_similarity must be between 0.0 and 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_graph_score) {
            return Err(Error::Config(
                "min_graph_score must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// How a claim was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalPath {
    Vector,
    Graph,
    Both,
}

/// A retrieved claim with its fused score and provenance of discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridRetrievalResult {
    pub claim: Claim,
    pub combined_score: f64,
    pub vector_score: f64,
    pub graph_score: f64,
    pub retrieval_path: RetrievalPath,
    /// Graph hop distance; 0 for direct vector matches.
    pub hop_distance: usize,
}

/// Blend mode for three-way retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreeWayBlend {
    /// Weighted sum of the three signals.
    Weighted {
        vector: f64,
        graph: f64,
        keyword: f64,
    },
    /// Reciprocal rank fusion over the three rank lists.
    ReciprocalRankFusion { k: f64 },
}

impl Default for ThreeWayBlend {
    fn default() -> Self {
        Self::Weighted {
            vector: 0.4,
            graph: 0.3,
            keyword: 0.3,
        }
    }
}

/// Combines vector similarity, graph expansion, and optionally BM25 keyword
/// signals over the knowledge graph.
pub struct HybridRetriever {
    storage: Arc<dyn GraphStore>,
    embedding_fn: EmbeddingFn,
    config: HybridRetrieverConfig,
}

impl HybridRetriever {
    pub fn new(
        storage: Arc<dyn GraphStore>,
        embedding_fn: EmbeddingFn,
        config: HybridRetrieverConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            embedding_fn,
            config,
        })
    }

    pub fn config(&self) -> &HybridRetrieverConfig {
        &self.config
    }

    /// Retrieve claims ranked by the weighted fusion of vector and graph
    /// signals, sorted descending, truncated to `limit`.
    pub fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<HybridRetrievalResult>> {
        self.retrieve_with(query, limit, &self.config)
    }

    /// Retrieve with a per-call config override.
    pub fn retrieve_with(
        &self,
        query: &str,
        limit: usize,
        config: &HybridRetrieverConfig,
    ) -> Result<Vec<HybridRetrievalResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = (self.embedding_fn)(query);
        let vector_results = self.storage.find_claims_by_embedding(
            &query_embedding,
            limit * 2,
            config.min_similarity,
        )?;

        let seed_claims: Vec<Claim> = vector_results.iter().map(|(c, _)| c.clone()).collect();
        let graph_results = self.graph_expand(&seed_claims, config)?;

        let vector_scores: HashMap<String, f64> = vector_results
            .iter()
            .map(|(claim, score)| (claim.claim_id.clone(), *score))
            .collect();

        // First discovery wins; later rediscoveries never lower the rank.
        let mut graph_scores: HashMap<String, (usize, f64)> = HashMap::new();
        for (claim, hop, score) in &graph_results {
            graph_scores
                .entry(claim.claim_id.clone())
                .or_insert((*hop, *score));
        }

        let mut results = self.fuse_scores(&vector_scores, &graph_scores, config)?;
        results.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }

    /// Retrieve for multiple queries; no cross-query deduplication.
    pub fn retrieve_batch(
        &self,
        queries: &[String],
        limit: usize,
    ) -> Result<HashMap<String, Vec<HybridRetrievalResult>>> {
        let mut results = HashMap::new();
        for query in queries {
            results.insert(query.clone(), self.retrieve(query, limit)?);
        }
        Ok(results)
    }

    /// Three-way retrieval adding a BM25 keyword signal over the vector and
    /// graph passes.
    pub fn retrieve_three_way(
        &self,
        query: &str,
        limit: usize,
        keyword_index: &Bm25Index,
        blend: ThreeWayBlend,
    ) -> Result<Vec<HybridRetrievalResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let config = &self.config;

        let query_embedding = (self.embedding_fn)(query);
        let vector_results = self.storage.find_claims_by_embedding(
            &query_embedding,
            limit * 2,
            config.min_similarity,
        )?;
        let seed_claims: Vec<Claim> = vector_results.iter().map(|(c, _)| c.clone()).collect();
        let graph_results = self.graph_expand(&seed_claims, config)?;
        let keyword_results = keyword_index.search(query, limit * 2);

        let vector_scores: HashMap<String, f64> = vector_results
            .iter()
            .map(|(claim, score)| (claim.claim_id.clone(), *score))
            .collect();
        let mut graph_scores: HashMap<String, (usize, f64)> = HashMap::new();
        for (claim, hop, score) in &graph_results {
            graph_scores
                .entry(claim.claim_id.clone())
                .or_insert((*hop, *score));
        }
        let keyword_scores: HashMap<String, f64> = keyword_results
            .iter()
            .map(|(id, score)| (id.clone(), *score))
            .collect();

        let combined: HashMap<String, f64> = match blend {
            ThreeWayBlend::Weighted {
                vector,
                graph,
                keyword,
            } => {
                // Keyword scores are unbounded; normalize by the max.
                let max_keyword = keyword_results
                    .first()
                    .map(|(_, score)| *score)
                    .unwrap_or(1.0)
                    .max(1e-9);
                let mut all_ids: HashSet<String> = HashSet::new();
                all_ids.extend(vector_scores.keys().cloned());
                all_ids.extend(graph_scores.keys().cloned());
                all_ids.extend(keyword_scores.keys().cloned());

                all_ids
                    .into_iter()
                    .map(|id| {
                        let score = vector * vector_scores.get(&id).copied().unwrap_or(0.0)
                            + graph * graph_scores.get(&id).map(|(_, s)| *s).unwrap_or(0.0)
                            + keyword
                                * (keyword_scores.get(&id).copied().unwrap_or(0.0) / max_keyword);
                        (id, score)
                    })
                    .collect()
            }
            ThreeWayBlend::ReciprocalRankFusion { k } => {
                let mut vector_ranked: Vec<(String, f64)> = vector_scores
                    .iter()
                    .map(|(id, score)| (id.clone(), *score))
                    .collect();
                vector_ranked
                    .sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                let mut graph_ranked: Vec<(String, f64)> = graph_scores
                    .iter()
                    .map(|(id, (_, score))| (id.clone(), *score))
                    .collect();
                graph_ranked
                    .sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

                let lists = [
                    vector_ranked.into_iter().map(|(id, _)| id).collect::<Vec<_>>(),
                    graph_ranked.into_iter().map(|(id, _)| id).collect::<Vec<_>>(),
                    keyword_results.iter().map(|(id, _)| id.clone()).collect(),
                ];
                reciprocal_rank_fusion(&lists, k).into_iter().collect()
            }
        };

        let mut results = Vec::new();
        for (claim_id, score) in combined {
            if let Some(claim) = self.storage.get_claim(&claim_id)? {
                let vector_score = vector_scores.get(&claim_id).copied().unwrap_or(0.0);
                let (hop_distance, graph_score) =
                    graph_scores.get(&claim_id).copied().unwrap_or((0, 0.0));
                let retrieval_path = match (vector_score > 0.0, graph_score > 0.0) {
                    (true, true) => RetrievalPath::Both,
                    (false, true) => RetrievalPath::Graph,
                    _ => RetrievalPath::Vector,
                };
                results.push(HybridRetrievalResult {
                    claim,
                    combined_score: score,
                    vector_score,
                    graph_score,
                    retrieval_path,
                    hop_distance,
                });
            }
        }

        results.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }

    /// BFS expansion from the vector seeds via shared entity identities.
    fn graph_expand(
        &self,
        seed_claims: &[Claim],
        config: &HybridRetrieverConfig,
    ) -> Result<Vec<(Claim, usize, f64)>> {
        if seed_claims.is_empty() {
            return Ok(Vec::new());
        }

        let as_of = if config.temporal_filter {
            Some(config.as_of.unwrap_or_else(Utc::now))
        } else {
            None
        };
        let entity_passes = |entity: &crate::knowledge::graph::Entity| -> bool {
            match as_of {
                Some(as_of) => entity.is_valid(Some(as_of)),
                None => true,
            }
        };

        let mut seed_entities: HashSet<EntityKey> = HashSet::new();
        for claim in seed_claims {
            for entity in &claim.entities {
                if entity_passes(entity) {
                    seed_entities.insert(entity.key());
                }
            }
        }

        // Seeds are expandable too: a vector seed sharing entities with the
        // seed set picks up a hop-1 graph score and fuses as "both".
        let mut results = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut current_entities = seed_entities.clone();
        let mut hop = 1usize;

        while hop <= config.max_hops && !current_entities.is_empty() {
            let mut next_entities: HashSet<EntityKey> = HashSet::new();

            for (entity_name, entity_type) in &current_entities {
                let claims = self
                    .storage
                    .find_claims_by_entity(entity_name, Some(*entity_type))?;

                for claim in claims {
                    if !visited.insert(claim.claim_id.clone()) {
                        continue;
                    }

                    let claim_entities: HashSet<EntityKey> = claim
                        .entities
                        .iter()
                        .filter(|e| entity_passes(e))
                        .map(|e| e.key())
                        .collect();

                    let overlap = seed_entities.intersection(&claim_entities).count();
                    let max_entities = seed_entities.len().max(claim_entities.len()).max(1);
                    let overlap_ratio = overlap as f64 / max_entities as f64;
                    let graph_score = overlap_ratio / (1.0 + hop as f64);

                    if graph_score >= config.min_graph_score {
                        results.push((claim.clone(), hop, graph_score));
                    }

                    for entity in &claim.entities {
                        if entity_passes(entity) {
                            next_entities.insert(entity.key());
                        }
                    }
                }
            }

            current_entities = next_entities
                .difference(&seed_entities)
                .cloned()
                .collect();
            hop += 1;
        }

        Ok(results)
    }

    fn fuse_scores(
        &self,
        vector_scores: &HashMap<String, f64>,
        graph_scores: &HashMap<String, (usize, f64)>,
        config: &HybridRetrieverConfig,
    ) -> Result<Vec<HybridRetrievalResult>> {
        let mut all_ids: HashSet<&String> = vector_scores.keys().collect();
        all_ids.extend(graph_scores.keys());

        let mut results = Vec::new();
        for claim_id in all_ids {
            let claim = match self.storage.get_claim(claim_id)? {
                Some(claim) => claim,
                None => continue,
            };

            let vector_score = vector_scores.get(claim_id).copied().unwrap_or(0.0);
            let has_vector = vector_scores.contains_key(claim_id);
            let has_graph = graph_scores.contains_key(claim_id);
            let (hop_distance, graph_score) =
                graph_scores.get(claim_id).copied().unwrap_or((0, 0.0));

            let retrieval_path = match (has_vector, has_graph) {
                (true, true) => RetrievalPath::Both,
                (true, false) => RetrievalPath::Vector,
                _ => RetrievalPath::Graph,
            };

            results.push(HybridRetrievalResult {
                claim,
                combined_score: config.vector_weight * vector_score
                    + config.graph_weight * graph_score,
                vector_score,
                graph_score,
                retrieval_path,
                hop_distance: if has_graph { hop_distance } else { 0 },
            });
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::bm25::RRF_K;
    use crate::knowledge::graph::{Entity, EntityType};
    use crate::knowledge::storage::MemoryGraphStore;
    use chrono::TimeZone;

    /// Embedding stub keyed on exact text matches.
    fn table_embedding(entries: Vec<(&str, Vec<f32>)>) -> EmbeddingFn {
        let table: HashMap<String, Vec<f32>> = entries
            .into_iter()
            .map(|(text, vec)| (text.to_string(), vec))
            .collect();
        Arc::new(move |text| {
            table
                .get(text)
                .cloned()
                .unwrap_or_else(|| vec![0.0, 0.0, 1.0])
        })
    }

    fn python_entity() -> Entity {
        Entity::new("Python", EntityType::Technology)
    }

    fn seeded_retriever() -> (Arc<MemoryGraphStore>, HybridRetriever, String, String) {
        let store = Arc::new(MemoryGraphStore::new());

        // embed("Python") has cosine 0.9 with c1 and 0.3 with c2
        let c1 = Claim::new("Python is fast", 0.9, "https://a.dev/1")
            .with_entities(vec![python_entity()])
            .with_embedding(vec![0.9, (1.0f32 - 0.81).sqrt(), 0.0]);
        let c2 = Claim::new("Python strings are immutable", 0.9, "https://a.dev/2")
            .with_entities(vec![python_entity()])
            .with_embedding(vec![0.3, (1.0f32 - 0.09).sqrt(), 0.0]);

        let id1 = store.store_claim(&c1).unwrap();
        let id2 = store.store_claim(&c2).unwrap();

        let embedding_fn = table_embedding(vec![("Python", vec![1.0, 0.0, 0.0])]);
        let config = HybridRetrieverConfig {
            vector_weight: 0.6,
            graph_weight: 0.4,
            max_hops: 1,
            min_similarity: 0.1,
            ..Default::default()
        };
        let retriever =
            HybridRetriever::new(Arc::clone(&store) as Arc<dyn GraphStore>, embedding_fn, config)
                .unwrap();
        (store, retriever, id1, id2)
    }

    #[test]
    fn test_config_validation() {
        let mut config = HybridRetrieverConfig::default();
        config.vector_weight = -0.1;
        assert!(config.validate().is_err());

        let mut config = HybridRetrieverConfig::default();
        config.max_hops = 0;
        assert!(config.validate().is_err());

        let mut config = HybridRetrieverConfig::default();
        config.min_similarity = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fusion_scenario() {
        // cosine 0.9/0.3, both claims share the Python entity: each picks up
        // a hop-1 graph score of 0.5, so combined(c1) = 0.6*0.9 + 0.4*0.5
        // = 0.74 and combined(c2) = 0.6*0.3 + 0.4*0.5 = 0.38.
        let (_store, retriever, id1, id2) = seeded_retriever();

        let results = retriever.retrieve("Python", 10).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].claim.claim_id, id1);
        assert_eq!(results[1].claim.claim_id, id2);
        assert!((results[0].combined_score - 0.74).abs() < 1e-3);
        assert!((results[1].combined_score - 0.38).abs() < 1e-3);
        assert_eq!(results[0].retrieval_path, RetrievalPath::Both);
    }

    #[test]
    fn test_graph_expansion_reaches_non_vector_claims() {
        let (store, retriever, _id1, _id2) = seeded_retriever();

        // A claim with no embedding, reachable only through the Python entity
        let c3 = Claim::new("Python has a GIL", 0.8, "https://a.dev/3")
            .with_entities(vec![python_entity()]);
        let id3 = store.store_claim(&c3).unwrap();

        let results = retriever.retrieve("Python", 10).unwrap();
        let found = results.iter().find(|r| r.claim.claim_id == id3).unwrap();
        assert_eq!(found.retrieval_path, RetrievalPath::Graph);
        assert_eq!(found.hop_distance, 1);
        assert!(found.vector_score == 0.0);
        // overlap_ratio 1/1, hop 1 -> graph_score 0.5, combined 0.4*0.5
        assert!((found.graph_score - 0.5).abs() < 1e-9);
        assert!((found.combined_score - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_results_bounded_and_sorted() {
        let (_store, retriever, _id1, _id2) = seeded_retriever();
        let results = retriever.retrieve("Python", 1).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_empty_query() {
        let (_store, retriever, _id1, _id2) = seeded_retriever();
        assert!(retriever.retrieve("   ", 10).unwrap().is_empty());
    }

    #[test]
    fn test_batch_retrieval() {
        let (_store, retriever, _id1, _id2) = seeded_retriever();
        let queries = vec!["Python".to_string(), "unrelated".to_string()];
        let results = retriever.retrieve_batch(&queries, 5).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results["Python"].len(), 2);
    }

    #[test]
    fn test_temporal_filter_excludes_invalid_entities() {
        let store = Arc::new(MemoryGraphStore::new());
        let released = Utc.with_ymd_and_hms(2015, 5, 15, 0, 0, 0).unwrap();

        let rust_entity =
            Entity::new("Rust", EntityType::Technology).with_validity(Some(released), None);

        // Seed claim found by vector; target claim only via the Rust entity
        let seed = Claim::new("Rust ships", 0.9, "https://a.dev/1")
            .with_entities(vec![rust_entity.clone()])
            .with_embedding(vec![1.0, 0.0, 0.0]);
        let target = Claim::new("Rust prevents data races", 0.9, "https://a.dev/2")
            .with_entities(vec![rust_entity]);

        store.store_claim(&seed).unwrap();
        let target_id = store.store_claim(&target).unwrap();

        let embedding_fn = table_embedding(vec![("Rust", vec![1.0, 0.0, 0.0])]);

        let mut config = HybridRetrieverConfig {
            max_hops: 1,
            min_similarity: 0.1,
            temporal_filter: true,
            as_of: Some(Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };

        let retriever = HybridRetriever::new(
            Arc::clone(&store) as Arc<dyn GraphStore>,
            embedding_fn.clone(),
            config.clone(),
        )
        .unwrap();

        // Before the entity becomes valid, graph expansion ignores it
        let results = retriever.retrieve("Rust", 10).unwrap();
        assert!(results.iter().all(|r| r.claim.claim_id != target_id));

        // After validity starts, the target participates
        config.as_of = Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        let retriever = HybridRetriever::new(
            Arc::clone(&store) as Arc<dyn GraphStore>,
            embedding_fn,
            config,
        )
        .unwrap();
        let results = retriever.retrieve("Rust", 10).unwrap();
        assert!(results.iter().any(|r| r.claim.claim_id == target_id));
    }

    #[test]
    fn test_three_way_weighted() {
        let (store, retriever, id1, id2) = seeded_retriever();

        let mut keyword_index = Bm25Index::new(Default::default());
        for id in [&id1, &id2] {
            let claim = store.get_claim(id).unwrap().unwrap();
            keyword_index.add_document(id, &claim.text);
        }

        let results = retriever
            .retrieve_three_way("Python", 10, &keyword_index, ThreeWayBlend::default())
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].claim.claim_id, id1);
    }

    #[test]
    fn test_three_way_rrf() {
        let (store, retriever, id1, id2) = seeded_retriever();

        let mut keyword_index = Bm25Index::new(Default::default());
        for id in [&id1, &id2] {
            let claim = store.get_claim(id).unwrap().unwrap();
            keyword_index.add_document(id, &claim.text);
        }

        let results = retriever
            .retrieve_three_way(
                "Python",
                10,
                &keyword_index,
                ThreeWayBlend::ReciprocalRankFusion { k: RRF_K },
            )
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].combined_score >= results[1].combined_score);
    }
}
