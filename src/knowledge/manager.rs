//! High-level knowledge graph interface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};
use crate::knowledge::embeddings::{default_embedding_fn, EmbeddingFn, DEFAULT_EMBEDDING_DIM};
use crate::knowledge::extract::{EntityExtractor, TopicExtractor};
use crate::knowledge::graph::{
    Claim, ContradictionResult, Entity, EntityType, GraphQueryResult, GraphStore, ProvenanceNode,
};
use crate::knowledge::storage::{cosine_similarity, MemoryGraphStore};

/// Parameters for [`KnowledgeGraph::add_claim`].
#[derive(Debug, Clone, Default)]
pub struct NewClaim {
    pub text: String,
    pub confidence: f64,
    pub source_url: String,
    pub source_title: String,
    pub publication_date: Option<DateTime<Utc>>,
    pub agent_id: String,
    pub session_id: String,
    /// Pre-extracted entities; auto-extracted when None.
    pub entities: Option<Vec<Entity>>,
    /// Pre-extracted topics; auto-extracted when None.
    pub topics: Option<Vec<String>>,
    pub metadata: HashMap<String, Value>,
}

impl NewClaim {
    pub fn new(
        text: impl Into<String>,
        confidence: f64,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            confidence,
            source_url: source_url.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_entities(mut self, entities: Vec<Entity>) -> Self {
        self.entities = Some(entities);
        self
    }

    pub fn with_topics(mut self, topics: Vec<String>) -> Self {
        self.topics = Some(topics);
        self
    }
}

/// Knowledge graph statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeGraphStats {
    pub claims_added: u64,
    pub total_claims: usize,
    pub total_sources: usize,
    pub total_entities: usize,
    pub queries_executed: u64,
}

/// Knowledge graph for agent output storage and retrieval.
///
/// Wraps a [`GraphStore`] with entity/topic extraction, embedding
/// management, semantic search, and contradiction detection.
pub struct KnowledgeGraph {
    storage: Arc<dyn GraphStore>,
    embedding_fn: EmbeddingFn,
    embedding_dim: usize,
    entity_extractor: EntityExtractor,
    topic_extractor: TopicExtractor,
    claims_added: Mutex<u64>,
    queries_executed: Mutex<u64>,
}

impl KnowledgeGraph {
    /// Graph over an in-memory backend with the default hash embedding.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryGraphStore::new()),
            default_embedding_fn(),
            DEFAULT_EMBEDDING_DIM,
        )
    }

    pub fn new(
        storage: Arc<dyn GraphStore>,
        embedding_fn: EmbeddingFn,
        embedding_dim: usize,
    ) -> Self {
        Self {
            storage,
            embedding_fn,
            embedding_dim,
            entity_extractor: EntityExtractor::new(),
            topic_extractor: TopicExtractor::new(),
            claims_added: Mutex::new(0),
            queries_executed: Mutex::new(0),
        }
    }

    pub fn storage(&self) -> Arc<dyn GraphStore> {
        Arc::clone(&self.storage)
    }

    pub fn embedding_fn(&self) -> EmbeddingFn {
        Arc::clone(&self.embedding_fn)
    }

    /// Store a claim with provenance and relationships.
    ///
    /// Entities and topics are auto-extracted when not supplied; the
    /// embedding is computed from the text.
    pub fn add_claim(&self, new_claim: NewClaim) -> Result<String> {
        let entities = new_claim
            .entities
            .unwrap_or_else(|| self.entity_extractor.extract(&new_claim.text));
        let topics = new_claim
            .topics
            .unwrap_or_else(|| self.topic_extractor.extract(&new_claim.text));
        let embedding = (self.embedding_fn)(&new_claim.text);

        let mut claim = Claim::new(new_claim.text, new_claim.confidence, new_claim.source_url)
            .with_entities(entities)
            .with_topics(topics)
            .with_agent(new_claim.agent_id)
            .with_session(new_claim.session_id)
            .with_source_title(new_claim.source_title);
        claim.publication_date = new_claim.publication_date;
        claim.metadata = new_claim.metadata;
        claim.embedding = Some(embedding);

        self.add_claim_object(claim)
    }

    /// Store a pre-constructed claim, filling a missing embedding.
    ///
    /// A present embedding must match the graph's configured dimension.
    pub fn add_claim_object(&self, mut claim: Claim) -> Result<String> {
        match &claim.embedding {
            Some(embedding) => {
                if embedding.len() != self.embedding_dim {
                    return Err(Error::Validation(format!(
                        "claim embedding dimension {} does not match graph dimension {}",
                        embedding.len(),
                        self.embedding_dim
                    )));
                }
            }
            None => {
                claim.embedding = Some((self.embedding_fn)(&claim.text));
            }
        }

        let claim_id = self.storage.store_claim(&claim)?;
        *self.claims_added.lock().expect("stats lock") += 1;
        debug!(claim_id = %claim_id, "Added claim");
        Ok(claim_id)
    }

    pub fn get_claim(&self, claim_id: &str) -> Result<Option<Claim>> {
        self.storage.get_claim(claim_id)
    }

    /// Find claims related by semantic similarity.
    pub fn find_related_claims(
        &self,
        query: &str,
        min_confidence: f64,
        min_similarity: f64,
        limit: usize,
    ) -> Result<GraphQueryResult> {
        let start = Instant::now();
        *self.queries_executed.lock().expect("stats lock") += 1;

        let query_embedding = (self.embedding_fn)(query);
        let similar = self.storage.find_claims_by_embedding(
            &query_embedding,
            limit * 2,
            min_similarity,
        )?;

        let mut claims = Vec::new();
        let mut sources = Vec::new();
        let mut source_urls_seen = HashSet::new();
        let mut entities_seen = HashSet::new();
        let mut related_entities = Vec::new();

        for (claim, similarity) in similar
            .into_iter()
            .filter(|(claim, _)| claim.confidence >= min_confidence)
            .take(limit)
        {
            claims.push(json!({
                "id": claim.claim_id,
                "text": claim.text,
                "confidence": claim.confidence,
                "similarity": similarity,
                "agent_id": claim.agent_id,
                "session_id": claim.session_id,
            }));

            if source_urls_seen.insert(claim.source_url.clone()) {
                sources.push(json!({
                    "url": claim.source_url,
                    "title": claim.source_title,
                    "publication_date": claim.publication_date.map(|d| d.to_rfc3339()),
                }));
            }

            for entity in &claim.entities {
                if entities_seen.insert(entity.key()) {
                    related_entities.push(json!({
                        "name": entity.name,
                        "type": entity.entity_type.as_str(),
                    }));
                }
            }
        }

        Ok(GraphQueryResult {
            claims,
            sources,
            related_entities,
            provenance_chain: Vec::new(),
            query_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Trace a claim back to its sources.
    pub fn get_provenance_chain(
        &self,
        claim_id: &str,
        max_depth: usize,
    ) -> Result<Vec<ProvenanceNode>> {
        self.storage.get_provenance_chain(claim_id, max_depth)
    }

    /// Find claims that potentially contradict a given claim.
    ///
    /// Claims sharing at least one topic but from a different source and
    /// with embedding similarity below `max_similarity` are candidates;
    /// sorted ascending by similarity (lowest = most likely contradiction),
    /// capped at 10.
    pub fn find_contradictions(
        &self,
        claim_id: &str,
        max_similarity: f64,
    ) -> Result<ContradictionResult> {
        let claim = match self.storage.get_claim(claim_id)? {
            Some(claim) => claim,
            None => {
                return Ok(ContradictionResult {
                    claim_id: claim_id.to_string(),
                    ..Default::default()
                })
            }
        };
        let embedding = match &claim.embedding {
            Some(embedding) => embedding.clone(),
            None => {
                return Ok(ContradictionResult {
                    claim_id: claim_id.to_string(),
                    ..Default::default()
                })
            }
        };

        let mut contradicting = Vec::new();
        let mut similarity_scores = HashMap::new();
        let mut shared_topics = HashSet::new();

        for topic in &claim.topics {
            shared_topics.insert(topic.clone());
            for other in self.storage.find_claims_by_topic(topic)? {
                if other.claim_id == claim_id || other.source_url == claim.source_url {
                    continue;
                }
                if let Some(other_embedding) = &other.embedding {
                    let similarity = cosine_similarity(&embedding, other_embedding);
                    if similarity < max_similarity
                        && !similarity_scores.contains_key(&other.claim_id)
                    {
                        contradicting.push(json!({
                            "claim_id": other.claim_id,
                            "text": other.text,
                            "source_url": other.source_url,
                            "confidence": other.confidence,
                            "similarity": similarity,
                        }));
                        similarity_scores.insert(other.claim_id.clone(), similarity);
                    }
                }
            }
        }

        contradicting.sort_by(|a, b| {
            let sa = a["similarity"].as_f64().unwrap_or(0.0);
            let sb = b["similarity"].as_f64().unwrap_or(0.0);
            sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
        });
        contradicting.truncate(10);

        Ok(ContradictionResult {
            claim_id: claim_id.to_string(),
            contradicting_claims: contradicting,
            similarity_scores,
            shared_topics: shared_topics.into_iter().collect(),
        })
    }

    pub fn find_claims_by_entity(
        &self,
        entity_name: &str,
        entity_type: Option<EntityType>,
    ) -> Result<Vec<Claim>> {
        self.storage.find_claims_by_entity(entity_name, entity_type)
    }

    pub fn find_claims_by_topic(&self, topic: &str) -> Result<Vec<Claim>> {
        self.storage.find_claims_by_topic(topic)
    }

    pub fn find_claims_by_session(&self, session_id: &str) -> Result<Vec<Claim>> {
        self.storage.find_claims_by_session(session_id)
    }

    pub fn get_related_claims(
        &self,
        claim_id: &str,
        max_hops: usize,
    ) -> Result<Vec<(Claim, usize)>> {
        self.storage.get_related_claims(claim_id, max_hops)
    }

    /// Formatted prior-knowledge block from a session's claims, optionally
    /// ranked against a query.
    pub fn get_session_context(
        &self,
        session_id: &str,
        query: Option<&str>,
        limit: usize,
    ) -> Result<String> {
        let mut claims = self.storage.find_claims_by_session(session_id)?;

        if let Some(query) = query {
            if !claims.is_empty() {
                let query_embedding = (self.embedding_fn)(query);
                let mut ranked: Vec<(Claim, f64)> = claims
                    .into_iter()
                    .map(|claim| {
                        let similarity = claim
                            .embedding
                            .as_ref()
                            .map(|e| cosine_similarity(&query_embedding, e))
                            .unwrap_or(0.0);
                        (claim, similarity)
                    })
                    .collect();
                ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                claims = ranked.into_iter().take(limit).map(|(c, _)| c).collect();
            }
        } else {
            claims.truncate(limit);
        }

        if claims.is_empty() {
            return Ok("No relevant prior knowledge found.".to_string());
        }

        let mut lines = vec!["Prior knowledge from this session:".to_string()];
        for claim in &claims {
            let source = if claim.source_title.is_empty() {
                claim.source_url.clone()
            } else {
                claim.source_title.clone()
            };
            lines.push(format!(
                "- {} (confidence: {:.2}, source: {})",
                claim.text, claim.confidence, source
            ));
        }
        Ok(lines.join("\n"))
    }

    pub fn stats(&self) -> Result<KnowledgeGraphStats> {
        Ok(KnowledgeGraphStats {
            claims_added: *self.claims_added.lock().expect("stats lock"),
            total_claims: self.storage.count_claims()?,
            total_sources: self.storage.count_sources()?,
            total_entities: self.storage.count_entities()?,
            queries_executed: *self.queries_executed.lock().expect("stats lock"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_claim_auto_extracts() {
        let kg = KnowledgeGraph::in_memory();
        let claim_id = kg
            .add_claim(
                NewClaim::new(
                    "Rust development improves software engineering",
                    0.9,
                    "https://a.dev/rust",
                )
                .with_session("s1"),
            )
            .unwrap();

        let claim = kg.get_claim(&claim_id).unwrap().unwrap();
        assert!(claim.entities.iter().any(|e| e.name == "Rust"));
        assert!(claim.topics.contains(&"software engineering".to_string()));
        assert!(claim.embedding.is_some());
    }

    #[test]
    fn test_embedding_dimension_enforced() {
        let kg = KnowledgeGraph::in_memory();
        let claim = Claim::new("text", 0.9, "https://a.dev/x").with_embedding(vec![1.0, 2.0]);
        assert!(matches!(
            kg.add_claim_object(claim),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_missing_embedding_filled() {
        let kg = KnowledgeGraph::in_memory();
        let claim = Claim::new("text without embedding", 0.9, "https://a.dev/x");
        let id = kg.add_claim_object(claim).unwrap();
        let fetched = kg.get_claim(&id).unwrap().unwrap();
        assert_eq!(
            fetched.embedding.as_ref().map(|e| e.len()),
            Some(DEFAULT_EMBEDDING_DIM)
        );
    }

    #[test]
    fn test_find_related_claims() {
        let kg = KnowledgeGraph::in_memory();
        kg.add_claim(NewClaim::new(
            "GPT-4 achieves 86.4% on MMLU",
            0.95,
            "https://a.dev/gpt4",
        ))
        .unwrap();

        // Identical text embeds identically, so similarity is 1.0
        let result = kg
            .find_related_claims("GPT-4 achieves 86.4% on MMLU", 0.0, 0.9, 10)
            .unwrap();
        assert_eq!(result.claims.len(), 1);
        assert_eq!(result.sources.len(), 1);
    }

    #[test]
    fn test_contradiction_detection() {
        let kg = KnowledgeGraph::in_memory();

        // Same topic, different sources, dissimilar embeddings
        let a = Claim::new("a", 0.9, "https://a.dev/1")
            .with_topics(vec!["databases".to_string()])
            .with_embedding({
                let mut v = vec![0.0f32; DEFAULT_EMBEDDING_DIM];
                v[0] = 1.0;
                v
            });
        let b = Claim::new("b", 0.9, "https://b.dev/2")
            .with_topics(vec!["databases".to_string()])
            .with_embedding({
                let mut v = vec![0.0f32; DEFAULT_EMBEDDING_DIM];
                v[1] = 1.0;
                v
            });
        let c_same_source = Claim::new("c", 0.9, "https://a.dev/1")
            .with_topics(vec!["databases".to_string()])
            .with_embedding({
                let mut v = vec![0.0f32; DEFAULT_EMBEDDING_DIM];
                v[2] = 1.0;
                v
            });

        let id_a = kg.add_claim_object(a).unwrap();
        let id_b = kg.add_claim_object(b).unwrap();
        kg.add_claim_object(c_same_source).unwrap();

        let result = kg.find_contradictions(&id_a, 0.4).unwrap();
        assert_eq!(result.contradicting_claims.len(), 1);
        assert_eq!(result.contradicting_claims[0]["claim_id"], json!(id_b));
        assert!(result.shared_topics.contains(&"databases".to_string()));
    }

    #[test]
    fn test_contradictions_missing_claim() {
        let kg = KnowledgeGraph::in_memory();
        let result = kg.find_contradictions("missing", 0.4).unwrap();
        assert!(result.contradicting_claims.is_empty());
    }

    #[test]
    fn test_session_context() {
        let kg = KnowledgeGraph::in_memory();
        kg.add_claim(
            NewClaim::new("Postgres handles JSON well", 0.8, "https://a.dev/pg")
                .with_session("s1"),
        )
        .unwrap();

        let context = kg.get_session_context("s1", None, 10).unwrap();
        assert!(context.starts_with("Prior knowledge from this session:"));
        assert!(context.contains("Postgres handles JSON well"));

        let empty = kg.get_session_context("other", None, 10).unwrap();
        assert_eq!(empty, "No relevant prior knowledge found.");
    }

    #[test]
    fn test_stats() {
        let kg = KnowledgeGraph::in_memory();
        kg.add_claim(NewClaim::new("x", 0.5, "https://a.dev/1")).unwrap();
        kg.find_related_claims("x", 0.0, 0.1, 5).unwrap();

        let stats = kg.stats().unwrap();
        assert_eq!(stats.claims_added, 1);
        assert_eq!(stats.total_claims, 1);
        assert_eq!(stats.queries_executed, 1);
    }
}
