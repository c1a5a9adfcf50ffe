//! Knowledge graph core types and storage interface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;

/// Types of entities that can be extracted from claims.
///
/// Includes both general entity types and code-specific types for source
/// code analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Date,
    Concept,
    Technology,
    Product,
    Event,
    Metric,
    Other,
    File,
    Function,
    Class,
    Module,
    Variable,
    Dependency,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Organization => "organization",
            Self::Location => "location",
            Self::Date => "date",
            Self::Concept => "concept",
            Self::Technology => "technology",
            Self::Product => "product",
            Self::Event => "event",
            Self::Metric => "metric",
            Self::Other => "other",
            Self::File => "file",
            Self::Function => "function",
            Self::Class => "class",
            Self::Module => "module",
            Self::Variable => "variable",
            Self::Dependency => "dependency",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "person" => Self::Person,
            "organization" => Self::Organization,
            "location" => Self::Location,
            "date" => Self::Date,
            "concept" => Self::Concept,
            "technology" => Self::Technology,
            "product" => Self::Product,
            "event" => Self::Event,
            "metric" => Self::Metric,
            "file" => Self::File,
            "function" => Self::Function,
            "class" => Self::Class,
            "module" => Self::Module,
            "variable" => Self::Variable,
            "dependency" => Self::Dependency,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Types of directed relationships between graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    SourcedFrom,
    DerivedFrom,
    Mentions,
    About,
    GeneratedIn,
    Contradicts,
    Supports,
    RelatedTo,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourcedFrom => "sourced_from",
            Self::DerivedFrom => "derived_from",
            Self::Mentions => "mentions",
            Self::About => "about",
            Self::GeneratedIn => "generated_in",
            Self::Contradicts => "contradicts",
            Self::Supports => "supports",
            Self::RelatedTo => "related_to",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sourced_from" => Self::SourcedFrom,
            "derived_from" => Self::DerivedFrom,
            "mentions" => Self::Mentions,
            "about" => Self::About,
            "generated_in" => Self::GeneratedIn,
            "contradicts" => Self::Contradicts,
            "supports" => Self::Supports,
            _ => Self::RelatedTo,
        }
    }
}

/// Entity identity: the (name, type) pair.
pub type EntityKey = (String, EntityType);

/// Entity extracted from a claim, with optional temporal validity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Start of temporal validity; None means unbounded.
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    /// End of temporal validity; None means unbounded.
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
    /// Source code location, e.g. "file.rs:42".
    #[serde(default)]
    pub source_location: Option<String>,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            name: name.into(),
            entity_type,
            metadata: HashMap::new(),
            valid_from: None,
            valid_to: None,
            source_location: None,
        }
    }

    pub fn with_validity(
        mut self,
        valid_from: Option<DateTime<Utc>>,
        valid_to: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = valid_from;
        self.valid_to = valid_to;
        self
    }

    pub fn with_source_location(mut self, location: impl Into<String>) -> Self {
        self.source_location = Some(location.into());
        self
    }

    /// Identity key for indexing.
    pub fn key(&self) -> EntityKey {
        (self.name.clone(), self.entity_type)
    }

    /// Check validity at a point in time.
    ///
    /// Boundaries are inclusive; a missing bound means unbounded in that
    /// direction. `None` checks against the current time.
    pub fn is_valid(&self, as_of: Option<DateTime<Utc>>) -> bool {
        let as_of = as_of.unwrap_or_else(Utc::now);
        if let Some(from) = self.valid_from {
            if as_of < from {
                return false;
            }
        }
        if let Some(to) = self.valid_to {
            if as_of > to {
                return false;
            }
        }
        true
    }
}

/// Source document for a claim. The URL is the identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub publication_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub domain: String,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Source {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            publication_date: None,
            author: String::new(),
            domain: String::new(),
            last_accessed: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// A claim stored in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: String,
    pub text: String,
    pub confidence: f64,
    pub source_url: String,
    #[serde(default)]
    pub source_title: String,
    #[serde(default)]
    pub publication_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Claim {
    pub fn new(
        text: impl Into<String>,
        confidence: f64,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            claim_id: Uuid::new_v4().to_string(),
            text: text.into(),
            confidence,
            source_url: source_url.into(),
            source_title: String::new(),
            publication_date: None,
            entities: Vec::new(),
            topics: Vec::new(),
            agent_id: String::new(),
            session_id: String::new(),
            embedding: None,
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_entities(mut self, entities: Vec<Entity>) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_topics(mut self, topics: Vec<String>) -> Self {
        self.topics = topics;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_source_title(mut self, title: impl Into<String>) -> Self {
        self.source_title = title.into();
        self
    }
}

/// A node in a provenance chain trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProvenanceNode {
    Claim {
        id: String,
        text: String,
        confidence: f64,
    },
    Source {
        url: String,
        title: String,
    },
}

/// Result of contradiction detection for a claim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContradictionResult {
    pub claim_id: String,
    pub contradicting_claims: Vec<Value>,
    pub similarity_scores: HashMap<String, f64>,
    pub shared_topics: Vec<String>,
}

/// Result of a high-level knowledge graph query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphQueryResult {
    pub claims: Vec<Value>,
    pub sources: Vec<Value>,
    pub related_entities: Vec<Value>,
    pub provenance_chain: Vec<ProvenanceNode>,
    pub query_time_ms: u64,
}

/// Storage backend for the knowledge graph.
pub trait GraphStore: Send + Sync {
    /// Store a claim with its relationships.
    ///
    /// Upserts the source, each entity and topic, and creates the
    /// SOURCED_FROM / MENTIONS / ABOUT / GENERATED_IN edges. Returns the
    /// claim id.
    fn store_claim(&self, claim: &Claim) -> Result<String>;

    fn get_claim(&self, claim_id: &str) -> Result<Option<Claim>>;

    /// Store or update a source (insert-or-replace by URL).
    fn store_source(&self, source: &Source) -> Result<String>;

    fn get_source(&self, url: &str) -> Result<Option<Source>>;

    /// Add a directed relationship; the (from, to, type) triple is the key.
    fn add_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        relation_type: RelationType,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<bool>;

    /// Brute-scan claims with stored embeddings by cosine similarity,
    /// sorted descending, filtered by `min_similarity`.
    fn find_claims_by_embedding(
        &self,
        embedding: &[f32],
        limit: usize,
        min_similarity: f64,
    ) -> Result<Vec<(Claim, f64)>>;

    /// Claims mentioning an entity. With no type the name match is
    /// case-insensitive across all types.
    fn find_claims_by_entity(
        &self,
        entity_name: &str,
        entity_type: Option<EntityType>,
    ) -> Result<Vec<Claim>>;

    fn find_claims_by_topic(&self, topic: &str) -> Result<Vec<Claim>>;

    fn find_claims_by_session(&self, session_id: &str) -> Result<Vec<Claim>>;

    /// Trace a claim back to its sources along SOURCED_FROM/DERIVED_FROM
    /// edges; cycle-safe.
    fn get_provenance_chain(
        &self,
        claim_id: &str,
        max_depth: usize,
    ) -> Result<Vec<ProvenanceNode>>;

    /// Claims related through shared entities or topics, with the minimum
    /// hop distance at which each was reached.
    fn get_related_claims(&self, claim_id: &str, max_hops: usize) -> Result<Vec<(Claim, usize)>>;

    fn count_claims(&self) -> Result<usize>;

    fn count_sources(&self) -> Result<usize>;

    fn count_entities(&self) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_entity_validity_unbounded() {
        let entity = Entity::new("Rust", EntityType::Technology);
        assert!(entity.is_valid(None));
        assert!(entity.is_valid(Some(Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap())));
    }

    #[test]
    fn test_entity_validity_bounds_inclusive() {
        let from = Utc.with_ymd_and_hms(2015, 5, 15, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let entity = Entity::new("Rust", EntityType::Technology).with_validity(Some(from), Some(to));

        assert!(entity.is_valid(Some(from)));
        assert!(entity.is_valid(Some(to)));
        assert!(!entity.is_valid(Some(from - chrono::Duration::seconds(1))));
        assert!(!entity.is_valid(Some(to + chrono::Duration::seconds(1))));
    }

    #[test]
    fn test_entity_validity_open_ended() {
        let from = Utc.with_ymd_and_hms(2015, 5, 15, 0, 0, 0).unwrap();
        let entity = Entity::new("Rust", EntityType::Technology).with_validity(Some(from), None);

        assert!(!entity.is_valid(Some(Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap())));
        assert!(entity.is_valid(Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())));
    }

    #[test]
    fn test_entity_type_roundtrip() {
        for t in [EntityType::Person, EntityType::Function, EntityType::Dependency] {
            assert_eq!(EntityType::parse(t.as_str()), t);
        }
        assert_eq!(EntityType::parse("garbage"), EntityType::Other);
    }

    #[test]
    fn test_claim_serde_roundtrip() {
        let claim = Claim::new("Rust is fast", 0.9, "https://example.com/rust")
            .with_entities(vec![Entity::new("Rust", EntityType::Technology)])
            .with_topics(vec!["software engineering".to_string()])
            .with_session("s1")
            .with_embedding(vec![0.1, 0.2, 0.3]);

        let encoded = serde_json::to_string(&claim).unwrap();
        let decoded: Claim = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, claim);
        assert_eq!(decoded.embedding.as_deref(), Some(&[0.1f32, 0.2, 0.3][..]));
    }
}
