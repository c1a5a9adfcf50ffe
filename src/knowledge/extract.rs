//! Pattern-based entity and topic extraction.
//!
//! Both extractors are pure: they read text and produce lists, with no
//! storage side effects. Swap in an NER model or LLM extractor behind the
//! same call shape for production-grade extraction.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::knowledge::graph::{Entity, EntityType};

static DATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").expect("Invalid regex"),
        Regex::new(r"\b(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},?\s+\d{4}\b").expect("Invalid regex"),
        Regex::new(r"\b\d{1,2}/\d{1,2}/\d{4}\b").expect("Invalid regex"),
    ]
});

static METRIC_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\b\d+(?:\.\d+)?%").expect("Invalid regex"),
        Regex::new(r"\$\d+(?:,\d{3})*(?:\.\d{2})?\b").expect("Invalid regex"),
        Regex::new(r"\b\d+(?:\.\d+)?\s*(?:million|billion|trillion)\b").expect("Invalid regex"),
    ]
});

static ORGANIZATION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\b(?:Google|Microsoft|Amazon|Apple|Meta|OpenAI|Anthropic|IBM|Oracle|SAP)\b")
            .expect("Invalid regex"),
        Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\s+(?:Inc|Corp|LLC|Ltd|Company|Co)\b")
            .expect("Invalid regex"),
    ]
});

static TECHNOLOGY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\b(?:Python|JavaScript|TypeScript|Rust|Go|Java|C\+\+|Ruby|Swift|Kotlin)\b")
            .expect("Invalid regex"),
        Regex::new(r"\b(?:React|Vue|Angular|Django|Flask|FastAPI|Node\.js|Express)\b")
            .expect("Invalid regex"),
        Regex::new(r"\b(?:PostgreSQL|MySQL|MongoDB|Redis|Elasticsearch|Neo4j)\b")
            .expect("Invalid regex"),
        Regex::new(r"\b(?:AWS|Azure|GCP|Kubernetes|Docker|Terraform)\b").expect("Invalid regex"),
        Regex::new(r"\b(?:GPT-\d|Claude|LLM|AI|ML|NLP|RAG)\b").expect("Invalid regex"),
    ]
});

/// Capitalized multi-word phrases fall back to OTHER entities.
static CAPITALIZED_PHRASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+\b").expect("Invalid regex"));

/// Extracts entities from text using pattern matching.
#[derive(Debug, Clone, Default)]
pub struct EntityExtractor;

impl EntityExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract entities, deduplicated by lowercased (name, type).
    pub fn extract(&self, text: &str) -> Vec<Entity> {
        let mut entities = Vec::new();
        let mut seen: HashSet<(String, EntityType)> = HashSet::new();

        let pattern_sets: [(&[Regex], EntityType); 4] = [
            (&DATE_PATTERNS[..], EntityType::Date),
            (&METRIC_PATTERNS[..], EntityType::Metric),
            (&ORGANIZATION_PATTERNS[..], EntityType::Organization),
            (&TECHNOLOGY_PATTERNS[..], EntityType::Technology),
        ];

        for (patterns, entity_type) in pattern_sets {
            for pattern in patterns {
                for m in pattern.find_iter(text) {
                    let name = m.as_str().trim().to_string();
                    let key = (name.to_lowercase(), entity_type);
                    if seen.insert(key) {
                        entities.push(Entity::new(name, entity_type));
                    }
                }
            }
        }

        for m in CAPITALIZED_PHRASE.find_iter(text) {
            let name = m.as_str().trim().to_string();
            if name.len() > 5 {
                let key = (name.to_lowercase(), EntityType::Other);
                if seen.insert(key) {
                    entities.push(Entity::new(name, EntityType::Other));
                }
            }
        }

        entities
    }
}

/// Extracts topics from text using keyword matching.
#[derive(Debug, Clone, Default)]
pub struct TopicExtractor;

const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "artificial intelligence",
        &["AI", "artificial intelligence", "machine learning", "ML", "deep learning"],
    ),
    (
        "natural language processing",
        &["NLP", "language model", "LLM", "GPT", "transformer"],
    ),
    (
        "software engineering",
        &["software", "engineering", "development", "programming", "code"],
    ),
    (
        "data science",
        &["data science", "analytics", "statistics", "data analysis"],
    ),
    ("cloud computing", &["cloud", "AWS", "Azure", "GCP", "serverless"]),
    (
        "security",
        &["security", "cybersecurity", "encryption", "vulnerability"],
    ),
    ("databases", &["database", "SQL", "NoSQL", "PostgreSQL", "MongoDB"]),
    ("web development", &["web", "frontend", "backend", "API", "REST"]),
    ("devops", &["DevOps", "CI/CD", "deployment", "infrastructure"]),
    (
        "research methodology",
        &["research", "methodology", "study", "analysis"],
    ),
];

impl TopicExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract topics whose trigger keywords appear in the text.
    pub fn extract(&self, text: &str) -> Vec<String> {
        let text_lower = text.to_lowercase();
        let mut topics = Vec::new();

        for (topic, keywords) in TOPIC_KEYWORDS {
            if keywords
                .iter()
                .any(|keyword| text_lower.contains(&keyword.to_lowercase()))
                && !topics.contains(&topic.to_string())
            {
                topics.push(topic.to_string());
            }
        }

        topics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_technologies() {
        let extractor = EntityExtractor::new();
        let entities = extractor.extract("Rust and PostgreSQL power the backend");

        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"Rust"));
        assert!(names.contains(&"PostgreSQL"));
        assert!(entities
            .iter()
            .all(|e| e.entity_type == EntityType::Technology));
    }

    #[test]
    fn test_extracts_dates_and_metrics() {
        let extractor = EntityExtractor::new();
        let entities = extractor.extract("Revenue grew 12.5% after 2024-01-15");

        assert!(entities
            .iter()
            .any(|e| e.entity_type == EntityType::Metric && e.name == "12.5%"));
        assert!(entities
            .iter()
            .any(|e| e.entity_type == EntityType::Date && e.name == "2024-01-15"));
    }

    #[test]
    fn test_capitalized_phrase_fallback() {
        let extractor = EntityExtractor::new();
        let entities = extractor.extract("The Quantum Computing initiative launched");

        assert!(entities
            .iter()
            .any(|e| e.entity_type == EntityType::Other && e.name == "Quantum Computing"));
    }

    #[test]
    fn test_extraction_deduplicates() {
        let extractor = EntityExtractor::new();
        let entities = extractor.extract("Rust, Rust, and more Rust");
        let rust_count = entities.iter().filter(|e| e.name == "Rust").count();
        assert_eq!(rust_count, 1);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let extractor = EntityExtractor::new();
        let text = "Python with Django on AWS";
        assert_eq!(extractor.extract(text), extractor.extract(text));
    }

    #[test]
    fn test_topic_extraction() {
        let extractor = TopicExtractor::new();
        let topics = extractor.extract("Machine learning models need a database");

        assert!(topics.contains(&"artificial intelligence".to_string()));
        assert!(topics.contains(&"databases".to_string()));
    }

    #[test]
    fn test_topic_extraction_no_match() {
        let extractor = TopicExtractor::new();
        assert!(extractor.extract("the quick brown fox").is_empty());
    }
}
