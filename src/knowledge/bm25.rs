//! Okapi BM25 keyword index over claim text.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// BM25 parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Config {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// Reciprocal rank fusion constant.
pub const RRF_K: f64 = 60.0;

/// Lowercase alphanumeric tokenizer shared by index and queries.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

struct Bm25Doc {
    term_freqs: HashMap<String, usize>,
    length: usize,
}

/// In-memory Okapi BM25 index.
#[derive(Default)]
pub struct Bm25Index {
    config: Bm25Config,
    docs: HashMap<String, Bm25Doc>,
    doc_freqs: HashMap<String, usize>,
    total_length: usize,
}

impl Bm25Index {
    pub fn new(config: Bm25Config) -> Self {
        Self {
            config,
            docs: HashMap::new(),
            doc_freqs: HashMap::new(),
            total_length: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Add or replace a document.
    pub fn add_document(&mut self, id: &str, text: &str) {
        self.remove_document(id);

        let tokens = tokenize(text);
        let mut term_freqs: HashMap<String, usize> = HashMap::new();
        for token in &tokens {
            *term_freqs.entry(token.clone()).or_insert(0) += 1;
        }
        for term in term_freqs.keys() {
            *self.doc_freqs.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_length += tokens.len();
        self.docs.insert(
            id.to_string(),
            Bm25Doc {
                term_freqs,
                length: tokens.len(),
            },
        );
    }

    /// Remove a document if present.
    pub fn remove_document(&mut self, id: &str) {
        if let Some(doc) = self.docs.remove(id) {
            self.total_length -= doc.length;
            for term in doc.term_freqs.keys() {
                if let Some(freq) = self.doc_freqs.get_mut(term) {
                    *freq -= 1;
                    if *freq == 0 {
                        self.doc_freqs.remove(term);
                    }
                }
            }
        }
    }

    fn avg_doc_length(&self) -> f64 {
        if self.docs.is_empty() {
            0.0
        } else {
            self.total_length as f64 / self.docs.len() as f64
        }
    }

    /// Score all documents against a query; returns (id, score) for scores
    /// above zero, descending, truncated to `limit`.
    pub fn search(&self, query: &str, limit: usize) -> Vec<(String, f64)> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || self.docs.is_empty() {
            return Vec::new();
        }

        let n = self.docs.len() as f64;
        let avg_len = self.avg_doc_length();
        let Bm25Config { k1, b } = self.config;

        let mut results: Vec<(String, f64)> = self
            .docs
            .iter()
            .filter_map(|(id, doc)| {
                let mut score = 0.0;
                for term in &query_terms {
                    let tf = *doc.term_freqs.get(term).unwrap_or(&0) as f64;
                    if tf == 0.0 {
                        continue;
                    }
                    let df = *self.doc_freqs.get(term).unwrap_or(&0) as f64;
                    // Okapi IDF with the +1 smoothing that keeps it positive
                    let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                    let denom = tf + k1 * (1.0 - b + b * doc.length as f64 / avg_len.max(1.0));
                    score += idf * tf * (k1 + 1.0) / denom;
                }
                (score > 0.0).then(|| (id.clone(), score))
            })
            .collect();

        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        results
    }
}

/// Reciprocal rank fusion over several rank lists.
///
/// `RRF(d) = Σ 1/(k + rank_i(d))` with 1-based ranks; documents absent from
/// a list contribute nothing for it.
pub fn reciprocal_rank_fusion(rank_lists: &[Vec<String>], k: f64) -> Vec<(String, f64)> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    for list in rank_lists {
        for (rank, id) in list.iter().enumerate() {
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (k + (rank + 1) as f64);
        }
    }
    let mut fused: Vec<(String, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_index() -> Bm25Index {
        let mut index = Bm25Index::new(Bm25Config::default());
        index.add_document("d1", "Python is a fast scripting language");
        index.add_document("d2", "Python strings are immutable");
        index.add_document("d3", "Rust guarantees memory safety");
        index
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Hello, World!"), vec!["hello", "world"]);
        assert_eq!(tokenize("x+y=z2"), vec!["x", "y", "z2"]);
        assert!(tokenize("...").is_empty());
    }

    #[test]
    fn test_search_ranks_matching_docs() {
        let index = seeded_index();
        let results = index.search("Python language", 10);

        assert_eq!(results.len(), 2);
        // d1 matches both terms, d2 only one
        assert_eq!(results[0].0, "d1");
        assert!(results[0].1 > results[1].1);
    }

    #[test]
    fn test_search_no_match() {
        let index = seeded_index();
        assert!(index.search("zebra", 10).is_empty());
        assert!(index.search("", 10).is_empty());
    }

    #[test]
    fn test_remove_document() {
        let mut index = seeded_index();
        index.remove_document("d1");
        assert_eq!(index.len(), 2);

        let results = index.search("Python", 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "d2");
    }

    #[test]
    fn test_add_replaces_existing() {
        let mut index = seeded_index();
        index.add_document("d1", "completely different content");
        assert_eq!(index.len(), 3);
        assert!(index
            .search("scripting", 10)
            .iter()
            .all(|(id, _)| id != "d1"));
    }

    #[test]
    fn test_reciprocal_rank_fusion() {
        let lists = vec![
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            vec!["b".to_string(), "a".to_string()],
            vec!["b".to_string()],
        ];
        let fused = reciprocal_rank_fusion(&lists, RRF_K);

        // b appears first in two lists, so it wins
        assert_eq!(fused[0].0, "b");
        assert_eq!(fused[1].0, "a");
        let expected_b = 1.0 / 62.0 + 2.0 / 61.0;
        assert!((fused[0].1 - expected_b).abs() < 1e-9);
    }
}
