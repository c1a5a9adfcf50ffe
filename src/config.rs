//! Runtime configuration for the governance core.
//!
//! Each subsystem reads its own section; `RuntimeConfig` aggregates them for
//! callers that load one config file for the whole runtime.

use serde::{Deserialize, Serialize};

/// Top-level configuration aggregating all subsystem sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub kg: KgConfig,
    #[serde(default)]
    pub retriever: RetrieverSettings,
    #[serde(default)]
    pub hnsw: HnswSettings,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub spec: SpecConfig,
}

/// Audit chain storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Directory for JSON-Lines audit files.
    pub storage_path: String,
    /// Maximum file size before rotation.
    pub max_file_size_mb: u64,
    /// Whether to rotate files when full.
    pub rotate: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            storage_path: "~/.aegis/audit".to_string(),
            max_file_size_mb: 100,
            rotate: true,
        }
    }
}

/// Knowledge graph settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KgConfig {
    /// SQLite database path for the graph backend.
    pub db_path: String,
    /// Fixed embedding dimension for this graph instance.
    pub embedding_dim: usize,
}

impl Default for KgConfig {
    fn default() -> Self {
        Self {
            db_path: "~/.aegis/knowledge.db".to_string(),
            embedding_dim: 384,
        }
    }
}

/// Hybrid retriever weights and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieverSettings {
    pub vector_weight: f64,
    pub graph_weight: f64,
    pub max_hops: usize,
    pub min_similarity: f64,
    pub min_graph_score: f64,
    pub temporal_filter: bool,
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self {
            vector_weight: 0.6,
            graph_weight: 0.4,
            max_hops: 2,
            min_similarity: 0.3,
            min_graph_score: 0.1,
            temporal_filter: false,
        }
    }
}

/// HNSW index construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswSettings {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for HnswSettings {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
        }
    }
}

/// Rule store and pruning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    pub db_path: String,
    pub auto_prune: bool,
    pub prune_interval_hours: u64,
    pub min_applications_for_pruning: u32,
    pub min_effectiveness_threshold: f64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            db_path: "~/.aegis/rules.db".to_string(),
            auto_prune: true,
            prune_interval_hours: 24,
            min_applications_for_pruning: 10,
            min_effectiveness_threshold: 0.4,
        }
    }
}

/// Symbolic solver budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    pub timeout_ms: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

/// Specification enforcement mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecConfig {
    /// Strict mode raises on constraint violations; soft mode returns them.
    pub strict: bool,
}

impl Default for SpecConfig {
    fn default() -> Self {
        Self { strict: true }
    }
}
