//! Knowledge graph of claims with hybrid vector/keyword/graph retrieval.
//!
//! Claims carry sources, entities, topics, and embeddings; the retriever
//! fuses vector similarity with entity-graph expansion (and optionally BM25
//! keyword matching) into a single ranked result list.

mod bm25;
mod embeddings;
mod extract;
mod graph;
mod hnsw;
mod manager;
mod retriever;
mod storage;

pub use bm25::{reciprocal_rank_fusion, tokenize, Bm25Config, Bm25Index, RRF_K};
pub use embeddings::{
    default_embedding_fn, hash_embedding, EmbeddingCache, EmbeddingFn, DEFAULT_EMBEDDING_DIM,
};
pub use extract::{EntityExtractor, TopicExtractor};
pub use graph::{
    Claim, ContradictionResult, Entity, EntityKey, EntityType, GraphQueryResult, GraphStore,
    ProvenanceNode, RelationType, Source,
};
pub use hnsw::{HnswConfig, HnswIndex};
pub use manager::{KnowledgeGraph, KnowledgeGraphStats, NewClaim};
pub use retriever::{
    HybridRetrievalResult, HybridRetriever, HybridRetrieverConfig, RetrievalPath, ThreeWayBlend,
};
pub use storage::{cosine_similarity, MemoryGraphStore, SqliteGraphStore};
