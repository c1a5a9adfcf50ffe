//! # aegis-core
//!
//! Core of a neurosymbolic agent-governance runtime:
//!
//! - **Audit**: append-only, tamper-evident hash chain of agent decisions
//! - **Knowledge**: claim graph with hybrid vector/keyword/graph retrieval
//! - **Learning**: symbolic rules mined from successful executions,
//!   scored with a Bayesian effectiveness estimate
//! - **Specs**: a specification DSL compiled into output validators,
//!   behavior prompts, and runtime limits
//! - **Verification**: symbolic proofs for arithmetic and logical claims,
//!   with an LLM judge for everything else
//!
//! ## Example
//!
//! ```rust,ignore
//! use aegis_core::{AuditTrailManager, DecisionType, RecordOptions};
//! use serde_json::json;
//!
//! let manager = AuditTrailManager::in_memory();
//! manager.record(
//!     DecisionType::AgentSelection,
//!     "orchestrator",
//!     &json!({"task": "research quantum computing"}),
//!     &json!({"selected_agent": "researcher"}),
//!     RecordOptions::new().with_confidence(0.95),
//! )?;
//!
//! let report = manager.verify_integrity()?;
//! assert!(report.verified);
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod hashing;
pub mod knowledge;
pub mod learning;
pub mod llm;
pub mod schemas;
pub mod specs;
pub mod verification;

// Re-exports for convenience
pub use audit::{
    AuditEntry, AuditQueryEngine, AuditStorage, AuditTrailManager, ComplianceReport,
    ComplianceReportGenerator, DecisionType, EntityProvenance, EntityProvenanceTracker,
    EntityRole, FileAuditStore, IntegrityIssue, IntegrityIssueKind, IntegrityReport,
    MemoryAuditStore, QueryFilter, RecordOptions, ReportOptions, SortField, SortOrder,
    SqliteAuditStore, VerificationStatus,
};
pub use config::{
    AuditConfig, HnswSettings, KgConfig, RetrieverSettings, RulesConfig, RuntimeConfig,
    SolverConfig, SpecConfig,
};
pub use error::{Error, Result};
pub use knowledge::{
    cosine_similarity, default_embedding_fn, hash_embedding, Bm25Config, Bm25Index, Claim,
    ContradictionResult, EmbeddingCache, EmbeddingFn, Entity, EntityType, GraphQueryResult,
    GraphStore, HnswConfig, HnswIndex, HybridRetrievalResult, HybridRetriever,
    HybridRetrieverConfig, KnowledgeGraph, MemoryGraphStore, NewClaim, ProvenanceNode,
    RelationType, RetrievalPath, Source, SqliteGraphStore, ThreeWayBlend,
};
pub use learning::{
    rule_id, Agent, AgentResponse, ExecutionOutcome, ExtractedRule, ExtractionConfig,
    LearningConfig, LearningExecution, LearningOrchestrator, LearningStats, MemoryRuleStore,
    RuleCategory, RuleExtractor, RuleMatch, RuleStatus, RuleStore, RuleStoreBackend,
    SqliteRuleStore,
};
pub use llm::{AnthropicClient, ClientConfig, CompletionRequest, CompletionResponse, LlmClient};
pub use schemas::{
    ClaimVerificationStatus, EvaluationScore, FieldError, IssueFound, IssueSeverity,
    JudgeVerdict, ResearchClaim, SourceReference,
};
pub use specs::{
    AgentSpecification, BehaviorRule, CompiledSpecification, Constraint, ExecutionResult,
    LimitEnforcer, SpecificationCompiler, SpecificationEnforcedAgent, SpecificationParser,
    SpecificationRegistry, SpecificationValidator, TierLevel, ValidationResult,
};
pub use verification::{
    ClaimClassifier, ClaimType, ClaimVerification, ClassifiedClaim, HybridVerifier, JudgeOpinion,
    LlmJudge, SymbolicOutput, SymbolicVerifier, VarSort, VerificationMethod, VerificationOutcome,
    VerificationReport,
};
