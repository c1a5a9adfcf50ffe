//! High-level audit trail manager with chain integrity guarantees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::entry::{AuditEntry, DecisionType, VerificationStatus};
use crate::audit::storage::{AuditStorage, MemoryAuditStore};
use crate::error::Result;
use crate::hashing::{hash_content, summarize_content};

/// Kind of integrity problem found by verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityIssueKind {
    /// Stored entry hash does not match the recomputed hash.
    HashMismatch,
    /// Entry's previous_entry_hash does not match its predecessor.
    ChainBreak,
}

/// A single integrity issue located during verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityIssue {
    pub entry_id: String,
    pub kind: IntegrityIssueKind,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

/// Result of walking the chain and re-checking every hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub verified: bool,
    pub entries_checked: usize,
    pub issues: Vec<IntegrityIssue>,
    pub checked_at: DateTime<Utc>,
}

/// Optional fields for [`AuditTrailManager::record`].
///
/// Replaces the reference implementation's keyword-argument bag with a
/// builder so call sites stay readable.
#[derive(Debug, Clone, Default)]
pub struct RecordOptions {
    pub session_id: Option<String>,
    pub conversation_id: Option<String>,
    pub model_name: String,
    pub model_version: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning: String,
    pub alternatives: Vec<Value>,
    pub action: String,
    pub confidence: f64,
    pub rules: Vec<String>,
    pub sources: Vec<String>,
    pub documents: Vec<String>,
    pub parent_id: Option<String>,
    pub metadata: HashMap<String, Value>,
}

impl RecordOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_model(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.model_name = name.into();
        self.model_version = version.into();
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_rules(mut self, rules: Vec<String>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_alternatives(mut self, alternatives: Vec<Value>) -> Self {
        self.alternatives = alternatives;
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Hook invoked before an entry is finalized; may adjust the entry.
pub type PreRecordHook = Box<dyn Fn(AuditEntry) -> AuditEntry + Send + Sync>;
/// Hook invoked after an entry has been stored.
pub type PostRecordHook = Box<dyn Fn(&AuditEntry) + Send + Sync>;

/// Manager statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStats {
    pub entries_recorded: u64,
    pub total_entries: usize,
    pub verification_checks: u64,
    pub current_session: String,
    pub chain_hash_prefix: String,
}

/// Manages the audit trail: recording, chain maintenance, verification.
///
/// Single-writer per store instance; the tip advances only after the entry
/// has been persisted.
pub struct AuditTrailManager {
    storage: Arc<dyn AuditStorage>,
    session_id: RwLock<String>,
    conversation_id: String,
    chain_hash: Mutex<String>,
    entries_recorded: Mutex<u64>,
    verification_checks: Mutex<u64>,
    pre_record_hooks: RwLock<Vec<PreRecordHook>>,
    post_record_hooks: RwLock<Vec<PostRecordHook>>,
}

impl AuditTrailManager {
    /// Create a manager over the given backend.
    pub fn new(storage: Arc<dyn AuditStorage>) -> Result<Self> {
        let chain_hash = storage.latest_hash()?;
        Ok(Self {
            storage,
            session_id: RwLock::new(Uuid::new_v4().to_string()),
            conversation_id: String::new(),
            chain_hash: Mutex::new(chain_hash),
            entries_recorded: Mutex::new(0),
            verification_checks: Mutex::new(0),
            pre_record_hooks: RwLock::new(Vec::new()),
            post_record_hooks: RwLock::new(Vec::new()),
        })
    }

    /// Manager over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryAuditStore::new())).expect("in-memory store cannot fail")
    }

    /// The backend, shared for query engines and report generators.
    pub fn storage(&self) -> Arc<dyn AuditStorage> {
        Arc::clone(&self.storage)
    }

    /// Current session id.
    pub fn session_id(&self) -> String {
        self.session_id.read().expect("session lock").clone()
    }

    /// Record a decision with full context.
    ///
    /// Atomic per writer: the chain tip advances only after the store commit.
    pub fn record(
        &self,
        decision_type: DecisionType,
        agent_id: &str,
        inputs: &Value,
        outputs: &Value,
        opts: RecordOptions,
    ) -> Result<AuditEntry> {
        // Hold the tip lock across build + store so two concurrent records
        // cannot link to the same predecessor.
        let mut chain_hash = self.chain_hash.lock().expect("chain lock");

        let mut entry = AuditEntry {
            session_id: opts.session_id.unwrap_or_else(|| self.session_id()),
            conversation_id: opts
                .conversation_id
                .unwrap_or_else(|| self.conversation_id.clone()),
            decision_type,
            agent_id: agent_id.to_string(),
            model_name: opts.model_name,
            model_version: opts.model_version,
            input_hash: hash_content(inputs),
            input_summary: summarize_content(inputs, 200),
            input_token_count: opts.input_tokens,
            context_sources: opts.sources,
            reasoning_summary: opts.reasoning,
            alternatives_considered: opts.alternatives,
            selected_action: opts.action,
            confidence_score: opts.confidence,
            rules_applied: opts.rules,
            output_hash: hash_content(outputs),
            output_summary: summarize_content(outputs, 200),
            output_token_count: opts.output_tokens,
            source_documents: opts.documents,
            parent_entry_id: opts.parent_id.clone(),
            previous_entry_hash: chain_hash.clone(),
            metadata: opts.metadata,
            ..Default::default()
        };

        for hook in self.pre_record_hooks.read().expect("hooks lock").iter() {
            entry = hook(entry);
        }

        entry.finalize();
        self.storage.store(&entry)?;
        *chain_hash = entry.entry_hash.clone();
        drop(chain_hash);

        *self.entries_recorded.lock().expect("stats lock") += 1;

        if let Some(parent_id) = &opts.parent_id {
            self.add_child_to_parent(parent_id, &entry.entry_id)?;
        }

        for hook in self.post_record_hooks.read().expect("hooks lock").iter() {
            hook(&entry);
        }

        debug!(entry_id = %entry.entry_id, decision_type = %decision_type, "Recorded audit entry");

        Ok(entry)
    }

    fn add_child_to_parent(&self, parent_id: &str, child_id: &str) -> Result<()> {
        if let Some(mut parent) = self.storage.get(parent_id)? {
            parent.add_child(child_id);
            self.storage.store(&parent)?;
        }
        Ok(())
    }

    /// Record a tool invocation.
    pub fn record_tool_invocation(
        &self,
        agent_id: &str,
        tool_name: &str,
        tool_input: &Value,
        tool_output: &Value,
        success: bool,
        opts: RecordOptions,
    ) -> Result<AuditEntry> {
        self.record(
            DecisionType::ToolInvocation,
            agent_id,
            &json!({"tool": tool_name, "input": tool_input}),
            &json!({"output": tool_output, "success": success}),
            opts.with_action(format!("invoke_{}", tool_name)),
        )
    }

    /// Record an agent-selection decision with its rejected candidates.
    pub fn record_agent_selection(
        &self,
        orchestrator_id: &str,
        task: &str,
        selected_agent: &str,
        candidates: &[String],
        confidence: f64,
        opts: RecordOptions,
    ) -> Result<AuditEntry> {
        let alternatives: Vec<Value> = candidates
            .iter()
            .filter(|c| c.as_str() != selected_agent)
            .map(|c| json!({"agent": c, "reason": "candidate"}))
            .collect();

        self.record(
            DecisionType::AgentSelection,
            orchestrator_id,
            &json!({"task": task, "candidates": candidates}),
            &json!({"selected_agent": selected_agent}),
            opts.with_action(format!("select_{}", selected_agent))
                .with_alternatives(alternatives)
                .with_confidence(confidence),
        )
    }

    /// Record a verification verdict.
    pub fn record_verification(
        &self,
        verifier_id: &str,
        content_hash: &str,
        verdict: &str,
        score: f64,
        reasoning: &str,
        opts: RecordOptions,
    ) -> Result<AuditEntry> {
        self.record(
            DecisionType::Verification,
            verifier_id,
            &json!({"content_hash": content_hash}),
            &json!({"verdict": verdict, "score": score}),
            opts.with_action(format!("verify_{}", verdict))
                .with_reasoning(reasoning)
                .with_confidence(score),
        )
    }

    /// Verify chain integrity of all entries.
    ///
    /// Checks every entry's stored hash against a recomputation and every
    /// link against its predecessor. Issues are reported, never raised.
    pub fn verify_integrity(&self) -> Result<IntegrityReport> {
        *self.verification_checks.lock().expect("stats lock") += 1;

        let entries = self.storage.all_entries()?;
        let mut issues = Vec::new();

        for (i, entry) in entries.iter().enumerate() {
            if !entry.verify_hash() {
                issues.push(IntegrityIssue {
                    entry_id: entry.entry_id.clone(),
                    kind: IntegrityIssueKind::HashMismatch,
                    detail: format!(
                        "stored {} != computed {}",
                        entry.entry_hash,
                        entry.compute_hash()
                    ),
                    timestamp: entry.timestamp,
                });
            }

            if i > 0 {
                // Link against the predecessor's recomputed hash: a tampered
                // predecessor breaks the chain even though its stored hash
                // still matches the successor's link.
                let expected = entries[i - 1].compute_hash();
                if entry.previous_entry_hash != expected {
                    issues.push(IntegrityIssue {
                        entry_id: entry.entry_id.clone(),
                        kind: IntegrityIssueKind::ChainBreak,
                        detail: format!(
                            "expected previous {} but stored {}",
                            expected, entry.previous_entry_hash
                        ),
                        timestamp: entry.timestamp,
                    });
                }
            }
        }

        if !issues.is_empty() {
            warn!(count = issues.len(), "Integrity verification failed");
        }

        Ok(IntegrityReport {
            verified: issues.is_empty(),
            entries_checked: entries.len(),
            issues,
            checked_at: Utc::now(),
        })
    }

    /// Get a specific entry by id.
    pub fn get_entry(&self, entry_id: &str) -> Result<Option<AuditEntry>> {
        self.storage.get(entry_id)
    }

    /// All entries for a session (defaults to the current session).
    pub fn session_entries(&self, session_id: Option<&str>) -> Result<Vec<AuditEntry>> {
        let session = session_id
            .map(|s| s.to_string())
            .unwrap_or_else(|| self.session_id());
        self.storage.entries_by_session(&session)
    }

    pub fn entries_by_type(&self, decision_type: DecisionType) -> Result<Vec<AuditEntry>> {
        self.storage.entries_by_type(decision_type)
    }

    pub fn entries_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>> {
        self.storage.entries_in_range(start, end)
    }

    /// Update the verification tuple of an entry.
    ///
    /// The entry's own hash is re-finalized (the hash covers verification
    /// status), but successors are NOT relinked: verification status is a
    /// mutable annotation, and integrity checks report the resulting
    /// divergence separately.
    pub fn update_verification(
        &self,
        entry_id: &str,
        status: VerificationStatus,
        verifier_id: &str,
        score: Option<f64>,
    ) -> Result<bool> {
        match self.storage.get(entry_id)? {
            Some(mut entry) => {
                entry.set_verification(status, verifier_id, score);
                entry.finalize();
                self.storage.store(&entry)?;

                // If the updated entry is the tip, keep the tip coherent.
                let mut chain_hash = self.chain_hash.lock().expect("chain lock");
                let latest = self.storage.latest_hash()?;
                if latest == entry.entry_hash {
                    *chain_hash = latest;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Register a hook run before each entry is finalized.
    pub fn add_pre_record_hook(&self, hook: PreRecordHook) {
        self.pre_record_hooks.write().expect("hooks lock").push(hook);
    }

    /// Register a hook run after each entry is stored.
    pub fn add_post_record_hook(&self, hook: PostRecordHook) {
        self.post_record_hooks
            .write()
            .expect("hooks lock")
            .push(hook);
    }

    /// Current chain tip.
    pub fn current_chain_hash(&self) -> String {
        self.chain_hash.lock().expect("chain lock").clone()
    }

    /// Manager statistics.
    pub fn stats(&self) -> Result<AuditStats> {
        let chain_hash = self.current_chain_hash();
        Ok(AuditStats {
            entries_recorded: *self.entries_recorded.lock().expect("stats lock"),
            total_entries: self.storage.count()?,
            verification_checks: *self.verification_checks.lock().expect("stats lock"),
            current_session: self.session_id(),
            chain_hash_prefix: if chain_hash.is_empty() {
                String::new()
            } else {
                format!("{}...", &chain_hash[..16.min(chain_hash.len())])
            },
        })
    }

    /// Start a new session, returning its id.
    pub fn new_session(&self, session_id: Option<String>) -> String {
        let id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        *self.session_id.write().expect("session lock") = id.clone();
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> AuditTrailManager {
        AuditTrailManager::in_memory()
    }

    #[test]
    fn test_record_links_chain() {
        let mgr = manager();

        let e1 = mgr
            .record(
                DecisionType::OutputGeneration,
                "planner",
                &json!({"a": 1}),
                &json!({"b": 2}),
                RecordOptions::new(),
            )
            .unwrap();
        let e2 = mgr
            .record(
                DecisionType::OutputGeneration,
                "planner",
                &json!({"a": 2}),
                &json!({"b": 4}),
                RecordOptions::new(),
            )
            .unwrap();

        assert_eq!(e1.previous_entry_hash, "");
        assert_eq!(e2.previous_entry_hash, e1.entry_hash);
        assert_eq!(mgr.current_chain_hash(), e2.entry_hash);
    }

    #[test]
    fn test_verify_integrity_clean() {
        let mgr = manager();
        for i in 0..5 {
            mgr.record(
                DecisionType::ToolInvocation,
                "agent",
                &json!({"i": i}),
                &json!({"o": i * 2}),
                RecordOptions::new(),
            )
            .unwrap();
        }

        let report = mgr.verify_integrity().unwrap();
        assert!(report.verified);
        assert_eq!(report.entries_checked, 5);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_tamper_detection_scenario() {
        // Mutating entry 1's agent_id must produce exactly one hash mismatch
        // at index 1 and one chain break at index 2.
        let storage = Arc::new(MemoryAuditStore::new());
        let mgr = AuditTrailManager::new(Arc::clone(&storage) as Arc<dyn AuditStorage>).unwrap();

        for (input, output) in [(1, 2), (2, 4), (3, 6)] {
            mgr.record(
                DecisionType::OutputGeneration,
                "planner",
                &json!({"a": input}),
                &json!({"b": output}),
                RecordOptions::new(),
            )
            .unwrap();
        }

        let entries = storage.all_entries().unwrap();
        let mut tampered = entries[1].clone();
        tampered.agent_id = "evil".to_string();
        storage.store(&tampered).unwrap();

        let report = mgr.verify_integrity().unwrap();
        assert!(!report.verified);
        assert_eq!(report.issues.len(), 2);

        assert_eq!(report.issues[0].kind, IntegrityIssueKind::HashMismatch);
        assert_eq!(report.issues[0].entry_id, entries[1].entry_id);
        assert_eq!(report.issues[1].kind, IntegrityIssueKind::ChainBreak);
        assert_eq!(report.issues[1].entry_id, entries[2].entry_id);

        // Entry 2 still links to entry 1's original hash, which no longer
        // matches entry 1's recomputation after the mutation.
        let recomputed = tampered.compute_hash();
        assert_ne!(recomputed, entries[1].entry_hash);
        assert_eq!(entries[2].previous_entry_hash, entries[1].entry_hash);
    }

    #[test]
    fn test_latest_hash_after_writes() {
        let mgr = manager();
        assert_eq!(mgr.storage().latest_hash().unwrap(), "");

        let entry = mgr
            .record(
                DecisionType::Verification,
                "judge",
                &json!("in"),
                &json!("out"),
                RecordOptions::new(),
            )
            .unwrap();

        assert_eq!(mgr.storage().latest_hash().unwrap(), entry.entry_hash);
    }

    #[test]
    fn test_parent_child_linking() {
        let mgr = manager();
        let parent = mgr
            .record(
                DecisionType::TaskRouting,
                "orchestrator",
                &json!("task"),
                &json!("routed"),
                RecordOptions::new(),
            )
            .unwrap();
        let child = mgr
            .record(
                DecisionType::ToolInvocation,
                "worker",
                &json!("in"),
                &json!("out"),
                RecordOptions::new().with_parent(parent.entry_id.clone()),
            )
            .unwrap();

        let parent = mgr.get_entry(&parent.entry_id).unwrap().unwrap();
        assert_eq!(parent.child_entry_ids, vec![child.entry_id.clone()]);
        assert_eq!(child.parent_entry_id.as_deref(), Some(parent.entry_id.as_str()));
    }

    #[test]
    fn test_update_verification() {
        let mgr = manager();
        let entry = mgr
            .record(
                DecisionType::OutputGeneration,
                "agent",
                &json!("in"),
                &json!("out"),
                RecordOptions::new(),
            )
            .unwrap();

        let updated = mgr
            .update_verification(
                &entry.entry_id,
                VerificationStatus::Verified,
                "judge-1",
                Some(0.92),
            )
            .unwrap();
        assert!(updated);

        let fetched = mgr.get_entry(&entry.entry_id).unwrap().unwrap();
        assert_eq!(fetched.verification_status, VerificationStatus::Verified);
        assert_eq!(fetched.verification_scores.get("judge-1"), Some(&0.92));
        // Hash was re-finalized for the mutated entry
        assert!(fetched.verify_hash());
        assert_ne!(fetched.entry_hash, entry.entry_hash);

        assert!(!mgr
            .update_verification("missing", VerificationStatus::Failed, "j", None)
            .unwrap());
    }

    #[test]
    fn test_record_hooks() {
        let mgr = manager();
        mgr.add_pre_record_hook(Box::new(|mut entry| {
            entry.metadata.insert("hooked".to_string(), json!(true));
            entry
        }));

        let entry = mgr
            .record(
                DecisionType::OutputGeneration,
                "agent",
                &json!("in"),
                &json!("out"),
                RecordOptions::new(),
            )
            .unwrap();

        assert_eq!(entry.metadata.get("hooked"), Some(&json!(true)));
        // Hook ran before finalize, so the hash is still valid
        assert!(entry.verify_hash());
    }

    #[test]
    fn test_convenience_recorders() {
        let mgr = manager();

        let tool = mgr
            .record_tool_invocation(
                "agent",
                "web_search",
                &json!({"q": "rust"}),
                &json!(["result"]),
                true,
                RecordOptions::new(),
            )
            .unwrap();
        assert_eq!(tool.decision_type, DecisionType::ToolInvocation);
        assert_eq!(tool.selected_action, "invoke_web_search");

        let selection = mgr
            .record_agent_selection(
                "orchestrator",
                "research task",
                "researcher",
                &["researcher".to_string(), "coder".to_string()],
                0.95,
                RecordOptions::new(),
            )
            .unwrap();
        assert_eq!(selection.decision_type, DecisionType::AgentSelection);
        assert_eq!(selection.alternatives_considered.len(), 1);
        assert_eq!(selection.confidence_score, 0.95);
    }

    #[test]
    fn test_stats_and_sessions() {
        let mgr = manager();
        mgr.record(
            DecisionType::OutputGeneration,
            "a",
            &json!(1),
            &json!(2),
            RecordOptions::new(),
        )
        .unwrap();

        let stats = mgr.stats().unwrap();
        assert_eq!(stats.entries_recorded, 1);
        assert_eq!(stats.total_entries, 1);
        assert!(stats.chain_hash_prefix.ends_with("..."));

        let new_session = mgr.new_session(Some("custom-session".to_string()));
        assert_eq!(new_session, "custom-session");
        assert_eq!(mgr.session_id(), "custom-session");
    }
}
