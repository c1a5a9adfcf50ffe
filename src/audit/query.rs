//! Query interface for audit trail investigation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::audit::entry::{AuditEntry, DecisionType, VerificationStatus};
use crate::audit::storage::AuditStorage;
use crate::error::Result;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Field to sort query results by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Timestamp,
    Confidence,
    AgentId,
}

/// Filter criteria for audit queries; all present criteria must match.
#[derive(Default)]
pub struct QueryFilter {
    pub decision_types: Option<Vec<DecisionType>>,
    pub agent_ids: Option<Vec<String>>,
    pub session_ids: Option<Vec<String>>,
    pub verification_statuses: Option<Vec<VerificationStatus>>,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub has_parent: Option<bool>,
    pub search_text: Option<String>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether an entry matches every present criterion.
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(types) = &self.decision_types {
            if !types.contains(&entry.decision_type) {
                return false;
            }
        }
        if let Some(agents) = &self.agent_ids {
            if !agents.contains(&entry.agent_id) {
                return false;
            }
        }
        if let Some(sessions) = &self.session_ids {
            if !sessions.contains(&entry.session_id) {
                return false;
            }
        }
        if let Some(statuses) = &self.verification_statuses {
            if !statuses.contains(&entry.verification_status) {
                return false;
            }
        }
        if let Some(min) = self.min_confidence {
            if entry.confidence_score < min {
                return false;
            }
        }
        if let Some(max) = self.max_confidence {
            if entry.confidence_score > max {
                return false;
            }
        }
        if let Some(start) = self.start_date {
            if entry.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if entry.timestamp > end {
                return false;
            }
        }
        if let Some(has_parent) = self.has_parent {
            if entry.parent_entry_id.is_some() != has_parent {
                return false;
            }
        }
        if let Some(text) = &self.search_text {
            let needle = text.to_lowercase();
            let haystack = format!(
                "{} {} {} {}",
                entry.input_summary, entry.output_summary, entry.reasoning_summary,
                entry.selected_action
            )
            .to_lowercase();
            if !haystack.contains(&needle) {
                return false;
            }
        }
        true
    }
}

/// Result of a paginated audit query.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub entries: Vec<AuditEntry>,
    pub total_matches: usize,
    pub offset: usize,
    pub limit: Option<usize>,
}

/// Aggregate statistics over a set of entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryStatistics {
    pub total: usize,
    pub by_type: HashMap<String, usize>,
    pub by_agent: HashMap<String, usize>,
    pub by_verification_status: HashMap<String, usize>,
    pub average_confidence: f64,
}

/// Query engine over an audit storage backend.
pub struct AuditQueryEngine {
    storage: Arc<dyn AuditStorage>,
}

impl AuditQueryEngine {
    pub fn new(storage: Arc<dyn AuditStorage>) -> Self {
        Self { storage }
    }

    /// Run a filtered, sorted, paginated query.
    pub fn query(
        &self,
        filter: &QueryFilter,
        sort_field: SortField,
        sort_order: SortOrder,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<QueryResult> {
        let mut matched: Vec<AuditEntry> = self
            .storage
            .all_entries()?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();

        matched.sort_by(|a, b| {
            let ordering = match sort_field {
                SortField::Timestamp => a.timestamp.cmp(&b.timestamp),
                SortField::Confidence => a
                    .confidence_score
                    .partial_cmp(&b.confidence_score)
                    .unwrap_or(std::cmp::Ordering::Equal),
                SortField::AgentId => a.agent_id.cmp(&b.agent_id),
            };
            match sort_order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            }
        });

        let total_matches = matched.len();
        let entries: Vec<AuditEntry> = matched
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .collect();

        Ok(QueryResult {
            entries,
            total_matches,
            offset,
            limit,
        })
    }

    pub fn find_by_id(&self, entry_id: &str) -> Result<Option<AuditEntry>> {
        self.storage.get(entry_id)
    }

    /// Children of an entry, resolved through its `child_entry_ids`.
    pub fn find_children(&self, parent_id: &str) -> Result<Vec<AuditEntry>> {
        let parent = match self.storage.get(parent_id)? {
            Some(parent) => parent,
            None => return Ok(Vec::new()),
        };
        let mut children = Vec::new();
        for child_id in &parent.child_entry_ids {
            if let Some(child) = self.storage.get(child_id)? {
                children.push(child);
            }
        }
        Ok(children)
    }

    /// Ancestor chain from the entry's parent up to the root.
    ///
    /// Walks `parent_entry_id` links; cycle-safe via a visited set.
    pub fn find_ancestors(&self, entry_id: &str) -> Result<Vec<AuditEntry>> {
        let mut ancestors = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(entry_id.to_string());

        let mut current = self
            .storage
            .get(entry_id)?
            .and_then(|e| e.parent_entry_id.clone());

        while let Some(parent_id) = current {
            if !visited.insert(parent_id.clone()) {
                break;
            }
            match self.storage.get(&parent_id)? {
                Some(parent) => {
                    current = parent.parent_entry_id.clone();
                    ancestors.push(parent);
                }
                None => break,
            }
        }

        Ok(ancestors)
    }

    /// Full decision tree rooted at an entry, as nested JSON.
    pub fn find_decision_tree(&self, root_id: &str) -> Result<Value> {
        let mut visited = HashSet::new();
        self.build_tree_node(root_id, &mut visited)
    }

    fn build_tree_node(&self, entry_id: &str, visited: &mut HashSet<String>) -> Result<Value> {
        if !visited.insert(entry_id.to_string()) {
            return Ok(json!({"entry_id": entry_id, "cycle": true}));
        }
        let entry = match self.storage.get(entry_id)? {
            Some(entry) => entry,
            None => return Ok(json!({"entry_id": entry_id, "missing": true})),
        };

        let mut children = Vec::new();
        for child_id in &entry.child_entry_ids {
            children.push(self.build_tree_node(child_id, visited)?);
        }

        Ok(json!({
            "entry_id": entry.entry_id,
            "timestamp": entry.timestamp.to_rfc3339(),
            "decision_type": entry.decision_type.as_str(),
            "agent_id": entry.agent_id,
            "selected_action": entry.selected_action,
            "confidence_score": entry.confidence_score,
            "children": children,
        }))
    }

    /// Chronological timeline of entries in a date range.
    pub fn timeline(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>> {
        let mut entries = self.storage.entries_in_range(start, end)?;
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }

    /// Aggregate statistics over entries matching a filter.
    pub fn statistics(&self, filter: &QueryFilter) -> Result<QueryStatistics> {
        let entries: Vec<AuditEntry> = self
            .storage
            .all_entries()?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();

        let mut by_type: HashMap<String, usize> = HashMap::new();
        let mut by_agent: HashMap<String, usize> = HashMap::new();
        let mut by_status: HashMap<String, usize> = HashMap::new();
        let mut confidence_sum = 0.0;
        let mut confidence_count = 0usize;

        for entry in &entries {
            *by_type
                .entry(entry.decision_type.as_str().to_string())
                .or_insert(0) += 1;
            if !entry.agent_id.is_empty() {
                *by_agent.entry(entry.agent_id.clone()).or_insert(0) += 1;
            }
            *by_status
                .entry(entry.verification_status.as_str().to_string())
                .or_insert(0) += 1;
            if entry.confidence_score > 0.0 {
                confidence_sum += entry.confidence_score;
                confidence_count += 1;
            }
        }

        Ok(QueryStatistics {
            total: entries.len(),
            by_type,
            by_agent,
            by_verification_status: by_status,
            average_confidence: if confidence_count > 0 {
                confidence_sum / confidence_count as f64
            } else {
                0.0
            },
        })
    }
}
