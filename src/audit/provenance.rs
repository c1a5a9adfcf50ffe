//! Entity-aware provenance tracking for audit entries.
//!
//! Provenance records are immutable snapshots: created once when an entity
//! participates in a decision, never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::audit::manager::AuditTrailManager;
use crate::error::{Error, Result};
use crate::knowledge::{Entity, EntityType};

/// Role of an entity within an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRole {
    /// Entity was an input to the decision.
    Input,
    /// Entity was produced as output.
    Output,
    /// Entity provided context for the decision.
    Context,
    /// Entity was the subject of the decision.
    Subject,
}

impl EntityRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Context => "context",
            Self::Subject => "subject",
        }
    }
}

impl std::fmt::Display for EntityRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable snapshot of an entity's state at the moment it was involved in
/// an audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityProvenance {
    pub provenance_id: String,
    pub entity_name: String,
    pub entity_type: EntityType,
    pub role: EntityRole,
    pub entry_id: String,
    pub recorded_at: DateTime<Utc>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub source_location: Option<String>,
    pub metadata: HashMap<String, Value>,
}

impl EntityProvenance {
    /// Snapshot an entity into a provenance record.
    pub fn from_entity(
        entity: &Entity,
        role: EntityRole,
        entry_id: &str,
        metadata: Option<HashMap<String, Value>>,
    ) -> Self {
        Self {
            provenance_id: Uuid::new_v4().to_string(),
            entity_name: entity.name.clone(),
            entity_type: entity.entity_type,
            role,
            entry_id: entry_id.to_string(),
            recorded_at: Utc::now(),
            valid_from: entity.valid_from,
            valid_to: entity.valid_to,
            source_location: entity.source_location.clone(),
            metadata: metadata.unwrap_or_else(|| entity.metadata.clone()),
        }
    }
}

/// Provenance tracking statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceStats {
    pub total_provenance_records: usize,
    pub unique_entities: usize,
    pub by_role: HashMap<String, usize>,
}

/// Tracks entity provenance across audit entries.
pub struct EntityProvenanceTracker {
    manager: Option<Arc<AuditTrailManager>>,
    records: RwLock<Vec<EntityProvenance>>,
}

impl EntityProvenanceTracker {
    /// Tracker without trace support (no manager attached).
    pub fn new() -> Self {
        Self {
            manager: None,
            records: RwLock::new(Vec::new()),
        }
    }

    /// Tracker with an audit manager, enabling decision-chain traces.
    pub fn with_manager(manager: Arc<AuditTrailManager>) -> Self {
        Self {
            manager: Some(manager),
            records: RwLock::new(Vec::new()),
        }
    }

    /// Record an entity's involvement in an audit entry.
    pub fn record(
        &self,
        entity: &Entity,
        role: EntityRole,
        entry_id: &str,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<EntityProvenance> {
        if entity.name.trim().is_empty() {
            return Err(Error::Validation("entity name cannot be empty".to_string()));
        }
        if entry_id.trim().is_empty() {
            return Err(Error::Validation("entry_id cannot be empty".to_string()));
        }

        let prov = EntityProvenance::from_entity(entity, role, entry_id, metadata);
        self.records
            .write()
            .expect("provenance lock")
            .push(prov.clone());
        Ok(prov)
    }

    fn filtered(&self, pred: impl Fn(&EntityProvenance) -> bool) -> Vec<EntityProvenance> {
        self.records
            .read()
            .expect("provenance lock")
            .iter()
            .filter(|r| pred(r))
            .cloned()
            .collect()
    }

    /// All entities for a specific audit entry.
    pub fn entities_by_entry(&self, entry_id: &str) -> Vec<EntityProvenance> {
        self.filtered(|r| r.entry_id == entry_id)
    }

    /// All entities with a specific role.
    pub fn entities_by_role(&self, role: EntityRole) -> Vec<EntityProvenance> {
        self.filtered(|r| r.role == role)
    }

    /// All records for a named entity.
    pub fn entities_by_name(&self, entity_name: &str) -> Vec<EntityProvenance> {
        self.filtered(|r| r.entity_name == entity_name)
    }

    /// All entities of a specific type.
    pub fn entities_by_type(&self, entity_type: EntityType) -> Vec<EntityProvenance> {
        self.filtered(|r| r.entity_type == entity_type)
    }

    /// Records matching every present criterion (AND intersection).
    pub fn entities(
        &self,
        entry_id: Option<&str>,
        role: Option<EntityRole>,
        entity_type: Option<EntityType>,
        entity_name: Option<&str>,
    ) -> Vec<EntityProvenance> {
        self.filtered(|r| {
            entry_id.map_or(true, |id| r.entry_id == id)
                && role.map_or(true, |role| r.role == role)
                && entity_type.map_or(true, |t| r.entity_type == t)
                && entity_name.map_or(true, |n| r.entity_name == n)
        })
    }

    /// Chronological timeline of an entity's appearances, optionally bounded.
    pub fn entity_timeline(
        &self,
        entity_name: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<EntityProvenance> {
        let mut results = self.filtered(|r| {
            r.entity_name == entity_name
                && start.map_or(true, |s| r.recorded_at >= s)
                && end.map_or(true, |e| r.recorded_at <= e)
        });
        results.sort_by_key(|r| r.recorded_at);
        results
    }

    /// Trace an entity back through the decision chain.
    ///
    /// Walks parent_entry_id links from `entry_id` collecting this entity's
    /// provenance at each step; stops on revisit or at `max_depth`.
    pub fn trace_to_source(
        &self,
        entity_name: &str,
        entry_id: &str,
        max_depth: usize,
    ) -> Result<Vec<EntityProvenance>> {
        let manager = match &self.manager {
            Some(manager) => manager,
            None => return Ok(self.entities_by_name(entity_name)),
        };

        let mut results = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut current = Some(entry_id.to_string());
        let mut depth = 0usize;

        while let Some(current_id) = current {
            if depth > max_depth || !visited.insert(current_id.clone()) {
                break;
            }

            results.extend(
                self.filtered(|r| r.entry_id == current_id && r.entity_name == entity_name),
            );

            current = manager
                .get_entry(&current_id)?
                .and_then(|e| e.parent_entry_id);
            depth += 1;
        }

        Ok(results)
    }

    /// Tracking statistics.
    pub fn statistics(&self) -> ProvenanceStats {
        let records = self.records.read().expect("provenance lock");
        let unique: HashSet<&str> = records.iter().map(|r| r.entity_name.as_str()).collect();

        let mut by_role: HashMap<String, usize> = HashMap::new();
        for role in [
            EntityRole::Input,
            EntityRole::Output,
            EntityRole::Context,
            EntityRole::Subject,
        ] {
            by_role.insert(
                role.as_str().to_string(),
                records.iter().filter(|r| r.role == role).count(),
            );
        }

        ProvenanceStats {
            total_provenance_records: records.len(),
            unique_entities: unique.len(),
            by_role,
        }
    }
}

impl Default for EntityProvenanceTracker {
    fn default() -> Self {
        Self::new()
    }
}
