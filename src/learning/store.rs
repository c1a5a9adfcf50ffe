//! Persistent rule storage with similarity-merging and search.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::learning::models::{
    ExtractedRule, LearningStats, RuleCategory, RuleMatch, RuleStatus,
};

/// Abstract rule storage backend.
pub trait RuleStoreBackend: Send + Sync {
    /// Add a rule, merging into a sufficiently similar active rule when one
    /// exists (incrementing its success count and boosting confidence).
    fn add(&self, rule: &ExtractedRule) -> Result<()>;

    fn get(&self, rule_id: &str) -> Result<Option<ExtractedRule>>;

    fn get_all(&self) -> Result<Vec<ExtractedRule>>;

    fn update(&self, rule: &ExtractedRule) -> Result<()>;

    fn delete(&self, rule_id: &str) -> Result<bool>;

    /// Search active rules, ranked by relevance and effectiveness.
    fn search(&self, query: &str, limit: usize) -> Result<Vec<RuleMatch>>;
}

fn condition_tokens(condition: &str) -> HashSet<String> {
    condition
        .to_lowercase()
        .split_whitespace()
        .map(|t| t.to_string())
        .collect()
}

/// Jaccard similarity of condition token sets.
fn condition_jaccard(a: &ExtractedRule, b: &ExtractedRule) -> f64 {
    let tokens_a = condition_tokens(&a.condition);
    let tokens_b = condition_tokens(&b.condition);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count() as f64;
    let union = tokens_a.union(&tokens_b).count() as f64;
    intersection / union
}

fn merge_into(existing: &mut ExtractedRule) {
    existing.success_count += 1;
    existing.confidence = (existing.confidence * 1.1).min(1.0);
}

// ==================== In-memory backend ====================

/// In-memory rule store; merges at condition Jaccard >= 0.6.
#[derive(Default)]
pub struct MemoryRuleStore {
    rules: RwLock<HashMap<String, ExtractedRule>>,
}

impl MemoryRuleStore {
    pub const MERGE_SIMILARITY: f64 = 0.6;

    pub fn new() -> Self {
        Self::default()
    }
}

impl RuleStoreBackend for MemoryRuleStore {
    fn add(&self, rule: &ExtractedRule) -> Result<()> {
        let mut rules = self.rules.write().expect("rule store lock");

        let similar_id = rules
            .values()
            .filter(|existing| existing.status == RuleStatus::Active)
            .find(|existing| condition_jaccard(existing, rule) >= Self::MERGE_SIMILARITY)
            .map(|existing| existing.id.clone());

        match similar_id {
            Some(id) => {
                if let Some(existing) = rules.get_mut(&id) {
                    merge_into(existing);
                }
            }
            None => {
                rules.insert(rule.id.clone(), rule.clone());
            }
        }
        Ok(())
    }

    fn get(&self, rule_id: &str) -> Result<Option<ExtractedRule>> {
        Ok(self.rules.read().expect("rule store lock").get(rule_id).cloned())
    }

    fn get_all(&self) -> Result<Vec<ExtractedRule>> {
        Ok(self.rules.read().expect("rule store lock").values().cloned().collect())
    }

    fn update(&self, rule: &ExtractedRule) -> Result<()> {
        let mut rules = self.rules.write().expect("rule store lock");
        if rules.contains_key(&rule.id) {
            rules.insert(rule.id.clone(), rule.clone());
        }
        Ok(())
    }

    fn delete(&self, rule_id: &str) -> Result<bool> {
        Ok(self
            .rules
            .write()
            .expect("rule store lock")
            .remove(rule_id)
            .is_some())
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<RuleMatch>> {
        let query_words: HashSet<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(|w| w.to_string())
            .collect();

        let rules = self.rules.read().expect("rule store lock");
        let mut matches: Vec<RuleMatch> = rules
            .values()
            .filter(|rule| rule.status == RuleStatus::Active)
            .filter_map(|rule| {
                let rule_words: HashSet<String> = condition_tokens(&rule.condition)
                    .union(&condition_tokens(&rule.recommendation))
                    .cloned()
                    .collect();
                let overlap = query_words.intersection(&rule_words).count() as f64;
                let keyword_score = overlap / query_words.len().max(1) as f64;
                let score = keyword_score * 0.5 + rule.effectiveness() * 0.5;
                (score > 0.1).then(|| RuleMatch {
                    rule: rule.clone(),
                    score,
                    match_reason: format!(
                        "Keyword match with effectiveness {:.0}%",
                        rule.effectiveness() * 100.0
                    ),
                })
            })
            .collect();

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(limit);
        Ok(matches)
    }
}

// ==================== SQLite backend ====================

/// SQLite-backed rule store with an FTS5 companion table; merges at
/// condition Jaccard >= 0.7.
pub struct SqliteRuleStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRuleStore {
    pub const MERGE_SIMILARITY: f64 = 0.7;

    pub fn open(db_path: impl AsRef<str>) -> Result<Self> {
        let expanded = shellexpand::tilde(db_path.as_ref()).into_owned();
        let path = PathBuf::from(expanded);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path).map_err(|e| Error::storage(e.to_string()))?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::storage(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rules (
                id TEXT PRIMARY KEY,
                condition TEXT NOT NULL,
                recommendation TEXT NOT NULL,
                reasoning TEXT,
                confidence REAL DEFAULT 0.7,
                success_count INTEGER DEFAULT 1,
                failure_count INTEGER DEFAULT 0,
                source_task TEXT,
                source_agent TEXT,
                category TEXT DEFAULT 'general',
                status TEXT DEFAULT 'active',
                tags TEXT DEFAULT '[]',
                created_at TEXT,
                last_used TEXT,
                metadata TEXT DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS idx_rules_status ON rules(status);
            CREATE INDEX IF NOT EXISTS idx_rules_category ON rules(category);
            CREATE INDEX IF NOT EXISTS idx_rules_created ON rules(created_at);
            CREATE VIRTUAL TABLE IF NOT EXISTS rules_fts USING fts5(
                id,
                condition,
                recommendation,
                reasoning,
                tags,
                content=rules,
                content_rowid=rowid
            );
            CREATE TRIGGER IF NOT EXISTS rules_ai AFTER INSERT ON rules BEGIN
                INSERT INTO rules_fts(rowid, id, condition, recommendation, reasoning, tags)
                VALUES (new.rowid, new.id, new.condition, new.recommendation, new.reasoning, new.tags);
            END;
            CREATE TRIGGER IF NOT EXISTS rules_ad AFTER DELETE ON rules BEGIN
                INSERT INTO rules_fts(rules_fts, rowid, id, condition, recommendation, reasoning, tags)
                VALUES ('delete', old.rowid, old.id, old.condition, old.recommendation, old.reasoning, old.tags);
            END;
            CREATE TRIGGER IF NOT EXISTS rules_au AFTER UPDATE ON rules BEGIN
                INSERT INTO rules_fts(rules_fts, rowid, id, condition, recommendation, reasoning, tags)
                VALUES ('delete', old.rowid, old.id, old.condition, old.recommendation, old.reasoning, old.tags);
                INSERT INTO rules_fts(rowid, id, condition, recommendation, reasoning, tags)
                VALUES (new.rowid, new.id, new.condition, new.recommendation, new.reasoning, new.tags);
            END;",
        )
        .map_err(|e| Error::storage(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        f(&conn).map_err(|e| Error::storage(e.to_string()))
    }

    fn row_to_rule(row: &rusqlite::Row) -> rusqlite::Result<ExtractedRule> {
        Ok(ExtractedRule {
            id: row.get(0)?,
            condition: row.get(1)?,
            recommendation: row.get(2)?,
            reasoning: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            confidence: row.get(4)?,
            success_count: row.get::<_, i64>(5)? as u32,
            failure_count: row.get::<_, i64>(6)? as u32,
            source_task: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            source_agent: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
            category: RuleCategory::parse(&row.get::<_, String>(9)?),
            status: RuleStatus::parse(&row.get::<_, String>(10)?),
            tags: row
                .get::<_, Option<String>>(11)?
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            created_at: row
                .get::<_, Option<String>>(12)?
                .and_then(|s| parse_datetime(&s))
                .unwrap_or_else(Utc::now),
            last_used: row
                .get::<_, Option<String>>(13)?
                .and_then(|s| parse_datetime(&s)),
            metadata: row
                .get::<_, Option<String>>(14)?
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
        })
    }

    const COLUMNS: &'static str = "id, condition, recommendation, reasoning, confidence,
        success_count, failure_count, source_task, source_agent, category, status,
        tags, created_at, last_used, metadata";

    fn insert(&self, rule: &ExtractedRule) -> Result<()> {
        let tags = serde_json::to_string(&rule.tags)?;
        let metadata = serde_json::to_string(&rule.metadata)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO rules
                 (id, condition, recommendation, reasoning, confidence, success_count,
                  failure_count, source_task, source_agent, category, status, tags,
                  created_at, last_used, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    rule.id,
                    rule.condition,
                    rule.recommendation,
                    rule.reasoning,
                    rule.confidence,
                    rule.success_count as i64,
                    rule.failure_count as i64,
                    rule.source_task,
                    rule.source_agent,
                    rule.category.as_str(),
                    rule.status.as_str(),
                    tags,
                    rule.created_at.to_rfc3339(),
                    rule.last_used.map(|d| d.to_rfc3339()),
                    metadata,
                ],
            )?;
            Ok(())
        })
    }

    fn find_similar(&self, rule: &ExtractedRule) -> Result<Option<ExtractedRule>> {
        let active = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM rules WHERE status = 'active'",
                Self::COLUMNS
            ))?;
            let rules: Vec<ExtractedRule> = stmt
                .query_map([], Self::row_to_rule)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rules)
        })?;

        Ok(active
            .into_iter()
            .find(|existing| condition_jaccard(existing, rule) >= Self::MERGE_SIMILARITY))
    }

    fn prepare_fts_query(query: &str) -> String {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|word| {
                word.chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
            })
            .filter(|w| !w.is_empty())
            .map(|w| format!("{}*", w))
            .collect();
        if terms.is_empty() {
            "*".to_string()
        } else {
            terms.join(" OR ")
        }
    }

    fn final_score(rule: &ExtractedRule, fts_score: f64) -> f64 {
        let normalized_fts = (fts_score / 10.0).min(1.0);
        let recency = match rule.last_used {
            Some(last_used) => {
                let days = (Utc::now() - last_used).num_days() as f64;
                (1.0 - days / 90.0).max(0.0)
            }
            None => 0.5,
        };
        normalized_fts * 0.4 + rule.effectiveness() * 0.4 + recency * 0.2
    }

    fn match_reason(rule: &ExtractedRule) -> String {
        let mut parts = Vec::new();
        if rule.is_reliable() {
            parts.push(format!("Reliable ({} uses)", rule.total_applications()));
        }
        parts.push(format!("{:.0}% effective", rule.effectiveness() * 100.0));
        if let Some(last_used) = rule.last_used {
            if (Utc::now() - last_used).num_days() < 7 {
                parts.push("recently used".to_string());
            }
        }
        parts.join(", ")
    }

    fn simple_search(&self, query: &str, limit: usize) -> Result<Vec<RuleMatch>> {
        let query_words: HashSet<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(|w| w.to_string())
            .collect();

        let mut matches: Vec<RuleMatch> = self
            .get_all()?
            .into_iter()
            .filter(|rule| rule.status == RuleStatus::Active)
            .filter_map(|rule| {
                let rule_words: HashSet<String> = condition_tokens(&rule.condition)
                    .union(&condition_tokens(&rule.recommendation))
                    .cloned()
                    .collect();
                let overlap = query_words.intersection(&rule_words).count();
                (overlap > 0).then(|| {
                    let score =
                        (overlap as f64 / query_words.len().max(1) as f64) * rule.effectiveness();
                    RuleMatch {
                        match_reason: format!("Keyword match ({} words)", overlap),
                        rule,
                        score,
                    }
                })
            })
            .collect();

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(limit);
        Ok(matches)
    }
}

impl RuleStoreBackend for SqliteRuleStore {
    fn add(&self, rule: &ExtractedRule) -> Result<()> {
        if let Some(mut similar) = self.find_similar(rule)? {
            merge_into(&mut similar);
            return self.update(&similar);
        }
        self.insert(rule)
    }

    fn get(&self, rule_id: &str) -> Result<Option<ExtractedRule>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM rules WHERE id = ?1", Self::COLUMNS),
                params![rule_id],
                Self::row_to_rule,
            )
            .optional()
        })
    }

    fn get_all(&self) -> Result<Vec<ExtractedRule>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM rules ORDER BY created_at DESC",
                Self::COLUMNS
            ))?;
            let rules = stmt
                .query_map([], Self::row_to_rule)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rules)
        })
    }

    fn update(&self, rule: &ExtractedRule) -> Result<()> {
        self.insert(rule)
    }

    fn delete(&self, rule_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute("DELETE FROM rules WHERE id = ?1", params![rule_id])?;
            Ok(rows > 0)
        })
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<RuleMatch>> {
        let fts_query = Self::prepare_fts_query(query);

        let fts_result: Result<Vec<(ExtractedRule, f64)>> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {}, bm25(rules_fts) AS fts_score
                 FROM rules_fts
                 JOIN rules r ON rules_fts.id = r.id
                 WHERE rules_fts MATCH ?1 AND r.status = 'active'
                 ORDER BY bm25(rules_fts)
                 LIMIT ?2",
                Self::COLUMNS
                    .split(',')
                    .map(|c| format!("r.{}", c.trim()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))?;
            let rows = stmt
                .query_map(params![fts_query, (limit * 2) as i64], |row| {
                    let rule = Self::row_to_rule(row)?;
                    // BM25 scores from FTS5 are negative; flip the sign
                    let fts_score: f64 = row.get(15)?;
                    Ok((rule, -fts_score))
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        });

        let scored = match fts_result {
            Ok(scored) => scored,
            Err(e) => {
                warn!("FTS search failed, falling back to keyword search: {}", e);
                return self.simple_search(query, limit);
            }
        };

        let mut matches: Vec<RuleMatch> = scored
            .into_iter()
            .filter_map(|(rule, fts_score)| {
                let score = Self::final_score(&rule, fts_score);
                (score > 0.1).then(|| RuleMatch {
                    match_reason: Self::match_reason(&rule),
                    rule,
                    score,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(limit);
        Ok(matches)
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

// ==================== High-level store ====================

/// High-level rule store wrapping a backend with pruning, statistics, and
/// export/import.
pub struct RuleStore {
    backend: Arc<dyn RuleStoreBackend>,
}

impl RuleStore {
    pub fn new(backend: Arc<dyn RuleStoreBackend>) -> Self {
        Self { backend }
    }

    /// Store over a fresh in-memory backend.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRuleStore::new()))
    }

    pub fn add(&self, rule: &ExtractedRule) -> Result<()> {
        self.backend.add(rule)
    }

    pub fn get(&self, rule_id: &str) -> Result<Option<ExtractedRule>> {
        self.backend.get(rule_id)
    }

    pub fn get_all(&self) -> Result<Vec<ExtractedRule>> {
        self.backend.get_all()
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<RuleMatch>> {
        self.backend.search(query, limit)
    }

    /// Record an application outcome against a rule.
    pub fn update_effectiveness(&self, rule_id: &str, success: bool) -> Result<()> {
        if let Some(mut rule) = self.backend.get(rule_id)? {
            rule.record_application(success);
            self.backend.update(&rule)?;
        }
        Ok(())
    }

    /// Transition rules with poor effectiveness to PRUNED; returns the
    /// pruned ids.
    pub fn prune_ineffective(
        &self,
        min_applications: u32,
        min_effectiveness: f64,
    ) -> Result<Vec<String>> {
        let mut pruned = Vec::new();
        for mut rule in self.backend.get_all()? {
            if rule.total_applications() >= min_applications
                && rule.effectiveness() < min_effectiveness
            {
                rule.status = RuleStatus::Pruned;
                self.backend.update(&rule)?;
                info!(
                    rule_id = %rule.id,
                    effectiveness = rule.effectiveness(),
                    "Pruned rule"
                );
                pruned.push(rule.id);
            }
        }
        Ok(pruned)
    }

    /// Transition rules unused for `days` (or never used and older than
    /// `days`) to DEPRECATED; returns the deprecated ids.
    pub fn prune_stale(&self, days: i64) -> Result<Vec<String>> {
        let cutoff = Utc::now() - Duration::days(days);
        let mut deprecated = Vec::new();

        for mut rule in self.backend.get_all()? {
            if rule.status != RuleStatus::Active {
                continue;
            }
            let stale = match rule.last_used {
                Some(last_used) => last_used < cutoff,
                None => rule.created_at < cutoff,
            };
            if stale {
                rule.status = RuleStatus::Deprecated;
                self.backend.update(&rule)?;
                info!(rule_id = %rule.id, "Deprecated stale rule");
                deprecated.push(rule.id);
            }
        }
        Ok(deprecated)
    }

    pub fn stats(&self) -> Result<LearningStats> {
        let rules = self.backend.get_all()?;

        let active: Vec<&ExtractedRule> = rules
            .iter()
            .filter(|r| r.status == RuleStatus::Active)
            .collect();
        let pruned = rules
            .iter()
            .filter(|r| r.status == RuleStatus::Pruned)
            .count();

        let total_applications: u64 = rules.iter().map(|r| r.total_applications() as u64).sum();
        let average_effectiveness = if active.is_empty() {
            0.0
        } else {
            active.iter().map(|r| r.effectiveness()).sum::<f64>() / active.len() as f64
        };

        let mut rules_by_category: HashMap<String, usize> = HashMap::new();
        for rule in &active {
            *rules_by_category
                .entry(rule.category.as_str().to_string())
                .or_insert(0) += 1;
        }

        let week_ago = Utc::now() - Duration::days(7);
        let recent_extractions = rules.iter().filter(|r| r.created_at >= week_ago).count();

        Ok(LearningStats {
            total_rules: rules.len(),
            active_rules: active.len(),
            pruned_rules: pruned,
            total_applications,
            average_effectiveness,
            rules_by_category,
            recent_extractions,
        })
    }

    /// Export rules to a JSON file; returns the number exported.
    pub fn export_rules(&self, filepath: impl AsRef<str>, only_active: bool) -> Result<usize> {
        let mut rules = self.backend.get_all()?;
        if only_active {
            rules.retain(|r| r.status == RuleStatus::Active);
        }

        let export = json!({
            "exported_at": Utc::now().to_rfc3339(),
            "rule_count": rules.len(),
            "rules": rules,
        });

        let expanded = shellexpand::tilde(filepath.as_ref()).into_owned();
        std::fs::write(expanded, serde_json::to_string_pretty(&export)?)?;
        Ok(rules.len())
    }

    /// Import rules from a JSON file; in merge mode the
    /// higher-effectiveness version wins per id. Returns the number
    /// imported.
    pub fn import_rules(&self, filepath: impl AsRef<str>, merge: bool) -> Result<usize> {
        let expanded = shellexpand::tilde(filepath.as_ref()).into_owned();
        let data: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(expanded)?)?;

        let rules: Vec<ExtractedRule> = data
            .get("rules")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        let mut imported = 0;
        for rule in rules {
            if merge {
                match self.backend.get(&rule.id)? {
                    Some(existing) => {
                        if rule.effectiveness() > existing.effectiveness() {
                            self.backend.update(&rule)?;
                            imported += 1;
                        }
                    }
                    None => {
                        self.backend.add(&rule)?;
                        imported += 1;
                    }
                }
            } else {
                self.backend.add(&rule)?;
                imported += 1;
            }
        }
        Ok(imported)
    }

    pub fn get_by_category(&self, category: RuleCategory) -> Result<Vec<ExtractedRule>> {
        Ok(self
            .backend
            .get_all()?
            .into_iter()
            .filter(|r| r.category == category && r.status == RuleStatus::Active)
            .collect())
    }

    /// Top active rules by effectiveness, applications breaking ties.
    pub fn get_top_rules(&self, limit: usize) -> Result<Vec<ExtractedRule>> {
        let mut rules: Vec<ExtractedRule> = self
            .backend
            .get_all()?
            .into_iter()
            .filter(|r| r.status == RuleStatus::Active)
            .collect();
        rules.sort_by(|a, b| {
            (b.effectiveness(), b.total_applications())
                .partial_cmp(&(a.effectiveness(), a.total_applications()))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rules.truncate(limit);
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_on_similar_condition() {
        // Condition token Jaccard between these is 4/6 ~ 0.67 >= 0.6
        let store = MemoryRuleStore::new();
        let a = ExtractedRule::new(
            "When research involves multiple sources",
            "Cross-verify citations",
        );
        let b = ExtractedRule::new(
            "When research involves many sources",
            "Cross-verify citations",
        );

        store.add(&a).unwrap();
        store.add(&b).unwrap();

        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].success_count, 2);
        assert!((all[0].confidence - 0.77).abs() < 1e-9);
    }

    #[test]
    fn test_no_merge_on_dissimilar_condition() {
        let store = MemoryRuleStore::new();
        store
            .add(&ExtractedRule::new("When writing code", "Add tests"))
            .unwrap();
        store
            .add(&ExtractedRule::new(
                "When research involves multiple sources",
                "Cross-verify citations",
            ))
            .unwrap();

        assert_eq!(store.get_all().unwrap().len(), 2);
    }

    #[test]
    fn test_sqlite_merge_threshold_is_stricter() {
        // Jaccard 0.67 is below the SQLite threshold of 0.7, so no merge
        let store = SqliteRuleStore::in_memory().unwrap();
        store
            .add(&ExtractedRule::new(
                "When research involves multiple sources",
                "Cross-verify citations",
            ))
            .unwrap();
        store
            .add(&ExtractedRule::new(
                "When research involves many sources",
                "Cross-verify citations",
            ))
            .unwrap();

        assert_eq!(store.get_all().unwrap().len(), 2);

        // Identical condition merges
        store
            .add(&ExtractedRule::new(
                "When research involves multiple sources",
                "Check publication dates",
            ))
            .unwrap();
        assert_eq!(store.get_all().unwrap().len(), 2);
    }

    #[test]
    fn test_memory_search_active_only() {
        let store = MemoryRuleStore::new();
        let mut inactive = ExtractedRule::new("When testing search", "Use keywords");
        inactive.status = RuleStatus::Pruned;
        store.rules.write().unwrap().insert(inactive.id.clone(), inactive);

        store
            .add(&ExtractedRule::new("When searching the web", "Use keywords"))
            .unwrap();

        let matches = store.search("searching keywords", 5).unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches[0].rule.status == RuleStatus::Active);
    }

    #[test]
    fn test_sqlite_fts_search() {
        let store = SqliteRuleStore::in_memory().unwrap();
        store
            .add(
                &ExtractedRule::new(
                    "When research involves multiple sources",
                    "Cross-verify citations between sources",
                )
                .with_reasoning("Reduces citation errors"),
            )
            .unwrap();
        store
            .add(&ExtractedRule::new("When writing Rust code", "Run clippy"))
            .unwrap();

        let matches = store.search("research sources", 5).unwrap();
        assert!(!matches.is_empty());
        assert!(matches[0].rule.condition.contains("research"));
    }

    #[test]
    fn test_update_effectiveness() {
        let store = RuleStore::in_memory();
        let rule = ExtractedRule::new("When x", "Do y");
        store.add(&rule).unwrap();

        store.update_effectiveness(&rule.id, true).unwrap();
        store.update_effectiveness(&rule.id, false).unwrap();

        let updated = store.get(&rule.id).unwrap().unwrap();
        assert_eq!(updated.success_count, 2);
        assert_eq!(updated.failure_count, 1);
        assert!(updated.last_used.is_some());
    }

    #[test]
    fn test_prune_ineffective() {
        let store = RuleStore::in_memory();
        let mut bad = ExtractedRule::new("When bad things happen", "Do the wrong thing");
        bad.success_count = 1;
        bad.failure_count = 9;
        store.backend.add(&bad).unwrap();

        let mut good = ExtractedRule::new("When good things happen", "Keep doing them");
        good.success_count = 9;
        good.failure_count = 1;
        store.backend.add(&good).unwrap();

        let pruned = store.prune_ineffective(10, 0.4).unwrap();
        assert_eq!(pruned, vec![bad.id.clone()]);
        assert_eq!(
            store.get(&bad.id).unwrap().unwrap().status,
            RuleStatus::Pruned
        );
        assert_eq!(
            store.get(&good.id).unwrap().unwrap().status,
            RuleStatus::Active
        );
    }

    #[test]
    fn test_prune_stale() {
        let store = RuleStore::in_memory();
        let mut stale = ExtractedRule::new("When time passes", "Rules go stale");
        stale.created_at = Utc::now() - Duration::days(120);
        store.backend.add(&stale).unwrap();

        let mut fresh = ExtractedRule::new("When rules are used", "They stay fresh");
        fresh.last_used = Some(Utc::now());
        store.backend.add(&fresh).unwrap();

        let deprecated = store.prune_stale(90).unwrap();
        assert_eq!(deprecated, vec![stale.id.clone()]);
        assert_eq!(
            store.get(&stale.id).unwrap().unwrap().status,
            RuleStatus::Deprecated
        );
    }

    #[test]
    fn test_stats() {
        let store = RuleStore::in_memory();
        store
            .add(&ExtractedRule::new("When a", "Do b").with_category(RuleCategory::Research))
            .unwrap();
        store
            .add(&ExtractedRule::new("When completely different things", "Do c"))
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_rules, 2);
        assert_eq!(stats.active_rules, 2);
        assert_eq!(stats.rules_by_category.get("research"), Some(&1));
        assert_eq!(stats.recent_extractions, 2);
        assert!(stats.average_effectiveness > 0.0);
    }

    #[test]
    fn test_export_import_merge() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        let path_str = path.to_str().unwrap();

        let store = RuleStore::in_memory();
        let mut rule = ExtractedRule::new("When exporting rules", "Keep the better version");
        rule.success_count = 9;
        store.backend.add(&rule).unwrap();

        let exported = store.export_rules(path_str, true).unwrap();
        assert_eq!(exported, 1);

        // Import into a store holding a weaker version of the same rule
        let other = RuleStore::in_memory();
        let mut weaker = rule.clone();
        weaker.success_count = 1;
        weaker.failure_count = 5;
        other.backend.add(&weaker).unwrap();

        let imported = other.import_rules(path_str, true).unwrap();
        assert_eq!(imported, 1);
        assert_eq!(other.get(&rule.id).unwrap().unwrap().success_count, 9);
    }

    #[test]
    fn test_top_rules_ordering() {
        let store = RuleStore::in_memory();
        let mut strong = ExtractedRule::new("When strong rules exist", "Rank them first");
        strong.success_count = 20;
        store.backend.add(&strong).unwrap();

        let weak = ExtractedRule::new("When weak rules exist entirely elsewhere", "Rank them later");
        store.backend.add(&weak).unwrap();

        let top = store.get_top_rules(2).unwrap();
        assert_eq!(top[0].id, strong.id);
    }
}
