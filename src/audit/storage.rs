//! Storage backends for audit entries.
//!
//! Three implementations share the [`AuditStorage`] trait: an in-memory
//! store for tests and default managers, a JSON-Lines file store with
//! rotation, and a SQLite store for large trails.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{error, warn};

use crate::audit::entry::{AuditEntry, DecisionType, VerificationStatus};
use crate::error::{Error, Result};

/// Abstract storage backend for audit entries.
pub trait AuditStorage: Send + Sync {
    /// Store an entry; storing an existing id overwrites in place.
    fn store(&self, entry: &AuditEntry) -> Result<()>;

    /// Retrieve an entry by id.
    fn get(&self, entry_id: &str) -> Result<Option<AuditEntry>>;

    /// All entries in stored (chronological) order.
    fn all_entries(&self) -> Result<Vec<AuditEntry>>;

    /// Entries within an inclusive date range.
    fn entries_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>>;

    /// Hash of the most recent entry, or `""` when empty.
    fn latest_hash(&self) -> Result<String>;

    fn entries_by_session(&self, session_id: &str) -> Result<Vec<AuditEntry>>;

    fn entries_by_agent(&self, agent_id: &str) -> Result<Vec<AuditEntry>>;

    fn entries_by_type(&self, decision_type: DecisionType) -> Result<Vec<AuditEntry>>;

    fn entries_by_verification_status(
        &self,
        status: VerificationStatus,
    ) -> Result<Vec<AuditEntry>>;

    fn count(&self) -> Result<usize>;

    /// Remove all entries. Admin use only.
    fn clear(&self) -> Result<()>;
}

// ==================== In-memory backend ====================

#[derive(Default)]
struct MemoryInner {
    entries: Vec<AuditEntry>,
    index: HashMap<String, usize>,
}

/// In-memory storage backend.
#[derive(Default)]
pub struct MemoryAuditStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryInner> {
        self.inner.read().expect("audit store lock poisoned")
    }
}

impl AuditStorage for MemoryAuditStore {
    fn store(&self, entry: &AuditEntry) -> Result<()> {
        let mut inner = self.inner.write().expect("audit store lock poisoned");
        let existing = inner.index.get(&entry.entry_id).copied();
        match existing {
            Some(idx) => inner.entries[idx] = entry.clone(),
            None => {
                let idx = inner.entries.len();
                inner.index.insert(entry.entry_id.clone(), idx);
                inner.entries.push(entry.clone());
            }
        }
        Ok(())
    }

    fn get(&self, entry_id: &str) -> Result<Option<AuditEntry>> {
        let inner = self.read();
        Ok(inner
            .index
            .get(entry_id)
            .map(|&idx| inner.entries[idx].clone()))
    }

    fn all_entries(&self) -> Result<Vec<AuditEntry>> {
        Ok(self.read().entries.clone())
    }

    fn entries_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>> {
        Ok(self
            .read()
            .entries
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .cloned()
            .collect())
    }

    fn latest_hash(&self) -> Result<String> {
        Ok(self
            .read()
            .entries
            .last()
            .map(|e| e.entry_hash.clone())
            .unwrap_or_default())
    }

    fn entries_by_session(&self, session_id: &str) -> Result<Vec<AuditEntry>> {
        Ok(self
            .read()
            .entries
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect())
    }

    fn entries_by_agent(&self, agent_id: &str) -> Result<Vec<AuditEntry>> {
        Ok(self
            .read()
            .entries
            .iter()
            .filter(|e| e.agent_id == agent_id)
            .cloned()
            .collect())
    }

    fn entries_by_type(&self, decision_type: DecisionType) -> Result<Vec<AuditEntry>> {
        Ok(self
            .read()
            .entries
            .iter()
            .filter(|e| e.decision_type == decision_type)
            .cloned()
            .collect())
    }

    fn entries_by_verification_status(
        &self,
        status: VerificationStatus,
    ) -> Result<Vec<AuditEntry>> {
        Ok(self
            .read()
            .entries
            .iter()
            .filter(|e| e.verification_status == status)
            .cloned()
            .collect())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.read().entries.len())
    }

    fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write().expect("audit store lock poisoned");
        inner.entries.clear();
        inner.index.clear();
        Ok(())
    }
}

// ==================== JSON-Lines file backend ====================

/// File-based storage using JSON-Lines, one entry per line.
///
/// Files rotate at a configured size. Malformed lines are logged and
/// skipped, never repaired.
pub struct FileAuditStore {
    storage_path: PathBuf,
    max_file_size: u64,
    rotate_files: bool,
    current_file: Mutex<PathBuf>,
}

impl FileAuditStore {
    pub fn new(
        storage_path: impl AsRef<str>,
        max_file_size_mb: u64,
        rotate_files: bool,
    ) -> Result<Self> {
        let expanded = shellexpand::tilde(storage_path.as_ref()).into_owned();
        let path = PathBuf::from(expanded);
        std::fs::create_dir_all(&path)?;

        let store = Self {
            storage_path: path,
            max_file_size: max_file_size_mb * 1024 * 1024,
            rotate_files,
            current_file: Mutex::new(PathBuf::new()),
        };
        let current = store.current_or_new_file()?;
        *store.current_file.lock().expect("file lock") = current;
        Ok(store)
    }

    fn audit_files(&self) -> Vec<PathBuf> {
        let pattern = self.storage_path.join("audit_*.jsonl");
        let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
            .map(|paths| paths.filter_map(|p| p.ok()).collect())
            .unwrap_or_default();
        files.sort();
        files
    }

    fn current_or_new_file(&self) -> Result<PathBuf> {
        if let Some(latest) = self.audit_files().into_iter().next_back() {
            let size = std::fs::metadata(&latest).map(|m| m.len()).unwrap_or(0);
            if size < self.max_file_size {
                return Ok(latest);
            }
        }
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S%f");
        Ok(self.storage_path.join(format!("audit_{}.jsonl", timestamp)))
    }

    fn maybe_rotate(&self) -> Result<()> {
        if !self.rotate_files {
            return Ok(());
        }
        let mut current = self.current_file.lock().expect("file lock");
        if current.exists() {
            let size = std::fs::metadata(&*current).map(|m| m.len()).unwrap_or(0);
            if size >= self.max_file_size {
                *current = self.current_or_new_file()?;
            }
        }
        Ok(())
    }

    fn iter_all(&self) -> Vec<AuditEntry> {
        let mut entries = Vec::new();
        for file_path in self.audit_files() {
            let content = match std::fs::read_to_string(&file_path) {
                Ok(content) => content,
                Err(e) => {
                    error!("Error reading {}: {}", file_path.display(), e);
                    continue;
                }
            };
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<AuditEntry>(line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!("Invalid JSON in {}: {}", file_path.display(), e),
                }
            }
        }
        entries
    }

    fn read_tail(path: &Path, max_bytes: u64) -> std::io::Result<String> {
        let mut file = std::fs::File::open(path)?;
        let size = file.seek(SeekFrom::End(0))?;
        let start = size.saturating_sub(max_bytes);
        file.seek(SeekFrom::Start(start))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        Ok(buf)
    }
}

impl AuditStorage for FileAuditStore {
    fn store(&self, entry: &AuditEntry) -> Result<()> {
        self.maybe_rotate()?;
        let current = self.current_file.lock().expect("file lock").clone();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&current)?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn get(&self, entry_id: &str) -> Result<Option<AuditEntry>> {
        Ok(self
            .iter_all()
            .into_iter()
            .rev()
            .find(|e| e.entry_id == entry_id))
    }

    fn all_entries(&self) -> Result<Vec<AuditEntry>> {
        Ok(self.iter_all())
    }

    fn entries_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>> {
        Ok(self
            .iter_all()
            .into_iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .collect())
    }

    fn latest_hash(&self) -> Result<String> {
        for file_path in self.audit_files().into_iter().rev() {
            let tail = match Self::read_tail(&file_path, 8192) {
                Ok(tail) => tail,
                Err(e) => {
                    warn!("Error reading tail of {}: {}", file_path.display(), e);
                    continue;
                }
            };
            if let Some(last_line) = tail.lines().rev().find(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<serde_json::Value>(last_line.trim()) {
                    Ok(value) => {
                        return Ok(value
                            .get("entry_hash")
                            .and_then(|h| h.as_str())
                            .unwrap_or("")
                            .to_string());
                    }
                    Err(e) => warn!("Invalid tail line in {}: {}", file_path.display(), e),
                }
            }
        }
        Ok(String::new())
    }

    fn entries_by_session(&self, session_id: &str) -> Result<Vec<AuditEntry>> {
        Ok(self
            .iter_all()
            .into_iter()
            .filter(|e| e.session_id == session_id)
            .collect())
    }

    fn entries_by_agent(&self, agent_id: &str) -> Result<Vec<AuditEntry>> {
        Ok(self
            .iter_all()
            .into_iter()
            .filter(|e| e.agent_id == agent_id)
            .collect())
    }

    fn entries_by_type(&self, decision_type: DecisionType) -> Result<Vec<AuditEntry>> {
        Ok(self
            .iter_all()
            .into_iter()
            .filter(|e| e.decision_type == decision_type)
            .collect())
    }

    fn entries_by_verification_status(
        &self,
        status: VerificationStatus,
    ) -> Result<Vec<AuditEntry>> {
        Ok(self
            .iter_all()
            .into_iter()
            .filter(|e| e.verification_status == status)
            .collect())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.iter_all().len())
    }

    fn clear(&self) -> Result<()> {
        for file_path in self.audit_files() {
            std::fs::remove_file(&file_path)?;
        }
        let mut current = self.current_file.lock().expect("file lock");
        *current = self.current_or_new_file()?;
        Ok(())
    }
}

// ==================== SQLite backend ====================

/// SQLite-based storage backend for large audit trails.
pub struct SqliteAuditStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditStore {
    /// Open or create the database at `db_path`. WAL mode is optional and
    /// recommended for concurrent readers.
    pub fn open(db_path: impl AsRef<str>, wal_mode: bool) -> Result<Self> {
        let expanded = shellexpand::tilde(db_path.as_ref()).into_owned();
        let path = PathBuf::from(expanded);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path).map_err(|e| Error::storage(e.to_string()))?;
        Self::init(conn, wal_mode)
    }

    /// In-memory database, for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::storage(e.to_string()))?;
        Self::init(conn, false)
    }

    fn init(conn: Connection, wal_mode: bool) -> Result<Self> {
        if wal_mode {
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(|e| Error::storage(e.to_string()))?;
        }
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_entries (
                entry_id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                session_id TEXT,
                conversation_id TEXT,
                decision_type TEXT NOT NULL,
                agent_id TEXT,
                model_name TEXT,
                model_version TEXT,
                input_hash TEXT,
                input_summary TEXT,
                input_token_count INTEGER DEFAULT 0,
                context_sources TEXT,
                reasoning_summary TEXT,
                alternatives_considered TEXT,
                selected_action TEXT,
                confidence_score REAL DEFAULT 0.0,
                rules_applied TEXT,
                output_hash TEXT,
                output_summary TEXT,
                output_token_count INTEGER DEFAULT 0,
                verification_status TEXT DEFAULT 'pending',
                verifier_ids TEXT,
                verification_scores TEXT,
                source_documents TEXT,
                parent_entry_id TEXT,
                child_entry_ids TEXT,
                previous_entry_hash TEXT,
                entry_hash TEXT,
                metadata TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_entries(timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_session_id ON audit_entries(session_id);
            CREATE INDEX IF NOT EXISTS idx_audit_agent_id ON audit_entries(agent_id);
            CREATE INDEX IF NOT EXISTS idx_audit_decision_type ON audit_entries(decision_type);
            CREATE INDEX IF NOT EXISTS idx_audit_verification_status
                ON audit_entries(verification_status);",
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

    const SELECT_COLUMNS: &'static str = "entry_id, timestamp, session_id, conversation_id,
        decision_type, agent_id, model_name, model_version, input_hash, input_summary,
        input_token_count, context_sources, reasoning_summary, alternatives_considered,
        selected_action, confidence_score, rules_applied, output_hash, output_summary,
        output_token_count, verification_status, verifier_ids, verification_scores,
        source_documents, parent_entry_id, child_entry_ids, previous_entry_hash,
        entry_hash, metadata";

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<AuditEntry> {
        fn json_list(value: Option<String>) -> Vec<String> {
            value
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default()
        }

        let decision_type: String = row.get(4)?;
        let verification_status: String = row.get(20)?;

        Ok(AuditEntry {
            entry_id: row.get(0)?,
            timestamp: parse_datetime(row.get::<_, String>(1)?),
            session_id: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            conversation_id: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            decision_type: DecisionType::parse(&decision_type),
            agent_id: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            model_name: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            model_version: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            input_hash: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
            input_summary: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
            input_token_count: row.get::<_, i64>(10)? as u64,
            context_sources: json_list(row.get(11)?),
            reasoning_summary: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
            alternatives_considered: row
                .get::<_, Option<String>>(13)?
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            selected_action: row.get::<_, Option<String>>(14)?.unwrap_or_default(),
            confidence_score: row.get(15)?,
            rules_applied: json_list(row.get(16)?),
            output_hash: row.get::<_, Option<String>>(17)?.unwrap_or_default(),
            output_summary: row.get::<_, Option<String>>(18)?.unwrap_or_default(),
            output_token_count: row.get::<_, i64>(19)? as u64,
            verification_status: VerificationStatus::parse(&verification_status),
            verifier_ids: json_list(row.get(21)?),
            verification_scores: row
                .get::<_, Option<String>>(22)?
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            source_documents: json_list(row.get(23)?),
            parent_entry_id: row.get(24)?,
            child_entry_ids: json_list(row.get(25)?),
            previous_entry_hash: row.get::<_, Option<String>>(26)?.unwrap_or_default(),
            entry_hash: row.get::<_, Option<String>>(27)?.unwrap_or_default(),
            metadata: row
                .get::<_, Option<String>>(28)?
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
        })
    }

    fn select_where(&self, clause: &str, param: &dyn rusqlite::ToSql) -> Result<Vec<AuditEntry>> {
        let sql = format!(
            "SELECT {} FROM audit_entries WHERE {} ORDER BY timestamp ASC, rowid ASC",
            Self::SELECT_COLUMNS,
            clause
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let entries = stmt
                .query_map(params![param], Self::row_to_entry)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(entries)
        })
    }
}

impl AuditStorage for SqliteAuditStore {
    fn store(&self, entry: &AuditEntry) -> Result<()> {
        let context_sources = serde_json::to_string(&entry.context_sources)?;
        let alternatives = serde_json::to_string(&entry.alternatives_considered)?;
        let rules_applied = serde_json::to_string(&entry.rules_applied)?;
        let verifier_ids = serde_json::to_string(&entry.verifier_ids)?;
        let verification_scores = serde_json::to_string(&entry.verification_scores)?;
        let source_documents = serde_json::to_string(&entry.source_documents)?;
        let child_entry_ids = serde_json::to_string(&entry.child_entry_ids)?;
        let metadata = serde_json::to_string(&entry.metadata)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO audit_entries (
                    entry_id, timestamp, session_id, conversation_id, decision_type,
                    agent_id, model_name, model_version, input_hash, input_summary,
                    input_token_count, context_sources, reasoning_summary,
                    alternatives_considered, selected_action, confidence_score,
                    rules_applied, output_hash, output_summary, output_token_count,
                    verification_status, verifier_ids, verification_scores,
                    source_documents, parent_entry_id, child_entry_ids,
                    previous_entry_hash, entry_hash, metadata
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                          ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26,
                          ?27, ?28, ?29)",
                params![
                    entry.entry_id,
                    entry.timestamp.to_rfc3339(),
                    entry.session_id,
                    entry.conversation_id,
                    entry.decision_type.as_str(),
                    entry.agent_id,
                    entry.model_name,
                    entry.model_version,
                    entry.input_hash,
                    entry.input_summary,
                    entry.input_token_count as i64,
                    context_sources,
                    entry.reasoning_summary,
                    alternatives,
                    entry.selected_action,
                    entry.confidence_score,
                    rules_applied,
                    entry.output_hash,
                    entry.output_summary,
                    entry.output_token_count as i64,
                    entry.verification_status.as_str(),
                    verifier_ids,
                    verification_scores,
                    source_documents,
                    entry.parent_entry_id,
                    child_entry_ids,
                    entry.previous_entry_hash,
                    entry.entry_hash,
                    metadata,
                ],
            )?;
            Ok(())
        })
    }

    fn get(&self, entry_id: &str) -> Result<Option<AuditEntry>> {
        let sql = format!(
            "SELECT {} FROM audit_entries WHERE entry_id = ?1",
            Self::SELECT_COLUMNS
        );
        self.with_conn(|conn| {
            conn.query_row(&sql, params![entry_id], Self::row_to_entry)
                .optional()
        })
    }

    fn all_entries(&self) -> Result<Vec<AuditEntry>> {
        let sql = format!(
            "SELECT {} FROM audit_entries ORDER BY timestamp ASC, rowid ASC",
            Self::SELECT_COLUMNS
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let entries = stmt
                .query_map([], Self::row_to_entry)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(entries)
        })
    }

    fn entries_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>> {
        let sql = format!(
            "SELECT {} FROM audit_entries WHERE timestamp >= ?1 AND timestamp <= ?2
             ORDER BY timestamp ASC, rowid ASC",
            Self::SELECT_COLUMNS
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let entries = stmt
                .query_map(
                    params![start.to_rfc3339(), end.to_rfc3339()],
                    Self::row_to_entry,
                )?
                .filter_map(|r| r.ok())
                .collect();
            Ok(entries)
        })
    }

    fn latest_hash(&self) -> Result<String> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT entry_hash FROM audit_entries
                 ORDER BY timestamp DESC, rowid DESC LIMIT 1",
                [],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .map(|r| r.flatten().unwrap_or_default())
        })
    }

    fn entries_by_session(&self, session_id: &str) -> Result<Vec<AuditEntry>> {
        self.select_where("session_id = ?1", &session_id)
    }

    fn entries_by_agent(&self, agent_id: &str) -> Result<Vec<AuditEntry>> {
        self.select_where("agent_id = ?1", &agent_id)
    }

    fn entries_by_type(&self, decision_type: DecisionType) -> Result<Vec<AuditEntry>> {
        self.select_where("decision_type = ?1", &decision_type.as_str())
    }

    fn entries_by_verification_status(
        &self,
        status: VerificationStatus,
    ) -> Result<Vec<AuditEntry>> {
        self.select_where("verification_status = ?1", &status.as_str())
    }

    fn count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM audit_entries", [], |row| {
                row.get::<_, i64>(0)
            })
        })
        .map(|n| n as usize)
    }

    fn clear(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM audit_entries", [])?;
            Ok(())
        })
    }
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_entry(agent: &str, session: &str) -> AuditEntry {
        let mut entry = AuditEntry {
            agent_id: agent.to_string(),
            session_id: session.to_string(),
            input_hash: AuditEntry::payload_hash(&json!({"a": 1})),
            output_hash: AuditEntry::payload_hash(&json!({"b": 2})),
            ..Default::default()
        };
        entry.finalize();
        entry
    }

    fn exercise_backend(store: &dyn AuditStorage) {
        assert_eq!(store.latest_hash().unwrap(), "");

        let e1 = make_entry("planner", "s1");
        let e2 = make_entry("researcher", "s1");
        let e3 = make_entry("planner", "s2");

        store.store(&e1).unwrap();
        store.store(&e2).unwrap();
        store.store(&e3).unwrap();

        assert_eq!(store.count().unwrap(), 3);
        assert_eq!(store.get(&e2.entry_id).unwrap().unwrap().agent_id, "researcher");
        assert!(store.get("missing").unwrap().is_none());

        assert_eq!(store.entries_by_session("s1").unwrap().len(), 2);
        assert_eq!(store.entries_by_agent("planner").unwrap().len(), 2);
        assert_eq!(
            store
                .entries_by_type(DecisionType::OutputGeneration)
                .unwrap()
                .len(),
            3
        );
        assert_eq!(
            store
                .entries_by_verification_status(VerificationStatus::Pending)
                .unwrap()
                .len(),
            3
        );

        let all = store.all_entries().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(store.latest_hash().unwrap(), all.last().unwrap().entry_hash);
    }

    #[test]
    fn test_memory_backend() {
        let store = MemoryAuditStore::new();
        exercise_backend(&store);
    }

    #[test]
    fn test_memory_in_place_update() {
        let store = MemoryAuditStore::new();
        let mut entry = make_entry("planner", "s1");
        store.store(&entry).unwrap();

        entry.set_verification(VerificationStatus::Verified, "judge", Some(0.8));
        entry.finalize();
        store.store(&entry).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let fetched = store.get(&entry.entry_id).unwrap().unwrap();
        assert_eq!(fetched.verification_status, VerificationStatus::Verified);
    }

    #[test]
    fn test_sqlite_backend() {
        let store = SqliteAuditStore::in_memory().unwrap();
        exercise_backend(&store);
    }

    #[test]
    fn test_sqlite_replace_existing_id() {
        let store = SqliteAuditStore::in_memory().unwrap();
        let mut entry = make_entry("planner", "s1");
        store.store(&entry).unwrap();

        entry.verification_status = VerificationStatus::Failed;
        entry.finalize();
        store.store(&entry).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(
            store.get(&entry.entry_id).unwrap().unwrap().verification_status,
            VerificationStatus::Failed
        );
    }

    #[test]
    fn test_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAuditStore::new(dir.path().to_str().unwrap(), 100, true).unwrap();
        exercise_backend(&store);
    }

    #[test]
    fn test_file_backend_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAuditStore::new(dir.path().to_str().unwrap(), 100, true).unwrap();

        let entry = make_entry("planner", "s1");
        store.store(&entry).unwrap();

        // Corrupt the file with a garbage line
        let file = store.audit_files().pop().unwrap();
        let mut f = std::fs::OpenOptions::new().append(true).open(&file).unwrap();
        writeln!(f, "{{not json").unwrap();

        let entry2 = make_entry("researcher", "s1");
        store.store(&entry2).unwrap();

        let all = store.all_entries().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(store.latest_hash().unwrap(), entry2.entry_hash);
    }

    #[test]
    fn test_file_backend_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap().to_string();

        let entry = make_entry("planner", "s1");
        {
            let store = FileAuditStore::new(&path, 100, true).unwrap();
            store.store(&entry).unwrap();
        }

        let reopened = FileAuditStore::new(&path, 100, true).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
        assert_eq!(reopened.latest_hash().unwrap(), entry.entry_hash);
    }

    #[test]
    fn test_clear() {
        let store = MemoryAuditStore::new();
        store.store(&make_entry("a", "s")).unwrap();
        store.clear().unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.latest_hash().unwrap(), "");
    }
}
