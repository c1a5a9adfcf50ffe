//! Knowledge graph storage backends.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{Error, Result};
use crate::knowledge::graph::{
    Claim, Entity, EntityKey, EntityType, GraphStore, ProvenanceNode, RelationType, Source,
};

/// Cosine similarity between two vectors; 0.0 on length mismatch or zero
/// norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

// ==================== In-memory backend ====================

#[derive(Default)]
struct MemoryGraphInner {
    claims: HashMap<String, Claim>,
    sources: HashMap<String, Source>,
    entities: HashMap<EntityKey, Entity>,
    topics: HashSet<String>,
    relationships: HashMap<(String, String, RelationType), HashMap<String, Value>>,
    claims_by_source: HashMap<String, Vec<String>>,
    claims_by_entity: HashMap<EntityKey, Vec<String>>,
    claims_by_topic: HashMap<String, Vec<String>>,
    claims_by_session: HashMap<String, Vec<String>>,
}

impl MemoryGraphInner {
    fn unlink_claim(&mut self, claim_id: &str) {
        for ids in self.claims_by_source.values_mut() {
            ids.retain(|id| id != claim_id);
        }
        for ids in self.claims_by_entity.values_mut() {
            ids.retain(|id| id != claim_id);
        }
        for ids in self.claims_by_topic.values_mut() {
            ids.retain(|id| id != claim_id);
        }
        for ids in self.claims_by_session.values_mut() {
            ids.retain(|id| id != claim_id);
        }
    }
}

/// In-memory knowledge graph storage for tests and small graphs.
#[derive(Default)]
pub struct MemoryGraphStore {
    inner: RwLock<MemoryGraphInner>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryGraphInner> {
        self.inner.read().expect("graph lock poisoned")
    }
}

impl GraphStore for MemoryGraphStore {
    fn store_claim(&self, claim: &Claim) -> Result<String> {
        let mut inner = self.inner.write().expect("graph lock poisoned");

        // Insert-or-replace: drop stale index links first.
        if inner.claims.contains_key(&claim.claim_id) {
            inner.unlink_claim(&claim.claim_id);
        }
        inner.claims.insert(claim.claim_id.clone(), claim.clone());

        inner
            .claims_by_source
            .entry(claim.source_url.clone())
            .or_default()
            .push(claim.claim_id.clone());

        if !inner.sources.contains_key(&claim.source_url) {
            let mut source = Source::new(&claim.source_url).with_title(&claim.source_title);
            source.publication_date = claim.publication_date;
            inner.sources.insert(claim.source_url.clone(), source);
        }

        let sourced_meta = HashMap::from([
            (
                "extraction_date".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            ),
            ("agent_id".to_string(), Value::String(claim.agent_id.clone())),
        ]);
        inner.relationships.insert(
            (
                claim.claim_id.clone(),
                claim.source_url.clone(),
                RelationType::SourcedFrom,
            ),
            sourced_meta,
        );

        for entity in &claim.entities {
            let key = entity.key();
            inner.entities.insert(key.clone(), entity.clone());
            inner
                .claims_by_entity
                .entry(key)
                .or_default()
                .push(claim.claim_id.clone());
            inner.relationships.insert(
                (
                    claim.claim_id.clone(),
                    format!("entity:{}", entity.name),
                    RelationType::Mentions,
                ),
                HashMap::new(),
            );
        }

        for topic in &claim.topics {
            inner.topics.insert(topic.clone());
            inner
                .claims_by_topic
                .entry(topic.clone())
                .or_default()
                .push(claim.claim_id.clone());
            inner.relationships.insert(
                (
                    claim.claim_id.clone(),
                    format!("topic:{}", topic),
                    RelationType::About,
                ),
                HashMap::new(),
            );
        }

        if !claim.session_id.is_empty() {
            inner
                .claims_by_session
                .entry(claim.session_id.clone())
                .or_default()
                .push(claim.claim_id.clone());
            inner.relationships.insert(
                (
                    claim.claim_id.clone(),
                    format!("session:{}", claim.session_id),
                    RelationType::GeneratedIn,
                ),
                HashMap::new(),
            );
        }

        Ok(claim.claim_id.clone())
    }

    fn get_claim(&self, claim_id: &str) -> Result<Option<Claim>> {
        Ok(self.read().claims.get(claim_id).cloned())
    }

    fn store_source(&self, source: &Source) -> Result<String> {
        self.inner
            .write()
            .expect("graph lock poisoned")
            .sources
            .insert(source.url.clone(), source.clone());
        Ok(source.url.clone())
    }

    fn get_source(&self, url: &str) -> Result<Option<Source>> {
        Ok(self.read().sources.get(url).cloned())
    }

    fn add_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        relation_type: RelationType,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<bool> {
        self.inner.write().expect("graph lock poisoned").relationships.insert(
            (from_id.to_string(), to_id.to_string(), relation_type),
            metadata.unwrap_or_default(),
        );
        Ok(true)
    }

    fn find_claims_by_embedding(
        &self,
        embedding: &[f32],
        limit: usize,
        min_similarity: f64,
    ) -> Result<Vec<(Claim, f64)>> {
        let inner = self.read();
        let mut results: Vec<(Claim, f64)> = inner
            .claims
            .values()
            .filter_map(|claim| {
                claim.embedding.as_ref().and_then(|emb| {
                    let similarity = cosine_similarity(embedding, emb);
                    (similarity >= min_similarity).then(|| (claim.clone(), similarity))
                })
            })
            .collect();

        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        Ok(results)
    }

    fn find_claims_by_entity(
        &self,
        entity_name: &str,
        entity_type: Option<EntityType>,
    ) -> Result<Vec<Claim>> {
        let inner = self.read();
        let claim_ids: Vec<String> = match entity_type {
            Some(entity_type) => inner
                .claims_by_entity
                .get(&(entity_name.to_string(), entity_type))
                .cloned()
                .unwrap_or_default(),
            None => {
                let lowered = entity_name.to_lowercase();
                inner
                    .claims_by_entity
                    .iter()
                    .filter(|((name, _), _)| name.to_lowercase() == lowered)
                    .flat_map(|(_, ids)| ids.clone())
                    .collect()
            }
        };

        Ok(claim_ids
            .iter()
            .filter_map(|id| inner.claims.get(id).cloned())
            .collect())
    }

    fn find_claims_by_topic(&self, topic: &str) -> Result<Vec<Claim>> {
        let inner = self.read();
        Ok(inner
            .claims_by_topic
            .get(topic)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.claims.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn find_claims_by_session(&self, session_id: &str) -> Result<Vec<Claim>> {
        let inner = self.read();
        Ok(inner
            .claims_by_session
            .get(session_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.claims.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn get_provenance_chain(
        &self,
        claim_id: &str,
        max_depth: usize,
    ) -> Result<Vec<ProvenanceNode>> {
        let inner = self.read();
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<(String, usize)> = vec![(claim_id.to_string(), 0)];

        while let Some((node_id, depth)) = stack.pop() {
            if depth > max_depth || !visited.insert(node_id.clone()) {
                continue;
            }

            if let Some(claim) = inner.claims.get(&node_id) {
                chain.push(ProvenanceNode::Claim {
                    id: node_id.clone(),
                    text: claim.text.clone(),
                    confidence: claim.confidence,
                });
            } else if let Some(source) = inner.sources.get(&node_id) {
                chain.push(ProvenanceNode::Source {
                    url: source.url.clone(),
                    title: source.title.clone(),
                });
            }

            for (from_id, to_id, rel_type) in inner.relationships.keys() {
                if from_id == &node_id
                    && matches!(
                        rel_type,
                        RelationType::SourcedFrom | RelationType::DerivedFrom
                    )
                {
                    stack.push((to_id.clone(), depth + 1));
                }
            }
        }

        Ok(chain)
    }

    fn get_related_claims(&self, claim_id: &str, max_hops: usize) -> Result<Vec<(Claim, usize)>> {
        let inner = self.read();
        let claim = match inner.claims.get(claim_id) {
            Some(claim) => claim,
            None => return Ok(Vec::new()),
        };

        let mut related: HashMap<String, usize> = HashMap::new();

        for entity in &claim.entities {
            if let Some(ids) = inner.claims_by_entity.get(&entity.key()) {
                for other_id in ids {
                    if other_id != claim_id {
                        related.entry(other_id.clone()).or_insert(1);
                    }
                }
            }
        }

        for topic in &claim.topics {
            if let Some(ids) = inner.claims_by_topic.get(topic) {
                for other_id in ids {
                    if other_id != claim_id {
                        related.entry(other_id.clone()).or_insert(1);
                    }
                }
            }
        }

        if max_hops > 1 {
            let first_hop: Vec<(String, usize)> =
                related.iter().map(|(id, hops)| (id.clone(), *hops)).collect();
            for (other_id, hops) in first_hop {
                if hops < max_hops {
                    if let Some(other_claim) = inner.claims.get(&other_id) {
                        for entity in &other_claim.entities {
                            if let Some(ids) = inner.claims_by_entity.get(&entity.key()) {
                                for third_id in ids {
                                    if third_id != claim_id && !related.contains_key(third_id) {
                                        related.insert(third_id.clone(), hops + 1);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        Ok(related
            .into_iter()
            .filter_map(|(id, hops)| inner.claims.get(&id).map(|c| (c.clone(), hops)))
            .collect())
    }

    fn count_claims(&self) -> Result<usize> {
        Ok(self.read().claims.len())
    }

    fn count_sources(&self) -> Result<usize> {
        Ok(self.read().sources.len())
    }

    fn count_entities(&self) -> Result<usize> {
        Ok(self.read().entities.len())
    }
}

// ==================== SQLite backend ====================

/// SQLite-based knowledge graph storage.
///
/// Relational tables simulate the graph; `store_claim` commits the claim
/// and all auxiliary upserts in one transaction.
pub struct SqliteGraphStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteGraphStore {
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
            "CREATE TABLE IF NOT EXISTS claims (
                claim_id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                confidence REAL DEFAULT 0.0,
                source_url TEXT NOT NULL,
                source_title TEXT,
                publication_date TEXT,
                agent_id TEXT,
                session_id TEXT,
                embedding TEXT,
                created_at TEXT NOT NULL,
                metadata TEXT
            );
            CREATE TABLE IF NOT EXISTS sources (
                url TEXT PRIMARY KEY,
                title TEXT,
                publication_date TEXT,
                author TEXT,
                domain TEXT,
                last_accessed TEXT,
                metadata TEXT
            );
            CREATE TABLE IF NOT EXISTS entities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                metadata TEXT,
                valid_from TEXT,
                valid_to TEXT,
                source_location TEXT,
                UNIQUE(name, entity_type)
            );
            CREATE TABLE IF NOT EXISTS topics (
                name TEXT PRIMARY KEY
            );
            CREATE TABLE IF NOT EXISTS claim_entities (
                claim_id TEXT NOT NULL,
                entity_id INTEGER NOT NULL,
                PRIMARY KEY (claim_id, entity_id),
                FOREIGN KEY (claim_id) REFERENCES claims(claim_id),
                FOREIGN KEY (entity_id) REFERENCES entities(id)
            );
            CREATE TABLE IF NOT EXISTS claim_topics (
                claim_id TEXT NOT NULL,
                topic_name TEXT NOT NULL,
                PRIMARY KEY (claim_id, topic_name),
                FOREIGN KEY (claim_id) REFERENCES claims(claim_id),
                FOREIGN KEY (topic_name) REFERENCES topics(name)
            );
            CREATE TABLE IF NOT EXISTS relationships (
                from_id TEXT NOT NULL,
                to_id TEXT NOT NULL,
                relation_type TEXT NOT NULL,
                metadata TEXT,
                created_at TEXT NOT NULL,
                PRIMARY KEY (from_id, to_id, relation_type)
            );
            CREATE INDEX IF NOT EXISTS idx_claims_source ON claims(source_url);
            CREATE INDEX IF NOT EXISTS idx_claims_session ON claims(session_id);
            CREATE INDEX IF NOT EXISTS idx_claims_created ON claims(created_at);
            CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name);
            CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);
            CREATE INDEX IF NOT EXISTS idx_relationships_from ON relationships(from_id);
            CREATE INDEX IF NOT EXISTS idx_relationships_to ON relationships(to_id);",
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

    fn row_to_claim(row: &rusqlite::Row) -> rusqlite::Result<Claim> {
        Ok(Claim {
            claim_id: row.get(0)?,
            text: row.get(1)?,
            confidence: row.get(2)?,
            source_url: row.get(3)?,
            source_title: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            publication_date: row
                .get::<_, Option<String>>(5)?
                .and_then(|s| parse_datetime_opt(&s)),
            agent_id: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            session_id: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            embedding: row
                .get::<_, Option<String>>(8)?
                .and_then(|s| serde_json::from_str(&s).ok()),
            created_at: parse_datetime_opt(&row.get::<_, String>(9)?).unwrap_or_else(Utc::now),
            metadata: row
                .get::<_, Option<String>>(10)?
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            entities: Vec::new(),
            topics: Vec::new(),
        })
    }

    fn load_claim_details(conn: &Connection, claim: &mut Claim) -> rusqlite::Result<()> {
        let mut stmt = conn.prepare(
            "SELECT e.name, e.entity_type, e.metadata, e.valid_from, e.valid_to,
                    e.source_location
             FROM entities e
             JOIN claim_entities ce ON ce.entity_id = e.id
             WHERE ce.claim_id = ?1",
        )?;
        claim.entities = stmt
            .query_map(params![claim.claim_id], |row| {
                Ok(Entity {
                    name: row.get(0)?,
                    entity_type: EntityType::parse(&row.get::<_, String>(1)?),
                    metadata: row
                        .get::<_, Option<String>>(2)?
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or_default(),
                    valid_from: row
                        .get::<_, Option<String>>(3)?
                        .and_then(|s| parse_datetime_opt(&s)),
                    valid_to: row
                        .get::<_, Option<String>>(4)?
                        .and_then(|s| parse_datetime_opt(&s)),
                    source_location: row.get(5)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut stmt = conn.prepare(
            "SELECT topic_name FROM claim_topics WHERE claim_id = ?1 ORDER BY topic_name",
        )?;
        claim.topics = stmt
            .query_map(params![claim.claim_id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(())
    }

    fn claims_where(&self, clause: &str, claim_params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Claim>> {
        let sql = format!(
            "SELECT claim_id, text, confidence, source_url, source_title, publication_date,
                    agent_id, session_id, embedding, created_at, metadata
             FROM claims WHERE {} ORDER BY created_at ASC",
            clause
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut claims: Vec<Claim> = stmt
                .query_map(claim_params, Self::row_to_claim)?
                .filter_map(|r| r.ok())
                .collect();
            for claim in &mut claims {
                Self::load_claim_details(conn, claim)?;
            }
            Ok(claims)
        })
    }
}

impl GraphStore for SqliteGraphStore {
    fn store_claim(&self, claim: &Claim) -> Result<String> {
        let embedding = claim
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let metadata = serde_json::to_string(&claim.metadata)?;

        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            tx.execute(
                "INSERT OR REPLACE INTO claims
                 (claim_id, text, confidence, source_url, source_title, publication_date,
                  agent_id, session_id, embedding, created_at, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    claim.claim_id,
                    claim.text,
                    claim.confidence,
                    claim.source_url,
                    claim.source_title,
                    claim.publication_date.map(|d| d.to_rfc3339()),
                    claim.agent_id,
                    claim.session_id,
                    embedding,
                    claim.created_at.to_rfc3339(),
                    metadata,
                ],
            )?;

            tx.execute(
                "INSERT OR IGNORE INTO sources (url, title, publication_date, last_accessed, metadata)
                 VALUES (?1, ?2, ?3, ?4, '{}')",
                params![
                    claim.source_url,
                    claim.source_title,
                    claim.publication_date.map(|d| d.to_rfc3339()),
                    Utc::now().to_rfc3339(),
                ],
            )?;

            let sourced_meta = serde_json::json!({
                "extraction_date": Utc::now().to_rfc3339(),
                "agent_id": claim.agent_id,
            })
            .to_string();
            tx.execute(
                "INSERT OR REPLACE INTO relationships (from_id, to_id, relation_type, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    claim.claim_id,
                    claim.source_url,
                    RelationType::SourcedFrom.as_str(),
                    sourced_meta,
                    Utc::now().to_rfc3339(),
                ],
            )?;

            for entity in &claim.entities {
                tx.execute(
                    "INSERT OR IGNORE INTO entities
                     (name, entity_type, metadata, valid_from, valid_to, source_location)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        entity.name,
                        entity.entity_type.as_str(),
                        serde_json::to_string(&entity.metadata).unwrap_or_default(),
                        entity.valid_from.map(|d| d.to_rfc3339()),
                        entity.valid_to.map(|d| d.to_rfc3339()),
                        entity.source_location,
                    ],
                )?;

                let entity_id: i64 = tx.query_row(
                    "SELECT id FROM entities WHERE name = ?1 AND entity_type = ?2",
                    params![entity.name, entity.entity_type.as_str()],
                    |row| row.get(0),
                )?;

                tx.execute(
                    "INSERT OR IGNORE INTO claim_entities (claim_id, entity_id) VALUES (?1, ?2)",
                    params![claim.claim_id, entity_id],
                )?;

                tx.execute(
                    "INSERT OR REPLACE INTO relationships (from_id, to_id, relation_type, metadata, created_at)
                     VALUES (?1, ?2, ?3, NULL, ?4)",
                    params![
                        claim.claim_id,
                        format!("entity:{}", entity.name),
                        RelationType::Mentions.as_str(),
                        Utc::now().to_rfc3339(),
                    ],
                )?;
            }

            for topic in &claim.topics {
                tx.execute(
                    "INSERT OR IGNORE INTO topics (name) VALUES (?1)",
                    params![topic],
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO claim_topics (claim_id, topic_name) VALUES (?1, ?2)",
                    params![claim.claim_id, topic],
                )?;
                tx.execute(
                    "INSERT OR REPLACE INTO relationships (from_id, to_id, relation_type, metadata, created_at)
                     VALUES (?1, ?2, ?3, NULL, ?4)",
                    params![
                        claim.claim_id,
                        format!("topic:{}", topic),
                        RelationType::About.as_str(),
                        Utc::now().to_rfc3339(),
                    ],
                )?;
            }

            if !claim.session_id.is_empty() {
                tx.execute(
                    "INSERT OR REPLACE INTO relationships (from_id, to_id, relation_type, metadata, created_at)
                     VALUES (?1, ?2, ?3, NULL, ?4)",
                    params![
                        claim.claim_id,
                        format!("session:{}", claim.session_id),
                        RelationType::GeneratedIn.as_str(),
                        Utc::now().to_rfc3339(),
                    ],
                )?;
            }

            tx.commit()?;
            Ok(())
        })?;

        Ok(claim.claim_id.clone())
    }

    fn get_claim(&self, claim_id: &str) -> Result<Option<Claim>> {
        self.with_conn(|conn| {
            let claim = conn
                .query_row(
                    "SELECT claim_id, text, confidence, source_url, source_title,
                            publication_date, agent_id, session_id, embedding, created_at, metadata
                     FROM claims WHERE claim_id = ?1",
                    params![claim_id],
                    Self::row_to_claim,
                )
                .optional()?;

            match claim {
                Some(mut claim) => {
                    Self::load_claim_details(conn, &mut claim)?;
                    Ok(Some(claim))
                }
                None => Ok(None),
            }
        })
    }

    fn store_source(&self, source: &Source) -> Result<String> {
        let metadata = serde_json::to_string(&source.metadata)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sources
                 (url, title, publication_date, author, domain, last_accessed, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    source.url,
                    source.title,
                    source.publication_date.map(|d| d.to_rfc3339()),
                    source.author,
                    source.domain,
                    source.last_accessed.to_rfc3339(),
                    metadata,
                ],
            )?;
            Ok(())
        })?;
        Ok(source.url.clone())
    }

    fn get_source(&self, url: &str) -> Result<Option<Source>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT url, title, publication_date, author, domain, last_accessed, metadata
                 FROM sources WHERE url = ?1",
                params![url],
                |row| {
                    Ok(Source {
                        url: row.get(0)?,
                        title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        publication_date: row
                            .get::<_, Option<String>>(2)?
                            .and_then(|s| parse_datetime_opt(&s)),
                        author: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        domain: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                        last_accessed: row
                            .get::<_, Option<String>>(5)?
                            .and_then(|s| parse_datetime_opt(&s))
                            .unwrap_or_else(Utc::now),
                        metadata: row
                            .get::<_, Option<String>>(6)?
                            .and_then(|s| serde_json::from_str(&s).ok())
                            .unwrap_or_default(),
                    })
                },
            )
            .optional()
        })
    }

    fn add_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        relation_type: RelationType,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<bool> {
        let metadata = metadata.map(|m| serde_json::to_string(&m)).transpose()?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO relationships
                 (from_id, to_id, relation_type, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    from_id,
                    to_id,
                    relation_type.as_str(),
                    metadata,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(true)
        })
    }

    fn find_claims_by_embedding(
        &self,
        embedding: &[f32],
        limit: usize,
        min_similarity: f64,
    ) -> Result<Vec<(Claim, f64)>> {
        let claims = self.claims_where("embedding IS NOT NULL", &[])?;

        let mut results: Vec<(Claim, f64)> = claims
            .into_iter()
            .filter_map(|claim| {
                let similarity =
                    cosine_similarity(embedding, claim.embedding.as_deref().unwrap_or(&[]));
                (similarity >= min_similarity).then_some((claim, similarity))
            })
            .collect();

        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        Ok(results)
    }

    fn find_claims_by_entity(
        &self,
        entity_name: &str,
        entity_type: Option<EntityType>,
    ) -> Result<Vec<Claim>> {
        let claim_ids: Vec<String> = self.with_conn(|conn| {
            let (sql, type_param) = match entity_type {
                Some(entity_type) => (
                    "SELECT DISTINCT ce.claim_id FROM claim_entities ce
                     JOIN entities e ON e.id = ce.entity_id
                     WHERE e.name = ?1 AND e.entity_type = ?2",
                    Some(entity_type.as_str().to_string()),
                ),
                None => (
                    "SELECT DISTINCT ce.claim_id FROM claim_entities ce
                     JOIN entities e ON e.id = ce.entity_id
                     WHERE LOWER(e.name) = LOWER(?1)",
                    None,
                ),
            };
            let mut stmt = conn.prepare(sql)?;
            let ids = match &type_param {
                Some(type_param) => stmt
                    .query_map(params![entity_name, type_param], |row| row.get(0))?
                    .filter_map(|r| r.ok())
                    .collect(),
                None => stmt
                    .query_map(params![entity_name], |row| row.get(0))?
                    .filter_map(|r| r.ok())
                    .collect(),
            };
            Ok(ids)
        })?;

        let mut claims = Vec::new();
        for id in claim_ids {
            if let Some(claim) = self.get_claim(&id)? {
                claims.push(claim);
            }
        }
        Ok(claims)
    }

    fn find_claims_by_topic(&self, topic: &str) -> Result<Vec<Claim>> {
        let claim_ids: Vec<String> = self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT claim_id FROM claim_topics WHERE topic_name = ?1")?;
            let ids = stmt
                .query_map(params![topic], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect();
            Ok(ids)
        })?;

        let mut claims = Vec::new();
        for id in claim_ids {
            if let Some(claim) = self.get_claim(&id)? {
                claims.push(claim);
            }
        }
        Ok(claims)
    }

    fn find_claims_by_session(&self, session_id: &str) -> Result<Vec<Claim>> {
        self.claims_where("session_id = ?1", &[&session_id])
    }

    fn get_provenance_chain(
        &self,
        claim_id: &str,
        max_depth: usize,
    ) -> Result<Vec<ProvenanceNode>> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<(String, usize)> = vec![(claim_id.to_string(), 0)];

        while let Some((node_id, depth)) = stack.pop() {
            if depth > max_depth || !visited.insert(node_id.clone()) {
                continue;
            }

            if let Some(claim) = self.get_claim(&node_id)? {
                chain.push(ProvenanceNode::Claim {
                    id: node_id.clone(),
                    text: claim.text,
                    confidence: claim.confidence,
                });
            } else if let Some(source) = self.get_source(&node_id)? {
                chain.push(ProvenanceNode::Source {
                    url: source.url,
                    title: source.title,
                });
            }

            let next: Vec<String> = self.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT to_id FROM relationships
                     WHERE from_id = ?1 AND relation_type IN ('sourced_from', 'derived_from')",
                )?;
                let ids = stmt
                    .query_map(params![node_id], |row| row.get(0))?
                    .filter_map(|r| r.ok())
                    .collect();
                Ok(ids)
            })?;

            for to_id in next {
                stack.push((to_id, depth + 1));
            }
        }

        Ok(chain)
    }

    fn get_related_claims(&self, claim_id: &str, max_hops: usize) -> Result<Vec<(Claim, usize)>> {
        let claim = match self.get_claim(claim_id)? {
            Some(claim) => claim,
            None => return Ok(Vec::new()),
        };

        let mut related: HashMap<String, usize> = HashMap::new();

        for entity in &claim.entities {
            for other in self.find_claims_by_entity(&entity.name, Some(entity.entity_type))? {
                if other.claim_id != claim_id {
                    related.entry(other.claim_id).or_insert(1);
                }
            }
        }
        for topic in &claim.topics {
            for other in self.find_claims_by_topic(topic)? {
                if other.claim_id != claim_id {
                    related.entry(other.claim_id).or_insert(1);
                }
            }
        }

        if max_hops > 1 {
            let first_hop: Vec<(String, usize)> =
                related.iter().map(|(id, hops)| (id.clone(), *hops)).collect();
            for (other_id, hops) in first_hop {
                if hops < max_hops {
                    if let Some(other_claim) = self.get_claim(&other_id)? {
                        for entity in &other_claim.entities {
                            for third in
                                self.find_claims_by_entity(&entity.name, Some(entity.entity_type))?
                            {
                                if third.claim_id != claim_id
                                    && !related.contains_key(&third.claim_id)
                                {
                                    related.insert(third.claim_id, hops + 1);
                                }
                            }
                        }
                    }
                }
            }
        }

        let mut results = Vec::new();
        for (id, hops) in related {
            if let Some(claim) = self.get_claim(&id)? {
                results.push((claim, hops));
            }
        }
        Ok(results)
    }

    fn count_claims(&self) -> Result<usize> {
        self.with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM claims", [], |r| r.get::<_, i64>(0)))
            .map(|n| n as usize)
    }

    fn count_sources(&self) -> Result<usize> {
        self.with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM sources", [], |r| r.get::<_, i64>(0)))
            .map(|n| n as usize)
    }

    fn count_entities(&self) -> Result<usize> {
        self.with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM entities", [], |r| r.get::<_, i64>(0)))
            .map(|n| n as usize)
    }
}

fn parse_datetime_opt(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
