//! SQLite-backed Fact Store implementation.
//!
//! Reader/writer connection split for interior mutability: writes serialize
//! through `writer`, reads go through `reader` so they never block behind a
//! write. Both connections open the same file and share SQLite's own
//! `journal_mode=WAL` — a mechanism distinct from, and in addition to, this
//! engine's own `WalEntry` log (see [`crate::wal`]).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{lock_poisoned, EngineError, Result};
use crate::fact::{Category, DecayClass, Fact, Source, Tier};

use super::migrations::apply_migrations;

/// Filters accepted by [`FactStore::search_fts`] and [`FactStore::list`]
/// (§4.1: "filtered by category, tags, tier, and superseded flag").
#[derive(Debug, Clone, Default)]
pub struct FactFilter {
    pub category: Option<Category>,
    pub tag: Option<String>,
    pub tier: Option<Tier>,
    pub entity: Option<String>,
    pub include_superseded: bool,
}

/// Aggregate counts returned by [`FactStore::stats`] (§4.1, §6.3).
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total_facts: i64,
    pub by_category: Vec<(String, i64)>,
    pub by_decay_class: Vec<(String, i64)>,
    pub by_tier: Vec<(String, i64)>,
    pub pending_expiry: i64,
}

/// The relational + full-text index over [`Fact`] rows.
pub struct FactStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl FactStore {
    fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -32000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    }

    /// Open (or create) `facts.db` at `path`, applying pending migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let writer_conn = Connection::open(path)?;
        Self::configure_connection(&writer_conn)?;
        apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
        })
    }

    /// Open an in-memory store, for tests.
    ///
    /// A plain `:memory:` database is private to its own connection, which
    /// would make the writer/reader split invisible to itself; instead both
    /// connections open the same named, shared-cache in-memory database
    /// (`cache=shared`), uniquely named per store so parallel tests never
    /// collide.
    pub fn open_in_memory() -> Result<Self> {
        let uri = format!("file:hearth-core-{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI;

        let writer_conn = Connection::open_with_flags(&uri, flags)?;
        Self::configure_connection(&writer_conn)?;
        apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open_with_flags(&uri, flags)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
        })
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer.lock().map_err(|_| lock_poisoned("fact store writer"))
    }

    fn reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader.lock().map_err(|_| lock_poisoned("fact store reader"))
    }

    /// Insert or replace a fact by id, keeping the FTS index in sync via
    /// triggers (§4.1 `put`).
    pub fn put(&self, fact: &Fact) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO facts (
                id, text, entity, key, value, category, tags, importance,
                confidence, decay_class, created_at, source_date,
                last_confirmed_at, expires_at, tier, superseded_by, source, has_vector
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,
                      COALESCE((SELECT has_vector FROM facts WHERE id = ?1), 0))
            ON CONFLICT(id) DO UPDATE SET
                text = excluded.text,
                entity = excluded.entity,
                key = excluded.key,
                value = excluded.value,
                category = excluded.category,
                tags = excluded.tags,
                importance = excluded.importance,
                confidence = excluded.confidence,
                decay_class = excluded.decay_class,
                source_date = excluded.source_date,
                last_confirmed_at = excluded.last_confirmed_at,
                expires_at = excluded.expires_at,
                tier = excluded.tier,
                superseded_by = excluded.superseded_by,
                source = excluded.source",
            params![
                fact.id,
                fact.text,
                fact.entity,
                fact.key,
                fact.value,
                fact.category.as_str(),
                serde_json::to_string(&fact.tags).unwrap_or_else(|_| "[]".to_string()),
                fact.importance,
                fact.confidence,
                fact.decay_class.as_str(),
                fact.created_at.to_rfc3339(),
                fact.source_date.to_rfc3339(),
                fact.last_confirmed_at.to_rfc3339(),
                fact.expires_at.map(|d| d.to_rfc3339()),
                fact.tier.as_str(),
                fact.superseded_by,
                fact.source.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Mark a fact as having an embedding in the vector index.
    pub fn mark_has_vector(&self, id: &str, has_vector: bool) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "UPDATE facts SET has_vector = ?2 WHERE id = ?1",
            params![id, has_vector as i64],
        )?;
        Ok(())
    }

    /// Persist an embedding as a BLOB keyed by fact id, so the vector index
    /// can be rebuilt on open without re-embedding (§4.2). Cascades away on
    /// `DELETE FROM facts` via the `fact_embeddings` foreign key.
    pub fn put_embedding(&self, fact_id: &str, embedding: &[f32], now: DateTime<Utc>) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO fact_embeddings (fact_id, embedding, dimensions, created_at)
             VALUES (?1,?2,?3,?4)
             ON CONFLICT(fact_id) DO UPDATE SET
                embedding = excluded.embedding,
                dimensions = excluded.dimensions,
                created_at = excluded.created_at",
            params![fact_id, embedding_to_bytes(embedding), embedding.len() as i64, now.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Every persisted embedding, for rebuilding the vector index on open.
    pub fn all_embeddings(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare("SELECT fact_id, embedding FROM fact_embeddings")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (fact_id, bytes) = row?;
            out.push((fact_id, bytes_to_embedding(&bytes)));
        }
        Ok(out)
    }

    /// Point lookup by id.
    pub fn get(&self, id: &str) -> Result<Option<Fact>> {
        let conn = self.reader()?;
        conn.query_row("SELECT * FROM facts WHERE id = ?1", params![id], row_to_fact)
            .optional()
            .map_err(EngineError::from)
    }

    /// Exact-attribute lookup by entity and optional key (§4.1 `find`,
    /// §6.2 `lookup`). Non-superseded facts only, newest first.
    pub fn find(&self, entity: &str, key: Option<&str>) -> Result<Vec<Fact>> {
        let conn = self.reader()?;
        let mut stmt = match key {
            Some(_) => conn.prepare(
                "SELECT * FROM facts WHERE entity = ?1 AND key = ?2 AND superseded_by IS NULL
                 ORDER BY last_confirmed_at DESC",
            )?,
            None => conn.prepare(
                "SELECT * FROM facts WHERE entity = ?1 AND superseded_by IS NULL
                 ORDER BY last_confirmed_at DESC",
            )?,
        };
        let rows = match key {
            Some(k) => stmt.query_map(params![entity, k], row_to_fact)?,
            None => stmt.query_map(params![entity], row_to_fact)?,
        };
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(EngineError::from)
    }

    /// Full-text search over `text`/`entity`/`key`/`value`, returning
    /// `(id, bm25_score)` ranked by relevance (§4.1 `search_fts`). `bm25()`
    /// is negative-is-better in SQLite's FTS5; we negate so higher is
    /// better, matching the rest of the pipeline's score convention.
    pub fn search_fts(&self, query: &str, filter: &FactFilter, limit: usize) -> Result<Vec<(String, f32)>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let sanitized = sanitize_fts5_query(query);
        let conn = self.reader()?;
        let mut sql = String::from(
            "SELECT f.id, -bm25(facts_fts) AS score FROM facts f
             JOIN facts_fts ON facts_fts.rowid = f.rowid
             WHERE facts_fts MATCH ?1",
        );
        push_filter_clauses(&mut sql, filter);
        sql.push_str(" ORDER BY score DESC LIMIT ?2");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![sanitized, limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)? as f32))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(EngineError::from)
    }

    /// List facts matching a filter without a text query (used by the
    /// entity branch and by maintenance passes).
    pub fn list(&self, filter: &FactFilter, limit: usize) -> Result<Vec<Fact>> {
        let conn = self.reader()?;
        let mut sql = String::from("SELECT * FROM facts WHERE 1=1");
        push_filter_clauses(&mut sql, filter);
        sql.push_str(" ORDER BY last_confirmed_at DESC LIMIT ?1");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], row_to_fact)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(EngineError::from)
    }

    /// Set `last_confirmed_at = now` and recompute `expires_at`
    /// (§4.1 `refresh`).
    pub fn refresh(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut fact = self
            .get(id)?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        fact.refresh(now);
        self.put(&fact)
    }

    /// Atomically link `old_id` to its replacement (§4.1 `supersede`,
    /// invariant I4: callers are responsible for not introducing cycles —
    /// a fact's own id is never superseded by itself).
    pub fn supersede(&self, old_id: &str, new_id: &str) -> Result<()> {
        if old_id == new_id {
            return Err(EngineError::InvalidArgument(
                "a fact cannot supersede itself".to_string(),
            ));
        }
        let conn = self.writer()?;
        let updated = conn.execute(
            "UPDATE facts SET superseded_by = ?2 WHERE id = ?1",
            params![old_id, new_id],
        )?;
        if updated == 0 {
            return Err(EngineError::NotFound(old_id.to_string()));
        }
        Ok(())
    }

    /// Hard-delete a fact (§6.1 `forget`). Returns whether a row existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.writer()?;
        let deleted = conn.execute("DELETE FROM facts WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    /// `DELETE WHERE expires_at IS NOT NULL AND expires_at < now`
    /// (§4.1 `prune_expired`). Returns the ids removed, so the vector index
    /// can drop the matching embeddings under the same write lock (§5).
    pub fn prune_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let conn = self.writer()?;
        let ids: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT id FROM facts WHERE expires_at IS NOT NULL AND expires_at < ?1",
            )?;
            let rows = stmt.query_map(params![now.to_rfc3339()], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        conn.execute(
            "DELETE FROM facts WHERE expires_at IS NOT NULL AND expires_at < ?1",
            params![now.to_rfc3339()],
        )?;
        Ok(ids)
    }

    /// For rows past 75% of their TTL, halve confidence; then delete rows
    /// with confidence < 0.1 (§4.1 `decay_confidences`, invariant I5).
    /// Returns `(decayed_count, deleted_count)`.
    pub fn decay_confidences(&self, now: DateTime<Utc>) -> Result<(usize, usize)> {
        let conn = self.writer()?;
        let candidates: Vec<(String, DateTime<Utc>, Option<DateTime<Utc>>, f32)> = {
            let mut stmt = conn.prepare(
                "SELECT id, last_confirmed_at, expires_at, confidence FROM facts
                 WHERE expires_at IS NOT NULL",
            )?;
            let rows = stmt.query_map([], |row| {
                let last_confirmed: String = row.get(1)?;
                let expires: Option<String> = row.get(2)?;
                Ok((
                    row.get::<_, String>(0)?,
                    DateTime::parse_from_rfc3339(&last_confirmed)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or(now),
                    expires.and_then(|e| {
                        DateTime::parse_from_rfc3339(&e).ok().map(|d| d.with_timezone(&Utc))
                    }),
                    row.get::<_, f64>(3)? as f32,
                ))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut decayed = 0usize;
        let mut to_delete = Vec::new();
        for (id, last_confirmed, expires_at, confidence) in candidates {
            let Some(expires_at) = expires_at else { continue };
            let lifetime = expires_at - last_confirmed;
            let elapsed = now - last_confirmed;
            if lifetime.num_seconds() <= 0 {
                continue;
            }
            let threshold = (lifetime.num_seconds() as f64) * 0.75;
            if (elapsed.num_seconds() as f64) > threshold {
                let new_confidence = confidence * 0.5;
                if new_confidence < 0.1 {
                    to_delete.push(id);
                } else {
                    conn.execute(
                        "UPDATE facts SET confidence = ?2 WHERE id = ?1",
                        params![id, new_confidence],
                    )?;
                    decayed += 1;
                }
            }
        }

        let deleted = to_delete.len();
        for id in &to_delete {
            conn.execute("DELETE FROM facts WHERE id = ?1", params![id])?;
        }

        Ok((decayed, deleted))
    }

    /// Per-category, per-decay-class, per-tier counts plus pending-expiry
    /// (§4.1 `stats`, §6.3 `stats`).
    pub fn stats(&self, now: DateTime<Utc>) -> Result<StoreStats> {
        let conn = self.reader()?;
        let total_facts: i64 = conn.query_row("SELECT COUNT(*) FROM facts", [], |r| r.get(0))?;

        let by_category = group_counts(&conn, "category")?;
        let by_decay_class = group_counts(&conn, "decay_class")?;
        let by_tier = group_counts(&conn, "tier")?;

        let pending_expiry: i64 = conn.query_row(
            "SELECT COUNT(*) FROM facts WHERE expires_at IS NOT NULL AND expires_at < ?1",
            params![now.to_rfc3339()],
            |r| r.get(0),
        )?;

        Ok(StoreStats {
            total_facts,
            by_category,
            by_decay_class,
            by_tier,
            pending_expiry,
        })
    }

    /// Integrity check: the facts table and FTS index both open and answer
    /// a trivial query (§4.1 "on open, integrity is verified", §6.3 `verify`).
    pub fn verify(&self) -> Result<()> {
        let conn = self.reader()?;
        conn.query_row("SELECT COUNT(*) FROM facts", [], |r| r.get::<_, i64>(0))?;
        conn.query_row("SELECT COUNT(*) FROM facts_fts", [], |r| r.get::<_, i64>(0))?;
        Ok(())
    }

    /// All non-superseded fact ids, for the vector-index orphan sweep (I3).
    pub fn live_ids(&self) -> Result<std::collections::HashSet<String>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare("SELECT id FROM facts WHERE superseded_by IS NULL")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Add a derived graph edge (§3.4).
    pub fn add_edge(&self, source_id: &str, target_id: &str, edge_type: &str, weight: f32, now: DateTime<Utc>) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO fact_edges (source_id, target_id, edge_type, weight, created_at)
             VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(source_id, target_id, edge_type) DO UPDATE SET weight = excluded.weight",
            params![source_id, target_id, edge_type, weight, now.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Outgoing edges from `id`.
    pub fn edges_from(&self, id: &str) -> Result<Vec<(String, String, f32)>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT target_id, edge_type, weight FROM fact_edges WHERE source_id = ?1",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, f64>(2)? as f32))
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}

fn group_counts(conn: &Connection, column: &str) -> rusqlite::Result<Vec<(String, i64)>> {
    let sql = format!("SELECT {column}, COUNT(*) FROM facts GROUP BY {column}");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    rows.collect()
}

fn push_filter_clauses(sql: &mut String, filter: &FactFilter) {
    if !filter.include_superseded {
        sql.push_str(" AND superseded_by IS NULL");
    }
    if let Some(category) = filter.category {
        sql.push_str(&format!(" AND category = '{}'", category.as_str()));
    }
    if let Some(tier) = filter.tier {
        sql.push_str(&format!(" AND tier = '{}'", tier.as_str()));
    }
    if let Some(entity) = &filter.entity {
        sql.push_str(&format!(" AND entity = '{}'", entity.replace('\'', "''")));
    }
    if let Some(tag) = &filter.tag {
        sql.push_str(&format!(" AND tags LIKE '%\"{}\"%'", tag.replace('\'', "''")));
    }
}

fn row_to_fact(row: &rusqlite::Row) -> rusqlite::Result<Fact> {
    let tags_json: String = row.get("tags")?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();

    let parse_dt = |s: String| -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&s)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    };

    let expires_at: Option<String> = row.get("expires_at")?;

    Ok(Fact {
        id: row.get("id")?,
        text: row.get("text")?,
        entity: row.get("entity")?,
        key: row.get("key")?,
        value: row.get("value")?,
        category: Category::parse_name(&row.get::<_, String>("category")?),
        tags,
        importance: row.get::<_, f64>("importance")? as f32,
        confidence: row.get::<_, f64>("confidence")? as f32,
        decay_class: DecayClass::parse_name(&row.get::<_, String>("decay_class")?)
            .unwrap_or(DecayClass::Stable),
        created_at: parse_dt(row.get("created_at")?),
        source_date: parse_dt(row.get("source_date")?),
        last_confirmed_at: parse_dt(row.get("last_confirmed_at")?),
        expires_at: expires_at.map(parse_dt),
        tier: Tier::parse_name(&row.get::<_, String>("tier")?).unwrap_or(Tier::Warm),
        superseded_by: row.get("superseded_by")?,
        source: Source::parse_name(&row.get::<_, String>("source")?).unwrap_or(Source::Agent),
    })
}

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Escape a user query for safe use inside an FTS5 `MATCH` expression:
/// each whitespace-separated term is double-quoted so punctuation and FTS5
/// operator syntax (`AND`, `OR`, `-`, `*`) in the raw query can't break the
/// query parser.
pub fn sanitize_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}
