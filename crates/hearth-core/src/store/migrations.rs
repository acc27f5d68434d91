//! Schema migrations for the Fact Store.
//!
//! Ordered, idempotent `CREATE ... IF NOT EXISTS` migrations applied on
//! open: a `schema_version` table plus a `&'static [Migration]` array.

/// A single schema migration.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

/// All migrations, applied in order up to the current schema version.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial fact schema with FTS5 and graph edges",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Porter tokenizer for FTS5 (better keyword recall via stemming)",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Durable embeddings table so the vector index can be rebuilt on open",
        up: MIGRATION_V3_UP,
    },
];

const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS facts (
    id TEXT PRIMARY KEY,
    text TEXT NOT NULL,
    entity TEXT,
    key TEXT,
    value TEXT,
    category TEXT NOT NULL DEFAULT 'other',
    tags TEXT NOT NULL DEFAULT '[]',
    importance REAL NOT NULL DEFAULT 0.5,
    confidence REAL NOT NULL DEFAULT 1.0,
    decay_class TEXT NOT NULL DEFAULT 'stable',
    created_at TEXT NOT NULL,
    source_date TEXT NOT NULL,
    last_confirmed_at TEXT NOT NULL,
    expires_at TEXT,
    tier TEXT NOT NULL DEFAULT 'warm',
    superseded_by TEXT,
    source TEXT NOT NULL DEFAULT 'agent',
    has_vector INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_facts_entity_key ON facts(entity, key);
CREATE INDEX IF NOT EXISTS idx_facts_expires_at ON facts(expires_at);
CREATE INDEX IF NOT EXISTS idx_facts_tier ON facts(tier);
CREATE INDEX IF NOT EXISTS idx_facts_category ON facts(category);
CREATE INDEX IF NOT EXISTS idx_facts_superseded_by ON facts(superseded_by);
CREATE INDEX IF NOT EXISTS idx_facts_last_confirmed ON facts(last_confirmed_at);

-- Derived graph edges (§3.4) — never authoritative, safely rebuildable.
CREATE TABLE IF NOT EXISTS fact_edges (
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    edge_type TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0,
    created_at TEXT NOT NULL,
    PRIMARY KEY (source_id, target_id, edge_type)
);

CREATE INDEX IF NOT EXISTS idx_edges_source ON fact_edges(source_id);
CREATE INDEX IF NOT EXISTS idx_edges_target ON fact_edges(target_id);

CREATE VIRTUAL TABLE IF NOT EXISTS facts_fts USING fts5(
    id UNINDEXED,
    text,
    entity,
    key,
    value,
    content='facts',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS facts_ai AFTER INSERT ON facts BEGIN
    INSERT INTO facts_fts(rowid, id, text, entity, key, value)
    VALUES (NEW.rowid, NEW.id, NEW.text, NEW.entity, NEW.key, NEW.value);
END;

CREATE TRIGGER IF NOT EXISTS facts_ad AFTER DELETE ON facts BEGIN
    INSERT INTO facts_fts(facts_fts, rowid, id, text, entity, key, value)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.text, OLD.entity, OLD.key, OLD.value);
END;

CREATE TRIGGER IF NOT EXISTS facts_au AFTER UPDATE ON facts BEGIN
    INSERT INTO facts_fts(facts_fts, rowid, id, text, entity, key, value)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.text, OLD.entity, OLD.key, OLD.value);
    INSERT INTO facts_fts(rowid, id, text, entity, key, value)
    VALUES (NEW.rowid, NEW.id, NEW.text, NEW.entity, NEW.key, NEW.value);
END;

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

const MIGRATION_V2_UP: &str = r#"
DROP TRIGGER IF EXISTS facts_ai;
DROP TRIGGER IF EXISTS facts_ad;
DROP TRIGGER IF EXISTS facts_au;
DROP TABLE IF EXISTS facts_fts;

CREATE VIRTUAL TABLE facts_fts USING fts5(
    id UNINDEXED,
    text,
    entity,
    key,
    value,
    content='facts',
    content_rowid='rowid',
    tokenize='porter unicode61'
);

INSERT INTO facts_fts(facts_fts) VALUES('rebuild');

CREATE TRIGGER facts_ai AFTER INSERT ON facts BEGIN
    INSERT INTO facts_fts(rowid, id, text, entity, key, value)
    VALUES (NEW.rowid, NEW.id, NEW.text, NEW.entity, NEW.key, NEW.value);
END;

CREATE TRIGGER facts_ad AFTER DELETE ON facts BEGIN
    INSERT INTO facts_fts(facts_fts, rowid, id, text, entity, key, value)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.text, OLD.entity, OLD.key, OLD.value);
END;

CREATE TRIGGER facts_au AFTER UPDATE ON facts BEGIN
    INSERT INTO facts_fts(facts_fts, rowid, id, text, entity, key, value)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.text, OLD.entity, OLD.key, OLD.value);
    INSERT INTO facts_fts(rowid, id, text, entity, key, value)
    VALUES (NEW.rowid, NEW.id, NEW.text, NEW.entity, NEW.key, NEW.value);
END;

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

const MIGRATION_V3_UP: &str = r#"
CREATE TABLE IF NOT EXISTS fact_embeddings (
    fact_id TEXT PRIMARY KEY REFERENCES facts(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

UPDATE schema_version SET version = 3, applied_at = datetime('now');
"#;

/// Current schema version recorded in `schema_version`.
pub fn current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply all migrations newer than the database's current version.
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current = current_version(conn)?;
    let mut applied = 0;
    for migration in MIGRATIONS {
        if migration.version > current {
            tracing::info!(
                version = migration.version,
                description = migration.description,
                "applying fact store migration"
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }
    Ok(applied)
}
