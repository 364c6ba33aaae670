//! SQL migration definitions for the Sieve database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: items",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Classified feed items, keyed by the (source, link) fingerprint
CREATE TABLE IF NOT EXISTS items (
    id             TEXT PRIMARY KEY,
    source         TEXT NOT NULL,
    title          TEXT NOT NULL,
    link           TEXT NOT NULL,
    description    TEXT NOT NULL DEFAULT '',
    content        TEXT,
    summary        TEXT,
    interest_level TEXT NOT NULL,
    reason         TEXT NOT NULL DEFAULT '',
    thought        TEXT,
    published_at   TEXT NOT NULL,
    created_at     TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_items_published_at ON items(published_at);
CREATE INDEX IF NOT EXISTS idx_items_source ON items(source);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
