//! SQL migrations for the response cache database.
//!
//! Applied in ascending order on open. The highest applied version is kept
//! in `schema_migrations`.

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
        description: "Initial schema: response_cache",
        sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Remote call responses keyed by call kind, model and prompt digest
CREATE TABLE IF NOT EXISTS response_cache (
    id          TEXT PRIMARY KEY,
    kind        TEXT NOT NULL,
    model       TEXT NOT NULL,
    prompt_hash TEXT NOT NULL,
    response    TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE(kind, model, prompt_hash)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_kind ON response_cache(kind);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
