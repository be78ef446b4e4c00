use ::duckdb::{Connection, ToSql};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_cache_tables",
        sql: r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    store TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY(store, key)
);

CREATE TABLE IF NOT EXISTS cache_metadata (
    id TEXT PRIMARY KEY,
    store TEXT NOT NULL,
    key TEXT NOT NULL,
    timestamp_ms BIGINT NOT NULL,
    expiry_ms BIGINT NOT NULL
);
"#,
    },
    Migration {
        version: "0002_history_snapshots",
        sql: r#"
CREATE TABLE IF NOT EXISTS history_snapshots (
    series_id TEXT NOT NULL,
    resolution TEXT NOT NULL,
    payload TEXT NOT NULL,
    written_at_ms BIGINT NOT NULL,
    PRIMARY KEY(series_id, resolution)
);
"#,
    },
    Migration {
        version: "0003_settings",
        sql: r#"
CREATE TABLE IF NOT EXISTS settings (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    },
    Migration {
        version: "0004_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_cache_metadata_expiry ON cache_metadata(expiry_ms);
"#,
    },
];

/// Latest schema version known to this build.
pub fn latest_version() -> &'static str {
    MIGRATIONS
        .last()
        .map(|migration| migration.version)
        .unwrap_or_default()
}

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let params: [&dyn ToSql; 1] = [&migration.version];
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params.as_slice(),
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            tracing::debug!(version = migration.version, "applying warehouse migration");
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                params.as_slice(),
            )?;
        }
    }

    Ok(())
}

/// Versions recorded in `schema_migrations`, oldest first.
pub fn applied_versions(connection: &Connection) -> Result<Vec<String>, ::duckdb::Error> {
    let mut statement =
        connection.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let mut rows = statement.query([] as [&dyn ToSql; 0])?;
    let mut versions = Vec::new();
    while let Some(row) = rows.next()? {
        versions.push(row.get(0)?);
    }
    Ok(versions)
}
