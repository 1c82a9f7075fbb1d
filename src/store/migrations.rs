//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "registration_profiles",
        sql: r#"
            CREATE TABLE IF NOT EXISTS registration_profiles (
                tenant_id TEXT PRIMARY KEY,
                business_info TEXT NOT NULL,
                subaccount_id TEXT,
                customer_profile_id TEXT,
                customer_profile_status TEXT,
                trust_product_id TEXT,
                brand_registration_id TEXT,
                brand_status TEXT NOT NULL DEFAULT 'unknown',
                identity_status TEXT,
                messaging_service_id TEXT,
                campaign_id TEXT,
                campaign_status TEXT,
                campaign_payload TEXT,
                continuation_claimed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_profiles_subaccount
                ON registration_profiles(subaccount_id);
            CREATE INDEX IF NOT EXISTS idx_profiles_brand_registration
                ON registration_profiles(brand_registration_id);
            CREATE INDEX IF NOT EXISTS idx_profiles_brand_status
                ON registration_profiles(brand_status);

            CREATE TABLE IF NOT EXISTS brand_status_errors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id TEXT NOT NULL REFERENCES registration_profiles(tenant_id) ON DELETE CASCADE,
                fingerprint TEXT NOT NULL,
                code TEXT,
                description TEXT NOT NULL,
                field TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (tenant_id, fingerprint)
            );
            CREATE INDEX IF NOT EXISTS idx_brand_errors_tenant ON brand_status_errors(tenant_id);
        "#,
    },
    Migration {
        version: 2,
        name: "webhook_event_log",
        sql: r#"
            CREATE TABLE IF NOT EXISTS webhook_events (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                body TEXT NOT NULL,
                received_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_webhook_events_received ON webhook_events(received_at);
        "#,
    },
    Migration {
        version: 3,
        name: "automation_workflows",
        sql: r#"
            CREATE TABLE IF NOT EXISTS automation_workflows (
                tenant_id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                trigger_id TEXT NOT NULL,
                template_id TEXT,
                state TEXT NOT NULL DEFAULT 'draft',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::info!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row.get::<i64>(0).map_err(|e| {
            DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
        }),
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &[
            "_migrations",
            "registration_profiles",
            "brand_status_errors",
            "webhook_events",
            "automation_workflows",
        ] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, 3);
    }

    #[tokio::test]
    async fn version_tracking() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT version, name FROM _migrations ORDER BY version", ())
            .await
            .unwrap();
        let mut seen = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            let v: i64 = row.get(0).unwrap();
            let n: String = row.get(1).unwrap();
            seen.push((v, n));
        }
        assert_eq!(
            seen,
            vec![
                (1, "registration_profiles".to_string()),
                (2, "webhook_event_log".to_string()),
                (3, "automation_workflows".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn brand_errors_are_unique_per_tenant_fingerprint() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        conn.execute(
            "INSERT INTO registration_profiles (tenant_id, business_info, created_at, updated_at)
             VALUES ('t1', '{}', '2026-01-01', '2026-01-01')",
            (),
        )
        .await
        .unwrap();

        let insert = "INSERT OR IGNORE INTO brand_status_errors
            (tenant_id, fingerprint, description, created_at)
            VALUES ('t1', 'fp', 'dup', '2026-01-01')";
        conn.execute(insert, ()).await.unwrap();
        let second = conn.execute(insert, ()).await.unwrap();
        assert_eq!(second, 0);
    }
}
