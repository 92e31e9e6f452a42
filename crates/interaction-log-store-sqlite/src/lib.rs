use std::path::Path;

use anyhow::{anyhow, Context, Result};
use interaction_log_core::{InteractionLog, NewInteraction};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS interaction_logs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  learner_id INTEGER NOT NULL,
  item_id INTEGER NOT NULL,
  kind TEXT NOT NULL CHECK (length(trim(kind)) > 0)
);
";

const MIGRATION_002_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_interaction_logs_item ON interaction_logs(item_id);
CREATE INDEX IF NOT EXISTS idx_interaction_logs_learner ON interaction_logs(learner_id);
";

const MIGRATIONS: [(i64, &str); 2] = [(1, MIGRATION_001_SQL), (2, MIGRATION_002_SQL)];

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

impl SqliteStore {
    /// Open a SQLite-backed interaction store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus { current_version, target_version: LATEST_SCHEMA_VERSION, pending_versions })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when any migration step fails or the database is newer than supported.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        for (target, sql) in MIGRATIONS {
            if target <= version {
                continue;
            }
            let tx = self.conn.transaction().context("failed to start migration transaction")?;
            tx.execute_batch(sql).with_context(|| format!("failed to apply migration {target}"))?;
            record_schema_version(&tx, target)?;
            tx.commit().with_context(|| format!("failed to commit migration {target}"))?;
        }

        Ok(())
    }

    /// Persist one interaction and return it with its store-assigned id.
    ///
    /// # Errors
    /// Returns an error when validation fails or the insert is rejected.
    pub fn insert_interaction(&mut self, interaction: &NewInteraction) -> Result<InteractionLog> {
        interaction.validate()?;

        self.conn
            .execute(
                "INSERT INTO interaction_logs(learner_id, item_id, kind) VALUES (?1, ?2, ?3)",
                params![interaction.learner_id, interaction.item_id, interaction.kind],
            )
            .context("failed to insert interaction log")?;

        let id = self.conn.last_insert_rowid();
        Ok(interaction.clone().into_log(id))
    }

    /// Load every persisted interaction in insertion (`id`) order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read from `SQLite`.
    pub fn list_interactions(&self) -> Result<Vec<InteractionLog>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, learner_id, item_id, kind FROM interaction_logs ORDER BY id ASC")
            .context("failed to prepare interaction listing")?;

        let rows = stmt.query_map([], |row| {
            Ok(InteractionLog {
                id: row.get(0)?,
                learner_id: row.get(1)?,
                item_id: row.get(2)?,
                kind: row.get(3)?,
            })
        })?;

        rows.collect::<rusqlite::Result<Vec<_>>>().context("failed to read interaction logs")
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::*;

    fn mk_new(learner_id: i64, item_id: i64) -> NewInteraction {
        NewInteraction { learner_id, item_id, kind: "attempt".to_string() }
    }

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("interaction-log-store-{}.sqlite3", ulid::Ulid::new()))
    }

    // Test IDs: TDB-001
    #[test]
    fn fresh_database_reports_all_migrations_pending() -> Result<()> {
        let store = SqliteStore::open(Path::new(":memory:"))?;
        let status = store.schema_status()?;

        assert_eq!(status.current_version, 0);
        assert_eq!(status.target_version, LATEST_SCHEMA_VERSION);
        assert_eq!(status.pending_versions, vec![1, 2]);
        Ok(())
    }

    // Test IDs: TDB-002
    #[test]
    fn migrate_is_idempotent() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        store.migrate()?;

        let status = store.schema_status()?;
        assert_eq!(status.current_version, LATEST_SCHEMA_VERSION);
        assert!(status.pending_versions.is_empty());

        let recorded: i64 =
            store.conn.query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))?;
        assert_eq!(recorded, LATEST_SCHEMA_VERSION);
        Ok(())
    }

    // Test IDs: TDB-003
    #[test]
    fn sqlite_check_rejects_blank_kind() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;

        let result = store.conn.execute(
            "INSERT INTO interaction_logs(learner_id, item_id, kind) VALUES (?1, ?2, ?3)",
            params![1_i64, 1_i64, "  "],
        );
        assert!(result.is_err());
        Ok(())
    }

    // Test IDs: TDB-004
    #[test]
    fn insert_and_list_preserve_insertion_order() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;

        let first = store.insert_interaction(&mk_new(1, 5))?;
        let second = store.insert_interaction(&mk_new(2, 10))?;
        let third = store.insert_interaction(&mk_new(3, 5))?;

        assert!(first.id < second.id && second.id < third.id);
        assert_eq!(store.list_interactions()?, vec![first, second, third]);
        Ok(())
    }

    // Test IDs: TDB-005
    #[test]
    fn insert_rejects_blank_kind_before_touching_sqlite() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;

        let blank = NewInteraction { learner_id: 1, item_id: 1, kind: String::new() };
        let err = match store.insert_interaction(&blank) {
            Ok(record) => panic!("blank kind should be rejected, got {record:?}"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("kind must not be empty"));
        assert!(store.list_interactions()?.is_empty());
        Ok(())
    }

    // Test IDs: TDB-006
    #[test]
    fn records_survive_reopening_the_database_file() -> Result<()> {
        let db_path = unique_temp_db_path();
        let written = {
            let mut store = SqliteStore::open(&db_path)?;
            store.migrate()?;
            store.insert_interaction(&mk_new(4, 2))?
        };

        let reopened = SqliteStore::open(&db_path)?;
        assert_eq!(reopened.schema_status()?.current_version, LATEST_SCHEMA_VERSION);
        assert_eq!(reopened.list_interactions()?, vec![written]);

        drop(reopened);
        let _ = fs::remove_file(&db_path);
        Ok(())
    }

    // Test IDs: TDB-007
    #[test]
    fn migrate_rejects_newer_schema_versions() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        record_schema_version(&store.conn, LATEST_SCHEMA_VERSION + 1)?;

        assert!(store.migrate().is_err());
        Ok(())
    }
}
