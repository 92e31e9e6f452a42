use std::path::PathBuf;

use anyhow::Result;
use interaction_log_core::{filter_by_item_id, InteractionLog, NewInteraction};
use interaction_log_store_sqlite::{SchemaStatus, SqliteStore};
use serde::{Deserialize, Serialize};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddInteractionRequest {
    pub learner_id: i64,
    pub item_id: i64,
    pub kind: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListInteractionsRequest {
    #[serde(default)]
    pub item_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct InteractionLogApi {
    db_path: PathBuf,
}

impl InteractionLogApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        tracing::info!(
            from = before.current_version,
            to = after.current_version,
            "interaction log schema migrated"
        );
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Record one learner interaction.
    ///
    /// # Errors
    /// Returns an error when validation or persistence fails. Validation failures
    /// downcast to [`interaction_log_core::InteractionError`].
    pub fn add_interaction(&self, input: AddInteractionRequest) -> Result<InteractionLog> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let record = store.insert_interaction(&NewInteraction {
            learner_id: input.learner_id,
            item_id: input.item_id,
            kind: input.kind,
        })?;
        tracing::debug!(id = record.id, item_id = record.item_id, "interaction recorded");
        Ok(record)
    }

    /// List stored interactions, narrowed to one item when `item_id` is given.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or read.
    pub fn list_interactions(&self, input: ListInteractionsRequest) -> Result<Vec<InteractionLog>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let records = store.list_interactions()?;
        let total = records.len();
        let filtered = filter_by_item_id(records, input.item_id);
        tracing::debug!(
            item_id = ?input.item_id,
            total,
            returned = filtered.len(),
            "listed interactions"
        );
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use interaction_log_core::InteractionError;

    use super::*;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("interaction-log-api-{}.sqlite3", ulid::Ulid::new()))
    }

    fn add(api: &InteractionLogApi, learner_id: i64, item_id: i64) -> Result<InteractionLog> {
        api.add_interaction(AddInteractionRequest {
            learner_id,
            item_id,
            kind: "attempt".to_string(),
        })
    }

    // Test IDs: TAPI-001
    #[test]
    fn api_add_and_list_round_trip() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = InteractionLogApi::new(db_path.clone());

        let first = add(&api, 1, 5)?;
        let second = add(&api, 2, 5)?;
        let other = add(&api, 3, 10)?;
        let fourth = add(&api, 4, 5)?;

        let all = api.list_interactions(ListInteractionsRequest::default())?;
        assert_eq!(all, vec![first.clone(), second.clone(), other, fourth.clone()]);

        let item_five = api.list_interactions(ListInteractionsRequest { item_id: Some(5) })?;
        assert_eq!(item_five, vec![first, second, fourth]);

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-002
    #[test]
    fn api_list_on_empty_store_returns_empty() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = InteractionLogApi::new(db_path.clone());

        assert!(api.list_interactions(ListInteractionsRequest::default())?.is_empty());
        assert!(api.list_interactions(ListInteractionsRequest { item_id: Some(1) })?.is_empty());

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-003
    #[test]
    fn api_add_surfaces_validation_error_type() {
        let db_path = unique_temp_db_path();
        let api = InteractionLogApi::new(db_path.clone());

        let err = match api.add_interaction(AddInteractionRequest {
            learner_id: 1,
            item_id: 1,
            kind: String::new(),
        }) {
            Ok(record) => panic!("blank kind should be rejected, got {record:?}"),
            Err(err) => err,
        };
        assert!(matches!(
            err.downcast_ref::<InteractionError>(),
            Some(InteractionError::Validation(_))
        ));

        let _ = std::fs::remove_file(&db_path);
    }

    // Test IDs: TAPI-004
    #[test]
    fn api_migrate_dry_run_then_apply() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = InteractionLogApi::new(db_path.clone());

        let planned = api.migrate(true)?;
        assert!(planned.dry_run);
        assert_eq!(planned.current_version, 0);
        assert_eq!(planned.would_apply_versions, vec![1, 2]);
        assert_eq!(planned.after_version, None);

        let applied = api.migrate(false)?;
        assert_eq!(applied.after_version, Some(applied.target_version));
        assert_eq!(applied.up_to_date, Some(true));
        assert!(api.schema_status()?.pending_versions.is_empty());

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }
}
