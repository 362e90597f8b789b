use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::StoreError;
use crate::platform;
use crate::scan::{AggregateResult, ProviderKind};

/// Snapshot metadata, without the document itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub id: i64,
    pub provider: String,
    pub timestamp: i64,
    pub resource_count: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub info: SnapshotInfo,
    pub data: AggregateResult,
}

/// Default database path (`~/.local/share/skyscan/skyscan.db` or the
/// platform equivalent).
pub fn default_path() -> Result<PathBuf, StoreError> {
    let data_dir = platform::data_dir().ok_or(StoreError::NoDataDir)?;
    Ok(data_dir.join("skyscan.db"))
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            provider TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            resource_count INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL,
            data TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_provider_timestamp
         ON snapshots(provider, timestamp)",
        [],
    )?;

    Ok(())
}

const INFO_COLUMNS: &str = "id, provider, timestamp, resource_count, duration_ms";

/// Database handle. Open once per command, reuse across all operations.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(&default_path()?)
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        debug!(path = %path.display(), "opened snapshot store");
        Ok(Store { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Store { conn })
    }

    /// Appends `result` as a new snapshot stamped with the current time.
    pub fn put(&self, provider: ProviderKind, result: &AggregateResult) -> Result<i64, StoreError> {
        self.insert(provider.as_str(), result, chrono::Utc::now().timestamp())
    }

    fn insert(&self, provider: &str, result: &AggregateResult, timestamp: i64) -> Result<i64, StoreError> {
        let data = serde_json::to_string(result)?;

        self.conn.execute(
            "INSERT INTO snapshots (provider, timestamp, resource_count, duration_ms, data)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                provider,
                timestamp,
                i64::try_from(result.resource_count()).unwrap_or(i64::MAX),
                i64::try_from(result.duration_ms).unwrap_or(i64::MAX),
                data
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!(id, provider, resources = result.resource_count(), "saved snapshot");
        Ok(id)
    }

    /// Most recent snapshot for `provider`; ties on timestamp go to the
    /// later insert.
    pub fn get_latest(&self, provider: ProviderKind) -> Result<Option<StoredSnapshot>, StoreError> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {INFO_COLUMNS}, data FROM snapshots
                     WHERE provider = ?1
                     ORDER BY timestamp DESC, id DESC
                     LIMIT 1"
                ),
                params![provider.as_str()],
                stored_row,
            )
            .optional()?;

        row.map(decode).transpose()
    }

    pub fn get(&self, id: i64) -> Result<Option<StoredSnapshot>, StoreError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {INFO_COLUMNS}, data FROM snapshots WHERE id = ?1"),
                params![id],
                stored_row,
            )
            .optional()?;

        row.map(decode).transpose()
    }

    /// Snapshot metadata, newest first.
    pub fn list(&self, provider: Option<ProviderKind>) -> Result<Vec<SnapshotInfo>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INFO_COLUMNS} FROM snapshots
             WHERE ?1 IS NULL OR provider = ?1
             ORDER BY timestamp DESC, id DESC"
        ))?;

        let snapshots = stmt
            .query_map(params![provider.map(|p| p.as_str())], info_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(snapshots)
    }
}

fn info_from_row(row: &rusqlite::Row) -> rusqlite::Result<SnapshotInfo> {
    Ok(SnapshotInfo {
        id: row.get(0)?,
        provider: row.get(1)?,
        timestamp: row.get(2)?,
        resource_count: row.get::<_, i64>(3)?.max(0) as u64,
        duration_ms: row.get::<_, i64>(4)?.max(0) as u64,
    })
}

fn stored_row(row: &rusqlite::Row) -> rusqlite::Result<(SnapshotInfo, String)> {
    Ok((info_from_row(row)?, row.get(5)?))
}

fn decode((info, data): (SnapshotInfo, String)) -> Result<StoredSnapshot, StoreError> {
    Ok(StoredSnapshot {
        info,
        data: serde_json::from_str(&data)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{CategoryOutcome, PartialResult, ServiceSet};
    use serde_json::json;

    fn aggregate(provider: ProviderKind, names: &[&str]) -> AggregateResult {
        let mut agg = AggregateResult::new(provider, "acct", ServiceSet::from_tags(["x"]), ["things"]);
        let records = names
            .iter()
            .map(|n| {
                let mut r = serde_json::Map::new();
                r.insert("name".into(), json!(n));
                r
            })
            .collect();
        let mut partial = PartialResult::default();
        partial.insert("things", CategoryOutcome::Listed(records));
        agg.merge(None, partial);
        agg
    }

    #[test]
    fn empty_store_has_no_latest() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_latest(ProviderKind::Aws).unwrap().is_none());
        assert!(store.list(None).unwrap().is_empty());
    }

    #[test]
    fn put_then_get_latest_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let agg = aggregate(ProviderKind::Aws, &["a", "b"]);
        let id = store.put(ProviderKind::Aws, &agg).unwrap();

        let latest = store.get_latest(ProviderKind::Aws).unwrap().unwrap();
        assert_eq!(latest.info.id, id);
        assert_eq!(latest.info.resource_count, 2);
        assert_eq!(latest.data, agg);
    }

    #[test]
    fn latest_is_per_provider() {
        let store = Store::open_in_memory().unwrap();
        store.insert("aws", &aggregate(ProviderKind::Aws, &["old"]), 100).unwrap();
        store.insert("aws", &aggregate(ProviderKind::Aws, &["new"]), 200).unwrap();
        store.insert("azure", &aggregate(ProviderKind::Azure, &["az"]), 300).unwrap();

        let aws = store.get_latest(ProviderKind::Aws).unwrap().unwrap();
        assert_eq!(aws.info.timestamp, 200);
        assert_eq!(aws.data.records("things")[0]["name"], json!("new"));

        let azure = store.get_latest(ProviderKind::Azure).unwrap().unwrap();
        assert_eq!(azure.info.provider, "azure");
    }

    #[test]
    fn timestamp_tie_goes_to_later_insert() {
        let store = Store::open_in_memory().unwrap();
        store.insert("aws", &aggregate(ProviderKind::Aws, &["first"]), 100).unwrap();
        let second = store.insert("aws", &aggregate(ProviderKind::Aws, &["second"]), 100).unwrap();

        let latest = store.get_latest(ProviderKind::Aws).unwrap().unwrap();
        assert_eq!(latest.info.id, second);
    }

    #[test]
    fn list_filters_by_provider_newest_first() {
        let store = Store::open_in_memory().unwrap();
        store.insert("aws", &aggregate(ProviderKind::Aws, &[]), 100).unwrap();
        store.insert("azure", &aggregate(ProviderKind::Azure, &[]), 150).unwrap();
        store.insert("aws", &aggregate(ProviderKind::Aws, &[]), 200).unwrap();

        let all = store.list(None).unwrap();
        assert_eq!(all.iter().map(|s| s.timestamp).collect::<Vec<_>>(), vec![200, 150, 100]);

        let aws = store.list(Some(ProviderKind::Aws)).unwrap();
        assert_eq!(aws.len(), 2);
        assert!(aws.iter().all(|s| s.provider == "aws"));
    }

    #[test]
    fn get_unknown_id_is_none() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get(42).unwrap().is_none());
    }

    #[test]
    fn file_store_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("skyscan.db");

        let id = {
            let store = Store::open(&path).unwrap();
            store.put(ProviderKind::Azure, &aggregate(ProviderKind::Azure, &["rg"])).unwrap()
        };

        let store = Store::open(&path).unwrap();
        let snapshot = store.get(id).unwrap().unwrap();
        assert_eq!(snapshot.data.provider, ProviderKind::Azure);
    }
}
