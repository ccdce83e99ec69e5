mod cache;
mod export;
pub mod migrations;
mod options;
mod query;

use cache::DetailCache;
use conch_core::brief::Brief;
use conch_core::filter::{compile, Filter, ResultColumns};
use conch_core::record::{split_tokens, NewResult, RecordError, ResultKind};
use migrations::{create_latest, migrate_to, schema_version, MigrationError};
use query::WhereClause;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use std::cell::{Cell, RefCell};
use std::path::Path;
use thiserror::Error;
use tracing::info;

pub use export::ExportSummary;
pub use migrations::SCHEMA_VERSION;
pub use options::FilterOptions;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("record error: {0}")]
    Record(#[from] RecordError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("migration step {step} failed: {source}")]
    Migration {
        step: i64,
        #[source]
        source: MigrationError,
    },
    #[error("store is at schema version {found} and must be migrated to {target} first")]
    NeedsUpgrade { found: i64, target: i64 },
    #[error("brief recompute failed: {0}")]
    Recompute(#[source] MigrationError),
}

impl StorageError {
    /// Errors after which the store must not be used again.
    pub fn is_fatal(&self) -> bool {
        match self {
            StorageError::UnsupportedSchemaVersion { .. } | StorageError::Migration { .. } => {
                true
            }
            StorageError::Sqlite(rusqlite::Error::SqliteFailure(failure, _)) => matches!(
                failure.code,
                ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Rows per page for bulk reads, exports and migration batches.
    pub batch_size: usize,
    pub detail_cache_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            detail_cache_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenState {
    Ready,
    NeedsUpgrade { from: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredBrief {
    pub id: String,
    pub time: i64,
    pub mode: String,
    pub rule: String,
    pub stage: String,
    pub weapon: Vec<String>,
    pub players: Vec<String>,
    pub brief: Brief,
}

impl StoredBrief {
    pub fn kind(&self) -> ResultKind {
        ResultKind::of_mode(&self.mode)
    }

    pub fn columns(&self) -> ResultColumns {
        ResultColumns {
            time: self.time,
            mode: self.mode.clone(),
            rule: self.rule.clone(),
            stage: self.stage.clone(),
            weapon: self.weapon.clone(),
            players: self.players.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredResult {
    pub brief: StoredBrief,
    pub detail: String,
}

impl StoredResult {
    pub fn id(&self) -> &str {
        &self.brief.id
    }

    pub fn detail_json(&self) -> Result<serde_json::Value, StorageError> {
        serde_json::from_str(&self.detail).map_err(|err| RecordError::from(err).into())
    }
}

const BRIEF_COLUMNS: &str =
    "brief.id, brief.time, brief.mode, brief.rule, brief.stage, brief.weapon, brief.players, brief.brief";

pub struct ResultStore {
    conn: Connection,
    config: StoreConfig,
    state: Cell<Option<OpenState>>,
    details: RefCell<DetailCache<StoredResult>>,
    options: RefCell<Option<(i64, FilterOptions)>>,
}

impl ResultStore {
    pub fn connect(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Ok(Self::with_connection(conn, config))
    }

    pub fn connect_in_memory(config: StoreConfig) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::with_connection(conn, config))
    }

    fn with_connection(conn: Connection, config: StoreConfig) -> Self {
        let details = DetailCache::new(config.detail_cache_capacity);
        Self {
            conn,
            config,
            state: Cell::new(None),
            details: RefCell::new(details),
            options: RefCell::new(None),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(schema_version(&self.conn)?)
    }

    /// Creates the latest schema on an empty database and reports whether
    /// stored data needs migrating. Repeated calls return the cached state.
    pub fn open(&self) -> Result<OpenState, StorageError> {
        if let Some(state) = self.state.get() {
            return Ok(state);
        }

        let version = self.schema_version()?;
        if version > SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }

        let state = if version == 0 && !self.table_exists("result")? {
            create_latest(&self.conn)?;
            info!(event = "store_created", version = SCHEMA_VERSION);
            OpenState::Ready
        } else if version < SCHEMA_VERSION {
            OpenState::NeedsUpgrade { from: version }
        } else {
            OpenState::Ready
        };

        self.state.set(Some(state));
        Ok(state)
    }

    /// Brings the schema up to [`SCHEMA_VERSION`]. No other call may run
    /// against the store meanwhile.
    pub fn migrate(&self) -> Result<(), StorageError> {
        let OpenState::NeedsUpgrade { from } = self.open()? else {
            return Ok(());
        };

        info!(event = "store_migration_start", from, to = SCHEMA_VERSION);
        migrate_to(&self.conn, SCHEMA_VERSION, self.config.batch_size)?;
        self.invalidate_caches();
        self.state.set(Some(OpenState::Ready));
        info!(event = "store_migration_done", version = SCHEMA_VERSION);
        Ok(())
    }

    pub fn close(self) -> Result<(), StorageError> {
        self.conn.close().map_err(|(_, err)| StorageError::Sqlite(err))
    }

    fn ensure_ready(&self) -> Result<(), StorageError> {
        match self.open()? {
            OpenState::Ready => Ok(()),
            OpenState::NeedsUpgrade { from } => Err(StorageError::NeedsUpgrade {
                found: from,
                target: SCHEMA_VERSION,
            }),
        }
    }

    fn invalidate_caches(&self) {
        self.details.borrow_mut().clear();
        self.options.borrow_mut().take();
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1",
                [table_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    pub fn exists(&self, id: &str) -> Result<bool, StorageError> {
        self.ensure_ready()?;
        let found = self
            .conn
            .query_row("SELECT 1 FROM brief WHERE id = ?1 LIMIT 1", [id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Writes both rows atomically. An id that is already stored is left
    /// untouched and reported as `false`.
    pub fn add(&self, result: &NewResult) -> Result<bool, StorageError> {
        self.ensure_ready()?;
        let brief = result.brief_json()?;

        let tx = self.conn.unchecked_transaction()?;
        let inserted = tx.execute(
            "
            INSERT OR IGNORE INTO brief (id, time, mode, rule, stage, weapon, players, brief)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
            params![
                result.id,
                result.time,
                result.mode,
                result.rule,
                result.stage,
                result.weapon_column(),
                result.players_column(),
                brief,
            ],
        )?;
        if inserted == 0 {
            return Ok(false);
        }
        tx.execute(
            "INSERT OR IGNORE INTO detail (id, time, mode, detail) VALUES (?1, ?2, ?3, ?4)",
            params![result.id, result.time, result.mode, result.detail],
        )?;
        tx.commit()?;
        Ok(true)
    }

    pub fn remove(&self, id: &str) -> Result<bool, StorageError> {
        self.ensure_ready()?;
        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute("DELETE FROM brief WHERE id = ?1", [id])?;
        tx.execute("DELETE FROM detail WHERE id = ?1", [id])?;
        tx.commit()?;

        self.details.borrow_mut().remove(id);
        Ok(removed > 0)
    }

    /// Deletes every result and reclaims the freed pages.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.ensure_ready()?;
        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute("DELETE FROM brief", [])?;
        tx.execute("DELETE FROM detail", [])?;
        tx.commit()?;
        self.conn.execute_batch("VACUUM")?;

        self.invalidate_caches();
        info!(event = "store_cleared", removed);
        Ok(())
    }

    /// Removes every table and resets the schema version to zero. The next
    /// [`open`](Self::open) recreates an empty store.
    pub fn drop_tables(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "
            BEGIN;
            DROP TABLE IF EXISTS brief;
            DROP TABLE IF EXISTS detail;
            DROP TABLE IF EXISTS result;
            PRAGMA user_version = 0;
            COMMIT;
            ",
        )?;

        self.state.set(None);
        self.invalidate_caches();
        info!(event = "store_dropped");
        Ok(())
    }

    /// Every matching brief, newest first.
    pub fn query_brief(&self, filter: Option<&Filter>) -> Result<Vec<StoredBrief>, StorageError> {
        self.ensure_ready()?;
        let clause = WhereClause::from_condition(compile(filter, None).as_ref());
        let sql = format!(
            "SELECT {BRIEF_COLUMNS} FROM brief {} ORDER BY brief.time DESC, brief.id",
            clause.sql
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(clause.params.iter()), brief_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// A page of full results, newest first, read `batch_size` rows at a time.
    pub fn query_detail(
        &self,
        offset: usize,
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<StoredResult>, StorageError> {
        self.ensure_ready()?;
        let clause = WhereClause::from_condition(compile(filter, None).as_ref());
        let sql = format!(
            "
            SELECT {BRIEF_COLUMNS}, detail.detail
            FROM brief JOIN detail ON detail.id = brief.id
            {}
            ORDER BY brief.time DESC, brief.id
            LIMIT ? OFFSET ?
            ",
            clause.sql
        );
        let batch_size = self.config.batch_size.max(1);
        let mut stmt = self.conn.prepare(&sql)?;

        let mut results = Vec::new();
        while results.len() < limit {
            let page = batch_size.min(limit - results.len());
            let mut values = clause.params.clone();
            values.push(rusqlite::types::Value::Integer(page as i64));
            values.push(rusqlite::types::Value::Integer(
                (offset + results.len()) as i64,
            ));

            let rows = stmt
                .query_map(params_from_iter(values.iter()), result_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            let fetched = rows.len();
            results.extend(rows);
            if fetched < page {
                break;
            }
        }
        Ok(results)
    }

    /// Point lookup through the detail cache.
    pub fn query_detail_by_id(&self, id: &str) -> Result<Option<StoredResult>, StorageError> {
        self.ensure_ready()?;
        if let Some(cached) = self.details.borrow_mut().get(id) {
            return Ok(Some(cached));
        }

        let sql = format!(
            "
            SELECT {BRIEF_COLUMNS}, detail.detail
            FROM brief JOIN detail ON detail.id = brief.id
            WHERE brief.id = ?1
            "
        );
        let found = self
            .conn
            .query_row(&sql, [id], result_from_row)
            .optional()?;

        if let Some(result) = &found {
            self.details
                .borrow_mut()
                .insert(id.to_string(), result.clone());
        }
        Ok(found)
    }

    pub fn count(&self, filter: Option<&Filter>, since: Option<i64>) -> Result<i64, StorageError> {
        self.ensure_ready()?;
        let clause = WhereClause::from_condition(compile(filter, since).as_ref());
        let sql = format!("SELECT COUNT(1) FROM brief {}", clause.sql);
        Ok(self
            .conn
            .query_row(&sql, params_from_iter(clause.params.iter()), |row| {
                row.get(0)
            })?)
    }

    /// Distinct filterable values, recomputed only when the row count changes.
    pub fn distinct_values(&self) -> Result<FilterOptions, StorageError> {
        let total = self.count(None, None)?;
        if let Some((cached_total, options)) = self.options.borrow().as_ref() {
            if *cached_total == total {
                return Ok(options.clone());
            }
        }

        let options = FilterOptions::from_distinct(
            self.distinct_column("mode")?,
            self.distinct_column("rule")?,
            self.distinct_column("stage")?,
            self.distinct_column("weapon")?,
        );
        self.options.replace(Some((total, options.clone())));
        Ok(options)
    }

    fn distinct_column(&self, column: &str) -> Result<Vec<String>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT DISTINCT {column} FROM brief"))?;
        let values = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(values)
    }

    /// Re-derives every stored brief of `kind` from its detail.
    pub fn recompute_briefs(&self, kind: ResultKind) -> Result<usize, StorageError> {
        self.ensure_ready()?;
        let tx = self.conn.unchecked_transaction()?;
        let limit = self.config.batch_size.max(1) as i64;
        let updated = migrations::recompute_briefs(&tx, kind, limit).map_err(|err| match err {
            MigrationError::Sqlite(err) => StorageError::Sqlite(err),
            other => StorageError::Recompute(other),
        })?;
        tx.commit()?;

        self.invalidate_caches();
        info!(event = "store_briefs_recomputed", kind = kind.as_str(), updated);
        Ok(updated)
    }
}

fn conversion_error(index: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

fn brief_from_row(row: &Row<'_>) -> rusqlite::Result<StoredBrief> {
    let brief_json: String = row.get(7)?;
    let brief = serde_json::from_str(&brief_json).map_err(|err| conversion_error(7, err))?;

    Ok(StoredBrief {
        id: row.get(0)?,
        time: row.get(1)?,
        mode: row.get(2)?,
        rule: row.get(3)?,
        stage: row.get(4)?,
        weapon: split_tokens(&row.get::<_, String>(5)?),
        players: split_tokens(&row.get::<_, String>(6)?),
        brief,
    })
}

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<StoredResult> {
    Ok(StoredResult {
        brief: brief_from_row(row)?,
        detail: row.get(8)?,
    })
}
