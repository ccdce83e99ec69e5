use crate::StorageError;
use conch_core::record::{NewResult, RecordError, ResultKind};
use rusqlite::{params, Connection};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

pub const SCHEMA_VERSION: i64 = 7;

/// Single-table layout every upgrade path starts from.
pub(crate) const LEGACY_SCHEMA: &str = include_str!("../migrations/0000_result.sql");
const TWO_TABLE_SCHEMA: &str = include_str!("../migrations/0006_brief_detail.sql");

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("result {id} has an unusable detail: {source}")]
    Record {
        id: String,
        #[source]
        source: RecordError,
    },
    #[error("copy verification failed: {table} has {found} rows, expected {expected}")]
    CountMismatch {
        table: &'static str,
        found: i64,
        expected: i64,
    },
}

type Step = fn(&Connection, i64) -> Result<(), MigrationError>;

const STEPS: [(i64, &str, Step); 7] = [
    (1, "add_stage_column", add_stage_column),
    (2, "backfill_stage", backfill_stage),
    (3, "backfill_coop_weapon", backfill_coop_weapon),
    (4, "add_stats_column", add_stats_column),
    (5, "rename_stats_to_brief", rename_stats_to_brief),
    (6, "split_brief_detail", split_brief_detail),
    (7, "recompute_coop_briefs", recompute_coop_briefs),
];

pub(crate) fn schema_version(conn: &Connection) -> Result<i64, rusqlite::Error> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

pub(crate) fn create_latest(conn: &Connection) -> Result<(), StorageError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(TWO_TABLE_SCHEMA)?;
    tx.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
    tx.commit()?;
    Ok(())
}

/// Applies every step above the stored version up to `target`, one transaction
/// per step. Returns the version reached.
pub(crate) fn migrate_to(
    conn: &Connection,
    target: i64,
    batch_size: usize,
) -> Result<i64, StorageError> {
    let mut current = schema_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(StorageError::UnsupportedSchemaVersion {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }
    let limit = batch_size.max(1) as i64;

    for (step, name, apply) in STEPS {
        if step <= current || step > target {
            continue;
        }
        run_step(conn, step, apply, limit)
            .map_err(|source| StorageError::Migration { step, source })?;
        info!(event = "store_migration_step", step, name, from = current);
        current = step;
    }

    Ok(current)
}

fn run_step(conn: &Connection, step: i64, apply: Step, limit: i64) -> Result<(), MigrationError> {
    let tx = conn.unchecked_transaction()?;
    apply(&tx, limit)?;
    tx.execute_batch(&format!("PRAGMA user_version = {step}"))?;
    tx.commit()?;
    Ok(())
}

fn add_stage_column(conn: &Connection, _limit: i64) -> Result<(), MigrationError> {
    conn.execute_batch("ALTER TABLE result ADD COLUMN stage TEXT NOT NULL DEFAULT ''")?;
    Ok(())
}

fn backfill_stage(conn: &Connection, limit: i64) -> Result<(), MigrationError> {
    scan_details(
        conn,
        "SELECT id, mode, detail FROM result WHERE id > ?1 ORDER BY id LIMIT ?2",
        limit,
        |id, result| {
            conn.execute(
                "UPDATE result SET stage = ?2 WHERE id = ?1",
                params![id, result.stage],
            )?;
            Ok(())
        },
    )?;
    Ok(())
}

fn backfill_coop_weapon(conn: &Connection, limit: i64) -> Result<(), MigrationError> {
    scan_details(
        conn,
        "
        SELECT id, mode, detail FROM result
        WHERE mode = 'salmon_run' AND weapon = '' AND id > ?1
        ORDER BY id LIMIT ?2
        ",
        limit,
        |id, result| {
            conn.execute(
                "UPDATE result SET weapon = ?2 WHERE id = ?1",
                params![id, result.weapon_column()],
            )?;
            Ok(())
        },
    )?;
    Ok(())
}

fn add_stats_column(conn: &Connection, limit: i64) -> Result<(), MigrationError> {
    conn.execute_batch("ALTER TABLE result ADD COLUMN stats TEXT NOT NULL DEFAULT ''")?;
    scan_details(
        conn,
        "SELECT id, mode, detail FROM result WHERE id > ?1 ORDER BY id LIMIT ?2",
        limit,
        |id, result| {
            let stats = result.brief_json().map_err(|source| MigrationError::Record {
                id: id.to_string(),
                source,
            })?;
            conn.execute(
                "UPDATE result SET stats = ?2 WHERE id = ?1",
                params![id, stats],
            )?;
            Ok(())
        },
    )?;
    Ok(())
}

fn rename_stats_to_brief(conn: &Connection, _limit: i64) -> Result<(), MigrationError> {
    conn.execute_batch("ALTER TABLE result RENAME COLUMN stats TO brief")?;
    Ok(())
}

fn split_brief_detail(conn: &Connection, limit: i64) -> Result<(), MigrationError> {
    conn.execute_batch(TWO_TABLE_SCHEMA)?;
    let expected = row_count(conn, "result")?;

    let mut after = String::new();
    loop {
        let last: Option<String> = conn.query_row(
            "SELECT MAX(id) FROM (SELECT id FROM result WHERE id > ?1 ORDER BY id LIMIT ?2)",
            params![after, limit],
            |row| row.get(0),
        )?;
        let Some(last) = last else {
            break;
        };

        let briefs = conn.execute(
            "
            INSERT INTO brief (id, time, mode, rule, stage, weapon, players, brief)
            SELECT id, time, mode, rule, stage, weapon, players, brief
            FROM result WHERE id > ?1 AND id <= ?2
            ",
            params![after, last],
        )?;
        let details = conn.execute(
            "
            INSERT INTO detail (id, time, mode, detail)
            SELECT id, time, mode, detail
            FROM result WHERE id > ?1 AND id <= ?2
            ",
            params![after, last],
        )?;
        if briefs != details {
            return Err(MigrationError::CountMismatch {
                table: "detail",
                found: details as i64,
                expected: briefs as i64,
            });
        }
        after = last;
    }

    for table in ["brief", "detail"] {
        let found = row_count(conn, table)?;
        if found != expected {
            return Err(MigrationError::CountMismatch {
                table,
                found,
                expected,
            });
        }
    }

    conn.execute_batch("DROP TABLE result")?;
    Ok(())
}

fn recompute_coop_briefs(conn: &Connection, limit: i64) -> Result<(), MigrationError> {
    recompute_briefs(conn, ResultKind::Coop, limit)?;
    Ok(())
}

/// Rewrites `brief` from `detail` for every stored result of `kind`.
pub(crate) fn recompute_briefs(
    conn: &Connection,
    kind: ResultKind,
    limit: i64,
) -> Result<usize, MigrationError> {
    let sql = match kind {
        ResultKind::Battle => {
            "
            SELECT id, mode, detail FROM detail
            WHERE mode != 'salmon_run' AND id > ?1
            ORDER BY id LIMIT ?2
            "
        }
        ResultKind::Coop => {
            "
            SELECT id, mode, detail FROM detail
            WHERE mode = 'salmon_run' AND id > ?1
            ORDER BY id LIMIT ?2
            "
        }
    };

    scan_details(conn, sql, limit, |id, result| {
        let brief = result.brief_json().map_err(|source| MigrationError::Record {
            id: id.to_string(),
            source,
        })?;
        conn.execute(
            "UPDATE brief SET brief = ?2 WHERE id = ?1",
            params![id, brief],
        )?;
        Ok(())
    })
}

fn row_count(conn: &Connection, table: &str) -> Result<i64, rusqlite::Error> {
    conn.query_row(&format!("SELECT COUNT(1) FROM {table}"), [], |row| {
        row.get(0)
    })
}

/// Walks `(id, mode, detail)` rows in id order, `limit` at a time, normalizing
/// each detail before handing it to `apply`. `sql` must take the last seen id
/// as `?1` and the page size as `?2`.
fn scan_details(
    conn: &Connection,
    sql: &str,
    limit: i64,
    mut apply: impl FnMut(&str, NewResult) -> Result<(), MigrationError>,
) -> Result<usize, MigrationError> {
    let mut after = String::new();
    let mut visited = 0;

    loop {
        let rows = {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map(params![after, limit], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        let Some((last, _, _)) = rows.last() else {
            break;
        };
        after = last.clone();

        for (id, mode, detail) in &rows {
            let result = normalize(mode, detail).map_err(|source| MigrationError::Record {
                id: id.clone(),
                source,
            })?;
            apply(id, result)?;
            visited += 1;
        }

        if (rows.len() as i64) < limit {
            break;
        }
    }

    Ok(visited)
}

fn normalize(mode: &str, detail: &str) -> Result<NewResult, RecordError> {
    let payload: Value = serde_json::from_str(detail)?;
    NewResult::from_payload(ResultKind::of_mode(mode), &payload)
}
