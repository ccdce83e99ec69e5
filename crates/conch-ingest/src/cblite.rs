//! Import from a Couchbase-Lite style SQLite database: one `kv_*` table per
//! key store, documents encoded as Fleece bodies keyed against a shared-key
//! table kept in `kv_info`.

use crate::ingestor::{
    ImportReport, IncomingRecord, IngestError, Ingestor, ProgressSink, RecordOrigin,
};
use conch_core::fleece::{decode, decode_shared_keys};
use conch_core::record::ResultKind;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use tracing::{info, warn};

const SHARED_KEYS_DOC: &str = "SharedKeys";
const DELETED_FLAG: i64 = 0x01;

/// Live document bodies of `kv_default` and the shared keys they refer to.
pub struct CbliteSource {
    conn: Connection,
    shared_keys: Vec<String>,
}

impl CbliteSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let shared_keys = read_shared_keys(&conn)?;
        Ok(Self { conn, shared_keys })
    }

    pub fn shared_keys(&self) -> &[String] {
        &self.shared_keys
    }

    /// Every live body in key order. Deleted documents are left out.
    pub fn bodies(&self) -> Result<Vec<(String, Vec<u8>)>, IngestError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT key, body FROM kv_default
            WHERE (flags & ?1) = 0 AND body IS NOT NULL
            ORDER BY key
            ",
        )?;
        let rows = stmt
            .query_map([DELETED_FLAG], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn read_shared_keys(conn: &Connection) -> Result<Vec<String>, IngestError> {
    let has_info: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'kv_info')",
        [],
        |row| row.get(0),
    )?;
    if !has_info {
        return Ok(Vec::new());
    }

    let body: Option<Vec<u8>> = conn
        .query_row(
            "SELECT body FROM kv_info WHERE key = ?1",
            [SHARED_KEYS_DOC],
            |row| row.get(0),
        )
        .optional()?;
    match body {
        Some(body) => Ok(decode_shared_keys(&body)?),
        None => Ok(Vec::new()),
    }
}

impl Ingestor<'_> {
    /// Decodes every live document of `path` as a `kind` detail and ingests
    /// it. A body that fails to decode is a failed record, not a failed
    /// import.
    pub fn import_cblite(
        &self,
        path: impl AsRef<Path>,
        kind: ResultKind,
    ) -> Result<ImportReport, IngestError> {
        self.import_cblite_with_progress(path, kind, &mut ())
    }

    pub fn import_cblite_with_progress(
        &self,
        path: impl AsRef<Path>,
        kind: ResultKind,
        progress: &mut dyn ProgressSink,
    ) -> Result<ImportReport, IngestError> {
        let source = CbliteSource::open(path.as_ref())?;
        let bodies = source.bodies()?;
        info!(
            event = "cblite_import_start",
            path = %path.as_ref().display(),
            kind = kind.as_str(),
            documents = bodies.len(),
            shared_keys = source.shared_keys().len()
        );

        let mut records = Vec::with_capacity(bodies.len());
        let mut undecodable = ImportReport::default();
        for (key, body) in bodies {
            match decode(&body, source.shared_keys()) {
                Ok(value) => {
                    let detail = serde_json::Value::from(value);
                    records.push(IncomingRecord::new(kind, kind.wrap(detail)));
                }
                Err(err) => {
                    warn!(event = "cblite_decode_failed", key = %key, error = %err);
                    undecodable.merge(ImportReport {
                        total: 1,
                        skip: 0,
                        fail: 1,
                        error: Some(format!("document {key}: {err}")),
                    });
                }
            }
        }

        let mut report = undecodable;
        report.merge(self.ingest_with_progress(records, RecordOrigin::BinaryImport, progress)?);
        Ok(report)
    }
}
