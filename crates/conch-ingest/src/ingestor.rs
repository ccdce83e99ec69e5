use conch_core::fleece::DecodeError;
use conch_core::import_stream::StreamError;
use conch_core::record::{canonical_id, native_id, NewResult, RecordError, ResultKind};
use conch_storage::{ResultStore, StorageError};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("import stream error: {0}")]
    Stream(#[from] StreamError),
    #[error("binary decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("source database error: {0}")]
    Source(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unrecognized import document: {0}")]
    Format(String),
    #[error("another import holds the lock at {0}")]
    Busy(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    Api,
    JsonImport,
    BinaryImport,
}

impl RecordOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordOrigin::Api => "api",
            RecordOrigin::JsonImport => "json_import",
            RecordOrigin::BinaryImport => "binary_import",
        }
    }
}

/// A wrapped payload (`{"vsHistoryDetail": ..}` / `{"coopHistoryDetail": ..}`).
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingRecord {
    Battle(Value),
    Coop(Value),
}

impl IncomingRecord {
    pub fn new(kind: ResultKind, payload: Value) -> Self {
        match kind {
            ResultKind::Battle => IncomingRecord::Battle(payload),
            ResultKind::Coop => IncomingRecord::Coop(payload),
        }
    }

    pub fn kind(&self) -> ResultKind {
        match self {
            IncomingRecord::Battle(_) => ResultKind::Battle,
            IncomingRecord::Coop(_) => ResultKind::Coop,
        }
    }

    pub fn payload(&self) -> &Value {
        match self {
            IncomingRecord::Battle(payload) | IncomingRecord::Coop(payload) => payload,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub total: usize,
    pub skip: usize,
    pub fail: usize,
    /// First failure of the import; later ones are only counted.
    pub error: Option<String>,
}

impl ImportReport {
    pub fn added(&self) -> usize {
        self.total.saturating_sub(self.skip + self.fail)
    }

    pub fn merge(&mut self, other: ImportReport) {
        self.total += other.total;
        self.skip += other.skip;
        self.fail += other.fail;
        if self.error.is_none() {
            self.error = other.error;
        }
    }

    fn record_failure(&mut self, message: String) {
        self.fail += 1;
        if self.error.is_none() {
            self.error = Some(message);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportProgress {
    pub processed: usize,
    pub total: usize,
}

pub trait ProgressSink {
    fn on_progress(&mut self, progress: ImportProgress);
}

impl ProgressSink for () {
    fn on_progress(&mut self, _progress: ImportProgress) {}
}

impl ProgressSink for Vec<ImportProgress> {
    fn on_progress(&mut self, progress: ImportProgress) {
        self.push(progress);
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Window size for streamed JSON imports.
    pub import_read_size: usize,
    /// Records between progress callbacks.
    pub progress_every: usize,
    /// Weapon row ids of the Grizzco (coop rare) weapons. salmdroidNW images
    /// of these stay on the Nintendo host; other weapon images point at the
    /// splatoon3.ink mirror.
    pub grizzco_weapons: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            import_read_size: 4 * 1024 * 1024,
            progress_every: 100,
            grizzco_weapons: Vec::new(),
        }
    }
}

/// Serializes writes of one import or refresh into a store.
pub struct Ingestor<'a> {
    store: &'a ResultStore,
    config: IngestConfig,
}

impl<'a> Ingestor<'a> {
    pub fn new(store: &'a ResultStore, config: IngestConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &ResultStore {
        self.store
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn ingest(
        &self,
        records: Vec<IncomingRecord>,
        origin: RecordOrigin,
    ) -> Result<ImportReport, IngestError> {
        self.ingest_with_progress(records, origin, &mut ())
    }

    /// Stores every record not already present. A record that cannot be
    /// normalized or written is counted in `fail` and the batch continues;
    /// only errors that make the store itself unusable abort.
    pub fn ingest_with_progress(
        &self,
        records: Vec<IncomingRecord>,
        origin: RecordOrigin,
        progress: &mut dyn ProgressSink,
    ) -> Result<ImportReport, IngestError> {
        let total = records.len();
        let every = self.config.progress_every.max(1);
        let mut report = ImportReport {
            total,
            ..ImportReport::default()
        };

        for (index, record) in records.iter().enumerate() {
            match self.ingest_one(record, origin) {
                Ok(true) => {}
                Ok(false) => report.skip += 1,
                Err(RecordFailure::Record(err)) => {
                    warn!(
                        event = "ingest_record_failed",
                        origin = origin.as_str(),
                        kind = record.kind().as_str(),
                        index,
                        error = %err
                    );
                    report.record_failure(err.to_string());
                }
                Err(RecordFailure::Store(err)) if err.is_fatal() => return Err(err.into()),
                Err(RecordFailure::Store(err @ StorageError::NeedsUpgrade { .. })) => {
                    return Err(err.into())
                }
                Err(RecordFailure::Store(err)) => {
                    warn!(
                        event = "ingest_write_failed",
                        origin = origin.as_str(),
                        kind = record.kind().as_str(),
                        index,
                        error = %err
                    );
                    report.record_failure(err.to_string());
                }
            }

            let processed = index + 1;
            if processed % every == 0 || processed == total {
                debug!(event = "ingest_progress", processed, total);
                progress.on_progress(ImportProgress { processed, total });
            }
        }

        info!(
            event = "ingest_batch_done",
            origin = origin.as_str(),
            total = report.total,
            added = report.added(),
            skip = report.skip,
            fail = report.fail
        );
        Ok(report)
    }

    /// `Ok(false)` means the id was already stored.
    fn ingest_one(
        &self,
        record: &IncomingRecord,
        origin: RecordOrigin,
    ) -> Result<bool, RecordFailure> {
        let kind = record.kind();
        let payload = record.payload();
        let id = match origin {
            RecordOrigin::Api => native_id(kind, payload)
                .map(str::to_string)
                .ok_or_else(|| RecordError::MissingField(format!("{}.id", kind.envelope_key())))?,
            RecordOrigin::JsonImport | RecordOrigin::BinaryImport => canonical_id(kind, payload)?,
        };

        if self.store.exists(&id)? {
            return Ok(false);
        }

        let result = NewResult::from_payload(kind, payload)?;
        Ok(self.store.add(&result)?)
    }
}

enum RecordFailure {
    Record(RecordError),
    Store(StorageError),
}

impl From<RecordError> for RecordFailure {
    fn from(err: RecordError) -> Self {
        RecordFailure::Record(err)
    }
}

impl From<StorageError> for RecordFailure {
    fn from(err: StorageError) -> Self {
        RecordFailure::Store(err)
    }
}
