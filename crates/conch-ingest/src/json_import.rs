use crate::ingestor::{
    ImportProgress, ImportReport, IncomingRecord, IngestError, Ingestor, ProgressSink,
    RecordOrigin,
};
use crate::remap;
use conch_core::import_stream::{ImportChunk, ImportStreamParser};
use conch_core::record::ResultKind;
use serde_json::Value;
use std::io::Read;
use tracing::{debug, info, warn};

/// Shifts per-window progress onto a whole-import count.
struct Cumulative<'s> {
    inner: &'s mut dyn ProgressSink,
    base: usize,
}

impl ProgressSink for Cumulative<'_> {
    fn on_progress(&mut self, progress: ImportProgress) {
        self.inner.on_progress(ImportProgress {
            processed: self.base + progress.processed,
            total: self.base + progress.total,
        });
    }
}

impl Ingestor<'_> {
    /// Imports a whole `{"battles":[...],"coops":[...]}` document held in
    /// memory. `images` is ignored.
    pub fn import_json(&self, bytes: &[u8]) -> Result<ImportReport, IngestError> {
        self.import_json_with_progress(bytes, &mut ())
    }

    pub fn import_json_with_progress(
        &self,
        bytes: &[u8],
        progress: &mut dyn ProgressSink,
    ) -> Result<ImportReport, IngestError> {
        let document: Value = serde_json::from_slice(bytes)?;
        let Value::Object(mut document) = document else {
            return Err(IngestError::Format("import must be a json object".to_string()));
        };
        if !document.contains_key("battles") && !document.contains_key("coops") {
            return Err(IngestError::Format(
                "import has neither `battles` nor `coops`".to_string(),
            ));
        }

        let mut records = Vec::new();
        for (key, kind) in [("battles", ResultKind::Battle), ("coops", ResultKind::Coop)] {
            match document.remove(key) {
                None | Some(Value::Null) => {}
                Some(Value::Array(entries)) => records.extend(
                    entries
                        .into_iter()
                        .map(|entry| remap::normalize(kind, entry)),
                ),
                Some(_) => {
                    return Err(IngestError::Format(format!("`{key}` must be an array")));
                }
            }
        }

        info!(event = "json_import_start", records = records.len());
        self.ingest_with_progress(records, RecordOrigin::JsonImport, progress)
    }

    /// Imports a document too large to hold in memory, reading it in
    /// `import_read_size` windows and ingesting each window's records before
    /// reading the next.
    pub fn import_json_stream<R: Read>(&self, reader: R) -> Result<ImportReport, IngestError> {
        self.import_json_stream_with_progress(reader, &mut ())
    }

    pub fn import_json_stream_with_progress<R: Read>(
        &self,
        mut reader: R,
        progress: &mut dyn ProgressSink,
    ) -> Result<ImportReport, IngestError> {
        let size = self.config().import_read_size.max(1);
        let mut window = vec![0u8; size];
        let mut parser = ImportStreamParser::new();
        let mut report = ImportReport::default();
        let mut windows = 0usize;

        loop {
            let read = read_window(&mut reader, &mut window)?;
            windows += 1;
            let chunk = parser.parse(&window[..read])?;
            debug!(
                event = "json_import_window",
                window = windows,
                read,
                records = chunk.battles.len() + chunk.coops.len(),
                pending = parser.pending()
            );

            let records = chunk_records(chunk);
            if !records.is_empty() {
                let mut sink = Cumulative {
                    inner: &mut *progress,
                    base: report.total,
                };
                report.merge(self.ingest_with_progress(
                    records,
                    RecordOrigin::JsonImport,
                    &mut sink,
                )?);
            }

            if read < size {
                break;
            }
        }

        let drained = parser.drained();
        parser.finish()?;
        info!(
            event = "json_import_stream_done",
            windows,
            bytes = drained,
            total = report.total,
            skip = report.skip,
            fail = report.fail
        );
        Ok(report)
    }

    /// Imports an s3s `results.json` style array of `{"data": ...}` results.
    /// Entries of an unknown shape count as failures.
    pub fn import_s3s(&self, bytes: &[u8]) -> Result<ImportReport, IngestError> {
        let (records, unknown) = remap::s3s_export(serde_json::from_slice(bytes)?)?;
        let mut report = self.ingest(records, RecordOrigin::JsonImport)?;
        if !unknown.is_empty() {
            report.merge(ImportReport {
                total: unknown.len(),
                skip: 0,
                fail: unknown.len(),
                error: Some("result is neither a battle nor a coop".to_string()),
            });
        }
        Ok(report)
    }

    /// Imports one page of a salmdroidNW backup.
    pub fn import_salmdroid(&self, bytes: &[u8]) -> Result<ImportReport, IngestError> {
        let page: Value = serde_json::from_slice(bytes)?;
        let grizzco = remap::GrizzcoImages::from_row_ids(&self.config().grizzco_weapons);
        let (records, failures) = remap::salmdroid_page(&page, &grizzco)?;
        let mut report = self.ingest(records, RecordOrigin::JsonImport)?;
        for failure in &failures {
            warn!(event = "ingest_record_failed", origin = "salmdroid", error = %failure);
        }
        if !failures.is_empty() {
            report.merge(ImportReport {
                total: failures.len(),
                skip: 0,
                fail: failures.len(),
                error: failures.into_iter().next(),
            });
        }
        Ok(report)
    }
}

fn chunk_records(chunk: ImportChunk) -> Vec<IncomingRecord> {
    let battles = chunk
        .battles
        .into_iter()
        .map(|entry| remap::normalize(ResultKind::Battle, entry));
    let coops = chunk
        .coops
        .into_iter()
        .map(|entry| remap::normalize(ResultKind::Coop, entry));
    battles.chain(coops).collect()
}

/// Fills `window` unless the reader ends first; returns the bytes read.
fn read_window<R: Read>(reader: &mut R, window: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < window.len() {
        match reader.read(&mut window[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
