use crate::{ResultStore, StorageError};
use conch_core::record::COOP_MODE;
use rusqlite::params;
use serde::Serialize;
use std::io::Write;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub battles: usize,
    pub coops: usize,
}

impl ResultStore {
    /// Writes `{"battles":[...],"coops":[...]}` with every stored detail,
    /// newest first, without holding more than one page in memory.
    pub fn export_json<W: Write>(&self, mut writer: W) -> Result<ExportSummary, StorageError> {
        self.ensure_ready()?;

        writer.write_all(b"{\"battles\":[")?;
        let battles = self.export_section(
            &mut writer,
            "SELECT detail FROM detail WHERE mode != ?1 ORDER BY time DESC, id LIMIT ?2 OFFSET ?3",
        )?;
        writer.write_all(b"],\"coops\":[")?;
        let coops = self.export_section(
            &mut writer,
            "SELECT detail FROM detail WHERE mode = ?1 ORDER BY time DESC, id LIMIT ?2 OFFSET ?3",
        )?;
        writer.write_all(b"]}")?;
        writer.flush()?;

        let summary = ExportSummary { battles, coops };
        info!(event = "store_exported", battles, coops);
        Ok(summary)
    }

    fn export_section<W: Write>(&self, writer: &mut W, sql: &str) -> Result<usize, StorageError> {
        let batch_size = self.config.batch_size.max(1);
        let mut stmt = self.conn.prepare(sql)?;
        let mut written = 0;

        loop {
            let page = stmt
                .query_map(params![COOP_MODE, batch_size as i64, written as i64], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<Result<Vec<_>, _>>()?;

            for detail in &page {
                if written > 0 {
                    writer.write_all(b",")?;
                }
                writer.write_all(detail.as_bytes())?;
                written += 1;
            }

            if page.len() < batch_size {
                return Ok(written);
            }
        }
    }
}
