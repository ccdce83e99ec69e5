use chrono::Utc;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Advisory lock held for the duration of one import. Released on drop.
pub struct ImportLock {
    file: File,
    path: PathBuf,
}

impl ImportLock {
    /// `Ok(None)` when another process already holds the lock.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>, std::io::Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.try_lock_exclusive().is_err() {
            return Ok(None);
        }

        let metadata = format!(
            "pid={}\nacquired_at={}\n",
            std::process::id(),
            Utc::now().to_rfc3339()
        );
        file.set_len(0)?;
        file.write_all(metadata.as_bytes())?;
        file.flush()?;

        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ImportLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
