//! # Positional Data File
//!
//! Thin wrapper over the partition's data file exposing positional reads
//! and writes plus the three durability primitives the engine needs:
//!
//! - `flush(only_data)` — `fdatasync` when only payload bytes changed,
//!   `fsync` when extent metadata moved too, preceded on Linux by a full
//!   `sync_file_range` sweep to start writeback early
//! - `hint_flush(offset, len)` — an asynchronous `sync_file_range(WRITE)`
//!   nudge over a freshly written extent; a no-op where unsupported
//!
//! Reads tolerate short counts (the preread window often crosses EOF);
//! writes always complete fully or fail. `EINTR` is retried in both
//! directions.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};

#[derive(Debug)]
pub struct DataFile {
    file: File,
    path: PathBuf,
}

impl DataFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .wrap_err_with(|| format!("failed to open data file '{}'", path.display()))?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> Result<u64> {
        let metadata = self
            .file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", self.path.display()))?;
        Ok(metadata.len())
    }

    /// Reads up to `buf.len()` bytes starting at `offset`. Returns the
    /// number of bytes actually read, which is short only at EOF.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut read = 0usize;
        while read < buf.len() {
            match self.file.read_at(&mut buf[read..], offset + read as u64) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).wrap_err_with(|| {
                        format!(
                            "failed to read {} bytes at {} from '{}'",
                            buf.len(),
                            offset,
                            self.path.display()
                        )
                    });
                }
            }
        }
        Ok(read)
    }

    /// Writes the whole of `data` at `offset`.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut written = 0usize;
        while written < data.len() {
            match self.file.write_at(&data[written..], offset + written as u64) {
                Ok(0) => {
                    eyre::bail!(
                        "short write at {} to '{}': {} of {} bytes",
                        offset,
                        self.path.display(),
                        written,
                        data.len()
                    );
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).wrap_err_with(|| {
                        format!(
                            "failed to write {} bytes at {} to '{}'",
                            data.len(),
                            offset,
                            self.path.display()
                        )
                    });
                }
            }
        }
        Ok(())
    }

    /// Durably flushes the file: `fdatasync` when only payload bytes
    /// changed, full `fsync` otherwise.
    pub fn flush(&self, only_data: bool) -> Result<()> {
        #[cfg(target_os = "linux")]
        // Kick writeback for the whole file before blocking in fsync.
        unsafe {
            use std::os::unix::io::AsRawFd;
            libc::sync_file_range(
                self.file.as_raw_fd(),
                0,
                0,
                libc::SYNC_FILE_RANGE_WAIT_BEFORE
                    | libc::SYNC_FILE_RANGE_WRITE
                    | libc::SYNC_FILE_RANGE_WAIT_AFTER,
            );
        }

        if only_data {
            self.file
                .sync_data()
                .wrap_err_with(|| format!("fdatasync failed for '{}'", self.path.display()))
        } else {
            self.file
                .sync_all()
                .wrap_err_with(|| format!("fsync failed for '{}'", self.path.display()))
        }
    }

    /// Asks the kernel to start writing back `[offset, offset + len)`
    /// without waiting. Best effort; a no-op off Linux.
    pub fn hint_flush(&self, offset: u64, len: u64) {
        #[cfg(target_os = "linux")]
        // SAFETY: sync_file_range is a writeback hint over the open fd;
        // it never touches user memory.
        unsafe {
            use std::os::unix::io::AsRawFd;
            libc::sync_file_range(
                self.file.as_raw_fd(),
                offset as libc::off64_t,
                len as libc::off64_t,
                libc::SYNC_FILE_RANGE_WRITE,
            );
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = (offset, len);
        }
    }
}
