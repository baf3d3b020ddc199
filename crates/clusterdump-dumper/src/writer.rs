//! Buffered per-resource-type file output
//!
//! A [`FileWriter`] owns every file below `<output_root>/<resource>/`. Files
//! are opened lazily on first write, in append mode, and wrapped in a
//! `BufWriter` until the next [`FileWriter::flush`]. Flushing hands the file
//! back unbuffered, so periodic flushes never reopen files. Dropping a writer
//! without closing it still writes pending buffers out, best-effort.
//!
//! The writer has no internal locking. All mutating methods take `&mut self`
//! and the pipeline gives each resource type's worker its own writer, so no
//! two tasks can ever write the same path concurrently.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, instrument};

use crate::error::{DumpError, Result};

/// Permissions of every created file (owner read/write)
pub const FILE_MODE: u32 = 0o600;

/// How many workers the pipeline should run for this writer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerHint {
    /// One worker per resource type
    #[default]
    PerResourceType,
    /// At most this many workers at a time
    Fixed(NonZeroUsize),
}

pub struct FileWriter {
    output_path: PathBuf,
    worker_hint: WorkerHint,
    /// Open files whose buffer has been flushed
    files: HashMap<PathBuf, File>,
    /// Open files currently wrapped in a write buffer
    buffers: HashMap<PathBuf, BufWriter<File>>,
}

impl FileWriter {
    /// Create a writer rooted at `<output_root>/<resource_name>`. No I/O happens
    /// until the first write.
    pub fn open(output_root: impl AsRef<Path>, resource_name: &str) -> Self {
        Self {
            output_path: output_root.as_ref().join(resource_name),
            worker_hint: WorkerHint::default(),
            files: HashMap::new(),
            buffers: HashMap::new(),
        }
    }

    pub fn with_worker_hint(mut self, hint: WorkerHint) -> Self {
        self.worker_hint = hint;
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn worker_hint(&self) -> WorkerHint {
        self.worker_hint
    }

    /// Number of files currently open
    pub fn open_handles(&self) -> usize {
        self.files.len() + self.buffers.len()
    }

    /// Append `data` to `relative_path` under the output path
    pub fn write(&mut self, data: &[u8], relative_path: &str) -> Result<()> {
        let path = self.resolve(relative_path)?;

        let buffer = match self.buffers.entry(path) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let file = match self.files.remove(entry.key()) {
                    Some(file) => file,
                    None => open_append(entry.key())?,
                };
                entry.insert(BufWriter::new(file))
            },
        };

        buffer
            .write_all(data)
            .map_err(|e| DumpError::io("write", self.output_path.join(relative_path), e))
    }

    /// Flush every buffer to its file and drop the buffers. Files stay open.
    #[instrument(skip(self), fields(path = %self.output_path.display()))]
    pub fn flush(&mut self) -> Result<()> {
        debug!(buffers = self.buffers.len(), "Flushing writers");

        for (path, buffer) in self.buffers.drain() {
            let file = buffer
                .into_inner()
                .map_err(|e| DumpError::io("flush", &path, e.into_error()))?;
            self.files.insert(path, file);
        }

        Ok(())
    }

    /// Close every open file. Calling it again is a no-op.
    #[instrument(skip(self), fields(path = %self.output_path.display()))]
    pub fn close(&mut self) -> Result<()> {
        debug!(files = self.open_handles(), "Closing writers");

        // Buffers still pending here were written after the last flush;
        // releasing them writes their bytes out before the file closes.
        for (path, buffer) in self.buffers.drain() {
            let file = buffer
                .into_inner()
                .map_err(|e| DumpError::io("close", &path, e.into_error()))?;
            self.files.insert(path, file);
        }

        for (path, file) in self.files.drain() {
            file.sync_all().map_err(|e| DumpError::io("close", &path, e))?;
        }

        Ok(())
    }

    fn resolve(&self, relative_path: &str) -> Result<PathBuf> {
        let relative = Path::new(relative_path);
        let contained = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));

        if relative_path.is_empty() || !contained {
            return Err(DumpError::InvalidPath(relative_path.to_string()));
        }

        Ok(self.output_path.join(relative))
    }
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DumpError::io("create directory", parent, e))?;
    }

    let mut options = OpenOptions::new();
    options.create(true).append(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(FILE_MODE);
    }

    options.open(path).map_err(|e| DumpError::io("open", path, e))
}
