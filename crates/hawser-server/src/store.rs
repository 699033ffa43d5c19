//! # File store
//!
//! All persisted files live flat under one root directory, addressed by the
//! client-supplied name. Names with path components are rejected outright.
//! Uploads write verified chunks at a byte offset as they arrive, which is
//! what makes the `OFFSET` resume handshake truthful after an interruption.

use bytes::Bytes;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use hawser_proto::frame::CHUNK_SIZE;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("invalid file name: {0}")]
    InvalidName(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Flat file store rooted at a configured directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open the store, creating the root directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<FileStore> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(FileStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, StoreError> {
        if !is_safe_name(name) {
            return Err(StoreError::InvalidName(name.to_owned()));
        }
        Ok(self.root.join(name))
    }

    /// Names of all stored files, sorted.
    pub fn list(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Ok(name) = entry.file_name().into_string() {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Size of the named file on disk.
    pub fn size_of(&self, name: &str) -> Result<u64, StoreError> {
        let path = self.resolve(name)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        let path = self.resolve(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(name, "deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Iterate the file's contents from `offset` in application-sized
    /// chunks.
    pub fn read_chunks(&self, name: &str, offset: u64) -> Result<ChunkReader, StoreError> {
        let path = self.resolve(name)?;
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(name.to_owned()))
            }
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(offset))?;
        Ok(ChunkReader { file, done: false })
    }

    /// Open an upload sink positioned at `offset`. Offset zero starts a
    /// fresh file; a nonzero offset keeps the existing prefix and writes
    /// past it. Any bytes beyond `offset` are discarded.
    pub fn open_upload(&self, name: &str, offset: u64) -> Result<UploadSink, StoreError> {
        let path = self.resolve(name)?;
        let mut file = OpenOptions::new().write(true).create(true).open(&path)?;
        file.set_len(offset)?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(UploadSink { file })
    }
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 255
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

// ─── Chunked reads ──────────────────────────────────────────────────────────

/// Iterator over a file's chunks for a GET stream.
pub struct ChunkReader {
    file: File,
    done: bool,
}

impl Iterator for ChunkReader {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        if filled == 0 {
            self.done = true;
            return None;
        }
        buf.truncate(filled);
        Some(Ok(Bytes::from(buf)))
    }
}

// ─── Uploads ────────────────────────────────────────────────────────────────

/// Write side of an active upload. Chunks are persisted as they arrive.
#[derive(Debug)]
pub struct UploadSink {
    file: File,
}

impl UploadSink {
    pub fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk)
    }

    /// Flush everything to disk.
    pub fn commit(mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()
    }
}
