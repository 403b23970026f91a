//! Path-keyed buffered file access.
//!
//! The session reads transfer sources, writes `.RECV` temp files, and loads
//! and saves the bookmark and blacklist files through [`FileStore`], so tests
//! and embedders can redirect every file operation.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Buffered file facility consumed by the session.
pub trait FileStore {
    /// Opens `path` for reading and returns the stream with the file length.
    fn open_read(&self, path: &Path) -> io::Result<(Box<dyn Read>, u64)>;

    /// Creates or truncates `path`, creating parent directories as needed.
    fn create(&self, path: &Path) -> io::Result<Box<dyn Write>>;

    /// Renames `from` to `to`, replacing `to` if it exists.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Writes `contents` to `path`, creating parent directories as needed.
    fn write_string(&self, path: &Path, contents: &str) -> io::Result<()>;
}

/// [`FileStore`] over the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsFileStore;

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

impl FileStore for FsFileStore {
    fn open_read(&self, path: &Path) -> io::Result<(Box<dyn Read>, u64)> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok((Box::new(BufReader::new(file)), len))
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn Write>> {
        ensure_parent(path)?;
        let file = File::create(path)?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write_string(&self, path: &Path, contents: &str) -> io::Result<()> {
        ensure_parent(path)?;
        fs::write(path, contents)
    }
}
