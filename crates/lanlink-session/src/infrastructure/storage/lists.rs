//! Loading and saving the bookmark and blacklist files.
//!
//! Both files are optional: a missing file is an empty list.  Any other I/O
//! failure is reported with the offending path.

use std::io;
use std::path::Path;

use lanlink_core::{Blacklist, BookmarkStore};
use tracing::{debug, info};

use super::files::FileStore;
use crate::application::SessionError;

fn read_optional(files: &dyn FileStore, path: &Path) -> Result<Option<String>, SessionError> {
    match files.read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(SessionError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write(files: &dyn FileStore, path: &Path, text: &str) -> Result<(), SessionError> {
    files
        .write_string(path, text)
        .map_err(|source| SessionError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Loads the bookmark file; every listed address is pinned.
pub fn load_bookmarks(files: &dyn FileStore, path: &Path) -> Result<BookmarkStore, SessionError> {
    match read_optional(files, path)? {
        Some(text) => {
            let store = BookmarkStore::parse(&text);
            info!("loaded {} bookmarks from {}", store.len(), path.display());
            Ok(store)
        }
        None => {
            debug!("no bookmark file at {}", path.display());
            Ok(BookmarkStore::new())
        }
    }
}

/// Writes the pinned bookmarks and clears the store's dirty flag.
pub fn save_bookmarks(
    files: &dyn FileStore,
    path: &Path,
    store: &mut BookmarkStore,
) -> Result<(), SessionError> {
    write(files, path, &store.to_text())?;
    store.mark_clean();
    info!("saved bookmarks to {}", path.display());
    Ok(())
}

pub fn load_blacklist(files: &dyn FileStore, path: &Path) -> Result<Blacklist, SessionError> {
    Ok(read_optional(files, path)?
        .map(|text| Blacklist::parse(&text))
        .unwrap_or_default())
}

pub fn save_blacklist(files: &dyn FileStore, path: &Path, list: &Blacklist) -> Result<(), SessionError> {
    write(files, path, &list.to_text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::files::FsFileStore;
    use lanlink_core::PeerAddress;
    use uuid::Uuid;

    fn temp_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("lanlink_test_{}", Uuid::new_v4()))
    }

    #[test]
    fn test_missing_files_load_as_empty() {
        let dir = temp_dir();
        assert!(load_bookmarks(&FsFileStore, &dir.join("bookmarks.txt")).unwrap().is_empty());
        assert!(load_blacklist(&FsFileStore, &dir.join("banned.txt")).unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load_bookmarks_keeps_pinned_addresses() {
        // Arrange
        let dir = temp_dir();
        let path = dir.join("bookmarks.txt");
        let mut store = BookmarkStore::new();
        store.add_bookmark(PeerAddress::new(192, 168, 0, 4));

        // Act
        save_bookmarks(&FsFileStore, &path, &mut store).unwrap();
        let loaded = load_bookmarks(&FsFileStore, &path).unwrap();

        // Assert
        assert!(!store.is_dirty());
        assert_eq!(loaded.addresses(), vec![PeerAddress::new(192, 168, 0, 4)]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_blacklist_round_trip() {
        let dir = temp_dir();
        let path = dir.join("banned.txt");
        let mut list = Blacklist::new();
        list.add("10.9.8.7");

        save_blacklist(&FsFileStore, &path, &list).unwrap();

        assert!(load_blacklist(&FsFileStore, &path).unwrap().is_banned("10.9.8.7"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
