mod config;
mod files;
mod index;
mod scanner;
mod service;
mod store;
#[cfg(test)]
mod testing;
mod watch;

use std::path::{Path, PathBuf};

use redb::{CommitError, DatabaseError, StorageError, TableError, TransactionError};
use serde::{Deserialize, Serialize};

pub use config::{config_path_from_env, load_or_create_config, save_config, ConfigError, ScanSettings};
pub use files::{enumerate_files, Candidate, CandidateKind, Candidates, ExtensionFilter};
pub use index::ExistingIndex;
pub use scanner::{EventSink, LibraryScanner, ScanControl, ScanEvent, ScanState, ScanSummary};
pub use service::{start_scanner, ScanCommand, ScannerHandle};
pub use store::{TrackDatabase, TrackStore};
pub use watch::LibraryWatcher;

pub use common::Track;
pub use metadata::{AudioLoader, PlaylistLoader};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LibraryStatus {
    Idle,
    Pending,
    Scanning,
    Monitoring,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryInfo {
    pub id: u32,
    pub name: String,
    pub path: PathBuf,
    pub status: LibraryStatus,
}

impl LibraryInfo {
    pub fn new(id: u32, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            name: name.into(),
            path: path.into(),
            status: LibraryStatus::Idle,
        }
    }

    /// Known tracks that a scan of `root` should reconcile against: anything
    /// bound to this library plus anything stored under `root`.
    pub fn snapshot_under(&self, root: &Path, tracks: &[Track]) -> Vec<Track> {
        tracks
            .iter()
            .filter(|track| {
                let location = track.archive_path().unwrap_or_else(|| track.filepath.clone());
                let inside = Path::new(&location).starts_with(root);
                if root == self.path.as_path() {
                    inside || track.library_id == Some(self.id)
                } else {
                    inside
                }
            })
            .cloned()
            .collect()
    }
}

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Redb(err) => write!(f, "db error: {}", err),
            LibraryError::Bincode(err) => write!(f, "bincode error: {}", err),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<redb::Error> for LibraryError {
    fn from(err: redb::Error) -> Self {
        LibraryError::Redb(err)
    }
}

impl From<DatabaseError> for LibraryError {
    fn from(err: DatabaseError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TableError> for LibraryError {
    fn from(err: TableError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TransactionError> for LibraryError {
    fn from(err: TransactionError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<CommitError> for LibraryError {
    fn from(err: CommitError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for LibraryError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LibraryError::Bincode(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_selects_tracks_under_root() {
        let library = LibraryInfo::new(1, "Music", "/music");
        let mut bound = Track::new("/elsewhere/a.flac", 0);
        bound.library_id = Some(1);
        let inside = Track::new("/music/x/b.flac", 0);
        let archived = Track::new(
            common::archive_virtual_path("zip", "/music/set.zip", "c.flac"),
            0,
        );
        let outside = Track::new("/other/d.flac", 0);
        let all = vec![bound, inside, archived, outside];

        let full = library.snapshot_under(Path::new("/music"), &all);
        assert_eq!(full.len(), 3);

        let sub = library.snapshot_under(Path::new("/music/x"), &all);
        assert_eq!(sub.len(), 1);
        assert_eq!(sub[0].filepath, "/music/x/b.flac");
    }
}
