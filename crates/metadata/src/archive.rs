use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use tracing::warn;
use zip::ZipArchive;

use crate::MetadataError;

/// Upper bound on the buffer reserved up front for one member. The declared
/// size comes from the archive header and is not trusted.
const MAX_PREALLOC: u64 = 64 << 20;

fn capacity_hint(declared: u64) -> usize {
    usize::try_from(declared.min(MAX_PREALLOC)).unwrap_or(0)
}

/// One regular file unpacked from an archive.
pub struct ArchiveEntry {
    pub name: String,
    pub data: Cursor<Vec<u8>>,
}

pub type ArchiveEntries<'a> = Box<dyn Iterator<Item = Result<ArchiveEntry, MetadataError>> + 'a>;

pub trait ArchiveReader: Send {
    fn init(&mut self, path: &Path) -> bool;

    /// Short scheme name embedded in member virtual paths.
    fn kind(&self) -> &str;

    fn entries(&mut self) -> Result<ArchiveEntries<'_>, MetadataError>;
}

#[derive(Default)]
pub struct ZipReader {
    archive: Option<ZipArchive<File>>,
}

impl ArchiveReader for ZipReader {
    fn init(&mut self, path: &Path) -> bool {
        let opened = File::open(path)
            .map_err(MetadataError::from)
            .and_then(|file| ZipArchive::new(file).map_err(MetadataError::from));
        match opened {
            Ok(archive) => {
                self.archive = Some(archive);
                true
            }
            Err(err) => {
                warn!("Failed to open archive {:?}: {}", path, err);
                self.archive = None;
                false
            }
        }
    }

    fn kind(&self) -> &str {
        "zip"
    }

    fn entries(&mut self) -> Result<ArchiveEntries<'_>, MetadataError> {
        match self.archive.as_mut() {
            Some(archive) => Ok(Box::new(ZipEntries { archive, next: 0 })),
            None => Err(MetadataError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "archive not opened",
            ))),
        }
    }
}

struct ZipEntries<'a> {
    archive: &'a mut ZipArchive<File>,
    next: usize,
}

impl Iterator for ZipEntries<'_> {
    type Item = Result<ArchiveEntry, MetadataError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.archive.len() {
            let index = self.next;
            self.next += 1;

            let mut file = match self.archive.by_index(index) {
                Ok(file) => file,
                Err(err) => return Some(Err(err.into())),
            };
            if file.is_dir() {
                continue;
            }

            let name = file.name().to_string();
            let mut data = Vec::with_capacity(capacity_hint(file.size()));
            if let Err(err) = file.read_to_end(&mut data) {
                return Some(Err(err.into()));
            }
            return Some(Ok(ArchiveEntry {
                name,
                data: Cursor::new(data),
            }));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    use super::*;

    #[test]
    fn lists_regular_files_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.zip");
        {
            let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
            let options = SimpleFileOptions::default();
            writer.add_directory("sub/", options).unwrap();
            writer.start_file("sub/one.trk", options).unwrap();
            writer.write_all(b"title=One").unwrap();
            writer.finish().unwrap();
        }

        let mut reader = ZipReader::default();
        assert!(reader.init(&path));
        let names: Vec<String> = reader
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().name)
            .collect();
        assert_eq!(names, vec!["sub/one.trk".to_string()]);
    }

    #[test]
    fn declared_sizes_do_not_drive_allocation() {
        assert_eq!(capacity_hint(0), 0);
        assert_eq!(capacity_hint(4096), 4096);
        assert_eq!(capacity_hint(u64::MAX), MAX_PREALLOC as usize);
    }

    #[test]
    fn refuses_non_archives() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.zip");
        std::fs::write(&path, b"not a zip").unwrap();
        let mut reader = ZipReader::default();
        assert!(!reader.init(&path));
        assert!(reader.entries().is_err());
    }
}
