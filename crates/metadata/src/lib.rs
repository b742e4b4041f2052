mod archive;
pub mod playlist;
mod tags;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use common::{archive_virtual_path, extension_lower, file_modified_millis, ArchiveLocation, Track};
use lofty::error::LoftyError;
use tracing::{debug, info, warn};

pub use archive::{ArchiveEntries, ArchiveEntry, ArchiveReader, ZipReader};
pub use playlist::{CueParser, M3uParser, PlaylistLoader, PlaylistParser};
pub use tags::LoftyReader;

pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek + ?Sized> ReadSeek for T {}

/// An open stream handed to an [`AudioReader`]. For archive members
/// `filepath` is the member's virtual path.
pub struct AudioSource<'a> {
    pub filepath: &'a str,
    pub reader: &'a mut dyn ReadSeek,
}

/// Tag decoder for one family of audio formats.
///
/// `init` is called once per stream, then `read_track` once per subsong with
/// the stream rewound to the start each time.
pub trait AudioReader: Send {
    fn init(&mut self, source: &mut AudioSource<'_>) -> bool;

    fn subsong_count(&self) -> u32 {
        1
    }

    fn read_track(&mut self, source: &mut AudioSource<'_>, track: &mut Track) -> bool;
}

pub type ReaderFactory = fn() -> Box<dyn AudioReader>;
pub type ArchiveFactory = fn() -> Box<dyn ArchiveReader>;

struct Registration<F> {
    extensions: Vec<String>,
    create: F,
}

impl<F> Registration<F> {
    fn handles(&self, ext: &str) -> bool {
        self.extensions.iter().any(|candidate| candidate == ext)
    }
}

/// Maps file extensions to decoder constructors.
pub struct AudioLoader {
    readers: Vec<Registration<ReaderFactory>>,
    archives: Vec<Registration<ArchiveFactory>>,
}

impl Default for AudioLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioLoader {
    pub fn new() -> Self {
        let mut loader = Self::empty();
        loader.add_reader(tags::LOFTY_EXTENSIONS, || Box::new(LoftyReader::default()));
        loader.add_archive_reader(&["zip"], || Box::new(ZipReader::default()));
        loader
    }

    pub fn empty() -> Self {
        Self {
            readers: Vec::new(),
            archives: Vec::new(),
        }
    }

    pub fn add_reader(&mut self, extensions: &[&str], create: ReaderFactory) {
        self.readers.push(Registration {
            extensions: lower_all(extensions),
            create,
        });
    }

    pub fn add_archive_reader(&mut self, extensions: &[&str], create: ArchiveFactory) {
        self.archives.push(Registration {
            extensions: lower_all(extensions),
            create,
        });
    }

    pub fn supported_extensions(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for ext in self
            .readers
            .iter()
            .flat_map(|reg| reg.extensions.iter())
            .chain(self.archives.iter().flat_map(|reg| reg.extensions.iter()))
        {
            if !out.contains(ext) {
                out.push(ext.clone());
            }
        }
        out
    }

    pub fn is_archive(&self, filepath: &str) -> bool {
        match extension_lower(Path::new(filepath)) {
            Some(ext) => self.archives.iter().any(|reg| reg.handles(&ext)),
            None => false,
        }
    }

    pub fn reader_for_file(&self, filepath: &str) -> Option<Box<dyn AudioReader>> {
        let ext = extension_lower(Path::new(filepath))?;
        self.readers
            .iter()
            .find(|reg| reg.handles(&ext))
            .map(|reg| (reg.create)())
    }

    pub fn archive_reader_for_file(&self, filepath: &str) -> Option<Box<dyn ArchiveReader>> {
        let ext = extension_lower(Path::new(filepath))?;
        self.archives
            .iter()
            .find(|reg| reg.handles(&ext))
            .map(|reg| (reg.create)())
    }

    /// Decodes every subsong of a file. Archives expand into one track per
    /// readable member.
    pub fn read_tracks(&self, filepath: &str) -> Vec<Track> {
        if self.is_archive(filepath) {
            return self.read_archive_tracks(filepath);
        }

        let mut reader = match self.reader_for_file(filepath) {
            Some(reader) => reader,
            None => return Vec::new(),
        };

        let mut file = match File::open(filepath) {
            Ok(file) => file,
            Err(err) => {
                warn!("Failed to open file {}: {}", filepath, err);
                return Vec::new();
            }
        };
        let file_size = file.metadata().map(|meta| meta.len()).unwrap_or(0);

        let mut source = AudioSource {
            filepath,
            reader: &mut file,
        };
        if !reader.init(&mut source) {
            info!("Unsupported file: {}", filepath);
            return Vec::new();
        }

        let mut tracks = Vec::new();
        for subsong in 0..reader.subsong_count() {
            let mut track = Track::new(filepath, subsong);
            track.file_size = file_size;
            if source.reader.seek(SeekFrom::Start(0)).is_err() {
                break;
            }
            if reader.read_track(&mut source, &mut track) {
                track.generate_hash();
                tracks.push(track);
            }
        }
        tracks
    }

    pub fn read_archive_tracks(&self, filepath: &str) -> Vec<Track> {
        let mut archive = match self.archive_reader_for_file(filepath) {
            Some(archive) => archive,
            None => return Vec::new(),
        };
        if !archive.init(Path::new(filepath)) {
            return Vec::new();
        }

        let kind = archive.kind().to_string();
        let modified_time = file_modified_millis(Path::new(filepath));
        let entries = match archive.entries() {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Failed to list archive {}: {}", filepath, err);
                return Vec::new();
            }
        };

        let mut tracks = Vec::new();
        for entry in entries {
            let mut entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Failed to read archive member in {}: {}", filepath, err);
                    continue;
                }
            };

            let mut reader = match self.reader_for_file(&entry.name) {
                Some(reader) => reader,
                None => {
                    info!("Unsupported file: {}", entry.name);
                    continue;
                }
            };

            let virtual_path = archive_virtual_path(&kind, filepath, &entry.name);
            let entry_size = entry.data.get_ref().len() as u64;
            let mut source = AudioSource {
                filepath: &virtual_path,
                reader: &mut entry.data,
            };
            if !reader.init(&mut source) {
                info!("Unsupported file: {}", entry.name);
                continue;
            }

            for subsong in 0..reader.subsong_count() {
                let mut track = Track::new(virtual_path.clone(), subsong);
                track.file_size = entry_size;
                track.modified_time = modified_time;
                if source.reader.seek(SeekFrom::Start(0)).is_err() {
                    break;
                }
                if reader.read_track(&mut source, &mut track) {
                    track.generate_hash();
                    tracks.push(track);
                }
            }
        }

        debug!("Indexed {} tracks in {}", tracks.len(), filepath);
        tracks
    }

    /// Re-reads tags for a single known track in place. Identity fields are
    /// left alone.
    pub fn read_track_metadata(&self, track: &mut Track) -> bool {
        match ArchiveLocation::parse(&track.filepath) {
            Some(location) => self.read_archive_member_metadata(&location, track),
            None => {
                let filepath = track.filepath.clone();
                let mut reader = match self.reader_for_file(&filepath) {
                    Some(reader) => reader,
                    None => return false,
                };
                let mut file = match File::open(&filepath) {
                    Ok(file) => file,
                    Err(err) => {
                        warn!("Failed to open file {}: {}", filepath, err);
                        return false;
                    }
                };
                let mut source = AudioSource {
                    filepath: &filepath,
                    reader: &mut file,
                };
                read_subsong(reader.as_mut(), &mut source, track)
            }
        }
    }

    fn read_archive_member_metadata(&self, location: &ArchiveLocation, track: &mut Track) -> bool {
        let mut archive = match self.archive_reader_for_file(&location.archive_path) {
            Some(archive) => archive,
            None => return false,
        };
        if !archive.init(Path::new(&location.archive_path)) {
            return false;
        }
        let mut reader = match self.reader_for_file(&location.entry) {
            Some(reader) => reader,
            None => return false,
        };
        let entries = match archive.entries() {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Failed to list archive {}: {}", location.archive_path, err);
                return false;
            }
        };

        for entry in entries.flatten() {
            if entry.name != location.entry {
                continue;
            }
            let mut data = entry.data;
            let filepath = track.filepath.clone();
            let mut source = AudioSource {
                filepath: &filepath,
                reader: &mut data,
            };
            return read_subsong(reader.as_mut(), &mut source, track);
        }
        false
    }
}

fn read_subsong(reader: &mut dyn AudioReader, source: &mut AudioSource<'_>, track: &mut Track) -> bool {
    if !reader.init(source) {
        info!("Unsupported file: {}", source.filepath);
        return false;
    }
    if track.subsong >= reader.subsong_count() {
        return false;
    }
    if source.reader.seek(SeekFrom::Start(0)).is_err() {
        return false;
    }
    reader.read_track(source, track)
}

fn lower_all(extensions: &[&str]) -> Vec<String> {
    extensions
        .iter()
        .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
        .collect()
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
    Zip(zip::result::ZipError),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
            MetadataError::Zip(err) => write!(f, "archive error: {}", err),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

impl From<zip::result::ZipError> for MetadataError {
    fn from(err: zip::result::ZipError) -> Self {
        MetadataError::Zip(err)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Plain-text stand-in for an audio format: `key=value` lines, with
    /// `subsongs=N` producing N streams.
    #[derive(Default)]
    pub struct TextReader {
        fields: Vec<(String, String)>,
    }

    impl TextReader {
        fn field(&self, key: &str) -> Option<&str> {
            self.fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        }
    }

    impl AudioReader for TextReader {
        fn init(&mut self, source: &mut AudioSource<'_>) -> bool {
            let mut text = String::new();
            if source.reader.read_to_string(&mut text).is_err() {
                return false;
            }
            self.fields = text
                .lines()
                .filter_map(|line| line.split_once('='))
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .collect();
            !self.fields.is_empty()
        }

        fn subsong_count(&self) -> u32 {
            self.field("subsongs")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1)
        }

        fn read_track(&mut self, _source: &mut AudioSource<'_>, track: &mut Track) -> bool {
            track.title = self.field("title").map(|v| format!("{}{}", v, track.subsong));
            track.artist = self.field("artist").map(str::to_string);
            track.duration_ms = self
                .field("duration")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            true
        }
    }

    pub fn text_loader() -> AudioLoader {
        let mut loader = AudioLoader::empty();
        loader.add_reader(&["trk"], || Box::new(TextReader::default()));
        loader.add_archive_reader(&["zip"], || Box::new(ZipReader::default()));
        loader
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;

    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    use super::testing::text_loader;
    use super::*;

    #[test]
    fn reads_every_subsong() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("game.trk");
        fs::write(&path, "title=Song\nsubsongs=3\nduration=1000\n").unwrap();

        let loader = text_loader();
        let tracks = loader.read_tracks(path.to_str().unwrap());
        assert_eq!(tracks.len(), 3);
        assert_eq!(tracks[2].subsong, 2);
        assert_eq!(tracks[2].title.as_deref(), Some("Song2"));
        assert!(tracks.iter().all(|t| !t.hash.is_empty()));
        assert!(tracks.iter().all(|t| t.file_size > 0));
    }

    #[test]
    fn unknown_extensions_yield_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "title=Nope\n").unwrap();
        assert!(text_loader().read_tracks(path.to_str().unwrap()).is_empty());
    }

    #[test]
    fn expands_archive_members() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("set.zip");
        {
            let file = fs::File::create(&path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let options = SimpleFileOptions::default();
            writer.start_file("cd1/a.trk", options).unwrap();
            writer.write_all(b"title=A\nduration=10\n").unwrap();
            writer.start_file("readme.txt", options).unwrap();
            writer.write_all(b"hello").unwrap();
            writer.start_file("cd1/b.trk", options).unwrap();
            writer.write_all(b"title=B\nduration=20\n").unwrap();
            writer.finish().unwrap();
        }

        let archive = path.to_str().unwrap();
        let loader = text_loader();
        assert!(loader.is_archive(archive));
        let tracks = loader.read_tracks(archive);
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].archive_path().as_deref(), Some(archive));
        assert_eq!(
            tracks[0].filepath,
            archive_virtual_path("zip", archive, "cd1/a.trk")
        );
        assert_eq!(tracks[1].filename(), "b.trk");
        assert!(tracks[0].modified_time > 0);

        let mut again = Track::new(tracks[1].filepath.clone(), 0);
        assert!(loader.read_track_metadata(&mut again));
        assert_eq!(again.title.as_deref(), Some("B0"));
        assert_eq!(again.duration_ms, 20);
    }

    #[test]
    fn supported_extensions_include_archives() {
        let exts = text_loader().supported_extensions();
        assert_eq!(exts, vec!["trk".to_string(), "zip".to_string()]);
    }
}
