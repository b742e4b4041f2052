use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const CUESHEET_TAG: &str = "CUESHEET";
pub const EMBEDDED_CUE: &str = "Embedded";

const ARCHIVE_SCHEME: &str = "unpack://";
const ARCHIVE_FILE_SCHEME: &str = "file://";
const KEY_SEP: char = '\x1f';

/// Where a track's cue sheet lives, if it was split out of a larger file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CueRef {
    Embedded,
    File { path: String },
}

impl CueRef {
    pub fn as_str(&self) -> &str {
        match self {
            CueRef::Embedded => EMBEDDED_CUE,
            CueRef::File { path } => path,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackStats {
    pub play_count: u32,
    pub rating: Option<u8>,
    pub first_played: u64,
    pub last_played: u64,
}

/// One playable audio stream.
///
/// `filepath` is either a real path on disk or an archive virtual path (see
/// [`archive_virtual_path`]). Cue sheet entries share the `filepath` of the
/// audio file they split and are told apart by `subsong`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub filepath: String,
    pub subsong: u32,
    pub id: Option<u64>,
    pub library_id: Option<u32>,
    pub hash: String,
    pub added_time: u64,
    pub modified_time: u64,
    pub file_size: u64,
    pub enabled: bool,
    pub cue: Option<CueRef>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    pub track_number: Option<u16>,
    pub disc_number: Option<u16>,
    pub year: Option<i32>,
    pub comment: Option<String>,
    pub duration_ms: u64,
    pub offset_ms: u64,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub bitrate: Option<u32>,
    pub codec: Option<String>,
    #[serde(default)]
    pub extra_tags: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub stats: TrackStats,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            filepath: String::new(),
            subsong: 0,
            id: None,
            library_id: None,
            hash: String::new(),
            added_time: 0,
            modified_time: 0,
            file_size: 0,
            enabled: true,
            cue: None,
            title: None,
            artist: None,
            album: None,
            album_artist: None,
            genres: Vec::new(),
            track_number: None,
            disc_number: None,
            year: None,
            comment: None,
            duration_ms: 0,
            offset_ms: 0,
            sample_rate: None,
            channels: None,
            bitrate: None,
            codec: None,
            extra_tags: BTreeMap::new(),
            stats: TrackStats::default(),
        }
    }
}

impl Track {
    pub fn new(filepath: impl Into<String>, subsong: u32) -> Self {
        Self {
            filepath: filepath.into(),
            subsong,
            ..Self::default()
        }
    }

    /// Last path component, used as a weak identity for moved files.
    pub fn filename(&self) -> String {
        let source = match ArchiveLocation::parse(&self.filepath) {
            Some(location) => location.entry,
            None => self.filepath.clone(),
        };
        Path::new(&source)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or(source)
    }

    pub fn unique_filepath(&self) -> String {
        format!("{}#{}", self.filepath, self.subsong)
    }

    pub fn is_in_archive(&self) -> bool {
        self.filepath.starts_with(ARCHIVE_SCHEME)
    }

    pub fn archive_path(&self) -> Option<String> {
        ArchiveLocation::parse(&self.filepath).map(|location| location.archive_path)
    }

    pub fn is_in_database(&self) -> bool {
        self.id.is_some()
    }

    pub fn is_in_library(&self) -> bool {
        self.library_id.is_some()
    }

    pub fn has_cue(&self) -> bool {
        self.cue.is_some()
    }

    /// Path of the cue sheet that owns this track. Embedded sheets are keyed
    /// by the audio file carrying them.
    pub fn cue_key(&self) -> Option<String> {
        match &self.cue {
            Some(CueRef::Embedded) => Some(self.filepath.clone()),
            Some(CueRef::File { path }) => Some(path.clone()),
            None => None,
        }
    }

    pub fn has_extra_tag(&self, name: &str) -> bool {
        self.extra_tags
            .get(name)
            .map(|values| !values.is_empty())
            .unwrap_or(false)
    }

    pub fn extra_tag(&self, name: &str) -> Option<&[String]> {
        self.extra_tags.get(name).map(|values| values.as_slice())
    }

    /// Must be called after any tag change and before the track is persisted.
    pub fn generate_hash(&mut self) {
        let title = match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title.to_string(),
            _ => self.filename(),
        };
        let mut key = String::new();
        for part in [
            self.artist.as_deref().unwrap_or_default(),
            self.album.as_deref().unwrap_or_default(),
            self.album_artist.as_deref().unwrap_or_default(),
        ] {
            key.push_str(part);
            key.push(KEY_SEP);
        }
        key.push_str(&self.disc_number.map(|n| n.to_string()).unwrap_or_default());
        key.push(KEY_SEP);
        key.push_str(&self.track_number.map(|n| n.to_string()).unwrap_or_default());
        key.push(KEY_SEP);
        key.push_str(&title);
        key.push(KEY_SEP);
        key.push_str(&self.subsong.to_string());
        key.push(KEY_SEP);
        key.push_str(&self.offset_ms.to_string());
        self.hash = stable_id(&key);
    }
}

/// Decoded form of an archive member's virtual path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveLocation {
    pub kind: String,
    pub archive_path: String,
    pub entry: String,
}

impl ArchiveLocation {
    /// Inverse of [`archive_virtual_path`]. The length field counts UTF-16
    /// code units of the archive path, so paths containing `!` still split
    /// at the right place.
    pub fn parse(path: &str) -> Option<Self> {
        let rest = path.strip_prefix(ARCHIVE_SCHEME)?;
        let (kind, rest) = rest.split_once('|')?;
        let (len, rest) = rest.split_once('|')?;
        let len: usize = len.parse().ok()?;
        let rest = rest.strip_prefix(ARCHIVE_FILE_SCHEME)?;

        let mut units = 0usize;
        let mut split = None;
        for (idx, ch) in rest.char_indices() {
            if units == len {
                split = Some(idx);
                break;
            }
            units += ch.len_utf16();
        }
        let split = match split {
            Some(idx) => idx,
            None if units == len => rest.len(),
            None => return None,
        };

        let archive_path = &rest[..split];
        let entry = rest[split..].strip_prefix('!')?;
        Some(Self {
            kind: kind.to_string(),
            archive_path: archive_path.to_string(),
            entry: entry.to_string(),
        })
    }
}

/// `unpack://<kind>|<len>|file://<archive>!<entry>`
pub fn archive_virtual_path(kind: &str, archive_path: &str, entry: &str) -> String {
    format!(
        "{}{}|{}|{}{}!{}",
        ARCHIVE_SCHEME,
        kind,
        archive_path.encode_utf16().count(),
        ARCHIVE_FILE_SCHEME,
        archive_path,
        entry
    )
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

pub fn now_millis() -> u64 {
    system_time_millis(SystemTime::now())
}

pub fn system_time_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis()
        .min(u128::from(u64::MAX)) as u64
}

/// Modification time in epoch milliseconds, 0 when unavailable.
pub fn file_modified_millis(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(system_time_millis)
        .unwrap_or(0)
}

pub fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(path: &str) -> Track {
        let mut track = Track::new(path, 0);
        track.artist = Some("Artist".to_string());
        track.album = Some("Album".to_string());
        track.title = Some("Song".to_string());
        track.track_number = Some(3);
        track.generate_hash();
        track
    }

    #[test]
    fn stable_id_is_deterministic() {
        let first = stable_id("Artist/Album/Track.mp3");
        let second = stable_id("Artist/Album/Track.mp3");
        assert_eq!(first, second);
        assert_ne!(first, stable_id("Artist/Album/Track2.mp3"));
    }

    #[test]
    fn hash_ignores_location() {
        let a = tagged("/music/a/song.flac");
        let b = tagged("/elsewhere/renamed.flac");
        assert_eq!(a.hash, b.hash);

        let mut c = tagged("/music/a/song.flac");
        c.title = Some("Other".to_string());
        c.generate_hash();
        assert_ne!(a.hash, c.hash);
    }

    #[test]
    fn hash_separates_subsongs() {
        let a = tagged("/music/a.nsf");
        let mut b = a.clone();
        b.subsong = 1;
        b.generate_hash();
        assert_ne!(a.hash, b.hash);
        assert_ne!(a.unique_filepath(), b.unique_filepath());
    }

    #[test]
    fn archive_path_round_trips() {
        let archive = "/music/Bändé!/set.zip";
        let path = archive_virtual_path("zip", archive, "disc 1/01 intro.flac");
        assert_eq!(
            path,
            "unpack://zip|21|file:///music/Bändé!/set.zip!disc 1/01 intro.flac"
        );

        let location = ArchiveLocation::parse(&path).unwrap();
        assert_eq!(location.kind, "zip");
        assert_eq!(location.archive_path, archive);
        assert_eq!(location.entry, "disc 1/01 intro.flac");

        let track = Track::new(path, 0);
        assert!(track.is_in_archive());
        assert_eq!(track.archive_path().as_deref(), Some(archive));
        assert_eq!(track.filename(), "01 intro.flac");
    }

    #[test]
    fn rejects_malformed_archive_paths() {
        assert!(ArchiveLocation::parse("/music/plain.flac").is_none());
        assert!(ArchiveLocation::parse("unpack://zip|99|file:///a.zip!x").is_none());
        assert!(ArchiveLocation::parse("unpack://zip|6|file:///a.zip").is_none());
        assert!(ArchiveLocation::parse("unpack://zip|x|file:///a.zip!x").is_none());
    }

    #[test]
    fn cue_key_resolves_embedded_sheets() {
        let mut track = Track::new("/music/album.flac", 2);
        assert_eq!(track.cue_key(), None);
        track.cue = Some(CueRef::Embedded);
        assert_eq!(track.cue_key().as_deref(), Some("/music/album.flac"));
        track.cue = Some(CueRef::File {
            path: "/music/album.cue".to_string(),
        });
        assert_eq!(track.cue_key().as_deref(), Some("/music/album.cue"));
    }

    #[test]
    fn extra_tags_require_values() {
        let mut track = Track::new("/music/a.flac", 0);
        track.extra_tags.insert(CUESHEET_TAG.to_string(), Vec::new());
        assert!(!track.has_extra_tag(CUESHEET_TAG));
        track
            .extra_tags
            .insert(CUESHEET_TAG.to_string(), vec!["FILE x".to_string()]);
        assert!(track.has_extra_tag(CUESHEET_TAG));
    }
}
