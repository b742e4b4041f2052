use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use common::{CueRef, Track};

/// Lookups over the known tracks, built once at the start of a scan.
///
/// Missing tracks are held once, keyed by unique filepath, and reachable
/// through a filename index and a hash index. Each index keeps the first
/// track registered under a key.
#[derive(Debug, Default)]
pub struct ExistingIndex {
    paths: HashMap<String, Vec<Track>>,
    archives: HashMap<String, Vec<Track>>,
    cues: HashMap<String, Vec<Track>>,
    missing_cues: HashMap<String, Vec<Track>>,
    missing: HashMap<String, Track>,
    missing_by_filename: HashMap<String, String>,
    missing_by_hash: HashMap<String, String>,
}

impl ExistingIndex {
    pub fn build(snapshot: &[Track], include_missing: bool) -> Self {
        let mut index = Self::default();
        for track in snapshot {
            index
                .paths
                .entry(track.filepath.clone())
                .or_default()
                .push(track.clone());
            let archive_path = track.archive_path();
            if let Some(archive) = &archive_path {
                index
                    .archives
                    .entry(archive.clone())
                    .or_default()
                    .push(track.clone());
            }

            if !include_missing {
                continue;
            }

            if let Some(cue_key) = track.cue_key() {
                index
                    .cues
                    .entry(cue_key.clone())
                    .or_default()
                    .push(track.clone());
                if let Some(CueRef::File { .. }) = &track.cue {
                    if !Path::new(&cue_key).exists() {
                        let name = file_name(&cue_key);
                        index.missing_cues.entry(name).or_default().push(track.clone());
                    }
                }
            }

            let backing = archive_path.unwrap_or_else(|| track.filepath.clone());
            if !Path::new(&backing).exists() {
                index.add_missing(track);
            }
        }
        index
    }

    fn add_missing(&mut self, track: &Track) {
        let unique = track.unique_filepath();
        self.missing_by_filename
            .entry(track.filename())
            .or_insert_with(|| unique.clone());
        if !track.hash.is_empty() {
            self.missing_by_hash
                .entry(track.hash.clone())
                .or_insert_with(|| unique.clone());
        }
        self.missing.entry(unique).or_insert_with(|| track.clone());
    }

    pub fn tracks_at(&self, filepath: &str) -> Option<&[Track]> {
        non_empty(self.paths.get(filepath))
    }

    pub fn archive_tracks(&self, archive_path: &str) -> Option<&[Track]> {
        non_empty(self.archives.get(archive_path))
    }

    pub fn cue_tracks(&self, cue_key: &str) -> Option<&[Track]> {
        non_empty(self.cues.get(cue_key))
    }

    /// Tracks of a vanished cue sheet with the same file name as `cue_name`.
    pub fn take_missing_cue(&mut self, cue_name: &str) -> Option<Vec<Track>> {
        self.missing_cues.remove(cue_name).filter(|tracks| !tracks.is_empty())
    }

    /// Filename first, then hash; duration must agree either way.
    pub fn match_missing(&self, track: &Track) -> Option<&Track> {
        let by_filename = self
            .missing_by_filename
            .get(&track.filename())
            .and_then(|unique| self.missing.get(unique))
            .filter(|candidate| candidate.duration_ms == track.duration_ms);
        if by_filename.is_some() {
            return by_filename;
        }

        self.missing_by_hash
            .get(&track.hash)
            .and_then(|unique| self.missing.get(unique))
            .filter(|candidate| candidate.duration_ms == track.duration_ms)
    }

    pub fn forget_filename(&mut self, filename: &str) {
        self.missing_by_filename.remove(filename);
    }

    pub fn forget_hash(&mut self, hash: &str) {
        self.missing_by_hash.remove(hash);
    }

    /// Drops both index entries that could lead back to `track`.
    pub fn forget(&mut self, track: &Track) {
        self.forget_filename(&track.filename());
        self.forget_hash(&track.hash);
    }

    pub fn missing_count(&self) -> usize {
        self.missing_keys().len()
    }

    /// Missing tracks still reachable through either index, in unique
    /// filepath order.
    pub fn take_tombstones(&mut self) -> Vec<Track> {
        let keys = self.missing_keys();
        self.missing_by_filename.clear();
        self.missing_by_hash.clear();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(track) = self.missing.remove(&key) {
                out.push(track);
            }
        }
        self.missing.clear();
        out
    }

    fn missing_keys(&self) -> BTreeSet<String> {
        self.missing_by_filename
            .values()
            .chain(self.missing_by_hash.values())
            .cloned()
            .collect()
    }
}

fn non_empty(tracks: Option<&Vec<Track>>) -> Option<&[Track]> {
    tracks.filter(|tracks| !tracks.is_empty()).map(|tracks| tracks.as_slice())
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}
