use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use common::{Track, TrackStats, CUESHEET_TAG};
use metadata::{AudioLoader, AudioReader, AudioSource, ZipReader};

use crate::scanner::ScanControl;
use crate::store::TrackStore;
use crate::LibraryError;

/// `key=value` text stand-in for audio. `cuesheet` values use `|` for line
/// breaks.
#[derive(Default)]
pub struct TrkReader {
    fields: Vec<(String, String)>,
}

impl TrkReader {
    fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl AudioReader for TrkReader {
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
        track.title = self.field("title").map(|v| {
            if track.subsong == 0 {
                v.to_string()
            } else {
                format!("{} {}", v, track.subsong)
            }
        });
        track.artist = self.field("artist").map(str::to_string);
        track.album = self.field("album").map(str::to_string);
        track.duration_ms = self
            .field("duration")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        track.extra_tags.clear();
        if let Some(sheet) = self.field("cuesheet") {
            track
                .extra_tags
                .insert(CUESHEET_TAG.to_string(), vec![sheet.replace('|', "\n")]);
        }
        true
    }
}

pub fn trk_loader() -> Arc<AudioLoader> {
    let mut loader = AudioLoader::empty();
    loader.add_reader(&["trk"], || Box::new(TrkReader::default()));
    loader.add_archive_reader(&["zip"], || Box::new(ZipReader::default()));
    Arc::new(loader)
}

pub fn write_trk(path: &Path, title: &str, duration_ms: u64) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, format!("title={}\nduration={}\n", title, duration_ms)).unwrap();
}

/// In-memory store that records the size of every call.
#[derive(Default)]
pub struct MemoryStore {
    pub tracks: BTreeMap<u64, Track>,
    keys: HashMap<String, u64>,
    stats: HashMap<String, TrackStats>,
    next_id: u64,
    pub store_calls: Vec<usize>,
    pub update_calls: Vec<usize>,
    pub stats_calls: Vec<usize>,
    /// Each fires once, after the next store call.
    pub pause_on_store: Option<ScanControl>,
    pub stop_on_store: Option<ScanControl>,
    pub panic_on_store: bool,
}

impl MemoryStore {
    pub fn by_path(&self, filepath: &str) -> Vec<Track> {
        self.tracks
            .values()
            .filter(|track| track.filepath == filepath)
            .cloned()
            .collect()
    }
}

impl TrackStore for MemoryStore {
    fn store_tracks(&mut self, tracks: &mut [Track]) -> Result<(), LibraryError> {
        if std::mem::take(&mut self.panic_on_store) {
            panic!("store failure");
        }
        self.store_calls.push(tracks.len());
        for track in tracks.iter_mut() {
            let key = track.unique_filepath();
            let id = match self.keys.get(&key) {
                Some(id) => *id,
                None => {
                    self.next_id += 1;
                    self.next_id
                }
            };
            track.id = Some(id);
            self.keys.insert(key, id);
            self.tracks.insert(id, track.clone());
        }
        if let Some(control) = self.pause_on_store.take() {
            control.pause();
        }
        if let Some(control) = self.stop_on_store.take() {
            control.stop();
        }
        Ok(())
    }

    fn update_tracks(&mut self, tracks: &[Track]) -> Result<(), LibraryError> {
        self.update_calls.push(tracks.len());
        for track in tracks {
            let id = match track.id.or_else(|| self.keys.get(&track.unique_filepath()).copied()) {
                Some(id) => id,
                None => continue,
            };
            if let Some(previous) = self.tracks.get(&id) {
                self.keys.remove(&previous.unique_filepath());
            }
            let mut stored = track.clone();
            stored.id = Some(id);
            self.keys.insert(stored.unique_filepath(), id);
            self.tracks.insert(id, stored);
        }
        Ok(())
    }

    fn update_track_stats(&mut self, tracks: &[Track]) -> Result<(), LibraryError> {
        self.stats_calls.push(tracks.len());
        for track in tracks {
            self.stats.insert(track.hash.clone(), track.stats.clone());
        }
        Ok(())
    }

    fn id_for_track(&self, track: &Track) -> Result<Option<u64>, LibraryError> {
        Ok(self.keys.get(&track.unique_filepath()).copied())
    }

    fn all_tracks(&self) -> Result<Vec<Track>, LibraryError> {
        Ok(self.tracks.values().cloned().collect())
    }
}
