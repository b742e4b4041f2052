use std::fs;
use std::path::Path;

use common::{Track, TrackStats};
use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::LibraryError;

const STORE_VERSION: u32 = 1;

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const TRACKS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("tracks");
const TRACK_KEYS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("track_keys");
const TRACK_STATS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("track_stats");

const META_VERSION_KEY: &str = "version";
const META_NEXT_ID_KEY: &str = "next_id";

/// Persistence used by the scanner. Every call is one transaction.
pub trait TrackStore: Send {
    /// Persists new tracks and writes the assigned ids back into `tracks`.
    fn store_tracks(&mut self, tracks: &mut [Track]) -> Result<(), LibraryError>;

    fn update_tracks(&mut self, tracks: &[Track]) -> Result<(), LibraryError>;

    /// Writes play statistics under each track's current hash.
    fn update_track_stats(&mut self, tracks: &[Track]) -> Result<(), LibraryError>;

    fn id_for_track(&self, track: &Track) -> Result<Option<u64>, LibraryError>;

    fn all_tracks(&self) -> Result<Vec<Track>, LibraryError>;
}

pub struct TrackDatabase {
    db: Database,
}

impl TrackDatabase {
    pub fn open(path: &Path) -> Result<Self, LibraryError> {
        let db = open_or_create_db(path)?;
        let store = Self { db };
        match store.read_version()? {
            Some(version) if version == STORE_VERSION => {
                info!("Loaded track database from {:?}", path);
            }
            Some(version) => {
                warn!(
                    "Track database version {} differs from {}; keeping records",
                    version, STORE_VERSION
                );
                store.init_tables()?;
            }
            None => store.init_tables()?,
        }
        Ok(store)
    }

    pub fn track(&self, id: u64) -> Result<Option<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(TRACKS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let track = match table.get(id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(track)
    }

    fn init_tables(&self) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            write_txn.open_table(TRACKS_TABLE)?;
            write_txn.open_table(TRACK_KEYS_TABLE)?;
            write_txn.open_table(TRACK_STATS_TABLE)?;
            let mut meta = write_txn.open_table(META_TABLE)?;
            let version = encode_value(&STORE_VERSION)?;
            meta.insert(META_VERSION_KEY, version.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn read_version(&self) -> Result<Option<u32>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(META_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let version = match table.get(META_VERSION_KEY)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(version)
    }
}

impl TrackStore for TrackDatabase {
    fn store_tracks(&mut self, tracks: &mut [Track]) -> Result<(), LibraryError> {
        if tracks.is_empty() {
            return Ok(());
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut meta = write_txn.open_table(META_TABLE)?;
            let mut track_table = write_txn.open_table(TRACKS_TABLE)?;
            let mut key_table = write_txn.open_table(TRACK_KEYS_TABLE)?;
            let stats_table = write_txn.open_table(TRACK_STATS_TABLE)?;

            let mut next_id: u64 = match meta.get(META_NEXT_ID_KEY)? {
                Some(value) => decode_value(value.value())?,
                None => 1,
            };

            for track in tracks.iter_mut() {
                let key = track.unique_filepath();
                let existing = key_table.get(key.as_str())?.map(|value| value.value());
                let id = match existing {
                    Some(id) => id,
                    None => {
                        let id = next_id;
                        next_id += 1;
                        id
                    }
                };
                track.id = Some(id);

                if track.stats == TrackStats::default() {
                    if let Some(value) = stats_table.get(track.hash.as_str())? {
                        track.stats = decode_value(value.value())?;
                    }
                }

                let bytes = encode_value(&*track)?;
                track_table.insert(id, bytes.as_slice())?;
                key_table.insert(key.as_str(), id)?;
            }

            let next = encode_value(&next_id)?;
            meta.insert(META_NEXT_ID_KEY, next.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn update_tracks(&mut self, tracks: &[Track]) -> Result<(), LibraryError> {
        if tracks.is_empty() {
            return Ok(());
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut track_table = write_txn.open_table(TRACKS_TABLE)?;
            let mut key_table = write_txn.open_table(TRACK_KEYS_TABLE)?;

            for track in tracks {
                let key = track.unique_filepath();
                let id = match track.id {
                    Some(id) => id,
                    None => match key_table.get(key.as_str())? {
                        Some(value) => value.value(),
                        None => {
                            warn!("Skipping update of unknown track {}", key);
                            continue;
                        }
                    },
                };

                let previous_key = match track_table.get(id)? {
                    Some(value) => {
                        let previous: Track = decode_value(value.value())?;
                        Some(previous.unique_filepath())
                    }
                    None => None,
                };
                if let Some(previous_key) = previous_key {
                    if previous_key != key {
                        key_table.remove(previous_key.as_str())?;
                    }
                }

                let mut stored = track.clone();
                stored.id = Some(id);
                let bytes = encode_value(&stored)?;
                track_table.insert(id, bytes.as_slice())?;
                key_table.insert(key.as_str(), id)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn update_track_stats(&mut self, tracks: &[Track]) -> Result<(), LibraryError> {
        if tracks.is_empty() {
            return Ok(());
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut stats_table = write_txn.open_table(TRACK_STATS_TABLE)?;
            for track in tracks {
                if track.hash.is_empty() {
                    continue;
                }
                let bytes = encode_value(&track.stats)?;
                stats_table.insert(track.hash.as_str(), bytes.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn id_for_track(&self, track: &Track) -> Result<Option<u64>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(TRACK_KEYS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let key = track.unique_filepath();
        let id = table.get(key.as_str())?.map(|value| value.value());
        Ok(id)
    }

    fn all_tracks(&self) -> Result<Vec<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let track_table = match read_txn.open_table(TRACKS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let stats_table = read_txn.open_table(TRACK_STATS_TABLE)?;

        let mut tracks = Vec::new();
        for entry in track_table.iter()? {
            let entry = entry?;
            let mut track: Track = decode_value(entry.1.value())?;
            if let Some(value) = stats_table.get(track.hash.as_str())? {
                track.stats = decode_value(value.value())?;
            }
            tracks.push(track);
        }
        Ok(tracks)
    }
}

fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn track(path: &str, subsong: u32, title: &str) -> Track {
        let mut track = Track::new(path, subsong);
        track.title = Some(title.to_string());
        track.generate_hash();
        track
    }

    #[test]
    fn assigns_ids_and_reuses_keys() {
        let dir = TempDir::new().unwrap();
        let mut db = TrackDatabase::open(&dir.path().join("tracks.redb")).unwrap();

        let mut batch = vec![track("/m/a.flac", 0, "A"), track("/m/b.flac", 0, "B")];
        db.store_tracks(&mut batch).unwrap();
        assert_eq!(batch[0].id, Some(1));
        assert_eq!(batch[1].id, Some(2));

        let mut again = vec![track("/m/a.flac", 0, "A2"), track("/m/a.flac", 1, "A3")];
        db.store_tracks(&mut again).unwrap();
        assert_eq!(again[0].id, Some(1));
        assert_eq!(again[1].id, Some(3));

        assert_eq!(db.all_tracks().unwrap().len(), 3);
        assert_eq!(db.track(1).unwrap().unwrap().title.as_deref(), Some("A2"));
        assert_eq!(db.id_for_track(&track("/m/b.flac", 0, "")).unwrap(), Some(2));
        assert_eq!(db.id_for_track(&track("/m/c.flac", 0, "")).unwrap(), None);
    }

    #[test]
    fn updates_move_unique_keys() {
        let dir = TempDir::new().unwrap();
        let mut db = TrackDatabase::open(&dir.path().join("tracks.redb")).unwrap();
        let mut batch = vec![track("/m/old.flac", 0, "Song")];
        db.store_tracks(&mut batch).unwrap();

        let mut moved = batch[0].clone();
        moved.filepath = "/m/new.flac".to_string();
        db.update_tracks(&[moved.clone()]).unwrap();

        assert_eq!(db.id_for_track(&moved).unwrap(), Some(1));
        assert_eq!(db.id_for_track(&batch[0]).unwrap(), None);
        assert_eq!(db.all_tracks().unwrap().len(), 1);

        db.update_tracks(&[track("/m/unknown.flac", 0, "X")]).unwrap();
        assert_eq!(db.all_tracks().unwrap().len(), 1);
    }

    #[test]
    fn stats_follow_the_hash() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tracks.redb");
        {
            let mut db = TrackDatabase::open(&path).unwrap();
            let mut played = track("/m/a.flac", 0, "A");
            played.stats.play_count = 4;
            db.update_track_stats(&[played]).unwrap();
        }

        let mut db = TrackDatabase::open(&path).unwrap();
        let mut batch = vec![track("/m/a.flac", 0, "A")];
        db.store_tracks(&mut batch).unwrap();
        assert_eq!(batch[0].stats.play_count, 4);
        assert_eq!(db.all_tracks().unwrap()[0].stats.play_count, 4);
    }
}
