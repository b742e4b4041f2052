use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use common::{file_modified_millis, now_millis, Track, CUESHEET_TAG};
use metadata::{AudioLoader, CueParser, PlaylistLoader};
use parking_lot::RwLock;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::config::ScanSettings;
use crate::files::{enumerate_files, CandidateKind, Candidates};
use crate::index::ExistingIndex;
use crate::store::TrackStore;
use crate::{LibraryInfo, LibraryStatus};

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_PAUSED: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Running,
    Paused,
}

/// Run/pause/stop flag shared between the scanning thread and its owners.
/// The scanner polls it once per file.
#[derive(Clone, Debug, Default)]
pub struct ScanControl {
    state: Arc<AtomicU8>,
}

impl ScanControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ScanState {
        match self.state.load(Ordering::SeqCst) {
            STATE_RUNNING => ScanState::Running,
            STATE_PAUSED => ScanState::Paused,
            _ => ScanState::Idle,
        }
    }

    pub fn may_run(&self) -> bool {
        self.state() == ScanState::Running
    }

    pub fn is_paused(&self) -> bool {
        self.state() == ScanState::Paused
    }

    pub(crate) fn begin(&self) {
        self.state.store(STATE_RUNNING, Ordering::SeqCst);
    }

    /// Only a running scan can be paused.
    pub fn pause(&self) -> bool {
        self.state
            .compare_exchange(STATE_RUNNING, STATE_PAUSED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn stop(&self) {
        self.state.store(STATE_IDLE, Ordering::SeqCst);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ScanEvent {
    Progress { scanned: usize, total: usize },
    ScanUpdate { added: Vec<Track>, updated: Vec<Track> },
    ScannedTracks(Vec<Track>),
    PlaylistLoaded(Vec<Track>),
    StatusChanged { library_id: u32, status: LibraryStatus },
    DirectoryChanged { library_id: u32, dir: PathBuf },
    Finished,
}

/// Outgoing notification channel. Sends never fail; a dropped receiver just
/// discards events. The latest status of every library is also kept for
/// polling.
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<ScanEvent>>,
    statuses: Arc<RwLock<HashMap<u32, LibraryStatus>>>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<ScanEvent>) -> Self {
        Self {
            tx: Some(tx),
            statuses: Arc::default(),
        }
    }

    pub fn discard() -> Self {
        Self::default()
    }

    pub fn send(&self, event: ScanEvent) {
        if let ScanEvent::StatusChanged { library_id, status } = &event {
            self.statuses.write().insert(*library_id, *status);
        }
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn status(&self, library_id: u32) -> Option<LibraryStatus> {
        self.statuses.read().get(&library_id).copied()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub files: usize,
    pub added: usize,
    pub updated: usize,
    pub completed: bool,
}

/// Reconciles files on disk against previously known tracks.
///
/// Each scan entry point runs to completion on the calling thread. Scans are
/// sequential; the only cross-thread input is the [`ScanControl`].
pub struct LibraryScanner<S: TrackStore> {
    store: S,
    audio: Arc<AudioLoader>,
    playlists: Arc<PlaylistLoader>,
    settings: ScanSettings,
    control: ScanControl,
    events: EventSink,
    monitor: bool,
}

impl<S: TrackStore> LibraryScanner<S> {
    pub fn new(store: S, audio: Arc<AudioLoader>, settings: ScanSettings, events: EventSink) -> Self {
        let playlists = Arc::new(PlaylistLoader::new(Arc::clone(&audio)));
        let monitor = settings.monitor_libraries;
        Self {
            store,
            audio,
            playlists,
            settings,
            control: ScanControl::new(),
            events,
            monitor,
        }
    }

    pub fn with_playlists(mut self, playlists: Arc<PlaylistLoader>) -> Self {
        self.playlists = playlists;
        self
    }

    pub fn control(&self) -> ScanControl {
        self.control.clone()
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
    }

    pub fn set_monitor_libraries(&mut self, enabled: bool) {
        self.monitor = enabled;
    }

    /// Full scan of a library root against `snapshot`.
    pub fn scan_library(
        &mut self,
        library: &LibraryInfo,
        snapshot: &[Track],
        only_modified: bool,
    ) -> ScanSummary {
        self.control.begin();
        self.change_status(library, LibraryStatus::Scanning);
        let started = Instant::now();

        let mut summary = ScanSummary::default();
        if library.path.exists() {
            summary = self.reconcile(library, &library.path, snapshot, only_modified, true);
        } else {
            warn!("Library path {:?} does not exist", library.path);
        }

        info!("Scan of {} took {:?}", library.name, started.elapsed());
        self.finish_library(library);
        summary
    }

    /// Scan of one directory inside a library; always compares mtimes.
    pub fn scan_library_directory(
        &mut self,
        library: &LibraryInfo,
        dir: &Path,
        snapshot: &[Track],
        recursive: bool,
    ) -> ScanSummary {
        self.control.begin();
        self.change_status(library, LibraryStatus::Scanning);
        let started = Instant::now();

        let summary = self.reconcile(library, dir, snapshot, true, recursive);

        debug!("Scan of {:?} took {:?}", dir, started.elapsed());
        self.finish_library(library);
        summary
    }

    /// Re-reads tags for known tracks. No identity matching; cue-owned
    /// tracks are left alone.
    pub fn scan_tracks(&mut self, tracks: &[Track]) -> ScanSummary {
        self.control.begin();
        let started = Instant::now();

        let mut session = self.session(None, &[], false);
        let completed = session.refresh_tracks(tracks);
        let summary = session.finish(completed);

        info!("Scan of {} tracks took {:?}", tracks.len(), started.elapsed());
        summary
    }

    /// Ad-hoc scan of files, directories and playlists outside any library.
    pub fn scan_files(&mut self, snapshot: &[Track], urls: &[PathBuf]) -> ScanSummary {
        self.control.begin();
        let started = Instant::now();

        let filter = self.settings.external_filter(&self.audio);
        let playlist_extensions = self.playlists.supported_extensions();
        let files = enumerate_files(urls, &filter, &playlist_extensions, true);

        let mut session = self.session(None, snapshot, false);
        let completed = session.scan_external(files);
        let total = session.total_files;
        let summary = session.finish(completed);

        info!("Scan of {} files took {:?}", total, started.elapsed());
        summary
    }

    pub fn scan_playlist(&mut self, snapshot: &[Track], urls: &[PathBuf]) -> ScanSummary {
        self.control.begin();
        let started = Instant::now();

        let mut session = self.session(None, snapshot, false);
        let completed = session.load_playlists(urls);
        let summary = session.finish(completed);

        info!("Scan of playlist took {:?}", started.elapsed());
        summary
    }

    /// Drops a paused scan.
    pub fn abandon(&mut self, library: Option<&LibraryInfo>) {
        self.control.stop();
        if let Some(library) = library {
            self.change_status(library, self.resting_status());
        }
        self.events.send(ScanEvent::Finished);
    }

    fn reconcile(
        &mut self,
        library: &LibraryInfo,
        root: &Path,
        snapshot: &[Track],
        only_modified: bool,
        recursive: bool,
    ) -> ScanSummary {
        let filter = self.settings.library_filter(&self.audio);
        let files = enumerate_files(&[root.to_path_buf()], &filter, &[], recursive);

        let mut session = self.session(Some(library.id), snapshot, true);
        let completed = session.reconcile_files(files, only_modified);
        session.into_summary(completed)
    }

    fn session(
        &mut self,
        library_id: Option<u32>,
        snapshot: &[Track],
        include_missing: bool,
    ) -> ScanSession<'_, S> {
        ScanSession {
            store: &mut self.store,
            audio: &self.audio,
            playlists: &self.playlists,
            control: &self.control,
            events: &self.events,
            library_id,
            batch_size: self.settings.batch_size(),
            index: ExistingIndex::build(snapshot, include_missing),
            to_store: Vec::new(),
            to_update: Vec::new(),
            files_scanned: HashSet::new(),
            total_files: 0,
            cue_files_scanned: HashSet::new(),
            summary: ScanSummary::default(),
        }
    }

    fn resting_status(&self) -> LibraryStatus {
        if self.monitor {
            LibraryStatus::Monitoring
        } else {
            LibraryStatus::Idle
        }
    }

    fn change_status(&self, library: &LibraryInfo, status: LibraryStatus) {
        self.events.send(ScanEvent::StatusChanged {
            library_id: library.id,
            status,
        });
    }

    fn finish_library(&mut self, library: &LibraryInfo) {
        if self.control.is_paused() {
            self.change_status(library, LibraryStatus::Pending);
            return;
        }
        self.change_status(library, self.resting_status());
        self.control.stop();
        self.events.send(ScanEvent::Finished);
    }
}

/// Per-scan state. Dropped when the entry point returns.
struct ScanSession<'a, S: TrackStore> {
    store: &'a mut S,
    audio: &'a AudioLoader,
    playlists: &'a PlaylistLoader,
    control: &'a ScanControl,
    events: &'a EventSink,
    library_id: Option<u32>,
    batch_size: usize,
    index: ExistingIndex,
    to_store: Vec<Track>,
    to_update: Vec<Track>,
    files_scanned: HashSet<String>,
    total_files: usize,
    cue_files_scanned: HashSet<String>,
    summary: ScanSummary,
}

impl<'a, S: TrackStore> ScanSession<'a, S> {
    fn reconcile_files(&mut self, files: Candidates, only_modified: bool) -> bool {
        self.total_files = files.len();
        self.report_progress();

        for candidate in files {
            if !self.control.may_run() {
                self.halted();
                return false;
            }

            let filepath = candidate.filepath();
            match candidate.kind {
                CandidateKind::Cue => self.read_cue(&filepath, only_modified),
                CandidateKind::Audio | CandidateKind::Playlist => {
                    self.read_file(&filepath, only_modified)
                }
            }

            self.file_scanned(filepath);
            if self.control.may_run() {
                self.check_batch();
            }
        }

        for mut track in self.index.take_tombstones() {
            if track.is_in_library() || track.enabled {
                track.library_id = None;
                track.enabled = false;
                self.to_update.push(track);
            }
        }

        let added = self.persist_new();
        let updated = self.persist_updates();
        self.notify(added, updated);
        true
    }

    fn read_file(&mut self, file: &str, only_modified: bool) {
        if !self.control.may_run() || self.cue_files_scanned.contains(file) {
            return;
        }

        let last_modified = file_modified_millis(Path::new(file));

        if let Some(known) = self.index.tracks_at(file) {
            if !self.needs_rescan(&known[0], last_modified, only_modified) {
                return;
            }
            let known = known.to_vec();
            let fresh = self.audio.read_tracks(file);
            if fresh.is_empty() {
                debug!("No readable tracks in {}", file);
                return;
            }
            for mut track in fresh {
                if let Some(previous) = find_unique(&known, &track) {
                    inherit_identity(&mut track, previous);
                }
                track.modified_time = last_modified;
                self.update_existing_track(track);
            }
        } else if let Some(known) = self.index.archive_tracks(file) {
            if !self.needs_rescan(&known[0], last_modified, only_modified) {
                return;
            }
            let known = known.to_vec();
            for mut track in self.audio.read_archive_tracks(file) {
                if let Some(previous) = find_unique(&known, &track) {
                    inherit_identity(&mut track, previous);
                }
                self.update_existing_track(track);
            }
        } else {
            self.read_new_track(file);
        }
    }

    fn needs_rescan(&self, known: &Track, last_modified: u64, only_modified: bool) -> bool {
        !known.enabled
            || known.library_id != self.library_id
            || known.modified_time < last_modified
            || !only_modified
    }

    fn update_existing_track(&mut self, mut track: Track) {
        self.set_track_props(&mut track);
        self.index.forget_filename(&track.filename());

        if track.id.is_none() {
            match self.store.id_for_track(&track) {
                Ok(Some(id)) => track.id = Some(id),
                Ok(None) => warn!("Attempting to update track not in database: {}", track.filepath),
                Err(err) => warn!("Failed to look up {}: {}", track.filepath, err),
            }
        }

        if track.has_extra_tag(CUESHEET_TAG) {
            let known: HashMap<String, Track> = self
                .index
                .cue_tracks(&track.filepath)
                .map(|tracks| {
                    tracks
                        .iter()
                        .map(|known| (known.unique_filepath(), known.clone()))
                        .collect()
                })
                .unwrap_or_default();

            for mut cue_track in embedded_cue_tracks(&track) {
                if let Some(previous) = known.get(&cue_track.unique_filepath()) {
                    inherit_identity(&mut cue_track, previous);
                }
                self.set_track_props(&mut cue_track);
                self.index.forget_hash(&cue_track.hash);
                self.queue_known(cue_track);
            }
        } else {
            self.index.forget_hash(&track.hash);
            self.to_update.push(track);
        }
    }

    fn read_new_track(&mut self, file: &str) {
        for track in self.audio.read_tracks(file) {
            let refound = self
                .index
                .match_missing(&track)
                .filter(|found| found.is_in_library() || found.is_in_database())
                .cloned();

            match refound {
                Some(mut relocated) => {
                    self.index.forget(&relocated);
                    debug!("Relocated {} to {}", relocated.filepath, track.filepath);
                    relocated.filepath = track.filepath.clone();
                    relocated.subsong = track.subsong;
                    relocated.file_size = track.file_size;
                    relocated.modified_time = track.modified_time;
                    self.set_track_props(&mut relocated);
                    self.to_update.push(relocated);
                }
                None => {
                    let mut track = track;
                    self.set_track_props(&mut track);
                    track.added_time = now_millis();
                    if track.has_extra_tag(CUESHEET_TAG) {
                        for mut cue_track in embedded_cue_tracks(&track) {
                            self.set_track_props(&mut cue_track);
                            self.to_store.push(cue_track);
                        }
                    } else {
                        self.to_store.push(track);
                    }
                }
            }
        }
    }

    fn read_cue(&mut self, cue: &str, only_modified: bool) {
        if !self.control.may_run() {
            return;
        }

        let last_modified = file_modified_millis(Path::new(cue));
        match self.index.cue_tracks(cue).map(|tracks| tracks.to_vec()) {
            Some(known) => {
                let newest = known.iter().map(|t| t.modified_time).max().unwrap_or(0);
                if !only_modified || newest < last_modified {
                    self.update_existing_cue_tracks(&known, cue, last_modified);
                } else {
                    for track in &known {
                        self.cue_files_scanned.insert(track.filepath.clone());
                    }
                }
            }
            None => self.add_new_cue_tracks(cue, last_modified),
        }
    }

    fn update_existing_cue_tracks(&mut self, known: &[Track], cue: &str, last_modified: u64) {
        for mut track in self.read_playlist_tracks(Path::new(cue), false) {
            if let Some(previous) = find_unique(known, &track) {
                inherit_identity(&mut track, previous);
            }
            track.modified_time = last_modified;
            self.set_track_props(&mut track);
            self.cue_files_scanned.insert(track.filepath.clone());
            self.queue_known(track);
        }
    }

    /// A cue sheet not seen before. If a vanished sheet had the same file
    /// name, its tracks hand their ids over by audio file and subsong.
    fn add_new_cue_tracks(&mut self, cue: &str, last_modified: u64) {
        let name = Path::new(cue)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let previous = self.index.take_missing_cue(&name).unwrap_or_default();

        for mut track in self.read_playlist_tracks(Path::new(cue), false) {
            let refound = previous
                .iter()
                .find(|old| old.subsong == track.subsong && old.filename() == track.filename());
            if let Some(old) = refound {
                inherit_identity(&mut track, old);
                self.index.forget(old);
            }
            track.modified_time = last_modified;
            self.set_track_props(&mut track);
            self.cue_files_scanned.insert(track.filepath.clone());
            self.queue_known(track);
        }
    }

    fn queue_known(&mut self, track: Track) {
        if track.id.is_some() {
            self.to_update.push(track);
        } else {
            self.to_store.push(track);
        }
    }

    fn set_track_props(&self, track: &mut Track) {
        read_file_properties(track);
        if let Some(library_id) = self.library_id {
            track.library_id = Some(library_id);
        }
        track.generate_hash();
        track.enabled = true;
    }

    fn read_playlist_tracks(&self, path: &Path, add_missing: bool) -> Vec<Track> {
        let parser = match self.playlists.parser_for_file(path) {
            Some(parser) => parser,
            None => return Vec::new(),
        };
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(err) => {
                warn!("Could not open file {:?} for reading: {}", path, err);
                return Vec::new();
            }
        };
        parser.read_playlist(&mut file, path, None, !add_missing)
    }

    /// Playlist entries, swapped for the known track where one exists.
    fn resolve_playlist(&self, path: &Path) -> Vec<Track> {
        let mut out = Vec::new();
        for entry in self.read_playlist_tracks(path, true) {
            match self.index.tracks_at(&entry.filepath) {
                Some(known) => {
                    if let Some(track) = find_unique(known, &entry) {
                        out.push(track.clone());
                    }
                }
                None => {
                    let mut track = entry;
                    track.generate_hash();
                    out.push(track);
                }
            }
        }
        out
    }

    fn refresh_tracks(&mut self, tracks: &[Track]) -> bool {
        self.total_files = tracks.len();
        let mut updated = Vec::new();

        for track in tracks {
            if !self.control.may_run() {
                self.halted();
                return false;
            }
            if track.has_cue() {
                continue;
            }

            let mut refreshed = Track::new(track.filepath.clone(), track.subsong);
            if self.audio.read_track_metadata(&mut refreshed) {
                refreshed.id = track.id;
                refreshed.library_id = track.library_id;
                refreshed.added_time = track.added_time;
                refreshed.enabled = track.enabled;
                refreshed.stats = track.stats.clone();
                read_file_properties(&mut refreshed);
                refreshed.generate_hash();
                updated.push(refreshed);
            }
            self.file_scanned(track.filepath.clone());
        }

        if !updated.is_empty() {
            match self.store.update_tracks(&updated) {
                Ok(()) => {
                    if let Err(err) = self.store.update_track_stats(&updated) {
                        warn!("Failed to update track stats: {}", err);
                    }
                    self.summary.updated += updated.len();
                    self.notify(Vec::new(), updated);
                }
                Err(err) => warn!("Failed to update {} tracks: {}", updated.len(), err),
            }
        }
        true
    }

    fn scan_external(&mut self, files: Candidates) -> bool {
        self.total_files = files.len();
        self.report_progress();
        let mut scanned = Vec::new();

        for candidate in files {
            if !self.control.may_run() {
                self.halted();
                return false;
            }

            let filepath = candidate.filepath();
            match candidate.kind {
                CandidateKind::Cue | CandidateKind::Playlist => {
                    let tracks = self.resolve_playlist(&candidate.path);
                    self.total_files += tracks.len();
                    for track in tracks {
                        self.file_scanned(track.filepath.clone());
                        scanned.push(track);
                    }
                }
                CandidateKind::Audio => {
                    if !self.files_scanned.contains(&filepath) {
                        scanned.extend(self.read_external_file(&filepath));
                    }
                }
            }
            self.file_scanned(filepath);
        }

        if !scanned.is_empty() {
            match self.store.store_tracks(&mut scanned) {
                Ok(()) => self.summary.added += scanned.len(),
                Err(err) => warn!("Failed to store {} tracks: {}", scanned.len(), err),
            }
            self.events.send(ScanEvent::ScannedTracks(scanned));
        }
        true
    }

    fn read_external_file(&self, filepath: &str) -> Vec<Track> {
        if let Some(known) = self.index.tracks_at(filepath) {
            return known.to_vec();
        }
        if let Some(known) = self.index.archive_tracks(filepath) {
            return known.to_vec();
        }

        let mut out = Vec::new();
        for mut track in self.audio.read_tracks(filepath) {
            read_file_properties(&mut track);
            track.added_time = now_millis();
            if track.has_extra_tag(CUESHEET_TAG) {
                out.extend(embedded_cue_tracks(&track));
            } else {
                out.push(track);
            }
        }
        out
    }

    fn load_playlists(&mut self, urls: &[PathBuf]) -> bool {
        self.report_progress();
        if !self.control.may_run() {
            self.halted();
            return false;
        }

        let mut loaded = Vec::new();
        for url in urls {
            for track in self.resolve_playlist(url) {
                self.files_scanned.insert(track.filepath.clone());
                loaded.push(track);
            }
        }

        if !loaded.is_empty() {
            match self.store.store_tracks(&mut loaded) {
                Ok(()) => self.summary.added += loaded.len(),
                Err(err) => warn!("Failed to store {} tracks: {}", loaded.len(), err),
            }
            self.events.send(ScanEvent::PlaylistLoaded(loaded));
        }
        true
    }

    fn check_batch(&mut self) {
        if self.to_store.len() >= self.batch_size {
            let added = self.persist_new();
            self.notify(added, Vec::new());
        }
        if self.to_update.len() > self.batch_size {
            let updated = self.persist_updates();
            self.notify(Vec::new(), updated);
        }
    }

    fn persist_new(&mut self) -> Vec<Track> {
        let mut tracks = std::mem::take(&mut self.to_store);
        if tracks.is_empty() {
            return tracks;
        }
        match self.store.store_tracks(&mut tracks) {
            Ok(()) => {
                self.summary.added += tracks.len();
                tracks
            }
            Err(err) => {
                warn!("Failed to store {} tracks: {}", tracks.len(), err);
                Vec::new()
            }
        }
    }

    fn persist_updates(&mut self) -> Vec<Track> {
        let tracks = std::mem::take(&mut self.to_update);
        if tracks.is_empty() {
            return tracks;
        }
        match self.store.update_tracks(&tracks) {
            Ok(()) => {
                self.summary.updated += tracks.len();
                tracks
            }
            Err(err) => {
                warn!("Failed to update {} tracks: {}", tracks.len(), err);
                Vec::new()
            }
        }
    }

    fn notify(&self, added: Vec<Track>, updated: Vec<Track>) {
        if !added.is_empty() || !updated.is_empty() {
            self.events.send(ScanEvent::ScanUpdate { added, updated });
        }
    }

    fn file_scanned(&mut self, filepath: String) {
        self.files_scanned.insert(filepath);
        self.report_progress();
    }

    fn report_progress(&self) {
        self.events.send(ScanEvent::Progress {
            scanned: self.files_scanned.len(),
            total: self.total_files,
        });
    }

    /// Stopped (not paused) scans report themselves as complete.
    fn halted(&self) {
        if self.control.state() == ScanState::Idle {
            self.events.send(ScanEvent::Progress {
                scanned: self.total_files,
                total: self.total_files,
            });
        }
    }

    fn finish(self, completed: bool) -> ScanSummary {
        if !self.control.is_paused() {
            self.control.stop();
            self.report_progress();
            self.events.send(ScanEvent::Finished);
        }
        self.into_summary(completed)
    }

    fn into_summary(self, completed: bool) -> ScanSummary {
        ScanSummary {
            files: self.files_scanned.len(),
            completed,
            ..self.summary
        }
    }
}

fn find_unique<'t>(known: &'t [Track], track: &Track) -> Option<&'t Track> {
    let unique = track.unique_filepath();
    known.iter().find(|candidate| candidate.unique_filepath() == unique)
}

/// Carries database identity from a stored track onto a freshly read one.
fn inherit_identity(track: &mut Track, previous: &Track) {
    track.id = previous.id;
    track.added_time = previous.added_time;
    track.stats = previous.stats.clone();
}

fn embedded_cue_tracks(track: &Track) -> Vec<Track> {
    match track.extra_tag(CUESHEET_TAG).and_then(|sheets| sheets.first()) {
        Some(sheet) => CueParser::parse_embedded(sheet, track),
        None => Vec::new(),
    }
}

fn read_file_properties(track: &mut Track) {
    let backing = track.archive_path().unwrap_or_else(|| track.filepath.clone());
    if track.added_time == 0 {
        track.added_time = now_millis();
    }
    if track.modified_time == 0 {
        track.modified_time = file_modified_millis(Path::new(&backing));
    }
    if track.file_size == 0 {
        track.file_size = fs::metadata(&backing).map(|meta| meta.len()).unwrap_or(0);
    }
}
