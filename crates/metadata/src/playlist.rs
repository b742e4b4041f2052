//! Playlist and cue sheet parsing.
//!
//! A cue sheet splits one audio file into several tracks that share its
//! filepath; each gets its own subsong number and an offset into the stream.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{extension_lower, CueRef, Track, CUESHEET_TAG};
use tracing::{debug, warn};

use crate::tags::{parse_genres, parse_year};
use crate::AudioLoader;

const FRAMES_PER_SECOND: u64 = 75;

pub trait PlaylistParser: Send + Sync {
    fn extensions(&self) -> &[&str];

    /// Parses `input` into tracks. Relative entries resolve against `dir`, or
    /// the playlist's own directory when `dir` is `None`. With
    /// `only_existing`, entries whose file is absent are dropped.
    fn read_playlist(
        &self,
        input: &mut dyn Read,
        path: &Path,
        dir: Option<&Path>,
        only_existing: bool,
    ) -> Vec<Track>;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CueSheet {
    pub performer: Option<String>,
    pub title: Option<String>,
    pub genre: Option<String>,
    pub date: Option<String>,
    pub comment: Option<String>,
    pub files: Vec<CueFile>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CueFile {
    pub path: String,
    pub tracks: Vec<CueTrack>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CueTrack {
    pub number: u16,
    pub title: Option<String>,
    pub performer: Option<String>,
    pub index_ms: Option<u64>,
}

impl CueSheet {
    pub fn parse(text: &str) -> Self {
        let mut sheet = CueSheet::default();
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        for line in text.lines() {
            let (command, rest) = split_command(line.trim());
            match command.to_ascii_uppercase().as_str() {
                "REM" => {
                    let (key, value) = split_command(rest);
                    let value = Some(unquote(value));
                    match key.to_ascii_uppercase().as_str() {
                        "GENRE" => sheet.genre = value,
                        "DATE" => sheet.date = value,
                        "COMMENT" => sheet.comment = value,
                        _ => {}
                    }
                }
                "FILE" => sheet.files.push(CueFile {
                    path: file_name(rest),
                    tracks: Vec::new(),
                }),
                "TRACK" => {
                    let number = split_command(rest).0.parse().unwrap_or(0);
                    if let Some(file) = sheet.files.last_mut() {
                        file.tracks.push(CueTrack {
                            number,
                            ..CueTrack::default()
                        });
                    }
                }
                "INDEX" => {
                    let (index, time) = split_command(rest);
                    if index.parse::<u32>().ok() != Some(1) {
                        continue;
                    }
                    if let Some(track) = sheet.current_track() {
                        track.index_ms = parse_cue_time(time);
                    }
                }
                "TITLE" => {
                    let value = Some(unquote(rest));
                    match sheet.current_track() {
                        Some(track) => track.title = value,
                        None => sheet.title = value,
                    }
                }
                "PERFORMER" => {
                    let value = Some(unquote(rest));
                    match sheet.current_track() {
                        Some(track) => track.performer = value,
                        None => sheet.performer = value,
                    }
                }
                _ => {}
            }
        }

        sheet
    }

    fn current_track(&mut self) -> Option<&mut CueTrack> {
        self.files.last_mut().and_then(|file| file.tracks.last_mut())
    }

    /// Splits `base` into one track per indexed entry of `file`.
    pub fn split(&self, file: &CueFile, base: &Track, cue: &CueRef) -> Vec<Track> {
        let indexed: Vec<&CueTrack> = file
            .tracks
            .iter()
            .filter(|track| track.index_ms.is_some())
            .collect();

        let mut out = Vec::with_capacity(indexed.len());
        for (position, entry) in indexed.iter().enumerate() {
            let offset = entry.index_ms.unwrap_or(0);
            let end = indexed
                .get(position + 1)
                .and_then(|next| next.index_ms)
                .unwrap_or(base.duration_ms);

            let mut track = base.clone();
            track.id = None;
            track.subsong = position as u32;
            track.offset_ms = offset;
            track.duration_ms = end.saturating_sub(offset);
            track.cue = Some(cue.clone());
            track.extra_tags.remove(CUESHEET_TAG);
            track.track_number = Some(entry.number);
            if entry.title.is_some() {
                track.title = entry.title.clone();
            }
            if let Some(performer) = entry.performer.clone().or_else(|| self.performer.clone()) {
                track.artist = Some(performer);
            }
            if self.performer.is_some() {
                track.album_artist = self.performer.clone();
            }
            if self.title.is_some() {
                track.album = self.title.clone();
            }
            if let Some(genre) = &self.genre {
                track.genres = parse_genres(genre);
            }
            if let Some(year) = self.date.as_deref().and_then(parse_year) {
                track.year = Some(year);
            }
            if self.comment.is_some() {
                track.comment = self.comment.clone();
            }
            track.generate_hash();
            out.push(track);
        }
        out
    }
}

fn split_command(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (line, ""),
    }
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    match value.strip_prefix('"') {
        Some(inner) => inner.split('"').next().unwrap_or(inner).to_string(),
        None => value.to_string(),
    }
}

fn file_name(rest: &str) -> String {
    let rest = rest.trim();
    if rest.starts_with('"') {
        return unquote(rest);
    }
    match rest.rsplit_once(char::is_whitespace) {
        Some((name, _kind)) => name.trim().to_string(),
        None => rest.to_string(),
    }
}

/// `mm:ss:ff`, 75 frames per second.
fn parse_cue_time(text: &str) -> Option<u64> {
    let mut parts = text.trim().split(':');
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.parse().ok()?;
    let frames: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((minutes * 60 + seconds) * 1000 + frames * 1000 / FRAMES_PER_SECOND)
}

fn read_text(input: &mut dyn Read) -> Option<String> {
    let mut bytes = Vec::new();
    match input.read_to_end(&mut bytes) {
        Ok(_) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) => {
            warn!("Failed to read playlist: {}", err);
            None
        }
    }
}

fn resolve_entry(entry: &str, dir: &Path) -> PathBuf {
    let entry = entry.strip_prefix("file://").unwrap_or(entry);
    let path = Path::new(entry);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

fn playlist_dir<'a>(path: &'a Path, dir: Option<&'a Path>) -> &'a Path {
    dir.or_else(|| path.parent()).unwrap_or_else(|| Path::new(""))
}

pub struct CueParser {
    loader: Arc<AudioLoader>,
}

impl CueParser {
    pub fn new(loader: Arc<AudioLoader>) -> Self {
        Self { loader }
    }

    /// Expands a cue sheet stored in a tag of `base`. All resulting tracks
    /// share `base.filepath` regardless of the sheet's FILE lines.
    pub fn parse_embedded(text: &str, base: &Track) -> Vec<Track> {
        let sheet = CueSheet::parse(text);
        let mut out = Vec::new();
        for file in &sheet.files {
            let mut tracks = sheet.split(file, base, &CueRef::Embedded);
            let first = out.len() as u32;
            for track in &mut tracks {
                track.subsong += first;
                track.generate_hash();
            }
            out.extend(tracks);
        }
        out
    }

    fn base_track(&self, audio_path: &Path, only_existing: bool) -> Option<Track> {
        let filepath = audio_path.to_string_lossy().to_string();
        if !audio_path.exists() {
            if only_existing {
                debug!("Skipping missing cue audio {}", filepath);
                return None;
            }
            return Some(Track::new(filepath, 0));
        }

        match self.loader.read_tracks(&filepath).into_iter().next() {
            Some(track) => Some(track),
            None => {
                let mut track = Track::new(filepath, 0);
                track.file_size = std::fs::metadata(audio_path)
                    .map(|meta| meta.len())
                    .unwrap_or(0);
                Some(track)
            }
        }
    }
}

impl PlaylistParser for CueParser {
    fn extensions(&self) -> &[&str] {
        &["cue"]
    }

    fn read_playlist(
        &self,
        input: &mut dyn Read,
        path: &Path,
        dir: Option<&Path>,
        only_existing: bool,
    ) -> Vec<Track> {
        let text = match read_text(input) {
            Some(text) => text,
            None => return Vec::new(),
        };
        let sheet = CueSheet::parse(&text);
        let dir = playlist_dir(path, dir);
        let cue = CueRef::File {
            path: path.to_string_lossy().to_string(),
        };

        let mut out = Vec::new();
        for file in &sheet.files {
            let audio_path = resolve_entry(&file.path, dir);
            if let Some(base) = self.base_track(&audio_path, only_existing) {
                out.extend(sheet.split(file, &base, &cue));
            }
        }
        out
    }
}

pub struct M3uParser {
    loader: Arc<AudioLoader>,
}

impl M3uParser {
    pub fn new(loader: Arc<AudioLoader>) -> Self {
        Self { loader }
    }
}

impl PlaylistParser for M3uParser {
    fn extensions(&self) -> &[&str] {
        &["m3u", "m3u8"]
    }

    fn read_playlist(
        &self,
        input: &mut dyn Read,
        path: &Path,
        dir: Option<&Path>,
        only_existing: bool,
    ) -> Vec<Track> {
        let text = match read_text(input) {
            Some(text) => text,
            None => return Vec::new(),
        };
        let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
        let dir = playlist_dir(path, dir);

        let mut out = Vec::new();
        let mut pending: Option<(Option<u64>, Option<String>)> = None;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(info) = line.strip_prefix("#EXTINF:") {
                let (secs, title) = info.split_once(',').unwrap_or((info, ""));
                let duration = secs
                    .trim()
                    .parse::<i64>()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .map(|secs| secs as u64 * 1000);
                let title = Some(title.trim().to_string()).filter(|t| !t.is_empty());
                pending = Some((duration, title));
                continue;
            }
            if line.starts_with('#') {
                continue;
            }
            let info = pending.take();
            if line.contains("://") && !line.starts_with("file://") {
                debug!("Skipping remote playlist entry {}", line);
                continue;
            }

            let entry = resolve_entry(line, dir);
            let filepath = entry.to_string_lossy().to_string();
            if entry.exists() {
                let tracks = self.loader.read_tracks(&filepath);
                if !tracks.is_empty() {
                    out.extend(tracks);
                    continue;
                }
            } else if only_existing {
                continue;
            }

            let mut track = Track::new(filepath, 0);
            if let Some((duration, title)) = info {
                track.duration_ms = duration.unwrap_or(0);
                track.title = title;
            }
            track.generate_hash();
            out.push(track);
        }
        out
    }
}

/// Extension lookup over the registered playlist formats.
pub struct PlaylistLoader {
    parsers: Vec<Box<dyn PlaylistParser>>,
}

impl PlaylistLoader {
    pub fn new(loader: Arc<AudioLoader>) -> Self {
        Self {
            parsers: vec![
                Box::new(CueParser::new(loader.clone())),
                Box::new(M3uParser::new(loader)),
            ],
        }
    }

    pub fn add_parser(&mut self, parser: Box<dyn PlaylistParser>) {
        self.parsers.push(parser);
    }

    pub fn parser_for_extension(&self, ext: &str) -> Option<&dyn PlaylistParser> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        self.parsers
            .iter()
            .find(|parser| parser.extensions().iter().any(|candidate| *candidate == ext))
            .map(|parser| parser.as_ref())
    }

    pub fn parser_for_file(&self, path: &Path) -> Option<&dyn PlaylistParser> {
        extension_lower(path).and_then(|ext| self.parser_for_extension(&ext))
    }

    pub fn supported_extensions(&self) -> Vec<String> {
        self.parsers
            .iter()
            .flat_map(|parser| parser.extensions().iter())
            .map(|ext| ext.to_string())
            .collect()
    }
}
