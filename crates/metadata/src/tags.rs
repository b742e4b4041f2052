use std::io::{Seek, SeekFrom};

use common::Track;
use lofty::file::TaggedFile;
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Tag;
use tracing::debug;

use crate::{AudioReader, AudioSource, MetadataError, ReadSeek};

pub(crate) const LOFTY_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "opus", "m4a", "wav", "aiff", "ape", "wv", "mpc", "spx",
];

/// Tag reader for the formats lofty understands. Every file is a single
/// subsong.
#[derive(Default)]
pub struct LoftyReader {
    file: Option<TaggedFile>,
}

impl AudioReader for LoftyReader {
    fn init(&mut self, source: &mut AudioSource<'_>) -> bool {
        match probe(source.reader) {
            Ok(file) => {
                self.file = Some(file);
                true
            }
            Err(err) => {
                debug!("Failed to parse {}: {}", source.filepath, err);
                self.file = None;
                false
            }
        }
    }

    fn read_track(&mut self, _source: &mut AudioSource<'_>, track: &mut Track) -> bool {
        match &self.file {
            Some(file) => {
                apply_tags(file, track);
                true
            }
            None => false,
        }
    }
}

fn probe(reader: &mut dyn ReadSeek) -> Result<TaggedFile, MetadataError> {
    reader.seek(SeekFrom::Start(0))?;
    let tagged_file = Probe::new(reader).guess_file_type()?.read()?;
    Ok(tagged_file)
}

fn apply_tags(tagged_file: &TaggedFile, track: &mut Track) {
    let properties = tagged_file.properties();

    let duration_ms = properties.duration().as_millis();
    track.duration_ms = duration_ms.min(u128::from(u64::MAX)) as u64;
    track.sample_rate = properties.sample_rate();
    track.channels = properties.channels();
    track.bitrate = properties.audio_bitrate().or(properties.overall_bitrate());
    track.codec = Some(format!("{:?}", tagged_file.file_type()));

    track.title = None;
    track.artist = None;
    track.album = None;
    track.album_artist = None;
    track.track_number = None;
    track.disc_number = None;
    track.year = None;
    track.comment = None;
    track.genres.clear();
    track.extra_tags.clear();

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        apply_tag(tag, track);
    }
}

fn apply_tag(tag: &Tag, track: &mut Track) {
    track.title = tag.get_string(&ItemKey::TrackTitle).map(|v| v.to_string());
    track.album = tag.get_string(&ItemKey::AlbumTitle).map(|v| v.to_string());
    let album_artist = tag.get_string(&ItemKey::AlbumArtist).map(|v| v.to_string());
    let track_artist = tag.get_string(&ItemKey::TrackArtist).map(|v| v.to_string());
    track.artist = track_artist.or_else(|| album_artist.clone());
    track.album_artist = album_artist;
    track.track_number = tag.get_string(&ItemKey::TrackNumber).and_then(parse_u16);
    track.disc_number = tag.get_string(&ItemKey::DiscNumber).and_then(parse_u16);
    track.year = tag
        .get_string(&ItemKey::Year)
        .or_else(|| tag.get_string(&ItemKey::RecordingDate))
        .and_then(parse_year);
    if let Some(value) = tag.get_string(&ItemKey::Genre) {
        track.genres = parse_genres(value);
    }
    track.comment = tag.get_string(&ItemKey::Comment).map(|s| s.to_string());

    for item in tag.items() {
        if let ItemKey::Unknown(key) = item.key() {
            if let Some(text) = item.value().text() {
                track
                    .extra_tags
                    .entry(key.to_ascii_uppercase())
                    .or_default()
                    .push(text.to_string());
            }
        }
    }
}

pub(crate) fn parse_u16(text: &str) -> Option<u16> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

pub(crate) fn parse_year(text: &str) -> Option<i32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

pub(crate) fn parse_genres(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for part in text.split(&[';', ',', '/', '|', '\0'][..]) {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        out.push(trimmed.to_string());
    }
    out
}
