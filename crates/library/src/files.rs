use std::path::{Path, PathBuf};

use common::extension_lower;
use tracing::warn;
use walkdir::WalkDir;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CandidateKind {
    Cue,
    Playlist,
    Audio,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub kind: CandidateKind,
}

impl Candidate {
    pub fn filepath(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

/// Allow-list minus deny-list, compared case-insensitively.
#[derive(Clone, Debug, Default)]
pub struct ExtensionFilter {
    allowed: Vec<String>,
}

impl ExtensionFilter {
    pub fn new(restrict: &[String], exclude: &[String]) -> Self {
        let exclude: Vec<String> = exclude.iter().map(|ext| normalize(ext)).collect();
        let mut allowed = Vec::new();
        for ext in restrict.iter().map(|ext| normalize(ext)) {
            if !exclude.contains(&ext) && !allowed.contains(&ext) {
                allowed.push(ext);
            }
        }
        Self { allowed }
    }

    pub fn matches(&self, path: &Path) -> bool {
        match extension_lower(path) {
            Some(ext) => self.allowed.contains(&ext),
            None => false,
        }
    }
}

fn normalize(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Ordered, one-shot sequence of files to reconcile.
pub struct Candidates {
    files: std::vec::IntoIter<Candidate>,
}

impl Iterator for Candidates {
    type Item = Candidate;

    fn next(&mut self) -> Option<Self::Item> {
        self.files.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.files.size_hint()
    }
}

impl ExactSizeIterator for Candidates {}

/// Expands `roots` into the files a scan should visit.
///
/// Directories are walked (one level deep unless `recursive`) and keep only
/// non-empty files passing `filter`. A root that is itself a file is kept if
/// it passes `filter` or carries one of `playlist_extensions`. Output is sorted
/// by path with cue sheets moved ahead of everything else.
pub fn enumerate_files(
    roots: &[PathBuf],
    filter: &ExtensionFilter,
    playlist_extensions: &[String],
    recursive: bool,
) -> Candidates {
    let playlists = ExtensionFilter::new(playlist_extensions, &[]);
    let mut files: Vec<Candidate> = Vec::new();

    for root in roots {
        if root.is_dir() {
            let mut walker = WalkDir::new(root).follow_links(true);
            if !recursive {
                walker = walker.max_depth(1);
            }
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        warn!("Failed to read directory entry under {:?}: {}", root, err);
                        continue;
                    }
                };
                if !entry.file_type().is_file() || !filter.matches(entry.path()) {
                    continue;
                }
                let size = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
                if size > 0 {
                    files.push(classify(entry.into_path(), &playlists));
                }
            }
        } else if root.is_file() {
            if playlists.matches(root) || filter.matches(root) {
                files.push(classify(root.clone(), &playlists));
            }
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files.sort_by_key(|candidate| candidate.kind != CandidateKind::Cue);
    files.dedup_by(|a, b| a.path == b.path);

    Candidates {
        files: files.into_iter(),
    }
}

fn classify(path: PathBuf, playlists: &ExtensionFilter) -> Candidate {
    let kind = match extension_lower(&path).as_deref() {
        Some("cue") => CandidateKind::Cue,
        _ if playlists.matches(&path) => CandidateKind::Playlist,
        _ => CandidateKind::Audio,
    };
    Candidate { path, kind }
}
