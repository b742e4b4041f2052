use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use library::{
    config_path_from_env, load_or_create_config, AudioLoader, EventSink, LibraryInfo,
    LibraryScanner, TrackDatabase, TrackStore,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Separates the `--full` flag from positional arguments, wherever it appears.
fn split_args(args: impl Iterator<Item = String>) -> (Vec<String>, bool) {
    let mut full = false;
    let positional = args
        .filter(|arg| {
            if arg == "--full" {
                full = true;
                false
            } else {
                true
            }
        })
        .collect();
    (positional, full)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (positional, full) = split_args(env::args().skip(1));
    let mut positional = positional.into_iter();
    let music_root = positional
        .next()
        .or_else(|| env::var("MUSIC_ROOT").ok())
        .ok_or("MUSIC_ROOT not set and no path argument")?;
    let index_path = positional
        .next()
        .or_else(|| env::var("INDEX_PATH").ok())
        .unwrap_or_else(|| "data/library.redb".to_string());

    let config_path = config_path_from_env();
    let (settings, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let index_path = PathBuf::from(index_path);
    if let Some(parent) = index_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = TrackDatabase::open(&index_path)?;

    let root = PathBuf::from(&music_root);
    let name = Path::new(&music_root)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| music_root.clone());
    let library = LibraryInfo::new(1, name, root);

    let known = db.all_tracks()?;
    let snapshot = library.snapshot_under(&library.path, &known);
    let mut scanner = LibraryScanner::new(
        db,
        Arc::new(AudioLoader::new()),
        settings,
        EventSink::discard(),
    );
    let summary = scanner.scan_library(&library, &snapshot, !full);

    println!(
        "Scanned {} files: {} added, {} updated",
        summary.files, summary.added, summary.updated
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|arg| arg.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn full_flag_is_not_taken_as_a_path() {
        let (positional, full) = split_args(args(&["/music", "--full"]));
        assert_eq!(positional, vec!["/music".to_string()]);
        assert!(full);

        let (positional, full) = split_args(args(&["--full", "/music", "index.redb"]));
        assert_eq!(positional, vec!["/music".to_string(), "index.redb".to_string()]);
        assert!(full);

        let (positional, full) = split_args(args(&["/music", "index.redb"]));
        assert_eq!(positional.len(), 2);
        assert!(!full);
    }
}
