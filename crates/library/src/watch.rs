use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::scanner::{EventSink, ScanEvent};
use crate::service::ScanCommand;
use crate::LibraryInfo;

/// Filesystem watch over one library root. Bursts of changes are debounced
/// and turned into directory scans. Dropping the watcher stops it.
pub struct LibraryWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl LibraryWatcher {
    pub fn start(
        library: LibraryInfo,
        debounce: Duration,
        events: EventSink,
        commands: UnboundedSender<ScanCommand>,
    ) -> Result<Self, notify::Error> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            NotifyConfig::default(),
        )?;

        watcher.watch(&library.path, RecursiveMode::Recursive)?;

        let task = tokio::spawn(async move {
            watch_loop(library, rx, debounce, events, commands).await;
        });

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for LibraryWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn watch_loop(
    library: LibraryInfo,
    mut rx: UnboundedReceiver<Event>,
    debounce: Duration,
    events: EventSink,
    commands: UnboundedSender<ScanCommand>,
) {
    loop {
        let event = match rx.recv().await {
            Some(event) => event,
            None => break,
        };
        let mut dirs = BTreeSet::new();
        if !collect_dirs(&event, &library.path, &mut dirs) {
            continue;
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => {
                    for dir in collapse_dirs(&dirs) {
                        debug!("Library directory changed: {:?}", dir);
                        events.send(ScanEvent::DirectoryChanged {
                            library_id: library.id,
                            dir: dir.clone(),
                        });
                        let command = ScanCommand::ScanDirectory {
                            library: library.clone(),
                            dir,
                            recursive: true,
                        };
                        if commands.send(command).is_err() {
                            warn!("Scanner gone; stopping watch of {:?}", library.path);
                            return;
                        }
                    }
                    break;
                }
                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            collect_dirs(&event, &library.path, &mut dirs);
                        }
                        None => return,
                    }
                }
            }
        }
    }
}

fn is_relevant_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn collect_dirs(event: &Event, root: &Path, dirs: &mut BTreeSet<PathBuf>) -> bool {
    if !is_relevant_event(event) {
        return false;
    }
    let before = dirs.len();
    for path in &event.paths {
        if let Some(dir) = changed_dir(path, root) {
            dirs.insert(dir);
        }
    }
    dirs.len() > before
}

/// Nearest existing directory at or above `path`, inside `root`.
fn changed_dir(path: &Path, root: &Path) -> Option<PathBuf> {
    if !path.starts_with(root) {
        return None;
    }
    let mut dir = if path.is_dir() {
        path
    } else {
        path.parent()?
    };
    while !dir.is_dir() && dir != root {
        dir = dir.parent()?;
    }
    if dir.starts_with(root) {
        Some(dir.to_path_buf())
    } else {
        None
    }
}

/// Drops directories already covered by a changed ancestor.
fn collapse_dirs(dirs: &BTreeSet<PathBuf>) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::new();
    for dir in dirs {
        if !out.iter().any(|kept| dir.starts_with(kept)) {
            out.push(dir.clone());
        }
    }
    out
}
