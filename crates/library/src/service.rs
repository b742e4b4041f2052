use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::scanner::{EventSink, LibraryScanner, ScanControl, ScanEvent, ScanState, ScanSummary};
use crate::store::TrackStore;
use crate::watch::LibraryWatcher;
use crate::{LibraryInfo, LibraryStatus, Track};

#[derive(Clone, Debug)]
pub enum ScanCommand {
    ScanLibrary {
        library: LibraryInfo,
        only_modified: bool,
    },
    ScanDirectory {
        library: LibraryInfo,
        dir: PathBuf,
        recursive: bool,
    },
    ScanTracks {
        tracks: Vec<Track>,
    },
    ScanFiles {
        urls: Vec<PathBuf>,
    },
    ScanPlaylist {
        urls: Vec<PathBuf>,
    },
    SetMonitoring {
        libraries: Vec<LibraryInfo>,
        enabled: bool,
    },
    /// Re-runs the paused scan, if any.
    Resume,
    /// Drops the paused scan, if any.
    Abandon,
    Shutdown,
}

impl ScanCommand {
    fn library(&self) -> Option<&LibraryInfo> {
        match self {
            ScanCommand::ScanLibrary { library, .. } | ScanCommand::ScanDirectory { library, .. } => {
                Some(library)
            }
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct ScannerHandle {
    commands: UnboundedSender<ScanCommand>,
    control: ScanControl,
    events: EventSink,
}

impl ScannerHandle {
    /// Queues a command. Returns false once the service has shut down.
    pub fn send(&self, command: ScanCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn pause(&self) -> bool {
        self.control.pause()
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn state(&self) -> ScanState {
        self.control.state()
    }

    pub fn status(&self, library_id: u32) -> Option<LibraryStatus> {
        self.events.status(library_id)
    }
}

/// Moves `scanner` onto a command loop. Commands run one at a time on the
/// blocking pool; pause and stop act on the running one directly.
pub fn start_scanner<S>(scanner: LibraryScanner<S>) -> (ScannerHandle, JoinHandle<()>)
where
    S: TrackStore + 'static,
{
    let (tx, rx) = unbounded_channel();
    let handle = ScannerHandle {
        commands: tx.clone(),
        control: scanner.control(),
        events: scanner.events().clone(),
    };
    let task = tokio::spawn(command_loop(scanner, rx, tx));
    (handle, task)
}

async fn command_loop<S>(
    scanner: LibraryScanner<S>,
    mut rx: UnboundedReceiver<ScanCommand>,
    tx: UnboundedSender<ScanCommand>,
) where
    S: TrackStore + 'static,
{
    let control = scanner.control();
    let scanner = Arc::new(Mutex::new(scanner));
    let mut watchers: HashMap<u32, LibraryWatcher> = HashMap::new();
    let mut paused: Option<ScanCommand> = None;

    while let Some(command) = rx.recv().await {
        let command = match command {
            ScanCommand::Shutdown => break,
            ScanCommand::Resume => match paused.take() {
                Some(command) => command,
                None => continue,
            },
            ScanCommand::Abandon => {
                if let Some(command) = paused.take() {
                    scanner.lock().abandon(command.library());
                }
                continue;
            }
            ScanCommand::SetMonitoring { libraries, enabled } => {
                let mut guard = scanner.lock();
                guard.set_monitor_libraries(enabled);
                setup_watchers(&guard, &mut watchers, &libraries, enabled, &tx);
                continue;
            }
            command => command,
        };

        let job = command.clone();
        let worker = Arc::clone(&scanner);
        let result = tokio::task::spawn_blocking(move || {
            execute(&mut worker.lock(), &job);
        })
        .await;

        // A failed command only loses itself; the loop keeps serving.
        if let Err(err) = result {
            warn!("Scan command failed: {}", err);
            scanner.lock().abandon(command.library());
            continue;
        }

        if control.is_paused() {
            info!("Scan paused");
            paused = Some(command);
            continue;
        }

        if let ScanCommand::ScanLibrary { library, .. } = &command {
            let guard = scanner.lock();
            if guard.is_monitoring() && !watchers.contains_key(&library.id) {
                add_watcher(&guard, &mut watchers, library, &tx);
            }
        }
    }

    info!("Scanner shut down");
}

fn execute<S: TrackStore>(scanner: &mut LibraryScanner<S>, command: &ScanCommand) -> Option<ScanSummary> {
    let known = match scanner.store().all_tracks() {
        Ok(tracks) => tracks,
        Err(err) => {
            warn!("Failed to load known tracks: {}", err);
            return None;
        }
    };

    let summary = match command {
        ScanCommand::ScanLibrary {
            library,
            only_modified,
        } => {
            let snapshot = library.snapshot_under(&library.path, &known);
            scanner.scan_library(library, &snapshot, *only_modified)
        }
        ScanCommand::ScanDirectory {
            library,
            dir,
            recursive,
        } => {
            let snapshot = library.snapshot_under(&library.path, &known);
            scanner.scan_library_directory(library, dir, &snapshot, *recursive)
        }
        ScanCommand::ScanTracks { tracks } => scanner.scan_tracks(tracks),
        ScanCommand::ScanFiles { urls } => scanner.scan_files(&known, urls),
        ScanCommand::ScanPlaylist { urls } => scanner.scan_playlist(&known, urls),
        _ => return None,
    };

    info!(
        "Scanned {} files: {} added, {} updated",
        summary.files, summary.added, summary.updated
    );
    Some(summary)
}

fn setup_watchers<S: TrackStore>(
    scanner: &LibraryScanner<S>,
    watchers: &mut HashMap<u32, LibraryWatcher>,
    libraries: &[LibraryInfo],
    enabled: bool,
    tx: &UnboundedSender<ScanCommand>,
) {
    for library in libraries {
        if !enabled {
            watchers.remove(&library.id);
            set_status(scanner.events(), library, LibraryStatus::Idle);
        } else if !watchers.contains_key(&library.id) {
            add_watcher(scanner, watchers, library, tx);
        }
    }
}

fn add_watcher<S: TrackStore>(
    scanner: &LibraryScanner<S>,
    watchers: &mut HashMap<u32, LibraryWatcher>,
    library: &LibraryInfo,
    tx: &UnboundedSender<ScanCommand>,
) {
    let debounce = scanner.settings().watch_debounce();
    match LibraryWatcher::start(library.clone(), debounce, scanner.events().clone(), tx.clone()) {
        Ok(watcher) => {
            info!(
                "Watching {} for changes (debounce {}s)",
                library.path.display(),
                debounce.as_secs()
            );
            watchers.insert(library.id, watcher);
            set_status(scanner.events(), library, LibraryStatus::Monitoring);
        }
        Err(err) => warn!("Failed to watch {}: {}", library.path.display(), err),
    }
}

fn set_status(events: &EventSink, library: &LibraryInfo, status: LibraryStatus) {
    events.send(ScanEvent::StatusChanged {
        library_id: library.id,
        status,
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::time::timeout;

    use super::*;
    use crate::config::ScanSettings;
    use crate::testing::{trk_loader, write_trk, MemoryStore};

    fn scanner(batch_size: usize) -> (LibraryScanner<MemoryStore>, UnboundedReceiver<ScanEvent>) {
        let (tx, rx) = unbounded_channel();
        let settings = ScanSettings {
            batch_size,
            ..ScanSettings::default()
        };
        let scanner = LibraryScanner::new(
            MemoryStore::default(),
            trk_loader(),
            settings,
            EventSink::new(tx),
        );
        (scanner, rx)
    }

    async fn wait_for(
        rx: &mut UnboundedReceiver<ScanEvent>,
        wanted: impl Fn(&ScanEvent) -> bool,
    ) -> Vec<ScanEvent> {
        let mut seen = Vec::new();
        loop {
            let event = timeout(Duration::from_secs(10), rx.recv())
                .await
                .unwrap()
                .unwrap();
            let done = wanted(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    #[tokio::test]
    async fn runs_queued_library_scans() {
        let dir = TempDir::new().unwrap();
        write_trk(&dir.path().join("a.trk"), "A", 1000);
        write_trk(&dir.path().join("b.trk"), "B", 1000);
        let library = LibraryInfo::new(1, "Music", dir.path());

        let (scanner, mut rx) = scanner(250);
        let (handle, task) = start_scanner(scanner);
        assert!(handle.send(ScanCommand::ScanLibrary {
            library: library.clone(),
            only_modified: true,
        }));

        let events = wait_for(&mut rx, |event| *event == ScanEvent::Finished).await;
        let added: usize = events
            .iter()
            .map(|event| match event {
                ScanEvent::ScanUpdate { added, .. } => added.len(),
                _ => 0,
            })
            .sum();
        assert_eq!(added, 2);
        assert_eq!(handle.status(1), Some(LibraryStatus::Idle));

        assert!(handle.send(ScanCommand::ScanLibrary {
            library,
            only_modified: true,
        }));
        let events = wait_for(&mut rx, |event| *event == ScanEvent::Finished).await;
        assert!(!events
            .iter()
            .any(|event| matches!(event, ScanEvent::ScanUpdate { .. })));

        handle.send(ScanCommand::Shutdown);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn paused_scans_can_be_abandoned() {
        let dir = TempDir::new().unwrap();
        write_trk(&dir.path().join("a.trk"), "A", 1000);
        write_trk(&dir.path().join("b.trk"), "B", 1000);
        let library = LibraryInfo::new(2, "Music", dir.path());

        let (mut scanner, mut rx) = scanner(1);
        scanner.store_mut().pause_on_store = Some(scanner.control());
        let (handle, task) = start_scanner(scanner);
        handle.send(ScanCommand::ScanLibrary {
            library,
            only_modified: true,
        });

        wait_for(&mut rx, |event| {
            *event
                == ScanEvent::StatusChanged {
                    library_id: 2,
                    status: LibraryStatus::Pending,
                }
        })
        .await;
        assert_eq!(handle.state(), ScanState::Paused);

        handle.send(ScanCommand::Abandon);
        wait_for(&mut rx, |event| *event == ScanEvent::Finished).await;
        assert_eq!(handle.status(2), Some(LibraryStatus::Idle));
        assert_eq!(handle.state(), ScanState::Idle);

        handle.send(ScanCommand::Shutdown);
        task.await.unwrap();
    }

    #[test]
    fn directory_scans_relocate_across_folders() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("a/song.trk");
        write_trk(&old, "Song", 1000);
        let library = LibraryInfo::new(1, "Music", dir.path());
        let (mut scanner, _rx) = scanner(250);
        execute(
            &mut scanner,
            &ScanCommand::ScanLibrary {
                library: library.clone(),
                only_modified: true,
            },
        );
        let id = scanner.store().by_path(&old.to_string_lossy())[0].id;

        let new = dir.path().join("b/song.trk");
        std::fs::create_dir_all(new.parent().unwrap()).unwrap();
        std::fs::rename(&old, &new).unwrap();

        for sub in ["a", "b"] {
            execute(
                &mut scanner,
                &ScanCommand::ScanDirectory {
                    library: library.clone(),
                    dir: dir.path().join(sub),
                    recursive: true,
                },
            );
        }

        let moved = scanner.store().by_path(&new.to_string_lossy());
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].id, id);
        assert!(moved[0].enabled);
        assert_eq!(moved[0].library_id, Some(1));
        assert_eq!(scanner.store().tracks.len(), 1);
    }

    #[tokio::test]
    async fn resumed_scans_run_to_completion() {
        let dir = TempDir::new().unwrap();
        write_trk(&dir.path().join("a.trk"), "A", 1000);
        write_trk(&dir.path().join("b.trk"), "B", 1000);
        let library = LibraryInfo::new(5, "Music", dir.path());

        let (mut scanner, mut rx) = scanner(1);
        scanner.store_mut().pause_on_store = Some(scanner.control());
        let (handle, task) = start_scanner(scanner);
        handle.send(ScanCommand::ScanLibrary {
            library,
            only_modified: true,
        });
        wait_for(&mut rx, |event| {
            *event
                == ScanEvent::StatusChanged {
                    library_id: 5,
                    status: LibraryStatus::Pending,
                }
        })
        .await;

        handle.send(ScanCommand::Resume);
        let events = wait_for(&mut rx, |event| *event == ScanEvent::Finished).await;
        let added: Vec<String> = events
            .iter()
            .flat_map(|event| match event {
                ScanEvent::ScanUpdate { added, .. } => added.clone(),
                _ => Vec::new(),
            })
            .filter_map(|track| track.title)
            .collect();
        assert_eq!(added, vec!["B".to_string()]);
        assert_eq!(handle.status(5), Some(LibraryStatus::Idle));
        assert_eq!(handle.state(), ScanState::Idle);

        handle.send(ScanCommand::Shutdown);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn failed_commands_leave_the_service_running() {
        let dir = TempDir::new().unwrap();
        write_trk(&dir.path().join("a.trk"), "A", 1000);
        let library = LibraryInfo::new(6, "Music", dir.path());

        let (mut scanner, mut rx) = scanner(250);
        scanner.store_mut().panic_on_store = true;
        let (handle, task) = start_scanner(scanner);
        handle.send(ScanCommand::ScanLibrary {
            library: library.clone(),
            only_modified: true,
        });
        wait_for(&mut rx, |event| *event == ScanEvent::Finished).await;
        assert_eq!(handle.status(6), Some(LibraryStatus::Idle));
        assert_eq!(handle.state(), ScanState::Idle);

        assert!(handle.send(ScanCommand::ScanLibrary {
            library,
            only_modified: true,
        }));
        let events = wait_for(&mut rx, |event| *event == ScanEvent::Finished).await;
        assert!(events.iter().any(|event| matches!(
            event,
            ScanEvent::ScanUpdate { added, .. } if added.len() == 1
        )));

        handle.send(ScanCommand::Shutdown);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn monitoring_can_be_switched_off() {
        let dir = TempDir::new().unwrap();
        let library = LibraryInfo::new(4, "Music", dir.path());
        let (scanner, mut rx) = scanner(250);
        let (handle, task) = start_scanner(scanner);

        handle.send(ScanCommand::SetMonitoring {
            libraries: vec![library.clone()],
            enabled: true,
        });
        wait_for(&mut rx, |event| {
            *event
                == ScanEvent::StatusChanged {
                    library_id: 4,
                    status: LibraryStatus::Monitoring,
                }
        })
        .await;

        handle.send(ScanCommand::SetMonitoring {
            libraries: vec![library],
            enabled: false,
        });
        wait_for(&mut rx, |event| {
            *event
                == ScanEvent::StatusChanged {
                    library_id: 4,
                    status: LibraryStatus::Idle,
                }
        })
        .await;

        handle.send(ScanCommand::Shutdown);
        task.await.unwrap();
    }
}
