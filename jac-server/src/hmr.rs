//! Hot module reload: debounced file watching and in-place module swap.
//!
//! A `notify` watcher posts raw change events; the single reload worker
//! debounces them, recompiles the served module, and swaps it into the
//! machine's registry. Failure keeps the previous module: a syntax error
//! must be recoverable by the next valid edit, and open sessions and
//! persisted state are never torn down.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use notify::{recommended_watcher, RecommendedWatcher, RecursiveMode, Watcher};

use crate::client;
use crate::state::AppState;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(75);

/// Filesystem watcher with a debounced event stream.
pub struct JacFileWatcher {
    rx: Receiver<PathBuf>,
    // Dropped with the watcher; keeps the OS watches alive.
    _watcher: RecommendedWatcher,
    debounce: Duration,
}

impl JacFileWatcher {
    pub fn new(watch_paths: &[PathBuf], debounce: Duration) -> Result<Self, notify::Error> {
        let (tx, rx) = std::sync::mpsc::channel::<PathBuf>();
        let mut watcher = recommended_watcher(move |result: Result<notify::Event, notify::Error>| {
            if let Ok(event) = result {
                for path in event.paths {
                    let _ = tx.send(path);
                }
            }
        })?;
        for path in watch_paths {
            watcher.watch(path, RecursiveMode::Recursive)?;
        }
        Ok(Self {
            rx,
            _watcher: watcher,
            debounce,
        })
    }

    /// Block for the next burst of changes, coalesced over the debounce
    /// window. Returns `None` when the watcher channel closed.
    pub fn next_batch(&self) -> Option<Vec<PathBuf>> {
        let first = self.rx.recv().ok()?;
        let mut batch = vec![first];
        loop {
            match self.rx.recv_timeout(self.debounce) {
                Ok(path) => {
                    if !batch.contains(&path) {
                        batch.push(path);
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Some(batch),
                Err(RecvTimeoutError::Disconnected) => return Some(batch),
            }
        }
    }
}

pub struct HotReloader {
    state: AppState,
}

impl HotReloader {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Recompile and swap after a source change. Returns true when a new
    /// module was swapped in.
    pub fn reload(&self, changed: &Path) -> bool {
        if changed.extension().and_then(|e| e.to_str()) != Some("jac") {
            return false;
        }
        tracing::info!(path = %changed.display(), "source change detected, recompiling");

        {
            let mut program = self.state.machine.program();
            program.evict_path(changed);
            program.evict_path(&self.state.module_path);
            // Start the recompile from a clean diagnostic slate.
            program.diagnostics.take();
        }

        match self
            .state
            .machine
            .import_file(&self.state.module_path, Some(&self.state.module_name))
        {
            Ok(_) => {
                if let Err(err) = client::rebuild_bundle(&self.state) {
                    tracing::warn!(error = %err, "client bundle rebuild failed");
                }
                tracing::info!(module = %self.state.module_name, "module swapped");
                true
            }
            Err(err) => {
                tracing::error!(error = %err, "recompile failed, keeping previous module");
                false
            }
        }
    }

    /// Run the reload worker until the watcher closes. Latest-wins: each
    /// debounced batch collapses to one recompile.
    pub fn run(&self, watcher: JacFileWatcher) {
        while let Some(batch) = watcher.next_batch() {
            let Some(last) = batch.last() else {
                continue;
            };
            self.reload(last);
        }
    }

    /// Spawn the reload worker on its own thread.
    pub fn spawn(state: AppState, watcher: JacFileWatcher) -> std::thread::JoinHandle<()> {
        std::thread::Builder::new()
            .name("jac-hmr".to_string())
            .spawn(move || HotReloader::new(state).run(watcher))
            .expect("spawn hmr worker")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::JacApiServer;
    use jac_core::config::JacConfig;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn walker_source(value: i64) -> String {
        format!(
            "walker get_value {{\n    can enter with `root entry {{\n        report {{\"value\": {value}}};\n    }}\n}}\n"
        )
    }

    #[test]
    fn reload_swaps_walker_body() {
        let tmp = tempfile::tempdir().unwrap();
        let app = tmp.path().join("app.jac");
        write(&app, &walker_source(1));

        let server = JacApiServer::new(&app, tmp.path(), JacConfig::default()).unwrap();
        server.load_module().unwrap();
        let state = server.state.clone();

        write(&app, &walker_source(2));
        let reloader = HotReloader::new(state.clone());
        assert!(reloader.reload(&app));

        let module = state.machine.module("__main__").unwrap();
        let walker = module.image.archetype("get_value").unwrap();
        let rendered = serde_json::to_string(&walker.abilities[0].body).unwrap();
        assert!(rendered.contains('2'), "expected updated body: {rendered}");
    }

    #[test]
    fn failed_reload_keeps_previous_module() {
        let tmp = tempfile::tempdir().unwrap();
        let app = tmp.path().join("app.jac");
        write(&app, &walker_source(1));

        let server = JacApiServer::new(&app, tmp.path(), JacConfig::default()).unwrap();
        server.load_module().unwrap();
        let state = server.state.clone();

        write(&app, "walker get_value { can enter with `root entry { report ");
        let reloader = HotReloader::new(state.clone());
        assert!(!reloader.reload(&app));
        assert!(state.machine.module("__main__").is_some());

        // A subsequent valid edit recovers.
        write(&app, &walker_source(3));
        assert!(reloader.reload(&app));
    }

    #[test]
    fn non_jac_changes_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let app = tmp.path().join("app.jac");
        write(&app, &walker_source(1));
        let server = JacApiServer::new(&app, tmp.path(), JacConfig::default()).unwrap();
        server.load_module().unwrap();

        let reloader = HotReloader::new(server.state.clone());
        assert!(!reloader.reload(&tmp.path().join("notes.txt")));
    }
}
