//! Manifest persistence.
//!
//! The manifest is a JSON document describing every level and the next file
//! number. It is replaced atomically: the new document is written to
//! `manifest.json.tmp`, synced, and renamed over `manifest.json`.
//!
//! Saves run on a single background worker. Scheduling a save while another
//! one is still queued replaces the queued document; a save that has already
//! started always runs to completion.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::util::filename;
use crate::{Error, Result};

use super::LevelMetadata;

/// Persisted form of the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDocument {
    /// Next file number to allocate.
    pub next_file_number: u64,
    /// Every level, indexed by level number.
    pub levels: Vec<LevelMetadata>,
}

impl ManifestDocument {
    /// Read the manifest at `path`, `None` if it does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let doc = serde_json::from_slice(&data)
            .map_err(|e| Error::manifest(format!("{}: {}", path.display(), e)))?;
        Ok(Some(doc))
    }

    /// Atomically replace the manifest at `path` with this document.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        let temp_path = filename::temp_file_path(path);

        let result = (|| -> Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
            drop(file);
            std::fs::rename(&temp_path, path)?;
            filename::sync_parent_dir(path)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = filename::delete_file(&temp_path);
        }
        result
    }
}

#[derive(Default)]
struct SaverState {
    /// Document waiting to be written.
    pending: Option<ManifestDocument>,
    /// Number of saves scheduled so far.
    requested: u64,
    /// Highest scheduled save known to be durable (or failed).
    completed: u64,
    /// Error of the most recent failed save, until reported.
    last_error: Option<Error>,
    shutdown: bool,
}

struct SaverShared {
    path: PathBuf,
    state: Mutex<SaverState>,
    work_ready: Condvar,
    work_done: Condvar,
}

/// Background writer for manifest documents.
pub struct ManifestSaver {
    shared: Arc<SaverShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ManifestSaver {
    /// Start a saver writing to `path`.
    pub fn start(path: PathBuf) -> Result<Self> {
        let shared = Arc::new(SaverShared {
            path,
            state: Mutex::new(SaverState::default()),
            work_ready: Condvar::new(),
            work_done: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("manifest-saver".into())
            .spawn(move || save_loop(worker))?;

        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue `doc` for saving, replacing any save not yet started.
    pub fn schedule(&self, doc: ManifestDocument) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(Error::EngineClosed);
        }
        if state.pending.replace(doc).is_some() {
            debug!("superseding queued manifest save");
        }
        state.requested += 1;
        self.shared.work_ready.notify_one();
        Ok(())
    }

    /// Wait until every save scheduled so far is durable.
    ///
    /// Reports the error of a failed save that no later save repaired.
    pub fn wait_idle(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        let target = state.requested;
        while state.completed < target {
            self.shared.work_done.wait(&mut state);
        }
        match state.last_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Save `doc` and wait until it is durable.
    pub fn save_sync(&self, doc: ManifestDocument) -> Result<()> {
        self.schedule(doc)?;
        self.wait_idle()
    }

    /// Write out pending saves and stop the worker.
    pub fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.work_ready.notify_all();
        }
        if let Some(handle) = self.handle.lock().take() {
            handle
                .join()
                .map_err(|_| Error::internal("manifest saver thread panicked"))?;
        }
        match self.shared.state.lock().last_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for ManifestSaver {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn save_loop(shared: Arc<SaverShared>) {
    loop {
        let (doc, generation) = {
            let mut state = shared.state.lock();
            while state.pending.is_none() && !state.shutdown {
                shared.work_ready.wait(&mut state);
            }
            match state.pending.take() {
                Some(doc) => (doc, state.requested),
                None => return,
            }
        };

        let result = doc.write_atomic(&shared.path);

        let mut state = shared.state.lock();
        match result {
            Ok(()) => state.last_error = None,
            Err(e) => {
                error!(path = %shared.path.display(), error = %e, "failed to save manifest");
                state.last_error = Some(e);
            }
        }
        state.completed = generation;
        shared.work_done.notify_all();
    }
}
