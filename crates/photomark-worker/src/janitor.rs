//! Background file retention.
//!
//! One sweep loop runs three independent, idempotent timers: burn-after-read
//! outputs past their TTL (cascading to the matching original upload by the
//! `_watermark` filename convention), packaged download archives past their
//! retention, and a blanket upload-directory sweep as a backstop for any
//! path that failed to schedule its own cleanup. Already-deleted files are
//! never an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const ARCHIVE_PREFIX: &str = "Packed_Watermark_Images_";

/// Burn-after-read bookkeeping: output path to deadline. Reading the file
/// through an authorized endpoint refreshes the deadline.
pub struct BurnRegistry {
    ttl: Duration,
    entries: Mutex<HashMap<PathBuf, Instant>>,
}

impl BurnRegistry {
    pub fn new(ttl: Duration) -> Self {
        BurnRegistry {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn schedule(&self, path: PathBuf) {
        let deadline = Instant::now() + self.ttl;
        self.entries.lock().unwrap().insert(path, deadline);
    }

    /// Push the deadline out again; unknown paths are ignored.
    pub fn refresh_on_read(&self, path: &Path) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(deadline) = entries.get_mut(path) {
            *deadline = Instant::now() + self.ttl;
        }
    }

    /// Remove and return every entry past its deadline.
    pub fn take_expired(&self) -> Vec<PathBuf> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let expired: Vec<PathBuf> = entries
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &expired {
            entries.remove(path);
        }
        expired
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[derive(Clone)]
pub struct JanitorConfig {
    pub upload_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub archive_retention: Duration,
    pub upload_retention: Duration,
    pub sweep_interval: Duration,
}

/// Owns the sweep loop; dropping without `shutdown` aborts the task.
pub struct Janitor {
    handle: Option<JoinHandle<()>>,
    shutdown: mpsc::Sender<()>,
}

impl Janitor {
    pub fn spawn(config: JanitorConfig, registry: std::sync::Arc<BurnRegistry>) -> Self {
        let (shutdown, mut shutdown_rx) = mpsc::channel::<()>(1);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => sweep_once(&config, &registry),
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!("janitor loop stopped");
        });
        Janitor {
            handle: Some(handle),
            shutdown,
        }
    }

    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(()).await;
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Janitor {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

fn sweep_once(config: &JanitorConfig, registry: &BurnRegistry) {
    let burned = sweep_burned(registry);
    let archives = sweep_archives(&config.archive_dir, config.archive_retention);
    let uploads = sweep_uploads(&config.upload_dir, config.upload_retention);
    if burned + archives + uploads > 0 {
        info!(burned, archives, uploads, "janitor sweep removed files");
    }
}

/// Delete expired burn-after-read outputs and, by naming convention, the
/// original upload each was derived from.
pub fn sweep_burned(registry: &BurnRegistry) -> usize {
    let mut removed = 0;
    for path in registry.take_expired() {
        removed += remove_quietly(&path) as usize;
        if let Some(original) = original_for_watermark(&path) {
            remove_quietly(&original);
        }
    }
    removed
}

/// `shot_watermark.jpg` came from `shot.jpg` in the same directory.
fn original_for_watermark(path: &Path) -> Option<PathBuf> {
    let stem = path.file_stem()?.to_str()?;
    let original_stem = stem.strip_suffix("_watermark")?;
    let ext = path.extension()?.to_str()?;
    Some(path.with_file_name(format!("{}.{}", original_stem, ext)))
}

/// Delete packaged download archives whose mtime is past the retention
/// window.
pub fn sweep_archives(dir: &Path, retention: Duration) -> usize {
    sweep_dir(dir, retention, |name| {
        name.starts_with(ARCHIVE_PREFIX) && name.ends_with(".zip")
    })
}

/// Backstop sweep: any upload-directory file older than the long ceiling.
pub fn sweep_uploads(dir: &Path, retention: Duration) -> usize {
    sweep_dir(dir, retention, |_| true)
}

fn sweep_dir(dir: &Path, retention: Duration, matches: impl Fn(&str) -> bool) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        if !matches(name) {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| now.duration_since(mtime).ok());
        if age.is_some_and(|age| age >= retention) {
            removed += remove_quietly(&path) as usize;
        }
    }
    removed
}

fn remove_quietly(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed file");
            true
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "file removal failed");
            false
        }
    }
}
