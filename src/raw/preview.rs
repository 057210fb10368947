/// Background preview loading
///
/// Only the most recent request matters: starting a new preview aborts the
/// one in flight, and a result that finishes after being superseded is
/// dropped instead of delivered.

use image::Rgb32FImage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::thumbnail;
use crate::error::{Error, Result};

/// A finished preview request
#[derive(Debug)]
pub struct PreviewResult {
    pub generation: u64,
    pub path: PathBuf,
    pub image: Result<Rgb32FImage>,
}

/// Loads previews one at a time, newest request wins
pub struct PreviewLoader {
    generation: Arc<AtomicU64>,
    current: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<PreviewResult>,
}

impl PreviewLoader {
    /// Create a loader and the receiver its results arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PreviewResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let loader = Self {
            generation: Arc::new(AtomicU64::new(0)),
            current: None,
            tx,
        };
        (loader, rx)
    }

    /// Start loading `path`, superseding any request still running.
    ///
    /// Must be called from within a tokio runtime. Returns the generation
    /// number the result will carry.
    pub fn request(&mut self, path: PathBuf, max_size: u32) -> u64 {
        self.cancel();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let latest = Arc::clone(&self.generation);
        let tx = self.tx.clone();

        debug!("Preview request {} for {}", generation, path.display());
        self.current = Some(tokio::spawn(async move {
            let load_path = path.clone();
            let image = tokio::task::spawn_blocking(move || {
                thumbnail::load_thumbnail(&load_path, max_size)
            })
            .await
            .map_err(|e| Error::Decode(format!("Task join error: {}", e)))
            .and_then(|result| result);

            if latest.load(Ordering::SeqCst) != generation {
                debug!("Dropping superseded preview {}", generation);
                return;
            }
            let _ = tx.send(PreviewResult {
                generation,
                path,
                image,
            });
        }));
        generation
    }

    /// Abort the request in flight, if any
    pub fn cancel(&mut self) {
        if let Some(handle) = self.current.take() {
            handle.abort();
        }
    }

    pub fn latest_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl Drop for PreviewLoader {
    fn drop(&mut self) {
        self.cancel();
    }
}
