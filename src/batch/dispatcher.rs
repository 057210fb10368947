/// Worker pool for batch correction
///
/// Each chunk of a plan runs as one blocking task. At most `workers` chunks
/// run at once; the rest wait on a semaphore. Workers never touch shared
/// state: they report through a single event channel owned by the caller.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use super::events::{BatchEvent, Progress};
use super::plan::{BatchPlan, Chunk, ImageJob, RunSettings};
use crate::calibration::CalibrationEntry;
use crate::error::{Error, Result};

/// Corrects and writes one image. Implementations must be thread-safe;
/// the same corrector is shared by every worker.
pub trait ImageCorrector: Send + Sync {
    fn correct(
        &self,
        job: &ImageJob,
        calibration: Option<&CalibrationEntry>,
        settings: &RunSettings,
    ) -> Result<()>;
}

/// Cooperative cancellation for one run
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    semaphore: Arc<Semaphore>,
}

impl CancelToken {
    /// Stop queued chunks from starting and running chunks after their
    /// current image.
    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            info!("Cancelling batch run");
        }
        self.semaphore.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A running batch
pub struct BatchHandle {
    token: CancelToken,
    events: mpsc::UnboundedReceiver<BatchEvent>,
    tasks: Vec<JoinHandle<()>>,
    progress: Progress,
}

impl BatchHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// A token that can cancel this run from elsewhere (e.g. a signal handler)
    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Next event from any worker; None once every task has ended
    pub async fn next_event(&mut self) -> Option<BatchEvent> {
        let event = self.events.recv().await?;
        self.progress.record(&event);
        Some(event)
    }

    /// Drain events until the run is over, calling `on_event` for each one
    pub async fn wait<F>(mut self, mut on_event: F) -> Progress
    where
        F: FnMut(&BatchEvent, &Progress),
    {
        while let Some(event) = self.next_event().await {
            on_event(&event, &self.progress);
        }
        for handle in self.tasks.drain(..) {
            if let Err(e) = handle.await {
                error!("Batch task ended abnormally: {}", e);
            }
        }
        info!(
            "Batch finished: {} ok, {} failed, {} skipped in {:.1}s",
            self.progress.finished,
            self.progress.failed,
            self.progress.skipped,
            self.progress.elapsed().as_secs_f32()
        );
        self.progress
    }
}

/// Runs plans on a bounded pool of blocking tasks
#[derive(Debug, Clone, Copy)]
pub struct BatchDispatcher {
    workers: usize,
}

impl BatchDispatcher {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Start every chunk of `plan`. Must be called inside a tokio runtime.
    pub fn execute(&self, plan: BatchPlan, corrector: Arc<dyn ImageCorrector>) -> Result<BatchHandle> {
        self.execute_chunks(plan.chunks, plan.settings, corrector)
    }

    /// Run one chunk again, e.g. after a failed run. The chunk is processed
    /// exactly as in its original plan.
    pub fn resubmit(
        &self,
        chunk: Chunk,
        settings: Arc<RunSettings>,
        corrector: Arc<dyn ImageCorrector>,
    ) -> Result<BatchHandle> {
        debug!("Resubmitting chunk {} of group '{}'", chunk.index, chunk.group);
        self.execute_chunks(vec![chunk], settings, corrector)
    }

    fn execute_chunks(
        &self,
        chunks: Vec<Chunk>,
        settings: Arc<RunSettings>,
        corrector: Arc<dyn ImageCorrector>,
    ) -> Result<BatchHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;

        let total = chunks.iter().map(|c| c.jobs.len()).sum();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let token = CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
            semaphore: Arc::clone(&semaphore),
        };
        let (tx, rx) = mpsc::unbounded_channel();

        info!(
            "Dispatching {} images in {} chunks to {} workers",
            total,
            chunks.len(),
            self.workers
        );

        let tasks = chunks
            .into_iter()
            .map(|chunk| {
                let semaphore = Arc::clone(&semaphore);
                let token = token.clone();
                let tx = tx.clone();
                let settings = Arc::clone(&settings);
                let corrector = Arc::clone(&corrector);

                runtime.spawn(async move {
                    let permit = match semaphore.acquire_owned().await {
                        Ok(permit) if !token.is_cancelled() => permit,
                        _ => {
                            send_skipped(&tx, &chunk, 0);
                            return;
                        }
                    };

                    let tx_worker = tx.clone();
                    let result = task::spawn_blocking(move || {
                        run_chunk(&chunk, corrector.as_ref(), &settings, &token, &tx_worker)
                    })
                    .await;
                    drop(permit);

                    if let Err(e) = result {
                        error!("Chunk worker failed to run: {}", e);
                    }
                })
            })
            .collect();

        Ok(BatchHandle {
            token,
            events: rx,
            tasks,
            progress: Progress::new(total),
        })
    }
}

/// Process a chunk in order, checking for cancellation before each image
fn run_chunk(
    chunk: &Chunk,
    corrector: &dyn ImageCorrector,
    settings: &RunSettings,
    token: &CancelToken,
    tx: &mpsc::UnboundedSender<BatchEvent>,
) {
    let calibration = chunk.calibration.as_deref();
    let calibration_source = calibration.and_then(|c| c.source_file.clone());

    for (i, job) in chunk.jobs.iter().enumerate() {
        if token.is_cancelled() {
            send_skipped(tx, chunk, i);
            return;
        }

        let _ = tx.send(BatchEvent::Started {
            path: job.input.clone(),
            group: chunk.group.clone(),
            calibration: calibration_source.clone(),
        });

        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            corrector.correct(job, calibration, settings)
        }));

        let event = match outcome {
            Ok(Ok(())) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                debug!("Finished {} in {}ms", job.input.display(), elapsed_ms);
                BatchEvent::Finished {
                    path: job.input.clone(),
                    output: job.output.clone(),
                    elapsed_ms,
                }
            }
            Ok(Err(e)) => {
                error!("Failed {}: {}", job.input.display(), e);
                BatchEvent::Failed {
                    path: job.input.clone(),
                    message: e.to_string(),
                }
            }
            Err(_) => {
                error!("Corrector panicked on {}", job.input.display());
                BatchEvent::Failed {
                    path: job.input.clone(),
                    message: "corrector panicked".to_string(),
                }
            }
        };
        let _ = tx.send(event);
    }
}

fn send_skipped(tx: &mpsc::UnboundedSender<BatchEvent>, chunk: &Chunk, from: usize) {
    let paths: Vec<PathBuf> = chunk.jobs[from.min(chunk.jobs.len())..]
        .iter()
        .map(|job| job.input.clone())
        .collect();
    if paths.is_empty() {
        return;
    }
    warn!(
        "Skipping {} images of group '{}' (chunk {})",
        paths.len(),
        chunk.group,
        chunk.index
    );
    let _ = tx.send(BatchEvent::Skipped {
        group: chunk.group.clone(),
        chunk: chunk.index,
        paths,
    });
}
