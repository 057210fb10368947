/// Messages sent from batch workers to the coordinator
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Progress of one image or chunk, in the order the worker observed it
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    /// A worker is about to correct this image
    Started {
        path: PathBuf,
        group: String,
        calibration: Option<PathBuf>,
    },
    Finished {
        path: PathBuf,
        output: PathBuf,
        elapsed_ms: u64,
    },
    Failed {
        path: PathBuf,
        message: String,
    },
    /// Images of a chunk that were never started because the run was cancelled
    Skipped {
        group: String,
        chunk: usize,
        paths: Vec<PathBuf>,
    },
}

impl BatchEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchEvent::Started { .. })
    }
}

/// Counters for a running batch
#[derive(Debug, Clone)]
pub struct Progress {
    pub total: usize,
    pub started: usize,
    pub finished: usize,
    pub failed: usize,
    pub skipped: usize,
    started_at: Instant,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            started: 0,
            finished: 0,
            failed: 0,
            skipped: 0,
            started_at: Instant::now(),
        }
    }

    pub fn record(&mut self, event: &BatchEvent) {
        match event {
            BatchEvent::Started { .. } => self.started += 1,
            BatchEvent::Finished { .. } => self.finished += 1,
            BatchEvent::Failed { .. } => self.failed += 1,
            BatchEvent::Skipped { paths, .. } => self.skipped += paths.len(),
        }
    }

    /// Images that reached a terminal status
    pub fn processed(&self) -> usize {
        self.finished + self.failed
    }

    /// Every image is either terminal or was never started
    pub fn is_complete(&self) -> bool {
        self.processed() + self.skipped >= self.total
    }

    /// Images a worker picked up that have not finished yet
    pub fn in_flight(&self) -> usize {
        self.started.saturating_sub(self.processed())
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_counts() {
        let mut progress = Progress::new(4);
        let a = PathBuf::from("a.nef");

        progress.record(&BatchEvent::Started {
            path: a.clone(),
            group: "G".into(),
            calibration: None,
        });
        assert_eq!(progress.in_flight(), 1);

        progress.record(&BatchEvent::Finished {
            path: a,
            output: "out/a.jpg".into(),
            elapsed_ms: 3,
        });
        progress.record(&BatchEvent::Failed {
            path: "b.nef".into(),
            message: "boom".into(),
        });
        assert!(!progress.is_complete());

        progress.record(&BatchEvent::Skipped {
            group: "G".into(),
            chunk: 1,
            paths: vec!["c.nef".into(), "d.nef".into()],
        });

        assert_eq!(progress.processed(), 2);
        assert_eq!(progress.in_flight(), 0);
        assert!(progress.is_complete());
    }
}
