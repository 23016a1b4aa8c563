use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One path reported by a scan, tagged with the scan generation it belongs to.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub generation: u64,
    pub path: String,
}

/// Latest progress shown for a running scan. Display only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub current_path: String,
    pub messages_seen: u64,
    pub updated_at: DateTime<Utc>,
}

/// Throttled, lossy emitter handed to the service for the duration of one scan.
#[derive(Clone)]
pub struct ProgressSink {
    generation: u64,
    tx: Option<mpsc::Sender<ProgressEvent>>,
    min_interval: Duration,
    last_emit: Arc<Mutex<Option<Instant>>>,
}

impl ProgressSink {
    /// A sink that drops everything; used for modules without a progress stream.
    pub fn disabled() -> Self {
        ProgressSink {
            generation: 0,
            tx: None,
            min_interval: Duration::ZERO,
            last_emit: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn channel(
        generation: u64,
        capacity: usize,
        min_interval: Duration,
    ) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = ProgressSink {
            generation,
            tx: Some(tx),
            min_interval,
            last_emit: Arc::new(Mutex::new(None)),
        };
        (sink, rx)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Offer a path. Returns false when the message was throttled or dropped
    /// because the consumer is behind or gone.
    pub fn report(&self, path: impl Into<String>) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };
        {
            let mut last = self.last_emit.lock().unwrap_or_else(|p| p.into_inner());
            let now = Instant::now();
            if let Some(prev) = *last {
                if now.duration_since(prev) < self.min_interval {
                    return false;
                }
            }
            *last = Some(now);
        }
        tx.try_send(ProgressEvent {
            generation: self.generation,
            path: path.into(),
        })
        .is_ok()
    }
}
