use crate::integration::LivenessSource;
use crate::types::LIVENESS_PROBE_INTERVAL;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Sample {
    connected: bool,
    taken_at: Instant,
}

/// Liveness sample refreshed at most once per `max_age`.
///
/// A drop is reported as soon as the source shows it; a recovery is only picked up
/// once the cached sample has aged out.
pub struct LivenessCache {
    source: Arc<dyn LivenessSource>,
    max_age: Duration,
    sample: Mutex<Sample>,
}

impl LivenessCache {
    pub fn new(source: Arc<dyn LivenessSource>) -> Self {
        Self::with_max_age(source, Duration::from_millis(LIVENESS_PROBE_INTERVAL))
    }

    pub fn with_max_age(source: Arc<dyn LivenessSource>, max_age: Duration) -> Self {
        let connected = source.is_connected();
        Self {
            source,
            max_age,
            sample: Mutex::new(Sample {
                connected,
                taken_at: Instant::now(),
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        let mut sample = self.sample.lock();
        let live = self.source.is_connected();
        if !live {
            *sample = Sample {
                connected: false,
                taken_at: Instant::now(),
            };
            return false;
        }
        if sample.taken_at.elapsed() >= self.max_age {
            *sample = Sample {
                connected: true,
                taken_at: Instant::now(),
            };
        }
        sample.connected
    }

    /// Reads the source directly and stores the result
    pub fn refresh(&self) -> bool {
        let connected = self.source.is_connected();
        *self.sample.lock() = Sample {
            connected,
            taken_at: Instant::now(),
        };
        connected
    }
}
