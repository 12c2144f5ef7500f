use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use teloxide::dispatching::ShutdownToken;
use teloxide::error_handlers::ErrorHandler;
use teloxide::{ApiError, RequestError};
use tracing::{error, warn};

pub fn is_polling_conflict(err: &RequestError) -> bool {
    matches!(err, RequestError::Api(ApiError::TerminatedByOtherGetUpdates))
}

/// Counts conflicts that follow each other within `window`. A longer quiet
/// gap starts a new streak.
#[derive(Debug)]
pub struct ConflictTracker {
    max_attempts: usize,
    window: Duration,
    streak: Mutex<Option<(usize, Instant)>>,
}

impl ConflictTracker {
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        ConflictTracker {
            max_attempts: max_attempts.max(1),
            window,
            streak: Mutex::new(None),
        }
    }

    pub fn record(&self, now: Instant) -> usize {
        let mut streak = self.streak.lock();
        let count = match *streak {
            Some((count, last)) if now.saturating_duration_since(last) <= self.window => {
                count + 1
            }
            _ => 1,
        };
        *streak = Some((count, now));
        count
    }

    pub fn exhausted(&self, count: usize) -> bool {
        count >= self.max_attempts
    }
}

pub struct PollingErrorHandler {
    tracker: ConflictTracker,
    retry_delay: Duration,
    shutdown: ShutdownToken,
}

impl PollingErrorHandler {
    pub fn new(tracker: ConflictTracker, retry_delay: Duration, shutdown: ShutdownToken) -> Self {
        PollingErrorHandler {
            tracker,
            retry_delay,
            shutdown,
        }
    }
}

impl ErrorHandler<RequestError> for PollingErrorHandler {
    fn handle_error(
        self: Arc<Self>,
        error: RequestError,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
        Box::pin(async move {
            if !is_polling_conflict(&error) {
                error!("An error from the update listener: {error}");
                return;
            }

            let count = self.tracker.record(Instant::now());
            if self.tracker.exhausted(count) {
                error!(
                    "Bot still conflicts with another instance after {count} attempts; stopping the bot"
                );
                if self.shutdown.shutdown().is_err() {
                    warn!("Dispatcher was idle when asked to stop");
                }
                return;
            }

            warn!(
                "Another bot instance is polling ({count} in a row); retrying in {}s",
                self.retry_delay.as_secs()
            );
            tokio::time::sleep(self.retry_delay).await;
        })
    }
}
