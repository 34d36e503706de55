//! Periodic reload ticker.
//!
//! Liveness fallback: while a city is active, re-request its metrics on a
//! fixed cadence through the reload endpoint. The core restarts the ticker
//! whenever the city or the last reading changes, so a running ticker never
//! acts on a stale capture.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::WeatherClient;
use crate::snapshot::{Change, Source};

/// Default reload cadence.
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(5);

/// Handle to the running ticker task.
///
/// Restart = cancel + respawn with a freshly captured city; the core owns
/// that decision. Dropping the handle cancels the pending timer.
#[derive(Debug)]
pub struct ReloadTicker {
    handle: JoinHandle<()>,
}

impl ReloadTicker {
    /// Spawn a ticker for `city`.
    ///
    /// Every `interval`, if `city` is non-empty, issues a reload and forwards
    /// the outcome into `tx`. An empty city means no network call that tick.
    /// A failed reload degrades the snapshot but never stops the ticker.
    /// The first fire happens one full interval after spawn.
    #[must_use]
    pub fn spawn(
        city: String,
        interval: Duration,
        client: Arc<WeatherClient>,
        tx: mpsc::UnboundedSender<Change>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                if city.is_empty() {
                    continue;
                }

                let change = match client.reload_by_city(&city).await {
                    Ok(reading) => {
                        debug!(%city, "reload tick applied");
                        Change::Observed {
                            source: Source::Reload,
                            reading,
                        }
                    }
                    Err(e) => {
                        warn!(%city, "reload failed: {}", e);
                        Change::Failed(Source::Reload)
                    }
                };

                if tx.send(change).is_err() {
                    // Core torn down
                    return;
                }
            }
        });

        Self { handle }
    }

    /// Cancel the pending timer and stop the ticker.
    pub fn cancel(self) {
        self.handle.abort();
    }
}

impl Drop for ReloadTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
