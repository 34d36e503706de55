//! Reconciliation core.
//!
//! Single authority over the snapshot. All three producers — manual fetch,
//! push subscription, reload ticker — funnel their completions into one
//! unbounded queue; a single consumer task applies them in arrival order and
//! publishes whole snapshots through a watch channel, so readers never see a
//! torn state. The push listener lives for the lifetime of the core; the
//! ticker is restarted whenever the city or the last reading changes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::{DEFAULT_BASE_URL, WeatherClient};
use crate::errors::MeteotailError;
use crate::listener::PushListener;
use crate::snapshot::{Change, Snapshot, Source};
use crate::ticker::{DEFAULT_RELOAD_INTERVAL, ReloadTicker};

/// Core configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend base URL
    pub base_url: String,
    /// Reload ticker cadence
    pub reload_interval: Duration,
    /// Per-request timeout for pull calls
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            reload_interval: DEFAULT_RELOAD_INTERVAL,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a delete request, surfaced to the presentation layer as the
/// user-visible confirmation signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Delete succeeded (or there was nothing to delete)
    Deleted,
    /// Delete failed; the snapshot carries the error message
    Failed,
}

impl DeleteOutcome {
    /// Whether a confirmation should be shown.
    #[must_use]
    pub const fn is_confirmed(self) -> bool {
        matches!(self, Self::Deleted)
    }
}

/// The mounted reconciliation core.
///
/// Created by [`mount`](Self::mount), torn down by [`close`](Self::close)
/// (or best-effort on drop). Exposes the only mutation paths the
/// presentation layer gets: [`submit_city`](Self::submit_city) and
/// [`request_delete`](Self::request_delete).
#[derive(Debug)]
pub struct WeatherCore {
    tx: mpsc::UnboundedSender<Change>,
    snapshot_rx: watch::Receiver<Snapshot>,
    client: Arc<WeatherClient>,
    listener: Option<PushListener>,
    shutdown_tx: watch::Sender<bool>,
    apply_task: Option<JoinHandle<()>>,
}

impl WeatherCore {
    /// Mount the core: start with an empty snapshot, spawn the apply loop,
    /// open the push subscription exactly once, and start the reload ticker.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn mount(config: Config) -> Result<Self, MeteotailError> {
        let client = Arc::new(WeatherClient::new(
            &config.base_url,
            config.request_timeout,
        )?);

        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let apply_task = tokio::spawn(apply_loop(
            rx,
            snapshot_tx,
            shutdown_rx,
            Arc::clone(&client),
            tx.clone(),
            config.reload_interval,
        ));

        let listener = PushListener::open(Arc::clone(&client), tx.clone());

        debug!("core mounted");
        Ok(Self {
            tx,
            snapshot_rx,
            client,
            listener: Some(listener),
            shutdown_tx,
            apply_task: Some(apply_task),
        })
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Watch receiver for reactive consumers; each observed value is a whole
    /// snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_rx.clone()
    }

    /// Submit a new target city: record it, fetch its metrics, apply the
    /// result.
    ///
    /// An empty (or whitespace-only) city is a guarded no-op. A failed fetch
    /// degrades the snapshot to the generic error state; the cause is only
    /// logged.
    pub async fn submit_city(&self, city: &str) {
        let city = city.trim();
        if city.is_empty() {
            warn!("ignoring submission of empty city");
            return;
        }

        let _ = self.tx.send(Change::CitySubmitted(city.to_string()));

        let change = match self.client.fetch_by_city(city).await {
            Ok(reading) => Change::Observed {
                source: Source::Fetch,
                reading,
            },
            Err(e) => {
                warn!(%city, "fetch failed: {}", e);
                Change::Failed(Source::Fetch)
            }
        };
        let _ = self.tx.send(change);
    }

    /// Delete the active city's stored metrics.
    ///
    /// With no active city this is an idempotent success: no network call,
    /// no snapshot change. On success the metrics, chart, and error are
    /// cleared (the city stays as submitted); on failure only the error
    /// state changes.
    pub async fn request_delete(&self) -> DeleteOutcome {
        let city = self.snapshot_rx.borrow().city.clone();
        if city.is_empty() {
            debug!("delete requested with no active city");
            return DeleteOutcome::Deleted;
        }

        match self.client.delete_by_city(&city).await {
            Ok(()) => {
                let _ = self.tx.send(Change::Cleared);
                DeleteOutcome::Deleted
            }
            Err(e) => {
                warn!(%city, "delete failed: {}", e);
                let _ = self.tx.send(Change::Failed(Source::Delete));
                DeleteOutcome::Failed
            }
        }
    }

    /// Unmount: close the subscription, stop the apply loop and ticker, and
    /// wait for the loop to finish. Idempotent; in-flight completions that
    /// resolve afterwards find a closed queue and are dropped.
    pub async fn close(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            listener.close();
        }
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.apply_task.take() {
            let _ = task.await;
        }
        debug!("core closed");
    }
}

impl Drop for WeatherCore {
    fn drop(&mut self) {
        // Best-effort teardown when close() was not awaited
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.apply_task.take() {
            task.abort();
        }
    }
}

/// The single consumer: owns the snapshot, applies changes in arrival order,
/// publishes each new state, and keeps the ticker keyed to the current
/// dependency set.
async fn apply_loop(
    mut rx: mpsc::UnboundedReceiver<Change>,
    snapshot_tx: watch::Sender<Snapshot>,
    mut shutdown_rx: watch::Receiver<bool>,
    client: Arc<WeatherClient>,
    tx: mpsc::UnboundedSender<Change>,
    reload_interval: Duration,
) {
    let mut snapshot = Snapshot::default();
    let mut ticker = Some(ReloadTicker::spawn(
        snapshot.city.clone(),
        reload_interval,
        Arc::clone(&client),
        tx.clone(),
    ));

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            maybe = rx.recv() => {
                let Some(change) = maybe else { break };

                let deps_before = snapshot.dependency_key();
                snapshot.apply(change);
                snapshot_tx.send_replace(snapshot.clone());

                // Restart the ticker when its dependency set moved, so it
                // never reloads a stale city
                if snapshot.dependency_key() != deps_before {
                    if let Some(old) = ticker.take() {
                        old.cancel();
                    }
                    ticker = Some(ReloadTicker::spawn(
                        snapshot.city.clone(),
                        reload_interval,
                        Arc::clone(&client),
                        tx.clone(),
                    ));
                }
            }
        }
    }

    if let Some(old) = ticker.take() {
        old.cancel();
    }
    debug!("apply loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Reading;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FETCH_BODY: &str = r#"{"main":{"temp":18.0,"humidity":60.0},"wind":{"speed":4.0}}"#;
    const RELOAD_BODY: &str = r#"{"main":{"temp":19.5,"humidity":58.0},"wind":{"speed":5.0}}"#;

    fn config(server: &MockServer) -> Config {
        Config {
            base_url: server.uri(),
            // Long enough to stay quiet unless a test shortens it
            reload_interval: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(5),
        }
    }

    async fn wait_until(
        rx: &mut watch::Receiver<Snapshot>,
        pred: impl Fn(&Snapshot) -> bool,
    ) -> Snapshot {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snap = rx.borrow().clone();
                if pred(&snap) {
                    return snap;
                }
                rx.changed().await.expect("core closed before condition");
            }
        })
        .await
        .expect("timed out waiting for snapshot condition")
    }

    fn push_reading(t: f64, h: f64, w: f64) -> Change {
        Change::Observed {
            source: Source::Push,
            reading: Reading {
                temperature: t,
                humidity: h,
                wind_speed: w,
            },
        }
    }

    #[tokio::test]
    async fn test_submit_city_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather/Odense"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(FETCH_BODY, "application/json"))
            .mount(&server)
            .await;

        let mut core = WeatherCore::mount(config(&server)).expect("mount failed");
        let mut rx = core.subscribe();

        core.submit_city("Odense").await;

        let snap = wait_until(&mut rx, |s| s.temperature.is_some()).await;
        assert_eq!(snap.city, "Odense");
        assert_eq!(snap.temperature, Some(18.0));
        assert_eq!(snap.humidity, Some(60.0));
        assert_eq!(snap.wind_speed, Some(4.0));
        assert!(snap.error.is_none());
        assert_eq!(snap.chart.expect("chart missing").rows.len(), 3);
        assert!(snap.observed_at.is_some());

        core.close().await;
    }

    #[tokio::test]
    async fn test_submit_city_failure() {
        let server = MockServer::start().await;
        // No mock for the city: wiremock answers 404

        let mut core = WeatherCore::mount(config(&server)).expect("mount failed");
        let mut rx = core.subscribe();

        core.submit_city("Nowhere").await;

        let snap = wait_until(&mut rx, |s| s.error.is_some()).await;
        assert_eq!(snap.city, "Nowhere");
        assert!(snap.temperature.is_none());
        assert!(snap.humidity.is_none());
        assert!(snap.wind_speed.is_none());
        assert!(snap.chart.is_none());
        assert_eq!(snap.error.as_deref(), Some("Error fetching weather data."));
        assert!(snap.invariants_hold());

        core.close().await;
    }

    #[tokio::test]
    async fn test_submit_empty_city_is_a_noop() {
        let server = MockServer::start().await;
        let mut core = WeatherCore::mount(config(&server)).expect("mount failed");

        core.submit_city("   ").await;

        assert_eq!(core.snapshot(), Snapshot::default());
        core.close().await;
    }

    #[tokio::test]
    async fn test_push_event_without_city() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather/subscribe"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "data: {\"temperature\":20.0,\"humidity\":55.0,\"windSpeed\":3.0}\n\n",
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let mut core = WeatherCore::mount(config(&server)).expect("mount failed");
        let mut rx = core.subscribe();

        let snap = wait_until(&mut rx, |s| s.temperature.is_some()).await;
        assert_eq!(snap.city, "");
        assert_eq!(snap.temperature, Some(20.0));
        assert_eq!(snap.humidity, Some(55.0));
        assert_eq!(snap.wind_speed, Some(3.0));

        core.close().await;
    }

    #[tokio::test]
    async fn test_last_applied_wins_across_producers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather/Odense"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(FETCH_BODY, "application/json"))
            .mount(&server)
            .await;

        let mut core = WeatherCore::mount(config(&server)).expect("mount failed");
        let mut rx = core.subscribe();

        // Push applied first, then the fetch completes: fetch overwrites
        core.tx.send(push_reading(20.0, 55.0, 3.0)).expect("send failed");
        wait_until(&mut rx, |s| s.temperature == Some(20.0)).await;

        core.submit_city("Odense").await;
        let snap = wait_until(&mut rx, |s| s.temperature == Some(18.0)).await;
        assert_eq!(snap.humidity, Some(60.0));

        // Reverse order: push completes after the fetch and overwrites it
        core.tx.send(push_reading(20.0, 55.0, 3.0)).expect("send failed");
        let snap = wait_until(&mut rx, |s| s.temperature == Some(20.0)).await;
        assert_eq!(snap.humidity, Some(55.0));
        // City submission is never undone by a push
        assert_eq!(snap.city, "Odense");

        core.close().await;
    }

    #[tokio::test]
    async fn test_delete_after_fetch_clears_and_confirms() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather/Odense"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(FETCH_BODY, "application/json"))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/weather/Odense"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut core = WeatherCore::mount(config(&server)).expect("mount failed");
        let mut rx = core.subscribe();

        core.submit_city("Odense").await;
        wait_until(&mut rx, |s| s.temperature.is_some()).await;

        let outcome = core.request_delete().await;
        assert!(outcome.is_confirmed());

        let snap = wait_until(&mut rx, |s| s.temperature.is_none()).await;
        assert!(snap.chart.is_none());
        assert!(snap.error.is_none());
        assert_eq!(snap.city, "Odense");

        core.close().await;
    }

    #[tokio::test]
    async fn test_delete_on_empty_snapshot_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let mut core = WeatherCore::mount(config(&server)).expect("mount failed");

        let outcome = core.request_delete().await;
        assert_eq!(outcome, DeleteOutcome::Deleted);
        assert_eq!(core.snapshot(), Snapshot::default());

        core.close().await;
        server.verify().await;
    }

    #[tokio::test]
    async fn test_delete_failure_sets_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather/Odense"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(FETCH_BODY, "application/json"))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/weather/Odense"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut core = WeatherCore::mount(config(&server)).expect("mount failed");
        let mut rx = core.subscribe();

        core.submit_city("Odense").await;
        wait_until(&mut rx, |s| s.temperature.is_some()).await;

        let outcome = core.request_delete().await;
        assert_eq!(outcome, DeleteOutcome::Failed);

        let snap = wait_until(&mut rx, |s| s.error.is_some()).await;
        assert_eq!(snap.error.as_deref(), Some("Error deleting weather data."));
        assert!(snap.invariants_hold());

        core.close().await;
    }

    #[tokio::test]
    async fn test_ticker_reload_overwrites_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather/Odense"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(FETCH_BODY, "application/json"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/weather/reload"))
            .and(query_param("city", "Odense"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(RELOAD_BODY, "application/json"))
            .mount(&server)
            .await;

        let mut cfg = config(&server);
        cfg.reload_interval = Duration::from_millis(30);
        let mut core = WeatherCore::mount(cfg).expect("mount failed");
        let mut rx = core.subscribe();

        core.submit_city("Odense").await;
        wait_until(&mut rx, |s| s.temperature == Some(18.0)).await;

        // The restarted ticker picks up the submitted city and its reload
        // result overwrites the fetch result
        let snap = wait_until(&mut rx, |s| s.temperature == Some(19.5)).await;
        assert_eq!(snap.wind_speed, Some(5.0));

        core.close().await;
    }

    #[tokio::test]
    async fn test_ticker_idle_without_city() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather/reload"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(RELOAD_BODY, "application/json"))
            .expect(0)
            .mount(&server)
            .await;

        let mut cfg = config(&server);
        cfg.reload_interval = Duration::from_millis(20);
        let mut core = WeatherCore::mount(cfg).expect("mount failed");

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(core.snapshot(), Snapshot::default());

        core.close().await;
        server.verify().await;
    }

    #[tokio::test]
    async fn test_close_stops_all_updates() {
        let server = MockServer::start().await;
        let mut core = WeatherCore::mount(config(&server)).expect("mount failed");
        let rx = core.subscribe();
        let tx = core.tx.clone();

        core.close().await;
        // Idempotent
        core.close().await;

        // A producer completing after unmount finds a closed queue
        assert!(tx.send(push_reading(20.0, 55.0, 3.0)).is_err());
        assert_eq!(*rx.borrow(), Snapshot::default());
    }
}
