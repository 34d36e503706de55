//! The weather snapshot and its reducer.
//!
//! [`Snapshot`] is the single shared record all three producers (manual fetch,
//! push subscription, periodic reload) converge on. Every mutation goes
//! through [`Snapshot::apply`]; nothing else writes the fields. The policy is
//! last-applied-wins: producers carry no ordering key, so whichever change
//! reaches the reducer last overwrites the metrics.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::Reading;

/// Which producer a change originated from.
///
/// Selects the generic user-facing error message; the underlying cause is
/// never surfaced on the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// User-initiated fetch via `submit_city`
    Fetch,
    /// Periodic reload ticker
    Reload,
    /// Server-pushed subscribe event
    Push,
    /// User-initiated delete
    Delete,
}

impl Source {
    /// The generic error message shown when this producer fails.
    #[must_use]
    pub const fn error_message(self) -> &'static str {
        match self {
            Self::Fetch | Self::Push => "Error fetching weather data.",
            Self::Reload => "Error reloading weather data.",
            Self::Delete => "Error deleting weather data.",
        }
    }
}

/// A single mutation request against the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Record a newly submitted target city
    CitySubmitted(String),
    /// Apply a complete reading from one of the producers
    Observed {
        /// Producer the reading came from
        source: Source,
        /// The reading to apply
        reading: Reading,
    },
    /// A producer failed: clear the metrics, set its generic error message
    Failed(Source),
    /// Successful delete: clear metrics and error, keep the city
    Cleared,
}

/// One labeled row of the derived chart series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartRow {
    /// Display label, including unit
    pub label: &'static str,
    /// Metric value
    pub value: f64,
    /// Display color (hex)
    pub color: &'static str,
}

/// Derived chart series: a fixed-shape table of three labeled rows.
///
/// Present on the snapshot iff a temperature is known.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    /// Temperature, humidity, wind speed rows (fixed order)
    pub rows: [ChartRow; 3],
}

impl ChartSeries {
    fn from_metrics(temperature: f64, humidity: f64, wind_speed: f64) -> Self {
        Self {
            rows: [
                ChartRow {
                    label: "Temperature °C",
                    value: temperature,
                    color: "#ffea00",
                },
                ChartRow {
                    label: "Humidity %",
                    value: humidity,
                    color: "#8798eb",
                },
                ChartRow {
                    label: "Wind Speed m/s",
                    value: wind_speed,
                    color: "#eede90",
                },
            ],
        }
    }
}

/// Current weather state for the active city.
///
/// Resting states are all-or-nothing: after any applied change either all
/// three metrics are `Some` or all three are `None`. An error message and
/// populated metrics never coexist.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    /// Last-submitted target city; empty = no active subscription
    pub city: String,
    /// Temperature in degrees Celsius
    pub temperature: Option<f64>,
    /// Relative humidity in percent
    pub humidity: Option<f64>,
    /// Wind speed in m/s
    pub wind_speed: Option<f64>,
    /// Most recent failure message
    pub error: Option<String>,
    /// Derived chart series; present iff `temperature` is `Some`
    pub chart: Option<ChartSeries>,
    /// When the last successful reading was applied
    pub observed_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Apply one change. This is the only mutation path.
    pub fn apply(&mut self, change: Change) {
        match change {
            Change::CitySubmitted(city) => {
                self.city = city;
            }
            Change::Observed { source, reading } => {
                tracing::debug!(
                    ?source,
                    temperature = reading.temperature,
                    humidity = reading.humidity,
                    wind_speed = reading.wind_speed,
                    "applying reading"
                );
                self.temperature = Some(reading.temperature);
                self.humidity = Some(reading.humidity);
                self.wind_speed = Some(reading.wind_speed);
                self.error = None;
                self.observed_at = Some(Utc::now());
            }
            Change::Failed(source) => {
                tracing::debug!(?source, "applying failure");
                self.clear_metrics();
                self.error = Some(source.error_message().to_string());
            }
            Change::Cleared => {
                self.clear_metrics();
                self.error = None;
            }
        }
        self.recompute_chart();
        debug_assert!(self.invariants_hold());
    }

    fn clear_metrics(&mut self) {
        self.temperature = None;
        self.humidity = None;
        self.wind_speed = None;
        self.observed_at = None;
    }

    /// Recompute the derived chart series from the current metrics.
    fn recompute_chart(&mut self) {
        self.chart = match (self.temperature, self.humidity, self.wind_speed) {
            (Some(t), Some(h), Some(w)) => Some(ChartSeries::from_metrics(t, h, w)),
            _ => None,
        };
    }

    /// The metric fields and chart, as a comparable unit.
    ///
    /// Used by the core to detect when the ticker's dependency set changed.
    #[must_use]
    pub(crate) fn dependency_key(&self) -> (String, Option<f64>, Option<f64>, Option<f64>) {
        (
            self.city.clone(),
            self.temperature,
            self.humidity,
            self.wind_speed,
        )
    }

    /// Check the resting-state invariants.
    #[must_use]
    pub fn invariants_hold(&self) -> bool {
        let populated = [self.temperature, self.humidity, self.wind_speed]
            .iter()
            .filter(|m| m.is_some())
            .count();
        let all_or_nothing = populated == 0 || populated == 3;
        let error_excludes_metrics = self.error.is_none() || populated == 0;
        let chart_tracks_temperature = self.chart.is_some() == self.temperature.is_some();
        all_or_nothing && error_excludes_metrics && chart_tracks_temperature
    }
}
