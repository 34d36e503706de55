//! Weather backend HTTP client.
//!
//! Provides async access to the pull endpoints and the subscribe stream.
//! Uses reqwest with rustls for TLS.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, instrument};

use crate::errors::MeteotailError;
use crate::models::{Reading, WeatherResponse};

/// Default request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// User agent string for API requests.
const USER_AGENT: &str = concat!("meteotail/", env!("CARGO_PKG_VERSION"));

/// Default backend base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Client for the weather backend.
#[derive(Debug)]
pub struct WeatherClient {
    client: Client,
    /// Separate client for the subscribe stream: a whole-request timeout
    /// would cut a long-lived SSE response short, so this one only bounds
    /// connection establishment.
    stream_client: Client,
    base_url: String,
}

impl WeatherClient {
    /// Create a new client against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MeteotailError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        let stream_client = Client::builder()
            .connect_timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            stream_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch current metrics for `city` via `GET /weather/{city}`.
    ///
    /// Callers must not pass an empty city.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the backend answers non-2xx,
    /// or the response cannot be parsed.
    #[instrument(skip(self))]
    pub async fn fetch_by_city(&self, city: &str) -> Result<Reading, MeteotailError> {
        let url = format!("{}/weather/{city}", self.base_url);
        self.get_reading(&url, &[]).await
    }

    /// Fetch current metrics for `city` via the reload endpoint.
    ///
    /// Same response contract as [`fetch_by_city`](Self::fetch_by_city);
    /// used by the reload ticker path.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the backend answers non-2xx,
    /// or the response cannot be parsed.
    #[instrument(skip(self))]
    pub async fn reload_by_city(&self, city: &str) -> Result<Reading, MeteotailError> {
        let url = format!("{}/weather/reload", self.base_url);
        self.get_reading(&url, &[("city", city)]).await
    }

    /// Delete stored metrics for `city` via `DELETE /weather/{city}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the backend answers non-2xx.
    #[instrument(skip(self))]
    pub async fn delete_by_city(&self, city: &str) -> Result<(), MeteotailError> {
        let url = format!("{}/weather/{city}", self.base_url);
        debug!("deleting weather data at {}", url);

        let response = self.client.delete(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MeteotailError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(())
    }

    /// Open the subscribe stream via `GET /weather/subscribe`.
    ///
    /// Returns the raw response; the push listener consumes its byte stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the backend answers non-2xx.
    #[instrument(skip(self))]
    pub async fn subscribe(&self) -> Result<reqwest::Response, MeteotailError> {
        let url = format!("{}/weather/subscribe", self.base_url);
        debug!("opening subscribe stream at {}", url);

        let response = self.stream_client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MeteotailError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(response)
    }

    async fn get_reading(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Reading, MeteotailError> {
        debug!("fetching weather data from {}", url);

        let response = self.client.get(url).query(query).send().await?;

        // Check status before parsing
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MeteotailError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let weather: WeatherResponse = response.json().await?;

        // Validate response values
        weather.validate()?;

        let reading = Reading::from(&weather);
        debug!(
            temperature = reading.temperature,
            humidity = reading.humidity,
            wind_speed = reading.wind_speed,
            "fetched reading"
        );
        Ok(reading)
    }
}
