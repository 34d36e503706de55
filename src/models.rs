//! Data models for the weather backend wire contract.
//!
//! Two response shapes exist: the nested `{main:{temp,humidity},wind:{speed}}`
//! object returned by the pull endpoints, and the flat
//! `{temperature,humidity,windSpeed}` object carried by subscribe events.
//! Both normalize into [`Reading`].

use serde::{Deserialize, Serialize};

use crate::errors::MeteotailError;

/// A complete set of weather metrics for one city.
///
/// This is the normalized unit every producer delivers: a reading is always
/// whole — there is no partial reading anywhere in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    /// Temperature in degrees Celsius
    pub temperature: f64,
    /// Relative humidity in percent
    pub humidity: f64,
    /// Wind speed in m/s
    pub wind_speed: f64,
}

/// Pull-endpoint response body.
///
/// Shape follows the OpenWeatherMap subset the backend relays.
#[derive(Debug, Clone, Deserialize)]
pub struct WeatherResponse {
    /// Temperature and humidity block
    pub main: MainBlock,
    /// Wind block
    pub wind: WindBlock,
}

/// The `main` object of a pull response.
#[derive(Debug, Clone, Deserialize)]
pub struct MainBlock {
    /// Temperature in degrees Celsius
    pub temp: f64,
    /// Relative humidity in percent
    pub humidity: f64,
}

/// The `wind` object of a pull response.
#[derive(Debug, Clone, Deserialize)]
pub struct WindBlock {
    /// Wind speed in m/s
    pub speed: f64,
}

impl WeatherResponse {
    /// Validate the response values.
    pub fn validate(&self) -> Result<(), MeteotailError> {
        if !self.main.temp.is_finite() {
            return Err(MeteotailError::InvalidResponse(format!(
                "non-finite temperature: {}",
                self.main.temp
            )));
        }
        if !self.main.humidity.is_finite() || !self.wind.speed.is_finite() {
            return Err(MeteotailError::InvalidResponse(
                "non-finite humidity or wind speed".into(),
            ));
        }
        Ok(())
    }
}

impl From<&WeatherResponse> for Reading {
    fn from(r: &WeatherResponse) -> Self {
        Self {
            temperature: r.main.temp,
            humidity: r.main.humidity,
            wind_speed: r.wind.speed,
        }
    }
}

/// Payload of one subscribe-stream event.
#[derive(Debug, Clone, Deserialize)]
pub struct PushPayload {
    /// Temperature in degrees Celsius
    pub temperature: f64,
    /// Relative humidity in percent
    pub humidity: f64,
    /// Wind speed in m/s
    #[serde(rename = "windSpeed")]
    pub wind_speed: f64,
}

impl From<&PushPayload> for Reading {
    fn from(p: &PushPayload) -> Self {
        Self {
            temperature: p.temperature,
            humidity: p.humidity,
            wind_speed: p.wind_speed,
        }
    }
}
