//! Meteotail - live single-city weather state.
//!
//! Merges three asynchronous producers — an on-demand pull fetch, a
//! server-pushed SSE subscription, and a periodic fallback reload — into one
//! coherent, race-free weather snapshot for a presentation layer to consume.
//!
//! The entry point is [`WeatherCore`]: mount it, submit a city, read or watch
//! the [`Snapshot`], request deletes, and close it on the way out.
//!
//! ```no_run
//! use meteotail::{Config, WeatherCore};
//!
//! # async fn demo() -> Result<(), meteotail::MeteotailError> {
//! let mut core = WeatherCore::mount(Config::default())?;
//! core.submit_city("Odense").await;
//! let snapshot = core.snapshot();
//! println!("{:?} {:?}", snapshot.temperature, snapshot.error);
//! core.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod core;
pub mod errors;
pub mod listener;
pub mod models;
pub mod snapshot;
pub mod ticker;

pub use client::WeatherClient;
pub use self::core::{Config, DeleteOutcome, WeatherCore};
pub use errors::MeteotailError;
pub use models::Reading;
pub use snapshot::{Change, ChartRow, ChartSeries, Snapshot, Source};
