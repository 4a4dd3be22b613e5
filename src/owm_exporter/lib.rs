// owm_exporter - Prometheus metrics exporter for OpenWeatherMap
//
// Copyright 2023 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

//! Prometheus metrics exporter for OpenWeatherMap
//!
//! ## Features
//!
//! `owm_exporter` fetches current weather, forecasts, air pollution, and UV index information for a
//! list of locations using the [OpenWeatherMap] API and emits it as Prometheus metrics. Data is
//! fetched when Prometheus scrapes the exporter, not in the background, so each scrape results in
//! several API requests per location. The following metrics are emitted when available.
//!
//! * `weather_current{location=$LOCATION, condition=$CONDITION}` - Current conditions (`temp`,
//!   `humidity`, `pressure`, `wind_speed`, etc.).
//! * `weather_epoch{location=$LOCATION, event=$EVENT}` - UNIX timestamp of today's `sunrise` and `sunset`.
//! * `weather_summary{location=$LOCATION, main=$MAIN, description=$DESCRIPTION}` - Description of the
//!   current weather, always `1`.
//! * `weather_forecast{location=$LOCATION, condition=$CONDITION, inhours=$HOURS}` - Forecast conditions
//!   every three hours for the next five days.
//! * `weather_forecast{location=$LOCATION, condition=$CONDITION, dt=$TIMESTAMP, interval=$INTERVAL}` -
//!   Forecast conditions by minute, hour, and day when using `--forecast-mode one-call`.
//! * `pollution_current_aqi{location=$LOCATION}` - Air quality index (1-5).
//! * `uv_index_current_low{location=$LOCATION}` - Low end of the current UV index range.
//! * `uv_index_current_high{location=$LOCATION}` - High end of the current UV index range.
//!
//! If a request for some kind of data fails for a location, those metrics are left out of the scrape
//! and everything else is still exported.
//!
//! [OpenWeatherMap]: https://openweathermap.org/api
//!
//! ## Build
//!
//! `owm_exporter` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! git clone git@github.com:56quarters/owm_exporter.git && cd owm_exporter
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! ### Configuration
//!
//! Locations to fetch weather for are given in a YAML file along with your OpenWeatherMap API
//! key. The API key and listen address may also be set with the `--api-key` and `--bind` flags.
//!
//! ```yaml
//! api_key: YOUR_API_KEY
//! listen_addr: ":9101"
//! locations:
//!   - name: PDX
//!     latitude: 45.5
//!     longitude: -122.6
//!   - name: BOS
//!     latitude: 42.36
//!     longitude: -71.06
//! ```
//!
//! Location names must be unique since they are used as the `location` label.
//!
//! ```text
//! ./owm_exporter --config owm_exporter.yaml
//! ```
//!
//! ### Prometheus
//!
//! Prometheus metrics are exposed on port `9101` at `/metrics`. Since every scrape results in
//! requests to the OpenWeatherMap API, use a scrape interval that keeps you under the rate limit
//! of your API plan. Scrapes take up to `--scrape-timeout-secs` (15 by default) so the scrape
//! timeout of Prometheus should be at least that long.
//!
//! ```yaml
//! scrape_configs:
//! - job_name: owm_exporter
//!   scrape_interval: 5m
//!   scrape_timeout: 20s
//!   static_configs:
//!   - targets: ['example:9101']
//! ```
//!

pub mod client;
pub mod collector;
pub mod config;
pub mod http;
pub mod metrics;
pub mod transform;
