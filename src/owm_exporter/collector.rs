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

use crate::client::{ClientError, OneCallPart, WeatherProvider};
use crate::config::{Location, Locations};
use crate::metrics::{
    MetricDescriptor, MetricPoint, POLLUTION_CURRENT_AQI, UV_INDEX_CURRENT_HIGH, UV_INDEX_CURRENT_LOW, WEATHER_CURRENT,
    WEATHER_EPOCH, WEATHER_FORECAST_ONE_CALL, WEATHER_FORECAST_STEP, WEATHER_SUMMARY,
};
use crate::transform;
use futures::stream::{self, StreamExt};
use std::error;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Which API is used for forecasts, this determines the labels of `weather_forecast`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForecastMode {
    /// 5 day forecast in 3 hour steps, labeled with `inhours`.
    #[default]
    Step,
    /// Minutely, hourly, and daily forecasts from the one-call API, labeled with `dt` and `interval`.
    OneCall,
}

impl fmt::Display for ForecastMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step => f.write_str("step"),
            Self::OneCall => f.write_str("one-call"),
        }
    }
}

impl FromStr for ForecastMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "step" => Ok(Self::Step),
            "one-call" | "onecall" => Ok(Self::OneCall),
            _ => Err(format!("unknown forecast mode {}, expected 'step' or 'one-call'", s)),
        }
    }
}

/// Kind of data fetched for each location during a scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Current,
    Forecast,
    Pollution,
    Uv,
}

impl Domain {
    const ALL: &'static [Domain] = &[Domain::Current, Domain::Forecast, Domain::Pollution, Domain::Uv];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Forecast => "forecast",
            Self::Pollution => "pollution",
            Self::Uv => "uv",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum CollectError {
    Fetch(ClientError),
    Empty,
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(e) => write!(f, "{}", e),
            Self::Empty => write!(f, "no results returned"),
        }
    }
}

impl error::Error for CollectError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Fetch(e) => Some(e),
            Self::Empty => None,
        }
    }
}

impl From<ClientError> for CollectError {
    fn from(e: ClientError) -> Self {
        Self::Fetch(e)
    }
}

/// Fetches weather data for every location on demand and converts it to metric points.
///
/// Nothing is cached between calls to `collect()`: each scrape makes a new request per location
/// for current conditions, forecast, air pollution, and UV index. A failure for one of these only
/// removes the points for that location and kind of data from the result.
#[derive(Debug)]
pub struct Collector<P> {
    provider: P,
    locations: Locations,
    mode: ForecastMode,
    timeout: Duration,
    concurrency: usize,
}

impl<P> Collector<P>
where
    P: WeatherProvider,
{
    pub fn new(provider: P, locations: Locations) -> Self {
        Collector {
            provider,
            locations,
            mode: ForecastMode::default(),
            timeout: DEFAULT_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_forecast_mode(mut self, mode: ForecastMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the deadline for an entire call to `collect()`, covering all locations.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum number of API requests in flight at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Every metric this collector may emit. Fixed for the lifetime of the collector.
    pub fn describe(&self) -> Vec<MetricDescriptor> {
        let forecast = match self.mode {
            ForecastMode::Step => WEATHER_FORECAST_STEP,
            ForecastMode::OneCall => WEATHER_FORECAST_ONE_CALL,
        };

        vec![
            WEATHER_CURRENT,
            WEATHER_EPOCH,
            WEATHER_SUMMARY,
            forecast,
            POLLUTION_CURRENT_AQI,
            UV_INDEX_CURRENT_LOW,
            UV_INDEX_CURRENT_HIGH,
        ]
    }

    /// Fetch all data for all locations and return the resulting points.
    ///
    /// If the timeout expires, requests still in flight are cancelled and the points gathered
    /// so far are returned. Points are in no particular order.
    pub async fn collect(&self) -> Vec<MetricPoint> {
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.timeout;
        tracing::debug!(message = "collecting weather data", locations = self.locations.len(), mode = %self.mode);

        let mut tasks = Vec::with_capacity(self.locations.len() * Domain::ALL.len());
        for loc in self.locations.locations() {
            for domain in Domain::ALL {
                tasks.push(self.collect_domain(loc, *domain));
            }
        }

        let mut results = std::pin::pin!(stream::iter(tasks).buffer_unordered(self.concurrency));
        let mut points = Vec::new();
        let mut completed = 0;

        loop {
            match tokio::time::timeout_at(deadline, results.next()).await {
                Ok(Some(batch)) => {
                    completed += 1;
                    points.extend(batch);
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        message = "timeout collecting weather data, returning partial results",
                        timeout_millis = self.timeout.as_millis() as u64,
                        completed = completed,
                        expected = self.locations.len() * Domain::ALL.len(),
                        num_points = points.len(),
                    );
                    break;
                }
            }
        }

        tracing::debug!(
            message = "collected weather data",
            num_points = points.len(),
            elapsed_millis = start.elapsed().as_millis() as u64,
        );

        points
    }

    async fn collect_domain(&self, location: &Location, domain: Domain) -> Vec<MetricPoint> {
        let res = match domain {
            Domain::Current => self.current(location).await,
            Domain::Forecast => self.forecast(location).await,
            Domain::Pollution => self.pollution(location).await,
            Domain::Uv => self.uv(location).await,
        };

        match res {
            Ok(points) => {
                tracing::trace!(message = "fetched weather data", location = %location.name, domain = %domain, num_points = points.len());
                points
            }
            Err(CollectError::Empty) => {
                tracing::debug!(message = "no weather data returned", location = %location.name, domain = %domain);
                Vec::new()
            }
            Err(e) => {
                tracing::error!(message = "failed to fetch weather data", location = %location.name, domain = %domain, error = %e);
                Vec::new()
            }
        }
    }

    async fn current(&self, location: &Location) -> Result<Vec<MetricPoint>, CollectError> {
        match self.mode {
            ForecastMode::Step => {
                let weather = self.provider.current(location).await?;
                Ok(transform::current_points(&location.name, &weather))
            }
            ForecastMode::OneCall => {
                let exclude = [
                    OneCallPart::Minutely,
                    OneCallPart::Hourly,
                    OneCallPart::Daily,
                    OneCallPart::Alerts,
                ];
                let res = self.provider.one_call(location, &exclude).await?;
                let current = res.current.ok_or(CollectError::Empty)?;
                Ok(transform::one_call_current_points(&location.name, &current))
            }
        }
    }

    async fn forecast(&self, location: &Location) -> Result<Vec<MetricPoint>, CollectError> {
        match self.mode {
            ForecastMode::Step => {
                let forecast = self.provider.forecast(location).await?;
                Ok(transform::step_forecast_points(&location.name, &forecast))
            }
            ForecastMode::OneCall => {
                let exclude = [OneCallPart::Current, OneCallPart::Alerts];
                let res = self.provider.one_call(location, &exclude).await?;
                Ok(transform::one_call_forecast_points(&location.name, &res))
            }
        }
    }

    async fn pollution(&self, location: &Location) -> Result<Vec<MetricPoint>, CollectError> {
        let pollution = self.provider.pollution(location).await?;
        Ok(transform::pollution_points(&location.name, &pollution))
    }

    async fn uv(&self, location: &Location) -> Result<Vec<MetricPoint>, CollectError> {
        let ranges = self.provider.uv(location).await?;
        transform::uv_points(&location.name, &ranges).ok_or(CollectError::Empty)
    }
}
