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

use crate::config::Location;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::error;
use std::fmt;
use std::future::Future;
use std::str::FromStr;

#[derive(Debug)]
pub enum ClientError {
    Internal(reqwest::Error),
    Decode(reqwest::Error),
    InvalidUrl(String),
    Unauthorized(Url),
    Unexpected(StatusCode, Url),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(e) => write!(f, "{}", e),
            Self::Decode(e) => write!(f, "unable to decode response: {}", e),
            Self::InvalidUrl(u) => write!(f, "invalid API URL {}", u),
            Self::Unauthorized(url) => write!(f, "API key rejected for {}", url),
            Self::Unexpected(status, url) => write!(f, "unexpected status {} for {}", status, url),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Internal(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

/// Unit system values are returned in by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Units {
    #[default]
    Metric,
    Imperial,
    Standard,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Imperial => "imperial",
            Self::Standard => "standard",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Units {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "metric" => Ok(Self::Metric),
            "imperial" => Ok(Self::Imperial),
            "standard" => Ok(Self::Standard),
            _ => Err(format!("unknown units {}, expected 'metric', 'imperial', or 'standard'", s)),
        }
    }
}

/// Blocks of a one-call response that can be excluded from the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneCallPart {
    Current,
    Minutely,
    Hourly,
    Daily,
    Alerts,
}

impl OneCallPart {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Minutely => "minutely",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Alerts => "alerts",
        }
    }
}

/// Source of weather observations for a location.
///
/// Implemented by `OpenWeatherClient` for the real API. Each call is independent and
/// returns a freshly fetched observation.
pub trait WeatherProvider: Send + Sync {
    fn current(&self, location: &Location) -> impl Future<Output = Result<Weather, ClientError>> + Send;

    fn forecast(&self, location: &Location) -> impl Future<Output = Result<Forecast, ClientError>> + Send;

    fn one_call(
        &self,
        location: &Location,
        exclude: &[OneCallPart],
    ) -> impl Future<Output = Result<OneCall, ClientError>> + Send;

    fn pollution(&self, location: &Location) -> impl Future<Output = Result<Pollution, ClientError>> + Send;

    fn uv(&self, location: &Location) -> impl Future<Output = Result<Vec<UvRange>, ClientError>> + Send;
}

#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    client: Client,
    base_url: Url,
    api_key: String,
    units: Units,
    lang: String,
}

impl OpenWeatherClient {
    const USER_AGENT: &'static str = "OWM Prometheus Exporter (https://github.com/56quarters/owm_exporter)";
    const JSON_RESPONSE: &'static str = "application/json";
    const DEFAULT_LANG: &'static str = "en";

    pub fn new(client: Client, base_url: &str, api_key: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url).map_err(|_| ClientError::InvalidUrl(base_url.to_owned()))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }

        Ok(OpenWeatherClient {
            client,
            base_url,
            api_key: api_key.to_owned(),
            units: Units::default(),
            lang: Self::DEFAULT_LANG.to_owned(),
        })
    }

    pub fn with_units(mut self, units: Units) -> Self {
        self.units = units;
        self
    }

    pub fn with_lang<S: Into<String>>(mut self, lang: S) -> Self {
        self.lang = lang.into();
        self
    }

    async fn make_request<T>(&self, path: &[&str], location: &Location, extra: &[(&str, String)]) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
    {
        // The query string carries the API key so it is only added to the request, never
        // to the URL that ends up in logs or errors.
        let url = self.endpoint_url(path);
        tracing::debug!(message = "making API request", url = %url, location = %location.name);

        let res = self
            .client
            .get(url.clone())
            .query(&[
                ("lat", location.latitude.to_string()),
                ("lon", location.longitude.to_string()),
                ("units", self.units.as_str().to_owned()),
                ("lang", self.lang.clone()),
                ("appid", self.api_key.clone()),
            ])
            .query(extra)
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .send()
            .await
            .map_err(|e| ClientError::Internal(e.without_url()))?;

        let status = res.status();
        if status.is_success() {
            res.json::<T>().await.map_err(|e| ClientError::Decode(e.without_url()))
        } else if status == StatusCode::UNAUTHORIZED {
            Err(ClientError::Unauthorized(url))
        } else {
            Err(ClientError::Unexpected(status, url))
        }
    }

    fn endpoint_url(&self, path: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        {
            url.path_segments_mut()
                .map(|mut p| {
                    p.pop_if_empty().extend(path);
                })
                .expect("unable to modify API URL path segments");
        }

        url
    }
}

impl WeatherProvider for OpenWeatherClient {
    async fn current(&self, location: &Location) -> Result<Weather, ClientError> {
        self.make_request(&["data", "2.5", "weather"], location, &[]).await
    }

    async fn forecast(&self, location: &Location) -> Result<Forecast, ClientError> {
        self.make_request(&["data", "2.5", "forecast"], location, &[]).await
    }

    async fn one_call(&self, location: &Location, exclude: &[OneCallPart]) -> Result<OneCall, ClientError> {
        let exclude = exclude.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(",");
        let extra = if exclude.is_empty() {
            vec![]
        } else {
            vec![("exclude", exclude)]
        };

        self.make_request(&["data", "3.0", "onecall"], location, &extra).await
    }

    async fn pollution(&self, location: &Location) -> Result<Pollution, ClientError> {
        self.make_request(&["data", "2.5", "air_pollution"], location, &[]).await
    }

    async fn uv(&self, location: &Location) -> Result<Vec<UvRange>, ClientError> {
        self.make_request(&["data", "2.5", "uvi", "range"], location, &[]).await
    }
}

/// Conditions at a single point in time from the current weather or 5 day forecast APIs.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Weather {
    pub dt: Option<i64>,
    pub main: Option<MainConditions>,
    pub visibility: Option<f64>,
    pub wind: Option<Wind>,
    pub clouds: Option<Clouds>,
    pub rain: Option<Precipitation>,
    pub snow: Option<Precipitation>,
    pub pop: Option<f64>,
    pub sys: Option<Sys>,
    #[serde(default)]
    pub weather: Vec<WeatherCondition>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct MainConditions {
    pub temp: Option<f64>,
    pub feels_like: Option<f64>,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    pub pressure: Option<f64>,
    pub humidity: Option<f64>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Wind {
    pub speed: Option<f64>,
    pub deg: Option<f64>,
    pub gust: Option<f64>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Clouds {
    pub all: Option<f64>,
}

/// Rain or snow volume for the last one or three hours, in millimeters.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Precipitation {
    #[serde(rename = "1h")]
    pub one_hour: Option<f64>,
    #[serde(rename = "3h")]
    pub three_hours: Option<f64>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Sys {
    pub sunrise: Option<i64>,
    pub sunset: Option<i64>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct WeatherCondition {
    pub id: Option<i64>,
    pub main: String,
    pub description: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Forecast {
    #[serde(default)]
    pub list: Vec<Weather>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct OneCall {
    pub current: Option<OneCallConditions>,
    #[serde(default)]
    pub minutely: Vec<Minutely>,
    #[serde(default)]
    pub hourly: Vec<OneCallConditions>,
    #[serde(default)]
    pub daily: Vec<Daily>,
}

/// Conditions from the `current` and `hourly` blocks of a one-call response.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct OneCallConditions {
    pub dt: Option<i64>,
    pub sunrise: Option<i64>,
    pub sunset: Option<i64>,
    pub temp: Option<f64>,
    pub feels_like: Option<f64>,
    pub pressure: Option<f64>,
    pub humidity: Option<f64>,
    pub dew_point: Option<f64>,
    pub uvi: Option<f64>,
    pub clouds: Option<f64>,
    pub visibility: Option<f64>,
    pub wind_speed: Option<f64>,
    #[serde(alias = "wind_degree")]
    pub wind_deg: Option<f64>,
    pub wind_gust: Option<f64>,
    pub pop: Option<f64>,
    pub rain: Option<Precipitation>,
    pub snow: Option<Precipitation>,
    #[serde(default)]
    pub weather: Vec<WeatherCondition>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Minutely {
    pub dt: Option<i64>,
    pub precipitation: Option<f64>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Daily {
    pub dt: Option<i64>,
    pub sunrise: Option<i64>,
    pub sunset: Option<i64>,
    pub moonrise: Option<i64>,
    pub moonset: Option<i64>,
    pub moon_phase: Option<f64>,
    pub temp: Option<DailyTemperature>,
    pub pressure: Option<f64>,
    pub humidity: Option<f64>,
    pub dew_point: Option<f64>,
    pub wind_speed: Option<f64>,
    #[serde(alias = "wind_degree")]
    pub wind_deg: Option<f64>,
    pub wind_gust: Option<f64>,
    pub clouds: Option<f64>,
    pub pop: Option<f64>,
    pub rain: Option<f64>,
    pub snow: Option<f64>,
    pub uvi: Option<f64>,
    #[serde(default)]
    pub weather: Vec<WeatherCondition>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct DailyTemperature {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Pollution {
    #[serde(default)]
    pub list: Vec<PollutionSample>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct PollutionSample {
    pub dt: Option<i64>,
    pub main: Option<AirQuality>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AirQuality {
    pub aqi: Option<f64>,
}

/// Expected range of the UV index over a window of time.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UvRange {
    pub dt: Option<i64>,
    #[serde(alias = "uvi_low", alias = "min")]
    pub low: f64,
    #[serde(alias = "uvi_high", alias = "max")]
    pub high: f64,
}

#[cfg(test)]
mod test {
    use super::{ClientError, OneCallPart, OpenWeatherClient, Units, WeatherProvider};
    use crate::config::Location;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use reqwest::Client;
    use std::collections::HashMap;
    use std::net::TcpListener;

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = axum::Server::from_tcp(listener).unwrap().serve(app.into_make_service());
        tokio::spawn(server);
        format!("http://{}/", addr)
    }

    fn location() -> Location {
        Location::new("PDX", 45.5, -122.6)
    }

    #[tokio::test]
    async fn test_current_sends_credentials_and_decodes() {
        let app = Router::new().route(
            "/data/2.5/weather",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(Some("secret"), q.get("appid").map(String::as_str));
                assert_eq!(Some("45.5"), q.get("lat").map(String::as_str));
                assert_eq!(Some("-122.6"), q.get("lon").map(String::as_str));
                assert_eq!(Some("imperial"), q.get("units").map(String::as_str));
                Json(serde_json::json!({
                    "dt": 1700000000,
                    "main": {"temp": 59.4, "humidity": 80},
                    "sys": {"sunrise": 1699990000, "sunset": 1700030000},
                    "weather": [{"id": 500, "main": "Rain", "description": "light rain"}]
                }))
            }),
        );

        let base = serve(app).await;
        let client = OpenWeatherClient::new(Client::new(), &base, "secret")
            .unwrap()
            .with_units(Units::Imperial);
        let weather = client.current(&location()).await.unwrap();

        assert_eq!(Some(1700000000), weather.dt);
        assert_eq!(Some(59.4), weather.main.as_ref().and_then(|m| m.temp));
        assert_eq!(None, weather.main.as_ref().and_then(|m| m.pressure));
        assert_eq!("light rain", weather.weather[0].description);
    }

    #[tokio::test]
    async fn test_one_call_exclude() {
        let app = Router::new().route(
            "/prefix/data/3.0/onecall",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(Some("minutely,hourly"), q.get("exclude").map(String::as_str));
                Json(serde_json::json!({"current": {"dt": 1700000000, "temp": 15.2}}))
            }),
        );

        let base = serve(app).await;
        let client = OpenWeatherClient::new(Client::new(), &format!("{}prefix/", base), "secret").unwrap();
        let res = client
            .one_call(&location(), &[OneCallPart::Minutely, OneCallPart::Hourly])
            .await
            .unwrap();

        assert_eq!(Some(15.2), res.current.and_then(|c| c.temp));
        assert!(res.hourly.is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized() {
        let app = Router::new().route("/data/2.5/air_pollution", get(|| async { StatusCode::UNAUTHORIZED }));

        let base = serve(app).await;
        let client = OpenWeatherClient::new(Client::new(), &base, "bad").unwrap();
        let err = client.pollution(&location()).await.unwrap_err();

        assert!(matches!(err, ClientError::Unauthorized(_)));
        assert!(!err.to_string().contains("bad"));
    }

    #[tokio::test]
    async fn test_unexpected_status_hides_api_key() {
        let app = Router::new().route("/data/2.5/forecast", get(|| async { StatusCode::BAD_GATEWAY }));

        let base = serve(app).await;
        let client = OpenWeatherClient::new(Client::new(), &base, "secret").unwrap();
        let err = client.forecast(&location()).await.unwrap_err();

        assert!(matches!(err, ClientError::Unexpected(s, _) if s == StatusCode::BAD_GATEWAY));
        assert!(!err.to_string().contains("secret"));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let app = Router::new().route("/data/2.5/uvi/range", get(|| async { "{not json" }));

        let base = serve(app).await;
        let client = OpenWeatherClient::new(Client::new(), &base, "secret").unwrap();
        let err = client.uv(&location()).await.unwrap_err();

        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            OpenWeatherClient::new(Client::new(), "not a url", "secret"),
            Err(ClientError::InvalidUrl(_))
        ));
        assert!(matches!(
            OpenWeatherClient::new(Client::new(), "mailto:someone@example.com", "secret"),
            Err(ClientError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_units_from_str() {
        assert_eq!(Units::Metric, "metric".parse().unwrap());
        assert_eq!(Units::Imperial, "IMPERIAL".parse().unwrap());
        assert!("kelvin".parse::<Units>().is_err());
    }
}
