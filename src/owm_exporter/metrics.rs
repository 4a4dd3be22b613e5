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

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeMetric, MetricEncoder};
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::info::Info;
use prometheus_client::metrics::{MetricType, TypedMetric};
use prometheus_client::registry::Registry;
use std::collections::{HashMap, HashSet};
use std::error;
use std::fmt;
use std::sync::atomic::AtomicU64;
use tokio::sync::Mutex;

pub const LABEL_LOCATION: &str = "location";
pub const LABEL_CONDITION: &str = "condition";
pub const LABEL_EVENT: &str = "event";
pub const LABEL_MAIN: &str = "main";
pub const LABEL_DESCRIPTION: &str = "description";
pub const LABEL_IN_HOURS: &str = "inhours";
pub const LABEL_DT: &str = "dt";
pub const LABEL_INTERVAL: &str = "interval";

/// Content type of the text exposition format produced by `MetricsRegistry::render`.
pub const TEXT_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

pub const WEATHER_CURRENT: MetricDescriptor = MetricDescriptor::gauge(
    "weather_current",
    "Current weather conditions",
    &[LABEL_LOCATION, LABEL_CONDITION],
);

pub const WEATHER_EPOCH: MetricDescriptor = MetricDescriptor::counter(
    "weather_epoch",
    "Weather event time as a UNIX timestamp (sunrise|sunset)",
    &[LABEL_LOCATION, LABEL_EVENT],
);

pub const WEATHER_SUMMARY: MetricDescriptor = MetricDescriptor::gauge(
    "weather_summary",
    "Weather condition description",
    &[LABEL_LOCATION, LABEL_MAIN, LABEL_DESCRIPTION],
);

pub const WEATHER_FORECAST_STEP: MetricDescriptor = MetricDescriptor::gauge(
    "weather_forecast",
    "Forecast weather conditions, by hours from now",
    &[LABEL_LOCATION, LABEL_CONDITION, LABEL_IN_HOURS],
);

pub const WEATHER_FORECAST_ONE_CALL: MetricDescriptor = MetricDescriptor::gauge(
    "weather_forecast",
    "Forecast weather conditions, by UNIX timestamp and interval (minute|hour|day)",
    &[LABEL_LOCATION, LABEL_CONDITION, LABEL_DT, LABEL_INTERVAL],
);

pub const POLLUTION_CURRENT_AQI: MetricDescriptor = MetricDescriptor::gauge(
    "pollution_current_aqi",
    "Current air pollution (AQI)",
    &[LABEL_LOCATION],
);

pub const UV_INDEX_CURRENT_LOW: MetricDescriptor =
    MetricDescriptor::gauge("uv_index_current_low", "Current UV index, low end of range", &[LABEL_LOCATION]);

pub const UV_INDEX_CURRENT_HIGH: MetricDescriptor =
    MetricDescriptor::gauge("uv_index_current_high", "Current UV index, high end of range", &[LABEL_LOCATION]);

#[derive(Debug)]
pub enum RegistryError {
    Duplicate(&'static str),
    Unregistered(&'static str),
    LabelMismatch(&'static str),
    Encode(fmt::Error),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate(n) => write!(f, "metric {} registered more than once", n),
            Self::Unregistered(n) => write!(f, "metric {} was never registered", n),
            Self::LabelMismatch(n) => write!(f, "point for {} does not match its registered labels or type", n),
            Self::Encode(e) => write!(f, "unable to encode metrics: {}", e),
        }
    }
}

impl error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Encode(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

/// Static declaration of a metric: name, help text, type, and label names.
///
/// Every point for a metric is built through its descriptor so that each point carries
/// exactly the declared labels, in the declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
    pub labels: &'static [&'static str],
}

impl MetricDescriptor {
    pub const fn gauge(name: &'static str, help: &'static str, labels: &'static [&'static str]) -> Self {
        MetricDescriptor {
            name,
            help,
            kind: MetricKind::Gauge,
            labels,
        }
    }

    pub const fn counter(name: &'static str, help: &'static str, labels: &'static [&'static str]) -> Self {
        MetricDescriptor {
            name,
            help,
            kind: MetricKind::Counter,
            labels,
        }
    }

    /// Create a point for this metric with label values in the same order as the declared labels.
    ///
    /// # Panics
    ///
    /// If the number of values differs from the number of declared labels.
    pub fn point(&self, values: &[&str], value: f64) -> MetricPoint {
        assert_eq!(
            self.labels.len(),
            values.len(),
            "label values for {} must match labels {:?}",
            self.name,
            self.labels
        );

        MetricPoint {
            name: self.name,
            kind: self.kind,
            labels: self
                .labels
                .iter()
                .zip(values)
                .map(|(k, v)| (*k, (*v).to_owned()))
                .collect(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub name: &'static str,
    pub kind: MetricKind,
    pub labels: Vec<(&'static str, String)>,
    pub value: f64,
}

impl MetricPoint {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.iter().find(|(k, _)| *k == name).map(|(_, v)| v.as_str())
    }
}

type Labels = Vec<(String, String)>;

/// Escape a label value for the text exposition format.
fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

/// Counter typed metric that holds the last value set on it.
///
/// Samples are written with the bare family name (`weather_epoch{...}`) rather than
/// with a `_total` suffix.
#[derive(Debug, Clone, Default)]
struct ReplacedCounter {
    value: Gauge<f64, AtomicU64>,
}

impl ReplacedCounter {
    fn set(&self, v: f64) {
        self.value.set(v);
    }
}

impl TypedMetric for ReplacedCounter {
    const TYPE: MetricType = MetricType::Counter;
}

impl EncodeMetric for ReplacedCounter {
    fn encode(&self, mut encoder: MetricEncoder) -> Result<(), fmt::Error> {
        encoder.encode_gauge(&self.value.get())
    }

    fn metric_type(&self) -> MetricType {
        Self::TYPE
    }
}

#[derive(Debug)]
enum Series {
    Gauge(Family<Labels, Gauge<f64, AtomicU64>>),
    Counter(Family<Labels, ReplacedCounter>),
}

impl Series {
    fn clear(&self) {
        match self {
            Self::Gauge(f) => f.clear(),
            Self::Counter(f) => f.clear(),
        }
    }

    fn set(&self, labels: &Labels, value: f64) {
        match self {
            Self::Gauge(f) => {
                f.get_or_create(labels).set(value);
            }
            Self::Counter(f) => {
                f.get_or_create(labels).set(value);
            }
        }
    }
}

/// Holder for every metric family the exporter can emit.
///
/// Created once at startup from the descriptors of a collector and shared with the HTTP
/// handler. Each call to `render` replaces all values with the points of a single scrape
/// so series that were not collected in that scrape are not exposed.
#[derive(Debug)]
pub struct MetricsRegistry {
    registry: Registry,
    series: HashMap<&'static str, (MetricDescriptor, Series)>,
    lock: Mutex<()>,
}

impl MetricsRegistry {
    const BUILD_INFO: &'static str = "owm_exporter_build";

    pub fn new(descriptors: &[MetricDescriptor]) -> Result<Self, RegistryError> {
        let mut registry = Registry::default();
        let mut series = HashMap::with_capacity(descriptors.len());

        registry.register(
            Self::BUILD_INFO,
            "owm_exporter build information",
            Info::new(vec![("version".to_owned(), env!("CARGO_PKG_VERSION").to_owned())]),
        );

        for desc in descriptors {
            if desc.name == Self::BUILD_INFO || series.contains_key(desc.name) {
                return Err(RegistryError::Duplicate(desc.name));
            }

            let s = match desc.kind {
                MetricKind::Gauge => {
                    let family = Family::<Labels, Gauge<f64, AtomicU64>>::default();
                    registry.register(desc.name, desc.help, family.clone());
                    Series::Gauge(family)
                }
                MetricKind::Counter => {
                    let family = Family::<Labels, ReplacedCounter>::default();
                    registry.register(desc.name, desc.help, family.clone());
                    Series::Counter(family)
                }
            };

            series.insert(desc.name, (*desc, s));
        }

        Ok(MetricsRegistry {
            registry,
            series,
            lock: Mutex::new(()),
        })
    }

    /// Replace all metric values with the given points and encode them in the text format.
    ///
    /// Points that share a name and label values replace each other, the last one wins.
    pub async fn render(&self, points: &[MetricPoint]) -> Result<String, RegistryError> {
        let _guard = self.lock.lock().await;

        for (_, s) in self.series.values() {
            s.clear();
        }

        let mut seen = HashSet::with_capacity(points.len());
        let mut duplicates = 0;

        for point in points {
            let (desc, s) = self
                .series
                .get(point.name)
                .ok_or(RegistryError::Unregistered(point.name))?;

            if desc.kind != point.kind || !desc.labels.iter().eq(point.labels.iter().map(|(k, _)| k)) {
                return Err(RegistryError::LabelMismatch(point.name));
            }

            let labels: Labels = point
                .labels
                .iter()
                .map(|(k, v)| ((*k).to_owned(), escape_label_value(v)))
                .collect();

            if !seen.insert((point.name, labels.clone())) {
                duplicates += 1;
            }

            s.set(&labels, point.value);
        }

        if duplicates > 0 {
            tracing::debug!(message = "replaced duplicate metric points", duplicates = duplicates);
        }

        let mut buf = String::new();
        encode(&mut buf, &self.registry).map_err(RegistryError::Encode)?;
        Ok(buf)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::{
        MetricDescriptor, MetricKind, MetricPoint, MetricsRegistry, RegistryError, POLLUTION_CURRENT_AQI,
        WEATHER_CURRENT, WEATHER_EPOCH, WEATHER_FORECAST_ONE_CALL, WEATHER_FORECAST_STEP, WEATHER_SUMMARY,
    };
    use std::collections::HashMap;

    pub(crate) type Triple = (String, Vec<(String, String)>, f64);

    /// Parse exposition text back into (name, labels, value) triples. Label values are
    /// unescaped and the build info metric is skipped.
    pub(crate) fn parse(text: &str) -> Vec<Triple> {
        let mut types = HashMap::new();
        let mut out = Vec::new();

        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("# TYPE ") {
                let mut parts = rest.split(' ');
                let name = parts.next().unwrap().to_owned();
                let kind = parts.next().unwrap().to_owned();
                types.insert(name, kind);
                continue;
            }
            if line.starts_with('#') || line.is_empty() {
                continue;
            }

            let (series, value) = line.rsplit_once(' ').unwrap();
            let (name, labels) = match series.split_once('{') {
                Some((n, l)) => (n, parse_labels(l.strip_suffix('}').unwrap())),
                None => (series, vec![]),
            };

            if types.get(name).map(String::as_str) == Some("info") || name.ends_with("_info") {
                continue;
            }

            out.push((name.to_owned(), labels, value.parse().unwrap()));
        }

        out
    }

    fn parse_labels(s: &str) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let mut rest = s;

        while let Some((key, after)) = rest.split_once("=\"") {
            let mut value = String::new();
            let mut chars = after.char_indices();
            let mut end = after.len();

            while let Some((i, c)) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some((_, 'n')) => value.push('\n'),
                        Some((_, e)) => value.push(e),
                        None => break,
                    },
                    '"' => {
                        end = i + 1;
                        break;
                    }
                    _ => value.push(c),
                }
            }

            out.push((key.trim_start_matches(',').to_owned(), value));
            rest = &after[end..];
        }

        out
    }

    pub(crate) fn triples(points: &[MetricPoint]) -> Vec<Triple> {
        let mut out: Vec<Triple> = points
            .iter()
            .map(|p| {
                (
                    p.name.to_owned(),
                    p.labels.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect(),
                    p.value,
                )
            })
            .collect();
        sort(&mut out);
        out
    }

    pub(crate) fn sort(triples: &mut [Triple]) {
        triples.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
    }

    fn registry() -> MetricsRegistry {
        MetricsRegistry::new(&[
            WEATHER_CURRENT,
            WEATHER_EPOCH,
            WEATHER_SUMMARY,
            WEATHER_FORECAST_STEP,
            POLLUTION_CURRENT_AQI,
        ])
        .unwrap()
    }

    #[test]
    fn test_point_labels_in_declared_order() {
        let p = WEATHER_CURRENT.point(&["PDX", "temp"], 15.2);
        assert_eq!(
            vec![("location", "PDX".to_owned()), ("condition", "temp".to_owned())],
            p.labels
        );
        assert_eq!(Some("temp"), p.label("condition"));
        assert_eq!(None, p.label("inhours"));
        assert_eq!(MetricKind::Gauge, p.kind);
    }

    #[test]
    #[should_panic]
    fn test_point_wrong_label_count() {
        WEATHER_CURRENT.point(&["PDX"], 1.0);
    }

    #[test]
    fn test_new_duplicate_name() {
        let res = MetricsRegistry::new(&[WEATHER_FORECAST_STEP, WEATHER_FORECAST_ONE_CALL]);
        assert!(matches!(res, Err(RegistryError::Duplicate("weather_forecast"))));
    }

    #[tokio::test]
    async fn test_render_round_trip() {
        let points = vec![
            WEATHER_CURRENT.point(&["PDX", "temp"], 15.2),
            WEATHER_CURRENT.point(&["PDX", "humidity"], 80.0),
            WEATHER_EPOCH.point(&["PDX", "sunrise"], 1699990000.0),
            WEATHER_SUMMARY.point(&["PDX", "Rain", "light rain"], 1.0),
            WEATHER_FORECAST_STEP.point(&["BOS", "temp", "3"], -2.5),
            POLLUTION_CURRENT_AQI.point(&["BOS"], 2.0),
        ];

        let text = registry().render(&points).await.unwrap();
        let mut parsed = parse(&text);
        sort(&mut parsed);

        assert_eq!(triples(&points), parsed);
        assert!(text.contains("# HELP weather_current Current weather conditions"));
        assert!(text.contains("# TYPE weather_epoch counter"));
        assert!(text.contains("owm_exporter_build_info"));
    }

    #[tokio::test]
    async fn test_render_counter_sample_name() {
        let text = registry()
            .render(&[WEATHER_EPOCH.point(&["PDX", "sunrise"], 1699990000.0)])
            .await
            .unwrap();

        assert!(text.contains("weather_epoch{location=\"PDX\",event=\"sunrise\"} 1699990000"));
        assert!(!text.contains("weather_epoch_total"));
    }

    #[tokio::test]
    async fn test_render_escapes_label_values() {
        let points = vec![
            WEATHER_SUMMARY.point(&["PDX", "Rain", "say \"hi\" \\ x"], 1.0),
            WEATHER_CURRENT.point(&["North\nShore", "temp"], 3.0),
        ];

        let text = registry().render(&points).await.unwrap();
        let mut parsed = parse(&text);
        sort(&mut parsed);

        assert!(text.contains(r#"description="say \"hi\" \\ x""#));
        assert!(text.contains(r#"location="North\nShore""#));
        assert_eq!(triples(&points), parsed);
    }

    #[tokio::test]
    async fn test_render_replaces_previous_scrape() {
        let reg = registry();
        reg.render(&[POLLUTION_CURRENT_AQI.point(&["PDX"], 3.0)]).await.unwrap();
        let text = reg.render(&[WEATHER_CURRENT.point(&["BOS", "temp"], 1.0)]).await.unwrap();
        let parsed = parse(&text);

        assert_eq!(1, parsed.len());
        assert_eq!("weather_current", parsed[0].0);
        // Families without points still describe themselves
        assert!(text.contains("# TYPE pollution_current_aqi gauge"));
    }

    #[tokio::test]
    async fn test_render_duplicates_last_wins() {
        let points = vec![
            POLLUTION_CURRENT_AQI.point(&["PDX"], 2.0),
            POLLUTION_CURRENT_AQI.point(&["PDX"], 4.0),
            WEATHER_EPOCH.point(&["PDX", "sunset"], 100.0),
            WEATHER_EPOCH.point(&["PDX", "sunset"], 50.0),
        ];

        let mut parsed = parse(&registry().render(&points).await.unwrap());
        sort(&mut parsed);

        assert_eq!(2, parsed.len());
        assert_eq!(4.0, parsed[0].2);
        assert_eq!(50.0, parsed[1].2);
    }

    #[tokio::test]
    async fn test_render_unregistered() {
        let desc = MetricDescriptor::gauge("something_else", "Not registered", &["location"]);
        let res = registry().render(&[desc.point(&["PDX"], 1.0)]).await;
        assert!(matches!(res, Err(RegistryError::Unregistered("something_else"))));
    }

    #[tokio::test]
    async fn test_render_label_mismatch() {
        let res = registry()
            .render(&[WEATHER_FORECAST_ONE_CALL.point(&["PDX", "temp", "1700000000", "hour"], 1.0)])
            .await;
        assert!(matches!(res, Err(RegistryError::LabelMismatch("weather_forecast"))));
    }
}
