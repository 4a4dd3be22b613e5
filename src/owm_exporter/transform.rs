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

//! Conversion of API responses into metric points.
//!
//! Each kind of response has a fixed table of `(condition, extractor)` pairs that is walked
//! in order. An extractor returns `None` when the response doesn't include a value and no
//! point is emitted for that condition (it is never reported as zero).

use crate::client::{Daily, Forecast, Minutely, OneCall, OneCallConditions, Pollution, UvRange, Weather, WeatherCondition};
use crate::metrics::{
    MetricPoint, POLLUTION_CURRENT_AQI, UV_INDEX_CURRENT_HIGH, UV_INDEX_CURRENT_LOW, WEATHER_CURRENT, WEATHER_EPOCH,
    WEATHER_FORECAST_ONE_CALL, WEATHER_FORECAST_STEP, WEATHER_SUMMARY,
};

/// Hours between entries of the 5 day forecast.
pub const FORECAST_STEP_HOURS: usize = 3;

pub const INTERVAL_MINUTE: &str = "minute";
pub const INTERVAL_HOUR: &str = "hour";
pub const INTERVAL_DAY: &str = "day";

type Extractor<T> = fn(&T) -> Option<f64>;

// dew_point and uvi are only part of one-call responses.
const WEATHER_CONDITIONS: &[(&str, Extractor<Weather>)] = &[
    ("clouds", |w: &Weather| w.clouds.as_ref()?.all),
    ("feels_like", |w: &Weather| w.main.as_ref()?.feels_like),
    ("humidity", |w: &Weather| w.main.as_ref()?.humidity),
    ("pop", |w: &Weather| w.pop),
    ("pressure", |w: &Weather| w.main.as_ref()?.pressure),
    ("rain_1h", |w: &Weather| w.rain.as_ref()?.one_hour),
    ("rain_3h", |w: &Weather| w.rain.as_ref()?.three_hours),
    ("snow_1h", |w: &Weather| w.snow.as_ref()?.one_hour),
    ("snow_3h", |w: &Weather| w.snow.as_ref()?.three_hours),
    ("temp", |w: &Weather| w.main.as_ref()?.temp),
    ("visibility", |w: &Weather| w.visibility),
    ("wind_degree", |w: &Weather| w.wind.as_ref()?.deg),
    ("wind_gust", |w: &Weather| w.wind.as_ref()?.gust),
    ("wind_speed", |w: &Weather| w.wind.as_ref()?.speed),
];

// Forecast entries also report the expected range of temperature for each 3 hour step.
const FORECAST_STEP_CONDITIONS: &[(&str, Extractor<Weather>)] = &[
    ("temp_max", |w: &Weather| w.main.as_ref()?.temp_max),
    ("temp_min", |w: &Weather| w.main.as_ref()?.temp_min),
];

const ONE_CALL_CONDITIONS: &[(&str, Extractor<OneCallConditions>)] = &[
    ("clouds", |c: &OneCallConditions| c.clouds),
    ("dew_point", |c: &OneCallConditions| c.dew_point),
    ("feels_like", |c: &OneCallConditions| c.feels_like),
    ("humidity", |c: &OneCallConditions| c.humidity),
    ("pop", |c: &OneCallConditions| c.pop),
    ("pressure", |c: &OneCallConditions| c.pressure),
    ("rain_1h", |c: &OneCallConditions| c.rain.as_ref()?.one_hour),
    ("rain_3h", |c: &OneCallConditions| c.rain.as_ref()?.three_hours),
    ("snow_1h", |c: &OneCallConditions| c.snow.as_ref()?.one_hour),
    ("snow_3h", |c: &OneCallConditions| c.snow.as_ref()?.three_hours),
    ("temp", |c: &OneCallConditions| c.temp),
    ("uvi", |c: &OneCallConditions| c.uvi),
    ("visibility", |c: &OneCallConditions| c.visibility),
    ("wind_degree", |c: &OneCallConditions| c.wind_deg),
    ("wind_gust", |c: &OneCallConditions| c.wind_gust),
    ("wind_speed", |c: &OneCallConditions| c.wind_speed),
];

const MINUTELY_CONDITIONS: &[(&str, Extractor<Minutely>)] = &[("precipitation", |m: &Minutely| m.precipitation)];

const DAILY_CONDITIONS: &[(&str, Extractor<Daily>)] = &[
    ("clouds", |d: &Daily| d.clouds),
    ("dew_point", |d: &Daily| d.dew_point),
    ("humidity", |d: &Daily| d.humidity),
    ("moon_phase", |d: &Daily| d.moon_phase),
    ("moonrise", |d: &Daily| epoch(d.moonrise)),
    ("moonset", |d: &Daily| epoch(d.moonset)),
    ("pop", |d: &Daily| d.pop),
    ("pressure", |d: &Daily| d.pressure),
    ("rain", |d: &Daily| d.rain),
    ("snow", |d: &Daily| d.snow),
    ("sunrise", |d: &Daily| epoch(d.sunrise)),
    ("sunset", |d: &Daily| epoch(d.sunset)),
    ("temp_max", |d: &Daily| d.temp.as_ref()?.max),
    ("temp_min", |d: &Daily| d.temp.as_ref()?.min),
    ("uvi", |d: &Daily| d.uvi),
    ("wind_degree", |d: &Daily| d.wind_deg),
    ("wind_gust", |d: &Daily| d.wind_gust),
    ("wind_speed", |d: &Daily| d.wind_speed),
];

/// Zero or missing timestamps are how the API marks entries without data.
fn has_data(dt: Option<i64>) -> bool {
    matches!(dt, Some(v) if v > 0)
}

fn epoch(ts: Option<i64>) -> Option<f64> {
    ts.filter(|v| *v > 0).map(|v| v as f64)
}

fn conditions<T, F>(out: &mut Vec<MetricPoint>, table: &[(&str, Extractor<T>)], source: &T, point: F)
where
    F: Fn(&str, f64) -> MetricPoint,
{
    for &(condition, extract) in table {
        if let Some(v) = extract(source) {
            out.push(point(condition, v));
        }
    }
}

fn events(out: &mut Vec<MetricPoint>, location: &str, sunrise: Option<i64>, sunset: Option<i64>) {
    for (event, ts) in [("sunrise", sunrise), ("sunset", sunset)] {
        if let Some(v) = epoch(ts) {
            out.push(WEATHER_EPOCH.point(&[location, event], v));
        }
    }
}

fn summaries(out: &mut Vec<MetricPoint>, location: &str, weather: &[WeatherCondition]) {
    for w in weather {
        out.push(WEATHER_SUMMARY.point(&[location, &w.main, &w.description], 1.0));
    }
}

/// Points for the response of the current weather API.
pub fn current_points(location: &str, weather: &Weather) -> Vec<MetricPoint> {
    let mut out = Vec::new();
    if let Some(sys) = &weather.sys {
        events(&mut out, location, sys.sunrise, sys.sunset);
    }

    if has_data(weather.dt) {
        conditions(&mut out, WEATHER_CONDITIONS, weather, |c, v| {
            WEATHER_CURRENT.point(&[location, c], v)
        });
        summaries(&mut out, location, &weather.weather);
    }

    out
}

/// Points for the `current` block of a one-call response.
pub fn one_call_current_points(location: &str, current: &OneCallConditions) -> Vec<MetricPoint> {
    let mut out = Vec::new();
    events(&mut out, location, current.sunrise, current.sunset);

    if has_data(current.dt) {
        conditions(&mut out, ONE_CALL_CONDITIONS, current, |c, v| {
            WEATHER_CURRENT.point(&[location, c], v)
        });
        summaries(&mut out, location, &current.weather);
    }

    out
}

/// Points for the 5 day forecast, labeled by hours from now based on position in the list.
pub fn step_forecast_points(location: &str, forecast: &Forecast) -> Vec<MetricPoint> {
    let mut out = Vec::new();

    for (i, entry) in forecast.list.iter().enumerate() {
        let in_hours = (i * FORECAST_STEP_HOURS).to_string();
        for table in [WEATHER_CONDITIONS, FORECAST_STEP_CONDITIONS] {
            conditions(&mut out, table, entry, |c, v| {
                WEATHER_FORECAST_STEP.point(&[location, c, &in_hours], v)
            });
        }
    }

    out
}

/// Points for the minutely, hourly, and daily blocks of a one-call response, labeled by
/// the timestamp of each entry. Entries without a timestamp are skipped.
pub fn one_call_forecast_points(location: &str, one_call: &OneCall) -> Vec<MetricPoint> {
    let mut out = Vec::new();

    for entry in one_call.minutely.iter().filter(|e| has_data(e.dt)) {
        timed(&mut out, location, MINUTELY_CONDITIONS, entry, entry.dt, INTERVAL_MINUTE);
    }

    for entry in one_call.hourly.iter().filter(|e| has_data(e.dt)) {
        timed(&mut out, location, ONE_CALL_CONDITIONS, entry, entry.dt, INTERVAL_HOUR);
    }

    for entry in one_call.daily.iter().filter(|e| has_data(e.dt)) {
        timed(&mut out, location, DAILY_CONDITIONS, entry, entry.dt, INTERVAL_DAY);
    }

    out
}

fn timed<T>(
    out: &mut Vec<MetricPoint>,
    location: &str,
    table: &[(&str, Extractor<T>)],
    entry: &T,
    dt: Option<i64>,
    interval: &str,
) {
    let dt = dt.unwrap_or_default().to_string();
    conditions(out, table, entry, |c, v| {
        WEATHER_FORECAST_ONE_CALL.point(&[location, c, &dt, interval], v)
    });
}

/// Points for the air pollution API, one per entry returned.
pub fn pollution_points(location: &str, pollution: &Pollution) -> Vec<MetricPoint> {
    pollution
        .list
        .iter()
        .filter_map(|s| s.main.as_ref()?.aqi)
        .map(|aqi| POLLUTION_CURRENT_AQI.point(&[location], aqi))
        .collect()
}

/// Points for the first UV range returned, or `None` if the API didn't return any.
pub fn uv_points(location: &str, ranges: &[UvRange]) -> Option<Vec<MetricPoint>> {
    ranges.first().map(|r| {
        vec![
            UV_INDEX_CURRENT_LOW.point(&[location], r.low),
            UV_INDEX_CURRENT_HIGH.point(&[location], r.high),
        ]
    })
}
