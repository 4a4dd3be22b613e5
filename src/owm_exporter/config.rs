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

use serde::Deserialize;
use std::collections::HashSet;
use std::error;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, io::Error),
    Parse(PathBuf, serde_yaml::Error),
    MissingApiKey,
    NoLocations,
    EmptyName(usize),
    DuplicateName(String),
    Latitude(String, f64),
    Longitude(String, f64),
    ListenAddr(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(p, e) => write!(f, "unable to read {}: {}", p.display(), e),
            Self::Parse(p, e) => write!(f, "unable to parse {}: {}", p.display(), e),
            Self::MissingApiKey => write!(f, "an OpenWeatherMap API key is required"),
            Self::NoLocations => write!(f, "at least one location is required"),
            Self::EmptyName(i) => write!(f, "location at index {} has an empty name", i),
            Self::DuplicateName(n) => write!(f, "duplicate location name {}", n),
            Self::Latitude(n, v) => write!(f, "latitude {} for location {} outside of [-90, 90]", v, n),
            Self::Longitude(n, v) => write!(f, "longitude {} for location {} outside of [-180, 180]", v, n),
            Self::ListenAddr(a) => write!(f, "invalid listen address {}", a),
        }
    }
}

impl error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(_, e) => Some(e),
            Self::Parse(_, e) => Some(e),
            _ => None,
        }
    }
}

/// A named geographic point to fetch weather for.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Location {
    pub name: String,
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lon")]
    pub longitude: f64,
}

impl Location {
    pub fn new<S: Into<String>>(name: S, latitude: f64, longitude: f64) -> Self {
        Location {
            name: name.into(),
            latitude,
            longitude,
        }
    }
}

/// Ordered, validated set of locations that is fixed once loaded.
///
/// Names must be non-empty and unique since they become the `location` label of every
/// metric emitted. Coordinates must be finite and within normal latitude and longitude bounds.
#[derive(Debug, Clone)]
pub struct Locations {
    entries: Vec<Location>,
}

impl Locations {
    pub fn new(entries: Vec<Location>) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::NoLocations);
        }

        let mut seen = HashSet::with_capacity(entries.len());
        for (i, loc) in entries.iter().enumerate() {
            if loc.name.trim().is_empty() {
                return Err(ConfigError::EmptyName(i));
            }
            if !seen.insert(loc.name.as_str()) {
                return Err(ConfigError::DuplicateName(loc.name.clone()));
            }
            if !loc.latitude.is_finite() || !(-90.0..=90.0).contains(&loc.latitude) {
                return Err(ConfigError::Latitude(loc.name.clone(), loc.latitude));
            }
            if !loc.longitude.is_finite() || !(-180.0..=180.0).contains(&loc.longitude) {
                return Err(ConfigError::Longitude(loc.name.clone(), loc.longitude));
            }
        }

        Ok(Locations { entries })
    }

    pub fn locations(&self) -> &[Location] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Contents of the YAML configuration file.
///
/// Every field is optional here since the API key and listen address may also be given
/// as command line flags. Use `Locations::new` to validate the locations before use.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default, alias = "apikey")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub listen_addr: Option<String>,
    #[serde(default)]
    pub locations: Vec<Location>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    /// Parse the listen address if one was set, accepting the `:port` shorthand for all interfaces.
    pub fn listen_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        self.listen_addr.as_deref().map(parse_listen_addr).transpose()
    }
}

fn parse_listen_addr(addr: &str) -> Result<SocketAddr, ConfigError> {
    if let Some(port) = addr.strip_prefix(':') {
        return port
            .parse::<u16>()
            .map(|p| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), p))
            .map_err(|_| ConfigError::ListenAddr(addr.to_owned()));
    }

    addr.parse().map_err(|_| ConfigError::ListenAddr(addr.to_owned()))
}
