//! Station cache
//!
//! Concrete station records per endpoint host and stream key, discovered by
//! probing the federation's station services. The cache feeds the resolver's
//! geographic filter and station-name expansion.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::stream::Stream;
use crate::window::{TimeWindow, parse_timestamp};

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// One station epoch from a station-metadata probe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Inclusive geographic rectangle.
#[derive(Clone, Debug, PartialEq)]
pub struct GeoRectangle {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl GeoRectangle {
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.min_lat
            && latitude <= self.max_lat
            && longitude >= self.min_lon
            && longitude <= self.max_lon
    }
}

/// Station records indexed by endpoint host, then by stream key.
///
/// Entries are stored under the host of the station-service URL and consulted
/// with the host of the waveform-service URL. The federation's data centers
/// expose both services under the same host; that assumption is baked in
/// here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StationCache {
    entries: HashMap<String, IndexMap<Stream, Vec<Station>>>,
}

impl StationCache {
    pub fn new() -> Self {
        StationCache {
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, host: &str, stream: Stream, stations: Vec<Station>) {
        self.entries
            .entry(host.to_string())
            .or_default()
            .insert(stream, stations);
    }

    /// Stations known for `stream` at `host`. `None` when the key was never
    /// probed, as opposed to a probe that returned nothing.
    pub fn lookup(&self, host: &str, stream: &Stream) -> Option<&Vec<Station>> {
        self.entries.get(host)?.get(stream)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parses the pipe-delimited `format=text` station response. `#` lines are
/// comments; fields 1, 2, 3, 6 and 7 carry name, latitude, longitude, start
/// and end. Unparseable lines are skipped.
pub fn parse_station_text(body: &str) -> Vec<Station> {
    let mut stations = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() < 7 {
            debug!("short station line skipped: {line}");
            continue;
        }
        let (Ok(latitude), Ok(longitude)) = (fields[2].parse::<f64>(), fields[3].parse::<f64>())
        else {
            debug!("station line with bad coordinates skipped: {line}");
            continue;
        };
        stations.push(Station {
            name: fields[1].to_string(),
            latitude,
            longitude,
            start: parse_timestamp(fields[6]).ok(),
            end: fields.get(7).and_then(|f| parse_timestamp(f).ok()),
        });
    }
    stations
}

/// Probes one station service for the stations matching a routing key.
/// Failures are logged and yield an empty list; a dead endpoint must not
/// abort a harvest.
pub async fn probe(
    client: &reqwest::Client,
    address: &str,
    stream: &Stream,
    window: &TimeWindow,
) -> Vec<Station> {
    let mut params: Vec<(&str, String)> = vec![
        ("format", "text".to_string()),
        ("net", stream.net.clone()),
        ("sta", stream.sta.clone()),
    ];
    let start = window.start.unwrap_or_else(|| {
        // The station service requires a start; an open window asks from the
        // beginning of digital recording.
        parse_timestamp("1980-01-01").unwrap_or_default()
    });
    params.push(("start", start.format("%Y-%m-%dT%H:%M:%S").to_string()));
    if let Some(end) = window.end {
        params.push(("end", end.format("%Y-%m-%dT%H:%M:%S").to_string()));
    }

    let result = async {
        let response = client
            .get(address)
            .query(&params)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        response.error_for_status()?.text().await
    }
    .await;

    match result {
        Ok(body) => parse_station_text(&body),
        Err(err) => {
            warn!("station probe against {address} for {stream} failed: {err}");
            Vec::new()
        }
    }
}
