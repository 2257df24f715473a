//! Shared fixtures for the crate's tests: a small but realistic federation
//! routing document and pre-built snapshots.

use crate::ingest::parse_document;
use crate::snapshot::Snapshot;
use crate::stations::{Station, StationCache};
use crate::stream::Stream;
use crate::window::parse_timestamp;

pub const GEOFON_DATASELECT: &str = "http://geofon.gfz-potsdam.de/fdsnws/dataselect/1/query";
pub const GEOFON_STATION: &str = "http://geofon.gfz-potsdam.de/fdsnws/station/1/query";
pub const ETH_DATASELECT: &str = "http://eida.ethz.ch/fdsnws/dataselect/1/query";

/// Routing document covering the seed scenarios: GEOFON serving GE (plus DK
/// and WM), ETH serving one literal stream, four ZE epochs at INGV and the
/// `_GEALL` virtual network.
pub const SAMPLE_ROUTING: &str = r#"<ns0:routing xmlns:ns0="http://geofon.gfz-potsdam.de/ns/Routing/1.0/">
  <ns0:route networkCode="GE" stationCode="*" locationCode="*" streamCode="*">
    <ns0:dataselect address="http://geofon.gfz-potsdam.de/fdsnws/dataselect/1/query" priority="1" start="1993-01-01T00:00:00"/>
    <ns0:station address="http://geofon.gfz-potsdam.de/fdsnws/station/1/query" priority="1" start="1993-01-01T00:00:00"/>
    <ns0:wfcatalog address="http://geofon.gfz-potsdam.de/eidaws/wfcatalog/1/query" priority="1" start="1993-01-01T00:00:00"/>
  </ns0:route>
  <ns0:route networkCode="DK" stationCode="*" locationCode="*" streamCode="*">
    <ns0:dataselect address="http://geofon.gfz-potsdam.de/fdsnws/dataselect/1/query" priority="1"/>
  </ns0:route>
  <ns0:route networkCode="WM" stationCode="*" locationCode="*" streamCode="*">
    <ns0:dataselect address="http://geofon.gfz-potsdam.de/fdsnws/dataselect/1/query" priority="1"/>
  </ns0:route>
  <ns0:route networkCode="CH" stationCode="LIENZ" locationCode="*" streamCode="HHZ">
    <ns0:dataselect address="http://eida.ethz.ch/fdsnws/dataselect/1/query" priority="1"/>
  </ns0:route>
  <ns0:route networkCode="ZE" stationCode="*" locationCode="*" streamCode="*">
    <ns0:dataselect address="http://webservices.ingv.it/fdsnws/dataselect/1/query" priority="1" start="2000-01-01T00:00:00" end="2005-01-01T00:00:00"/>
    <ns0:dataselect address="http://webservices.ingv.it/fdsnws/dataselect/1/query" priority="1" start="2005-01-01T00:00:00" end="2010-01-01T00:00:00"/>
    <ns0:dataselect address="http://webservices.ingv.it/fdsnws/dataselect/1/query" priority="1" start="2010-01-01T00:00:00" end="2015-01-01T00:00:00"/>
    <ns0:dataselect address="http://webservices.ingv.it/fdsnws/dataselect/1/query" priority="1" start="2015-01-01T00:00:00" end="2020-01-01T00:00:00"/>
  </ns0:route>
  <ns0:vnetwork networkCode="_GEALL">
    <ns0:stream networkCode="GE" stationCode="*" locationCode="*" streamCode="*"/>
    <ns0:stream networkCode="DK" stationCode="*" locationCode="*" streamCode="*"/>
    <ns0:stream networkCode="WM" stationCode="*" locationCode="*" streamCode="*"/>
  </ns0:vnetwork>
</ns0:routing>
"#;

/// Minimal data-center descriptor as fetched from a peer's `/dc` endpoint.
pub const SAMPLE_DATACENTER: &str = r#"{
  "name": "GEOFON",
  "website": "https://geofon.gfz-potsdam.de",
  "repositories": [{"name": "archive", "description": "GEOFON archive"}]
}"#;

fn station(name: &str, latitude: f64, longitude: f64, start: &str) -> Station {
    Station {
        name: name.to_string(),
        latitude,
        longitude,
        start: Some(parse_timestamp(start).unwrap()),
        end: None,
    }
}

/// Station cache for the GE key at the GEOFON host: two stations inside the
/// [-10, 10] latitude band and two outside.
pub fn sample_stations() -> StationCache {
    let mut cache = StationCache::new();
    cache.insert(
        "geofon.gfz-potsdam.de",
        Stream::new("GE", "*", "*", "*"),
        vec![
            station("APE", 37.0689, 25.5306, "1997-03-20"),
            station("BOAB", 12.4493, -81.7266, "2016-11-05"),
            station("PMG", -9.4047, 147.1597, "1993-01-01"),
            station("MSKU", -1.6557, 13.6116, "1999-06-01"),
        ],
    );
    cache
}

/// Snapshot built from [`SAMPLE_ROUTING`] with the GEOFON station cache and
/// one data-center descriptor.
pub fn sample_snapshot() -> Snapshot {
    let (routing, vnets) =
        parse_document(SAMPLE_ROUTING, false).expect("sample routing document parses");
    Snapshot {
        routing,
        stations: sample_stations(),
        vnets,
        datacenters: vec![SAMPLE_DATACENTER.to_string()],
    }
}

/// Snapshot whose GE stream is served by two data centers at different
/// priorities, for exercising alternative routes.
pub fn snapshot_with_alternatives() -> Snapshot {
    let xml = r#"<routing>
      <route networkCode="GE" stationCode="*" locationCode="*" streamCode="*">
        <dataselect address="http://geofon.gfz-potsdam.de/fdsnws/dataselect/1/query" priority="1"/>
        <dataselect address="http://mirror.example.org/fdsnws/dataselect/1/query" priority="2"/>
      </route>
    </routing>"#;
    let (routing, vnets) = parse_document(xml, true).expect("alternatives document parses");
    Snapshot {
        routing,
        stations: StationCache::new(),
        vnets,
        datacenters: Vec::new(),
    }
}
