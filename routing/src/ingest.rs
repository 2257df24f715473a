//! Routing-document ingest
//!
//! Parses the federation's routing XML into a routing table and a
//! virtual-network table. The document root is a `routing` element in any
//! namespace; only local names are significant. Errors are contained at route
//! and member granularity: a bad element is logged and skipped, the rest of
//! the document is processed.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::stream::Stream;
use crate::table::{DEFAULT_PRIORITY, Route, RoutingTable, Service};
use crate::vnet::{VirtualNets, VnetMember};
use crate::window::{TimeWindow, parse_timestamp};

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed routing document: {0}")]
    Xml(String),

    #[error("routing document unreadable after backup recovery")]
    Unrecoverable,
}

impl From<quick_xml::Error> for IngestError {
    fn from(err: quick_xml::Error) -> Self {
        IngestError::Xml(err.to_string())
    }
}

/// Parses a routing document from a string. Route-level and member-level
/// problems are logged and skipped; only a malformed document is an error.
pub fn parse_document(
    xml: &str,
    allow_overlaps: bool,
) -> Result<(RoutingTable, VirtualNets), IngestError> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    let mut table = RoutingTable::new();
    let mut vnets = VirtualNets::new();
    let mut saw_root = false;

    loop {
        match reader.read_event().map_err(IngestError::from)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"routing" => saw_root = true,
                b"route" => ingest_route(&mut reader, &e, &mut table, allow_overlaps)?,
                b"vnetwork" => ingest_vnetwork(&mut reader, &e, &mut vnets)?,
                _ => {}
            },
            Event::Empty(e) => {
                // An empty route or vnetwork carries no services or members.
                if e.local_name().as_ref() == b"routing" {
                    saw_root = true;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(IngestError::Xml("missing 'routing' root element".into()));
    }
    Ok((table, vnets))
}

/// Ingests the routing document at `path`, applying the corrupt-file recovery
/// protocol: on parse failure the file is set aside as `<name>.wrong`, the
/// `<name>.bck` backup (if any) is moved back into place and parsing retried
/// once. A second failure is final.
pub fn ingest_file(
    path: &Path,
    allow_overlaps: bool,
) -> Result<(RoutingTable, VirtualNets), IngestError> {
    match parse_file(path, allow_overlaps) {
        Ok(tables) => Ok(tables),
        Err(IngestError::Io(err)) => Err(IngestError::Io(err)),
        Err(err) => {
            warn!("failed to parse {}: {err}; trying backup", path.display());
            fs::rename(path, suffixed(path, ".wrong"))?;
            let backup = suffixed(path, ".bck");
            if !backup.exists() {
                return Err(IngestError::Unrecoverable);
            }
            fs::rename(&backup, path)?;
            parse_file(path, allow_overlaps).map_err(|err| {
                warn!("backup copy of {} is unreadable too: {err}", path.display());
                IngestError::Unrecoverable
            })
        }
    }
}

fn parse_file(
    path: &Path,
    allow_overlaps: bool,
) -> Result<(RoutingTable, VirtualNets), IngestError> {
    let xml = fs::read_to_string(path)?;
    parse_document(&xml, allow_overlaps)
}

/// Appends `suffix` to the full file name, keeping the original extension.
pub fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn attributes(element: &BytesStart) -> Result<HashMap<String, String>, IngestError> {
    let mut attrs = HashMap::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| IngestError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| IngestError::Xml(e.to_string()))?
            .to_string();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

fn stream_from_attrs(attrs: &HashMap<String, String>) -> Stream {
    let code = |name: &str| attrs.get(name).cloned().unwrap_or_default();
    Stream::new(
        code("networkCode"),
        code("stationCode"),
        code("locationCode"),
        code("streamCode"),
    )
}

fn window_from_attrs(attrs: &HashMap<String, String>) -> Result<TimeWindow, String> {
    let endpoint = |name: &str| -> Result<Option<_>, String> {
        match attrs.get(name).filter(|v| !v.is_empty()) {
            Some(value) => parse_timestamp(value).map(Some).map_err(|e| e.to_string()),
            None => Ok(None),
        }
    };
    TimeWindow::new(endpoint("start")?, endpoint("end")?).map_err(|e| e.to_string())
}

fn ingest_route(
    reader: &mut Reader<&[u8]>,
    element: &BytesStart,
    table: &mut RoutingTable,
    allow_overlaps: bool,
) -> Result<(), IngestError> {
    let stream = stream_from_attrs(&attributes(element)?);

    loop {
        match reader.read_event().map_err(IngestError::from)? {
            Event::Start(e) | Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                let attrs = attributes(&e)?;
                match service_route(&name, &attrs) {
                    Ok(route) => {
                        if let Err(err) = table.add_route(stream.clone(), route, allow_overlaps) {
                            warn!("skipping route: {err}");
                        }
                    }
                    Err(err) => warn!("skipping {name} entry for {stream}: {err}"),
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"route" => break,
            Event::Eof => return Err(IngestError::Xml("unterminated 'route' element".into())),
            _ => {}
        }
    }
    Ok(())
}

fn service_route(name: &str, attrs: &HashMap<String, String>) -> Result<Route, String> {
    let address = attrs
        .get("address")
        .filter(|a| !a.is_empty())
        .ok_or("missing 'address' attribute")?
        .clone();
    let priority = match attrs.get("priority").filter(|p| !p.is_empty()) {
        Some(raw) => raw
            .parse::<u16>()
            .map_err(|_| format!("bad priority '{raw}'"))?,
        None => DEFAULT_PRIORITY,
    };
    Ok(Route {
        service: Service::from_name(name),
        address,
        window: window_from_attrs(attrs)?,
        priority,
    })
}

fn ingest_vnetwork(
    reader: &mut Reader<&[u8]>,
    element: &BytesStart,
    vnets: &mut VirtualNets,
) -> Result<(), IngestError> {
    let attrs = attributes(element)?;
    let Some(code) = attrs.get("networkCode").filter(|c| !c.is_empty()).cloned() else {
        warn!("skipping vnetwork without a networkCode");
        skip_to_end(reader, b"vnetwork")?;
        return Ok(());
    };

    loop {
        match reader.read_event().map_err(IngestError::from)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"stream" => {
                let attrs = attributes(&e)?;
                let stream = stream_from_attrs(&attrs);
                match window_from_attrs(&attrs) {
                    Ok(window) => {
                        if let Err(err) = vnets.add_member(&code, VnetMember { stream, window }) {
                            warn!("skipping member of {code}: {err}");
                        }
                    }
                    Err(err) => warn!("skipping member of {code}: {err}"),
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"vnetwork" => break,
            Event::Eof => return Err(IngestError::Xml("unterminated 'vnetwork' element".into())),
            _ => {}
        }
    }
    Ok(())
}

fn skip_to_end(reader: &mut Reader<&[u8]>, name: &[u8]) -> Result<(), IngestError> {
    loop {
        match reader.read_event().map_err(IngestError::from)? {
            Event::End(e) if e.local_name().as_ref() == name => return Ok(()),
            Event::Eof => return Err(IngestError::Xml("unexpected end of document".into())),
            _ => {}
        }
    }
}
