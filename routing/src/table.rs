//! Routing table
//!
//! Maps stream patterns to ordered lists of routes. Each route asserts that a
//! service at some URL serves the pattern over a time window at a priority
//! (smaller is higher, default 99). The table preserves key insertion order,
//! which the resolver uses as the final tie-break between candidate keys.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::stream::Stream;
use crate::window::TimeWindow;

pub const DEFAULT_PRIORITY: u16 = 99;

/// The services a data center can advertise. `Other` keeps unknown names so a
/// newer peer document does not break ingest.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Service {
    Dataselect,
    Station,
    Wfcatalog,
    Availability,
    Other(String),
}

impl Service {
    /// Single normalization table for plain and FDSN-layer service names.
    pub fn from_name(name: &str) -> Service {
        match name {
            "dataselect" | "fdsnws-dataselect-1" => Service::Dataselect,
            "station" | "fdsnws-station-1" => Service::Station,
            "wfcatalog" | "eidaws-wfcatalog" | "eidaws-wfcatalog-1" => Service::Wfcatalog,
            "availability" | "fdsnws-availability-1" => Service::Availability,
            other => Service::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Service::Dataselect => "dataselect",
            Service::Station => "station",
            Service::Wfcatalog => "wfcatalog",
            Service::Availability => "availability",
            Service::Other(name) => name,
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub service: Service,
    pub address: String,
    pub window: TimeWindow,
    pub priority: u16,
}

impl Route {
    /// Host part of the route address, used as the station-cache key.
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.address)
            .ok()
            .and_then(|u| u.host_str().map(String::from))
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum TableError {
    #[error("'?' wildcard is forbidden in routes: {0}")]
    QuestionMark(Stream),

    #[error("route for {stream} overlaps an existing {service} route")]
    Overlap { stream: Stream, service: Service },
}

/// Stream pattern to route-list index. Route lists stay sorted ascending by
/// priority.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingTable {
    entries: IndexMap<Stream, Vec<Route>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        RoutingTable {
            entries: IndexMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Stream, &Vec<Route>)> {
        self.entries.iter()
    }

    pub fn get(&self, stream: &Stream) -> Option<&Vec<Route>> {
        self.entries.get(stream)
    }

    /// Inserts a route under `stream`, enforcing the wildcard rule and the
    /// overlap policy. With `allow_overlaps` unset, a new route whose stream
    /// overlaps an existing key carrying a same-service route with an
    /// overlapping window is rejected.
    pub fn add_route(
        &mut self,
        stream: Stream,
        route: Route,
        allow_overlaps: bool,
    ) -> Result<(), TableError> {
        if stream.has_question_mark() {
            return Err(TableError::QuestionMark(stream));
        }

        for (key, routes) in &self.entries {
            if !key.overlaps(&stream) {
                continue;
            }
            let clashing = routes.iter().any(|existing| {
                existing.service == route.service && existing.window.overlaps(&route.window)
            });
            if clashing {
                if allow_overlaps {
                    warn!(
                        "overlapping {} routes kept for {} and {}",
                        route.service, key, stream
                    );
                } else {
                    return Err(TableError::Overlap {
                        stream,
                        service: route.service,
                    });
                }
            }
        }

        let routes = self.entries.entry(stream).or_default();
        let pos = routes.partition_point(|r| r.priority <= route.priority);
        routes.insert(pos, route);
        Ok(())
    }

    /// Folds another table into this one under the same overlap policy.
    /// Rejected routes are logged and dropped; the rest are kept.
    pub fn merge(&mut self, other: RoutingTable, allow_overlaps: bool) {
        for (stream, routes) in other.entries {
            for route in routes {
                if let Err(err) = self.add_route(stream.clone(), route, allow_overlaps) {
                    warn!("dropping route during merge: {err}");
                }
            }
        }
    }
}
