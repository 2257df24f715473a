//! RequestMerge
//!
//! The resolver's output shape: one entry per `(service, URL)` pair, each
//! carrying the merged list of request parameter sets a client must send to
//! that endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stream::Stream;
use crate::window::TimeWindow;

/// One concrete sub-request: stream codes, a bounded-or-open window and the
/// priority of the route that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamSet {
    pub net: String,
    pub sta: String,
    pub loc: String,
    pub cha: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub priority: u16,
}

impl ParamSet {
    pub fn new(stream: &Stream, window: &TimeWindow, priority: u16) -> Self {
        ParamSet {
            net: stream.net.clone(),
            sta: stream.sta.clone(),
            loc: stream.loc.clone(),
            cha: stream.cha.clone(),
            start: window.start,
            end: window.end,
            priority,
        }
    }
}

/// One dispatch target: a service name, its URL and the parameter sets bound
/// for it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub name: String,
    pub url: String,
    pub params: Vec<ParamSet>,
}

/// Ordered collection of dispatch targets. No two entries share the same
/// `(service, URL)` pair; appending to an existing pair extends its parameter
/// list instead.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMerge {
    entries: Vec<RouteEntry>,
}

impl RequestMerge {
    pub fn new() -> Self {
        RequestMerge {
            entries: Vec::new(),
        }
    }

    /// Position of the entry for `(name, url)`, if present. An explicit
    /// lookup; callers append or extend based on the result.
    pub fn position(&self, name: &str, url: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.name == name && e.url == url)
    }

    pub fn append(&mut self, name: &str, url: &str, params: ParamSet) {
        match self.position(name, url) {
            Some(index) => self.entries[index].params.push(params),
            None => self.entries.push(RouteEntry {
                name: name.to_string(),
                url: url.to_string(),
                params: vec![params],
            }),
        }
    }

    /// Folds another merge into this one, keeping the dedup discipline.
    pub fn extend(&mut self, other: RequestMerge) {
        for entry in other.entries {
            match self.position(&entry.name, &entry.url) {
                Some(index) => self.entries[index].params.extend(entry.params),
                None => self.entries.push(entry),
            }
        }
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
