//! Virtual-network table
//!
//! A virtual network is a named alias for a list of concrete stream patterns,
//! each with its own validity window. Expansion in the resolver is one level
//! deep; members naming another virtual code are rejected at ingest.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::stream::Stream;
use crate::window::TimeWindow;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VnetMember {
    pub stream: Stream,
    pub window: TimeWindow,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum VnetError {
    #[error("virtual-network member code '{0}' uses a wildcard other than bare '*'")]
    BadWildcard(String),

    #[error("virtual-network member '{0}' names another virtual network")]
    NestedVirtual(String),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualNets {
    entries: IndexMap<String, Vec<VnetMember>>,
}

impl VirtualNets {
    pub fn new() -> Self {
        VirtualNets {
            entries: IndexMap::new(),
        }
    }

    pub fn get(&self, code: &str) -> Option<&Vec<VnetMember>> {
        self.entries.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.entries.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<VnetMember>)> {
        self.entries.iter()
    }

    /// Appends a member to `code`'s list. Members are never deduplicated.
    /// Member codes admit only the bare `*` wildcard; `?` or `*` mixed with
    /// other characters is an error. A member whose network field is itself a
    /// known virtual code is rejected.
    pub fn add_member(&mut self, code: &str, member: VnetMember) -> Result<(), VnetError> {
        for field in [
            &member.stream.net,
            &member.stream.sta,
            &member.stream.loc,
            &member.stream.cha,
        ] {
            if field.contains('?') || (field.contains('*') && field != "*") {
                return Err(VnetError::BadWildcard(field.clone()));
            }
        }
        if self.entries.contains_key(&member.stream.net) {
            return Err(VnetError::NestedVirtual(member.stream.net.clone()));
        }

        self.entries.entry(code.to_string()).or_default().push(member);
        Ok(())
    }

    pub fn merge(&mut self, other: VirtualNets) {
        for (code, members) in other.entries {
            self.entries.entry(code).or_default().extend(members);
        }
    }
}
