//! Output renderers
//!
//! Serializes a [`RequestMerge`] into one of the agreed wire formats. The
//! `get` and `post` renderers produce dispatch-ready request material; `xml`
//! and `json` mirror the merge structure; `fdsn` restructures it into the
//! nested data-center document.

use chrono::{DateTime, Days, Utc};
use indexmap::IndexMap;
use quick_xml::escape::escape;
use serde_json::json;

use crate::merge::{ParamSet, RequestMerge};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Xml,
    Json,
    Get,
    Post,
    Fdsn,
}

impl OutputFormat {
    pub fn from_name(name: &str) -> Option<OutputFormat> {
        match name {
            "xml" => Some(OutputFormat::Xml),
            "json" => Some(OutputFormat::Json),
            "get" => Some(OutputFormat::Get),
            "post" => Some(OutputFormat::Post),
            "fdsn" => Some(OutputFormat::Fdsn),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Xml => "application/xml",
            OutputFormat::Json | OutputFormat::Fdsn => "application/json",
            OutputFormat::Get | OutputFormat::Post => "text/plain",
        }
    }
}

fn iso(value: &Option<DateTime<Utc>>) -> String {
    match value {
        Some(t) => t.format("%Y-%m-%dT%H:%M:%S").to_string(),
        None => String::new(),
    }
}

pub fn render(
    format: OutputFormat,
    merge: &RequestMerge,
    datacenters: &[String],
) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Xml => Ok(render_xml(merge)),
        OutputFormat::Json => serde_json::to_string(merge.entries()),
        OutputFormat::Get => Ok(render_get(merge)),
        OutputFormat::Post => Ok(render_post(merge)),
        OutputFormat::Fdsn => render_fdsn(merge, datacenters),
    }
}

fn render_xml(merge: &RequestMerge) -> String {
    let mut out = String::from("<service>");
    for entry in merge.entries() {
        out.push_str("<datacenter>");
        out.push_str(&format!("<url>{}</url>", escape(&entry.url)));
        out.push_str(&format!("<name>{}</name>", escape(&entry.name)));
        for p in &entry.params {
            out.push_str("<params>");
            out.push_str(&format!("<net>{}</net>", escape(&p.net)));
            out.push_str(&format!("<sta>{}</sta>", escape(&p.sta)));
            out.push_str(&format!("<loc>{}</loc>", escape(&p.loc)));
            out.push_str(&format!("<cha>{}</cha>", escape(&p.cha)));
            out.push_str(&format!("<start>{}</start>", iso(&p.start)));
            out.push_str(&format!("<end>{}</end>", iso(&p.end)));
            out.push_str(&format!("<priority>{}</priority>", p.priority));
            out.push_str("</params>");
        }
        out.push_str("</datacenter>");
    }
    out.push_str("</service>");
    out
}

/// One ready-to-dispatch URL per parameter set. Wildcard and empty values are
/// omitted, as is the priority.
fn render_get(merge: &RequestMerge) -> String {
    let mut lines = Vec::new();
    for entry in merge.entries() {
        for p in &entry.params {
            let mut pairs: Vec<String> = Vec::new();
            for (key, value) in [
                ("net", &p.net),
                ("sta", &p.sta),
                ("loc", &p.loc),
                ("cha", &p.cha),
            ] {
                if !value.is_empty() && value != "*" {
                    pairs.push(format!("{key}={value}"));
                }
            }
            if let Some(start) = p.start {
                pairs.push(format!("start={}", iso(&Some(start))));
            }
            if let Some(end) = p.end {
                pairs.push(format!("end={}", iso(&Some(end))));
            }
            lines.push(format!("{}?{}", entry.url, pairs.join("&")));
        }
    }
    lines.join("\n")
}

/// FDSN POST bodies, one block per data center: the URL line followed by
/// space-separated rows. Blank location codes were normalized to `*` when the
/// stream was built, and wildcards are valid in POST rows, so no `--`
/// placeholder is needed. An unbounded end becomes tomorrow at midnight UTC.
fn render_post(merge: &RequestMerge) -> String {
    let default_start = "1900-01-01T00:00:00".to_string();
    let default_end = Utc::now()
        .date_naive()
        .checked_add_days(Days::new(1))
        .map(|d| format!("{}T00:00:00", d.format("%Y-%m-%d")))
        .unwrap_or_else(|| default_start.clone());

    let mut blocks = Vec::new();
    for entry in merge.entries() {
        let mut block = vec![entry.url.clone()];
        for p in &entry.params {
            let start = p.start.map(|s| iso(&Some(s))).unwrap_or_else(|| default_start.clone());
            let end = p.end.map(|e| iso(&Some(e))).unwrap_or_else(|| default_end.clone());
            block.push(format!(
                "{} {} {} {} {} {}",
                p.net, p.sta, p.loc, p.cha, start, end
            ));
        }
        blocks.push(block.join("\n"));
    }
    blocks.join("\n\n")
}

fn dataset_key(p: &ParamSet) -> String {
    format!(
        "{}.{}.{}.{}|{}|{}|{}",
        p.net,
        p.sta,
        p.loc,
        p.cha,
        iso(&p.start),
        iso(&p.end),
        p.priority
    )
}

/// Restructures the merge into the nested data-center document: one object
/// per endpoint host holding its repository with services and datasets. A
/// dataset served by every service of the repository drops its explicit
/// service list.
fn render_fdsn(merge: &RequestMerge, datacenters: &[String]) -> Result<String, serde_json::Error> {
    let descriptors: Vec<serde_json::Value> = datacenters
        .iter()
        .filter_map(|raw| serde_json::from_str(raw).ok())
        .collect();

    // Host -> (services, dataset key -> (params, serving services)).
    let mut hosts: IndexMap<String, (Vec<(String, String)>, IndexMap<String, (ParamSet, Vec<String>)>)> =
        IndexMap::new();
    for entry in merge.entries() {
        let host = url::Url::parse(&entry.url)
            .ok()
            .and_then(|u| u.host_str().map(String::from))
            .unwrap_or_else(|| entry.url.clone());
        let (services, datasets) = hosts.entry(host).or_default();
        services.push((entry.name.clone(), entry.url.clone()));
        for p in &entry.params {
            let slot = datasets
                .entry(dataset_key(p))
                .or_insert_with(|| (p.clone(), Vec::new()));
            slot.1.push(entry.name.clone());
        }
    }

    let mut rendered = Vec::new();
    for (host, (services, datasets)) in hosts {
        let descriptor = descriptors
            .iter()
            .find(|d| {
                d.get("website")
                    .and_then(|w| w.as_str())
                    .is_some_and(|w| w.contains(&host))
            })
            .cloned();
        let name = descriptor
            .as_ref()
            .and_then(|d| d.get("name").and_then(|n| n.as_str()))
            .unwrap_or(&host)
            .to_string();

        let service_values: Vec<serde_json::Value> = services
            .iter()
            .map(|(name, url)| json!({ "name": name, "url": url }))
            .collect();

        let dataset_values: Vec<serde_json::Value> = datasets
            .values()
            .map(|(p, serving)| {
                let mut value = json!({
                    "network": p.net,
                    "station": p.sta,
                    "location": p.loc,
                    "channel": p.cha,
                    "starttime": iso(&p.start),
                    "endtime": iso(&p.end),
                    "priority": p.priority,
                });
                // Implied when every service of the repository serves it.
                if serving.len() < services.len() {
                    value["services"] = json!(serving);
                }
                value
            })
            .collect();

        let mut datacenter = json!({
            "name": name,
            "repositories": [{
                "name": "archive",
                "services": service_values,
                "datasets": dataset_values,
            }],
        });
        if let Some(d) = descriptor
            && let Some(website) = d.get("website")
        {
            datacenter["website"] = website.clone();
        }
        rendered.push(datacenter);
    }

    serde_json::to_string(&json!({ "version": 1, "datacenters": rendered }))
}
