//! Route resolver
//!
//! Translates one user request, possibly heavily wildcarded, into the minimal
//! set of concrete per-data-center sub-requests. Virtual networks are
//! expanded one level, candidate routes are ranked by priority and
//! specificity, a shared worklist splits the request window across the
//! accepted routes, and the station cache drives the optional geographic
//! filter.

use tracing::{debug, warn};

use crate::merge::{ParamSet, RequestMerge};
use crate::snapshot::Snapshot;
use crate::stations::GeoRectangle;
use crate::stream::{Stream, glob_match};
use crate::table::{Route, Service};
use crate::window::TimeWindow;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ResolveError {
    #[error("no routes match the request")]
    NoRoutes,
}

/// Resolves `stream`/`window` against the snapshot for each requested
/// service. `alternative` keeps lower-priority routes in addition to the
/// best; `geo` restricts emissions to stations inside the rectangle.
pub fn resolve(
    snapshot: &Snapshot,
    stream: &Stream,
    window: &TimeWindow,
    services: &[Service],
    geo: Option<&GeoRectangle>,
    alternative: bool,
) -> Result<RequestMerge, ResolveError> {
    let expanded = expand_virtual(snapshot, stream, window)?;

    let mut merge = RequestMerge::new();
    for service in services {
        for (req_stream, req_window) in &expanded {
            resolve_service(
                snapshot,
                req_stream,
                req_window,
                service,
                geo,
                alternative,
                &mut merge,
            );
        }
    }

    if merge.is_empty() {
        return Err(ResolveError::NoRoutes);
    }
    Ok(merge)
}

/// One-level virtual-network expansion. Each member's stream is intersected
/// with the request's station/location/channel codes and its window with the
/// request window; empty intersections are dropped.
fn expand_virtual(
    snapshot: &Snapshot,
    stream: &Stream,
    window: &TimeWindow,
) -> Result<Vec<(Stream, TimeWindow)>, ResolveError> {
    let Some(members) = snapshot.vnets.get(&stream.net) else {
        return Ok(vec![(stream.clone(), window.clone())]);
    };

    let mut expanded = Vec::new();
    for member in members {
        let probe = Stream::new(
            member.stream.net.clone(),
            stream.sta.clone(),
            stream.loc.clone(),
            stream.cha.clone(),
        );
        let Some(tight) = member.stream.strict_match(&probe) else {
            continue;
        };
        let Ok(w) = member.window.intersection(window) else {
            continue;
        };
        expanded.push((tight, w));
    }

    debug!(
        "virtual network {} expanded into {} member requests",
        stream.net,
        expanded.len()
    );
    if expanded.is_empty() {
        return Err(ResolveError::NoRoutes);
    }
    Ok(expanded)
}

struct Candidate<'a> {
    key: &'a Stream,
    route: &'a Route,
    order: usize,
}

fn resolve_service(
    snapshot: &Snapshot,
    req_stream: &Stream,
    req_window: &TimeWindow,
    service: &Service,
    geo: Option<&GeoRectangle>,
    alternative: bool,
    merge: &mut RequestMerge,
) {
    // Candidate selection: every route under an overlapping key whose service
    // matches and whose window touches the request. Without alternatives only
    // the routes at the minimum qualifying priority of each key survive;
    // epoch-split keys carry several same-priority routes and all must stay.
    let mut candidates: Vec<Candidate> = Vec::new();
    for (order, (key, routes)) in snapshot.routing.iter().enumerate() {
        if !key.overlaps(req_stream) {
            continue;
        }
        let qualifying: Vec<&Route> = routes
            .iter()
            .filter(|r| &r.service == service && r.window.overlaps(req_window))
            .collect();
        if qualifying.is_empty() {
            continue;
        }
        let kept: Vec<&Route> = if alternative {
            qualifying
        } else {
            // Route lists are sorted ascending by priority.
            let best = qualifying[0].priority;
            qualifying
                .into_iter()
                .take_while(|r| r.priority == best)
                .collect()
        };
        for route in kept {
            candidates.push(Candidate { key, route, order });
        }
    }

    // Priority first, then specificity, then insertion order. The sort is
    // stable, so equal candidates keep their relative positions.
    candidates.sort_by_key(|c| (c.route.priority, c.key.wildcard_count(), c.order));

    // Overlap elimination across keys: a candidate overlapping an already
    // accepted one at the same priority would double-serve that slice of the
    // request and is dropped.
    let mut accepted: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let mut rejected = false;
        for kept in &accepted {
            if kept.key.overlaps(candidate.key)
                && kept.route.window.overlaps(&candidate.route.window)
            {
                if kept.route.priority == candidate.route.priority {
                    warn!(
                        "dropping {} route for {} at {}: overlaps {} at equal priority {}",
                        candidate.route.service,
                        candidate.key,
                        candidate.route.address,
                        kept.key,
                        kept.route.priority
                    );
                    rejected = true;
                    break;
                }
                warn!(
                    "overlapping {} routes for {} and {} at priorities {} and {}",
                    candidate.route.service,
                    candidate.key,
                    kept.key,
                    candidate.route.priority,
                    kept.route.priority
                );
            }
        }
        if !rejected {
            accepted.push(candidate);
        }
    }

    // Time-window resolve loop over a worklist shared by all accepted
    // candidates. Each emission covers the intersection; the difference
    // pieces go back for lower-ranked candidates. With alternatives the
    // worklist is left intact so every priority level emits.
    let mut worklist = vec![req_window.clone()];
    for candidate in &accepted {
        if worklist.is_empty() {
            break;
        }
        let mut remaining = Vec::new();
        for piece in worklist.drain(..) {
            if !piece.overlaps(&candidate.route.window) {
                remaining.push(piece);
                continue;
            }
            let Ok(covered) = piece.intersection(&candidate.route.window) else {
                remaining.push(piece);
                continue;
            };
            emit(snapshot, req_stream, candidate, &covered, geo, merge);
            if alternative {
                remaining.push(piece);
            } else {
                remaining.extend(piece.difference(&candidate.route.window));
            }
        }
        worklist = remaining;
    }
}

/// Emits the parameter sets for one covered sub-window, consulting the
/// station cache under the host of the route URL. With a geographic
/// rectangle every matching station emits its own parameter set carrying the
/// concrete station name; otherwise one emission covers the key. A key that
/// was never probed emits unfiltered.
fn emit(
    snapshot: &Snapshot,
    req_stream: &Stream,
    candidate: &Candidate,
    covered: &TimeWindow,
    geo: Option<&GeoRectangle>,
    merge: &mut RequestMerge,
) {
    let Some(tight) = candidate.key.strict_match(req_stream) else {
        // Keys are selected by overlap, so the tightening always exists.
        return;
    };
    let service = candidate.route.service.as_str();
    let url = &candidate.route.address;
    let priority = candidate.route.priority;

    let stations = candidate
        .route
        .host()
        .and_then(|host| snapshot.stations.lookup(&host, candidate.key).cloned())
        .unwrap_or_default();

    if stations.is_empty() {
        merge.append(service, url, ParamSet::new(&tight, covered, priority));
        return;
    }

    match geo {
        None => {
            // One emission covers the whole key; the first station matching
            // the requested station code suffices.
            if stations.iter().any(|s| glob_match(&tight.sta, &s.name)) {
                merge.append(service, url, ParamSet::new(&tight, covered, priority));
            }
        }
        Some(rect) => {
            for station in &stations {
                if !glob_match(&tight.sta, &station.name) {
                    continue;
                }
                if !rect.contains(station.latitude, station.longitude) {
                    continue;
                }
                let concrete = Stream::new(
                    tight.net.clone(),
                    station.name.clone(),
                    tight.loc.clone(),
                    tight.cha.clone(),
                );
                merge.append(service, url, ParamSet::new(&concrete, covered, priority));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{ETH_DATASELECT, GEOFON_DATASELECT, sample_snapshot};
    use crate::window::parse_timestamp;

    fn open_request(net: &str) -> (Stream, TimeWindow) {
        (Stream::new(net, "*", "*", "*"), TimeWindow::open())
    }

    #[test]
    fn test_single_datacenter() {
        let snapshot = sample_snapshot();
        let (stream, window) = open_request("GE");
        let merge = resolve(
            &snapshot,
            &stream,
            &window,
            &[Service::Dataselect],
            None,
            false,
        )
        .unwrap();

        assert_eq!(merge.len(), 1);
        let entry = &merge.entries()[0];
        assert_eq!(entry.name, "dataselect");
        assert_eq!(entry.url, GEOFON_DATASELECT);
        assert_eq!(entry.params.len(), 1);
        assert_eq!(entry.params[0].net, "GE");
    }

    #[test]
    fn test_unknown_network_yields_no_routes() {
        let snapshot = sample_snapshot();
        let (stream, window) = open_request("XXX");
        assert_eq!(
            resolve(
                &snapshot,
                &stream,
                &window,
                &[Service::Dataselect],
                None,
                false
            ),
            Err(ResolveError::NoRoutes)
        );
    }

    #[test]
    fn test_multi_service_composition() {
        let snapshot = sample_snapshot();
        let (stream, window) = open_request("GE");
        let merge = resolve(
            &snapshot,
            &stream,
            &window,
            &[Service::Dataselect, Service::Station, Service::Wfcatalog],
            None,
            false,
        )
        .unwrap();

        assert_eq!(merge.len(), 3);
        let names: Vec<&str> = merge.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["dataselect", "station", "wfcatalog"]);

        let hosts: Vec<String> = merge
            .entries()
            .iter()
            .map(|e| url::Url::parse(&e.url).unwrap().host_str().unwrap().to_string())
            .collect();
        assert!(hosts.iter().all(|h| h == &hosts[0]));
        let urls: Vec<&str> = merge.entries().iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls.len(), 3);
        assert!(urls.iter().all(|u| urls.iter().filter(|v| v == &u).count() == 1));
    }

    #[test]
    fn test_geofilter_expands_stations() {
        let snapshot = sample_snapshot();
        let (stream, window) = open_request("GE");
        let rect = GeoRectangle {
            min_lat: -10.0,
            max_lat: 10.0,
            min_lon: -180.0,
            max_lon: 180.0,
        };
        let merge = resolve(
            &snapshot,
            &stream,
            &window,
            &[Service::Station],
            Some(&rect),
            false,
        )
        .unwrap();

        assert_eq!(merge.len(), 1);
        let entry = &merge.entries()[0];
        assert!(!entry.params.is_empty());
        for params in &entry.params {
            // Concrete station names, no wildcards left.
            assert_ne!(params.sta, "*");
            let station = snapshot
                .stations
                .lookup(
                    "geofon.gfz-potsdam.de",
                    &Stream::new("GE", "*", "*", "*"),
                )
                .unwrap()
                .iter()
                .find(|s| s.name == params.sta)
                .unwrap();
            assert!((-10.0..=10.0).contains(&station.latitude));
        }
    }

    #[test]
    fn test_virtual_network_expansion() {
        let snapshot = sample_snapshot();
        let (stream, window) = open_request("_GEALL");
        let merge = resolve(
            &snapshot,
            &stream,
            &window,
            &[Service::Dataselect],
            None,
            false,
        )
        .unwrap();

        assert_eq!(merge.len(), 1);
        let entry = &merge.entries()[0];
        assert_eq!(entry.url, GEOFON_DATASELECT);
        let mut nets: Vec<&str> = entry.params.iter().map(|p| p.net.as_str()).collect();
        nets.sort();
        assert_eq!(nets, vec!["DK", "GE", "WM"]);
    }

    #[test]
    fn test_epoch_split() {
        let snapshot = sample_snapshot();
        let (stream, window) = open_request("ZE");
        let merge = resolve(
            &snapshot,
            &stream,
            &window,
            &[Service::Dataselect],
            None,
            false,
        )
        .unwrap();

        assert_eq!(merge.len(), 1);
        let entry = &merge.entries()[0];
        assert_eq!(entry.params.len(), 4);

        // The emitted windows are the four declared epochs, disjoint and in
        // candidate order.
        for pair in entry.params.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn test_single_route_with_literal_codes() {
        let snapshot = sample_snapshot();
        let stream = Stream::new("CH", "LIENZ", "*", "HHZ");
        let merge = resolve(
            &snapshot,
            &stream,
            &TimeWindow::open(),
            &[Service::Dataselect],
            None,
            false,
        )
        .unwrap();

        assert_eq!(merge.len(), 1);
        let entry = &merge.entries()[0];
        assert_eq!(entry.url, ETH_DATASELECT);
        assert_eq!(entry.params.len(), 1);
        let p = &entry.params[0];
        assert_eq!((p.net.as_str(), p.sta.as_str()), ("CH", "LIENZ"));
        assert_eq!((p.loc.as_str(), p.cha.as_str()), ("*", "HHZ"));
    }

    #[test]
    fn test_window_is_clipped_to_route() {
        let snapshot = sample_snapshot();
        let stream = Stream::new("ZE", "*", "*", "*");
        let window = TimeWindow::new(
            Some(parse_timestamp("2003-01-01").unwrap()),
            Some(parse_timestamp("2007-01-01").unwrap()),
        )
        .unwrap();
        let merge = resolve(
            &snapshot,
            &stream,
            &window,
            &[Service::Dataselect],
            None,
            false,
        )
        .unwrap();

        // Request spans the first two epochs only.
        let entry = &merge.entries()[0];
        assert_eq!(entry.params.len(), 2);
        assert_eq!(entry.params[0].start, window.start);
        assert_eq!(entry.params[1].end, window.end);
    }

    #[test]
    fn test_alternative_emits_every_priority_level() {
        let snapshot = crate::testutils::snapshot_with_alternatives();
        let (stream, window) = open_request("GE");

        let best_only = resolve(
            &snapshot,
            &stream,
            &window,
            &[Service::Dataselect],
            None,
            false,
        )
        .unwrap();
        assert_eq!(best_only.len(), 1);
        assert_eq!(best_only.entries()[0].params[0].priority, 1);

        let all = resolve(
            &snapshot,
            &stream,
            &window,
            &[Service::Dataselect],
            None,
            true,
        )
        .unwrap();
        assert_eq!(all.len(), 2);
        let mut priorities: Vec<u16> = all
            .entries()
            .iter()
            .flat_map(|e| e.params.iter().map(|p| p.priority))
            .collect();
        priorities.sort();
        assert_eq!(priorities, vec![1, 2]);
    }

    #[test]
    fn test_virtual_expansion_is_idempotent_on_concrete_nets() {
        let snapshot = sample_snapshot();
        let (stream, window) = open_request("GE");
        let once = expand_virtual(&snapshot, &stream, &window).unwrap();
        assert_eq!(once, vec![(stream.clone(), window.clone())]);
        let twice = expand_virtual(&snapshot, &once[0].0, &once[0].1).unwrap();
        assert_eq!(once, twice);
    }
}
