//! Federation harvester
//!
//! The offline side of the service: pulls routing documents and data-center
//! descriptors from the configured peers, merges them with the locally
//! authored document under the overlap policy, warms the station cache and
//! persists the snapshot. The live server only reads the result; a failed
//! peer or probe degrades freshness, never availability.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{Peer, ServiceConfig};
use crate::ingest::{IngestError, ingest_file, suffixed};
use crate::snapshot::{Snapshot, SnapshotError, SnapshotStore};
use crate::stations::{StationCache, probe};
use crate::table::{RoutingTable, Service};
use crate::vnet::VirtualNets;

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

pub struct Harvester {
    client: reqwest::Client,
    baseurl: String,
    workdir: PathBuf,
    routing_file: PathBuf,
    datacenter_file: Option<PathBuf>,
    peers: Vec<Peer>,
    allow_overlaps: bool,
}

impl Harvester {
    pub fn new(config: &ServiceConfig) -> Self {
        let workdir = config
            .routing_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Harvester {
            client: reqwest::Client::new(),
            baseurl: config.baseurl.trim_end_matches('/').to_string(),
            workdir,
            routing_file: config.routing_file.clone(),
            datacenter_file: config.datacenter_file.clone(),
            peers: config.synchronize.clone(),
            allow_overlaps: config.allow_overlap,
        }
    }

    /// Runs one full harvest and persists the snapshot next to the base
    /// routing document. Peer failures are logged and skipped.
    pub async fn run(&self) -> Result<Snapshot, HarvestError> {
        let mut routing = RoutingTable::new();
        let mut vnets = VirtualNets::new();
        let mut datacenters = Vec::new();

        if self.routing_file.exists() {
            match ingest_file(&self.routing_file, self.allow_overlaps) {
                Ok((table, nets)) => {
                    routing = table;
                    vnets = nets;
                }
                Err(err) => warn!(
                    "base routing document {} unusable: {err}",
                    self.routing_file.display()
                ),
            }
        }
        if let Some(path) = &self.datacenter_file {
            match fs::read_to_string(path) {
                Ok(descriptor) => datacenters.push(descriptor),
                Err(err) => warn!("local descriptor {} unreadable: {err}", path.display()),
            }
        }

        for peer in &self.peers {
            // Misconfiguration guard: never synchronize with ourselves.
            if peer.url == self.baseurl {
                info!("peer {} is this service, skipping", peer.dcid);
                continue;
            }
            if let Err(err) = self
                .sync_peer(peer, &mut routing, &mut vnets, &mut datacenters)
                .await
            {
                warn!("peer {} at {} skipped: {err}", peer.dcid, peer.url);
            }
        }

        let stations = self.build_station_cache(&routing).await;

        let snapshot = Snapshot {
            routing,
            stations,
            vnets,
            datacenters,
        };
        SnapshotStore::for_routing_file(&self.routing_file).store(&snapshot)?;
        info!(
            "harvest complete: {} stream keys, {} virtual networks, {} data centers",
            snapshot.routing.len(),
            snapshot.vnets.len(),
            snapshot.datacenters.len()
        );
        Ok(snapshot)
    }

    /// Pulls one peer's routing document and descriptor, then merges whatever
    /// ended up installed on disk. A failed download leaves the previous
    /// files, and their content, in effect.
    async fn sync_peer(
        &self,
        peer: &Peer,
        routing: &mut RoutingTable,
        vnets: &mut VirtualNets,
        datacenters: &mut Vec<String>,
    ) -> Result<(), HarvestError> {
        let xml_path = self.workdir.join(format!("routing-{}.xml", peer.dcid));
        if let Err(err) = self.download(&format!("{}/localconfig", peer.url), &xml_path).await {
            warn!("routing document fetch from {} failed: {err}", peer.dcid);
        }

        let json_path = self.workdir.join(format!("routing-{}.json", peer.dcid));
        if let Err(err) = self.download(&format!("{}/dc", peer.url), &json_path).await {
            warn!("descriptor fetch from {} failed: {err}", peer.dcid);
        }

        if xml_path.exists() {
            // An unusable routing document must not block the descriptor.
            match ingest_file(&xml_path, self.allow_overlaps) {
                Ok((table, nets)) => {
                    routing.merge(table, self.allow_overlaps);
                    vnets.merge(nets);
                }
                Err(err) => warn!("routing document from {} unusable: {err}", peer.dcid),
            }
        }
        if json_path.exists() {
            datacenters.push(fs::read_to_string(&json_path)?);
        }
        Ok(())
    }

    /// Fetches `url` into `<dest>.download` and promotes it: the previous
    /// final file becomes `.bck`, the download becomes final. Nothing is
    /// touched unless the fetch succeeds.
    async fn download(&self, url: &str, dest: &Path) -> Result<(), HarvestError> {
        let response = self
            .client
            .get(url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;
        install(&body, dest)?;
        Ok(())
    }

    /// Probes the station service of every stream key that has one and
    /// indexes the results under the station URL's host.
    async fn build_station_cache(&self, routing: &RoutingTable) -> StationCache {
        let mut cache = StationCache::new();
        for (key, routes) in routing.iter() {
            // Route lists are priority-sorted; the first station route wins.
            let Some(route) = routes.iter().find(|r| r.service == Service::Station) else {
                continue;
            };
            let Some(host) = route.host() else {
                warn!("station route for {key} has an unparseable address");
                continue;
            };
            let stations = probe(&self.client, &route.address, key, &route.window).await;
            info!("{}: cached {} stations for {key}", host, stations.len());
            cache.insert(&host, key.clone(), stations);
        }
        cache
    }
}

/// Atomic install step shared by all peer artifacts: write the bytes to
/// `<dest>.download`, demote the current file to `.bck`, promote the
/// download.
fn install(body: &[u8], dest: &Path) -> std::io::Result<()> {
    let download = suffixed(dest, ".download");
    fs::write(&download, body)?;
    if dest.exists() {
        fs::rename(dest, suffixed(dest, ".bck"))?;
    }
    fs::rename(&download, dest)
}
