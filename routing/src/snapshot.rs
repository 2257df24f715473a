//! Snapshot lifecycle
//!
//! The snapshot is the immutable quadruple the resolver serves from: routing
//! table, station cache, virtual-network table and data-center descriptors.
//! The harvester builds it off-path and persists it next to the base routing
//! document; the live server only ever reads. Publication is a single pointer
//! swap, so in-flight resolutions finish against the snapshot they started
//! with.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::info;

use crate::ingest::suffixed;
use crate::stations::StationCache;
use crate::table::RoutingTable;
use crate::vnet::VirtualNets;

#[derive(thiserror::Error, Debug)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Everything a resolution needs, in one immutable unit. Data-center
/// descriptors are kept as the raw JSON text fetched from the peers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub routing: RoutingTable,
    pub stations: StationCache,
    pub vnets: VirtualNets,
    pub datacenters: Vec<String>,
}

/// Binary persistence for snapshots, stored as `<base-xml>.bin`.
pub struct SnapshotStore {
    path: PathBuf,
    config: bincode::config::Configuration,
}

impl SnapshotStore {
    /// Store whose file sits next to the given routing document.
    pub fn for_routing_file(routing_xml: &Path) -> Self {
        SnapshotStore {
            path: suffixed(routing_xml, ".bin"),
            config: bincode::config::standard(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<Snapshot, SnapshotError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let snapshot = bincode::serde::decode_from_std_read(&mut reader, self.config)?;
        Ok(snapshot)
    }

    /// Replaces the persisted snapshot. The previous file is removed first;
    /// the atomic rename of the fresh file is the harvester's completion
    /// signal.
    pub fn store(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        let tmp = suffixed(&self.path, ".download");
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            let size = bincode::serde::encode_into_std_write(snapshot, &mut writer, self.config)?;
            info!("wrote snapshot to {} ({size} bytes)", tmp.display());
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// The one shared mutable cell of the read path: the current snapshot
/// pointer. Readers clone the `Arc` once at entry and resolve lock-free
/// against it; the refresh worker swaps in replacements built off-path.
#[derive(Clone)]
pub struct RoutingState {
    inner: Arc<StateInner>,
}

struct StateInner {
    snapshot: RwLock<Arc<Snapshot>>,
    // Set once any snapshot has been published; checked by readers.
    ready: AtomicBool,
    // Single-flight guard so concurrent refreshes share one build.
    build_lock: Semaphore,
}

impl RoutingState {
    pub fn new(snapshot: Snapshot) -> Self {
        let state = RoutingState::empty();
        state.publish(snapshot);
        state
    }

    pub fn empty() -> Self {
        RoutingState {
            inner: Arc::new(StateInner {
                snapshot: RwLock::new(Arc::new(Snapshot::default())),
                ready: AtomicBool::new(false),
                build_lock: Semaphore::new(1),
            }),
        }
    }

    /// The snapshot to resolve against. Callers hold the returned `Arc` for
    /// the whole resolution; a concurrent swap does not affect them.
    pub fn current(&self) -> Arc<Snapshot> {
        self.inner.snapshot.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Relaxed)
    }

    /// Atomically swaps in a new snapshot. The old one is dropped once the
    /// last in-flight reader releases it.
    pub fn publish(&self, snapshot: Snapshot) {
        *self.inner.snapshot.write() = Arc::new(snapshot);
        self.inner.ready.store(true, Ordering::Relaxed);
    }

    /// Grants the exclusive right to build a replacement snapshot. Concurrent
    /// callers wait and then observe the published result instead of building
    /// their own.
    pub async fn begin_build(&self) -> SemaphorePermit<'_> {
        // The semaphore is never closed, so acquisition cannot fail.
        match self.inner.build_lock.acquire().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("build lock closed"),
        }
    }
}
