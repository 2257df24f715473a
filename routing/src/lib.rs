//! Federated routing service for distributed seismological data centers.
//!
//! The crate resolves wildcarded stream requests into per-data-center
//! sub-requests against an immutable snapshot of the federation's routing
//! state. The snapshot is built by the harvester, persisted next to the base
//! routing document and swapped atomically under the readers.

use chrono::{DateTime, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

pub mod api;
pub mod config;
pub mod harvest;
pub mod ingest;
pub mod merge;
pub mod render;
pub mod resolver;
pub mod snapshot;
pub mod stations;
pub mod stream;
pub mod table;
pub mod vnet;
pub mod window;

#[cfg(test)]
pub mod testutils;

use crate::api::AppState;
use crate::config::Config;
use crate::harvest::{Harvester, HarvestError};
use crate::snapshot::{RoutingState, SnapshotStore};

#[derive(thiserror::Error, Debug)]
pub enum ServeError {
    #[error("harvest failed: {0}")]
    Harvest(#[from] HarvestError),

    #[error("API error: {0}")]
    Api(#[from] api::ApiError),
}

/// Commands understood by the refresh worker.
#[derive(Debug)]
pub enum Command {
    // Trigger a harvest outside the normal schedule. The worker sends the
    // result when the attempt finishes.
    Refresh(oneshot::Sender<Result<(), HarvestError>>),
    // Trigger the worker to shut down gracefully.
    Shutdown,
}

/// Loads or builds the snapshot, starts the refresh worker and serves the
/// query API until the process ends.
pub async fn run(config: Config) -> Result<(), ServeError> {
    let store = SnapshotStore::for_routing_file(&config.service.routing_file);
    let harvester = Harvester::new(&config.service);

    let snapshot = match store.load() {
        Ok(snapshot) => {
            info!("loaded snapshot from {}", store.path().display());
            snapshot
        }
        Err(err) => {
            info!("no usable snapshot ({err}); harvesting before startup");
            harvester.run().await?
        }
    };
    let state = RoutingState::new(snapshot);

    let (tx, rx) = mpsc::channel::<Command>(8);
    let update_times: Vec<NaiveTime> = config
        .service
        .update_time
        .iter()
        .filter_map(|raw| NaiveTime::parse_from_str(raw, "%H:%M").ok())
        .collect();
    let worker_state = state.clone();
    tokio::spawn(async move {
        run_refresh_worker(worker_state, harvester, update_times, rx).await;
    });

    let app = Arc::new(AppState {
        routing: state,
        refresh: tx,
        routing_file: config.service.routing_file.clone(),
        datacenter_file: config.service.datacenter_file.clone(),
    });
    api::serve(&config.listener, app).await?;
    Ok(())
}

/// Sleeps until the next configured `HH:MM` instant and re-harvests, or
/// handles an on-demand refresh command. Runs until shutdown.
async fn run_refresh_worker(
    state: RoutingState,
    harvester: Harvester,
    update_times: Vec<NaiveTime>,
    mut rx: mpsc::Receiver<Command>,
) {
    loop {
        let delay = next_update_delay(&update_times, Utc::now());
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                let _ = refresh(&state, &harvester).await;
            }
            cmd = rx.recv() => match cmd {
                Some(Command::Refresh(done)) => {
                    let _ = done.send(refresh(&state, &harvester).await);
                }
                Some(Command::Shutdown) | None => break,
            },
        }
    }
}

/// Builds a replacement snapshot off-path and swaps it in. Single-flight:
/// concurrent refreshes wait for the running build instead of starting
/// another.
async fn refresh(state: &RoutingState, harvester: &Harvester) -> Result<(), HarvestError> {
    let _permit = state.begin_build().await;
    match harvester.run().await {
        Ok(snapshot) => {
            state.publish(snapshot);
            info!("refreshed snapshot published");
            Ok(())
        }
        Err(err) => {
            // Keep serving the stale snapshot.
            warn!("refresh failed, keeping previous snapshot: {err}");
            Err(err)
        }
    }
}

/// Time until the next `HH:MM` instant, taking the earliest across the list.
/// Without configured instants the worker sleeps a day at a time and only
/// reacts to commands.
fn next_update_delay(update_times: &[NaiveTime], now: DateTime<Utc>) -> Duration {
    let mut best: Option<chrono::TimeDelta> = None;
    for time in update_times {
        let mut candidate = now.date_naive().and_time(*time).and_utc();
        if candidate <= now {
            candidate = candidate + chrono::Days::new(1);
        }
        let delta = candidate - now;
        if best.is_none_or(|b| delta < b) {
            best = Some(delta);
        }
    }
    best.and_then(|d| d.to_std().ok())
        .unwrap_or(Duration::from_secs(24 * 60 * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::window::parse_timestamp;

    #[test]
    fn test_next_update_delay() {
        let now = parse_timestamp("2026-08-30T10:00:00Z").unwrap();
        let times = vec![
            NaiveTime::parse_from_str("03:00", "%H:%M").unwrap(),
            NaiveTime::parse_from_str("12:30", "%H:%M").unwrap(),
        ];

        // 12:30 today is the nearest instant.
        assert_eq!(
            next_update_delay(&times, now),
            Duration::from_secs(2 * 3600 + 30 * 60)
        );

        // After the last instant of the day, tomorrow's earliest wins.
        let late = parse_timestamp("2026-08-30T23:00:00Z").unwrap();
        assert_eq!(next_update_delay(&times, late), Duration::from_secs(4 * 3600));

        // No schedule: a bounded default keeps the worker responsive.
        assert_eq!(
            next_update_delay(&[], now),
            Duration::from_secs(24 * 60 * 60)
        );
    }

    #[tokio::test]
    async fn test_refresh_command_publishes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let routing_file = dir.path().join("routing.xml");
        std::fs::write(
            &routing_file,
            r#"<routing>
                <route networkCode="GE">
                    <dataselect address="http://example.org/fdsnws/dataselect/1/query" priority="1"/>
                </route>
            </routing>"#,
        )
        .unwrap();

        let config = ServiceConfig {
            baseurl: "http://127.0.0.1:3000".into(),
            routing_file,
            datacenter_file: None,
            synchronize: Vec::new(),
            allow_overlap: false,
            verbosity: None,
            update_time: Vec::new(),
        };
        let state = RoutingState::empty();
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(run_refresh_worker(
            state.clone(),
            Harvester::new(&config),
            Vec::new(),
            rx,
        ));

        let (done, result) = oneshot::channel();
        tx.send(Command::Refresh(done)).await.unwrap();
        result.await.unwrap().unwrap();
        assert!(state.is_ready());
        assert_eq!(state.current().routing.len(), 1);

        tx.send(Command::Shutdown).await.unwrap();
    }
}
