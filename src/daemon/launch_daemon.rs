// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::{Config, StartupMode};
use crate::plc::PlcEvent;
use crate::scan::ScanEvent;
use crate::station::Station;

/// Delay after which a monitor re-checks the running flag when idle
const MONITOR_POLL: Duration = Duration::from_millis(250);
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);

/// Background tasks of the operator binary
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Bring the PLC link up according to the startup mode and start the
    /// monitoring tasks
    pub async fn launch(&mut self, config: &Config, station: &mut Station) -> Result<()> {
        self.apply_startup_mode(config.plc.mode, station).await;

        self.start_plc_monitor(station.plc().subscribe())?;
        self.start_scan_monitor(station.verifier().subscribe())?;
        self.start_heartbeat(station)?;

        Ok(())
    }

    /// A failed hardware connection is not fatal: the operator may connect
    /// later or switch to simulation.
    async fn apply_startup_mode(&self, mode: StartupMode, station: &mut Station) {
        match mode {
            StartupMode::Hardware => {
                let port = station.plc().serial().port.clone();
                info!("Connecting to PLC on {}", port);
                if let Err(err) = station.plc_mut().connect().await {
                    error!("PLC connection on {} failed: {}", port, err);
                }
            }
            StartupMode::Simulation => {
                info!("Starting in simulation mode");
                station.plc_mut().enable_simulation().await;
            }
            StartupMode::Idle => {
                info!("PLC link left disconnected until requested");
            }
        }
    }

    /// Log PLC link transitions and snapshots
    fn start_plc_monitor(&mut self, events: broadcast::Receiver<PlcEvent>) -> Result<()> {
        debug!("Starting PLC event monitor");

        let running = self.running.clone();
        let task = tokio::spawn(monitor(running, events, |event| match event {
            PlcEvent::LinkLost => warn!("PLC link lost"),
            PlcEvent::LinkRestored => info!("PLC link restored"),
            PlcEvent::SnapshotUpdated(snapshot) => {
                debug!("PLC snapshot {}: {:?}", snapshot.sequence, snapshot.values)
            }
        }));

        self.tasks.push(task);
        Ok(())
    }

    /// Log scan verification events
    fn start_scan_monitor(&mut self, events: broadcast::Receiver<ScanEvent>) -> Result<()> {
        debug!("Starting scan event monitor");

        let running = self.running.clone();
        let task = tokio::spawn(monitor(running, events, |event| match event {
            ScanEvent::PartScanned(result) => debug!(
                "Scanned '{}': {:?}",
                result.part_number_scanned, result.verdict
            ),
            ScanEvent::SessionReady { main_part_number } => {
                info!("Unit '{}' ready for completion", main_part_number)
            }
            ScanEvent::SessionAborted { main_part_number } => {
                info!("Unit '{}' aborted", main_part_number)
            }
        }));

        self.tasks.push(task);
        Ok(())
    }

    /// Start a heartbeat task that logs the link status periodically
    fn start_heartbeat(&mut self, station: &Station) -> Result<()> {
        debug!("Starting heartbeat monitor");

        let running = self.running.clone();
        let state = station.plc().watch_state();
        let snapshots = station.plc().watch_snapshots();
        let task = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                let current = *state.borrow();
                let sequence = snapshots.borrow().sequence;
                debug!("Daemon heartbeat: PLC {} (snapshot {})", current, sequence);
                sleep_while_running(&running, HEARTBEAT_PERIOD).await;
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Stop all running tasks
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Wait for all tasks to complete
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            match task.await {
                Ok(Err(e)) => error!("Task failed: {}", e),
                Err(e) => error!("Task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        Ok(())
    }
}

/// Drain a broadcast channel until shutdown or until every sender is gone
async fn monitor<T, F>(
    running: Arc<AtomicBool>,
    mut events: broadcast::Receiver<T>,
    handle: F,
) -> Result<()>
where
    T: Clone + Send + 'static,
    F: Fn(T) + Send + 'static,
{
    while running.load(Ordering::SeqCst) {
        match time::timeout(MONITOR_POLL, events.recv()).await {
            Ok(Ok(event)) => handle(event),
            Ok(Err(RecvError::Lagged(skipped))) => warn!("Monitor skipped {} events", skipped),
            Ok(Err(RecvError::Closed)) => break,
            Err(_) => continue,
        }
    }
    Ok(())
}

async fn sleep_while_running(running: &AtomicBool, period: Duration) {
    let mut waited = Duration::ZERO;
    while waited < period && running.load(Ordering::SeqCst) {
        time::sleep(MONITOR_POLL).await;
        waited += MONITOR_POLL;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plc::ConnectionState;

    #[tokio::test]
    async fn test_simulation_startup_and_clean_shutdown() {
        let mut config = Config::default();
        config.plc.mode = StartupMode::Simulation;
        config.plc.poll_interval_ms = 10;
        let mut station = Station::from_config(&config).unwrap();

        let mut daemon = Daemon::new();
        daemon.launch(&config, &mut station).await.unwrap();
        assert_eq!(station.plc().state(), ConnectionState::SimulatedConnected);
        assert!(daemon.is_running());

        time::sleep(Duration::from_millis(50)).await;
        daemon.shutdown();
        time::timeout(Duration::from_secs(2), daemon.join())
            .await
            .unwrap()
            .unwrap();
        station.shutdown().await;
        assert_eq!(station.plc().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_idle_startup_stays_disconnected() {
        let mut config = Config::default();
        config.plc.mode = StartupMode::Idle;
        let mut station = Station::from_config(&config).unwrap();

        let mut daemon = Daemon::new();
        daemon.launch(&config, &mut station).await.unwrap();
        assert_eq!(station.plc().state(), ConnectionState::Disconnected);
        daemon.shutdown();
        daemon.join().await.unwrap();
    }
}
