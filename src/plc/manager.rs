// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! PLC data synchronization manager and its poll loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::simulation::SimulatedPlc;
use super::source::{HardwareSource, SignalSource};
use super::{ConnectionState, ManagerError, PlcEvent, PlcSnapshot};
use crate::config::{Config, PlcConfig, SerialConfig};
use crate::modbus::{RegisterMap, RegisterSpec, SerialConnector, TransportConnector, TransportError};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Requests handled by the poll loop between two I/O calls
enum Command {
    Write {
        spec: RegisterSpec,
        value: u16,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Override {
        name: String,
        value: u16,
        reply: oneshot::Sender<Result<(), ManagerError>>,
    },
    Stop,
}

struct PollWorker {
    commands: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
}

/// Keeps the current [`PlcSnapshot`] fresh and forwards signal writes.
///
/// Reads never block: [`get_snapshot`](Self::get_snapshot) returns the last
/// published snapshot, or the sentinel before the first successful poll.
/// Per-tick failures are absorbed by the poll loop and only surface as a
/// [`PlcEvent::LinkLost`] once `failure_threshold` consecutive cycles failed.
pub struct PlcDataManager {
    serial: SerialConfig,
    settings: PlcConfig,
    map: Arc<RegisterMap>,
    connector: Arc<dyn TransportConnector>,
    state: Arc<watch::Sender<ConnectionState>>,
    snapshot: Arc<watch::Sender<Arc<PlcSnapshot>>>,
    events: broadcast::Sender<PlcEvent>,
    link_lost: Arc<AtomicBool>,
    worker: Option<PollWorker>,
}

impl PlcDataManager {
    /// Manager talking to the serial device described by `serial`
    pub fn new(serial: SerialConfig, settings: PlcConfig, map: RegisterMap) -> Self {
        Self::with_connector(serial, settings, map, Arc::new(SerialConnector))
    }

    /// Manager opening its transport through `connector`
    pub fn with_connector(
        serial: SerialConfig,
        settings: PlcConfig,
        map: RegisterMap,
        connector: Arc<dyn TransportConnector>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (snapshot, _) = watch::channel(Arc::new(PlcSnapshot::not_connected()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            serial,
            settings,
            map: Arc::new(map),
            connector,
            state: Arc::new(state),
            snapshot: Arc::new(snapshot),
            events,
            link_lost: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.serial.clone(),
            config.plc.clone(),
            config.register_map()?,
        ))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Most recently published snapshot
    pub fn get_snapshot(&self) -> Arc<PlcSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn watch_snapshots(&self) -> watch::Receiver<Arc<PlcSnapshot>> {
        self.snapshot.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlcEvent> {
        self.events.subscribe()
    }

    pub fn register_map(&self) -> &RegisterMap {
        &self.map
    }

    pub fn serial(&self) -> &SerialConfig {
        &self.serial
    }

    /// Open the serial link and start polling.
    ///
    /// Connecting while already connected is a no-op. Fails with
    /// [`ManagerError::SimulationActive`] while the simulator runs.
    pub async fn connect(&mut self) -> Result<(), ManagerError> {
        match self.state() {
            ConnectionState::SimulatedConnected => return Err(ManagerError::SimulationActive),
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }
        // A worker may remain from a loop that stopped after a lost link
        self.stop_worker().await;

        set_state(&self.state, ConnectionState::Connecting);
        let transport = match self.connector.open(&self.serial).await {
            Ok(transport) => transport,
            Err(err) => {
                error!("Failed to open {}: {}", self.serial.port, err);
                set_state(&self.state, ConnectionState::Disconnected);
                return Err(err.into());
            }
        };

        set_state(&self.state, ConnectionState::Connected);
        self.spawn_worker(Box::new(HardwareSource::new(
            transport,
            self.serial.slave_id,
        )));

        if self.link_lost.swap(false, Ordering::SeqCst) {
            info!("PLC link restored");
            let _ = self.events.send(PlcEvent::LinkRestored);
        }
        Ok(())
    }

    /// Stop polling and release the link. Idempotent.
    pub async fn disconnect(&mut self) {
        self.stop_worker().await;
        if self.state() != ConnectionState::Disconnected {
            set_state(&self.state, ConnectionState::Disconnected);
            publish_disconnected(&self.snapshot);
        }
    }

    /// Replace the serial link with the simulator
    pub async fn enable_simulation(&mut self) {
        if self.state() == ConnectionState::SimulatedConnected {
            return;
        }
        self.stop_worker().await;
        set_state(&self.state, ConnectionState::SimulatedConnected);
        self.spawn_worker(Box::new(SimulatedPlc::new()));
    }

    /// Stop the simulator, leaving the manager disconnected
    pub async fn disable_simulation(&mut self) -> Result<(), ManagerError> {
        if self.state() != ConnectionState::SimulatedConnected {
            return Err(ManagerError::NotSimulated);
        }
        self.disconnect().await;
        Ok(())
    }

    /// Force `value` into the next simulated snapshot only
    pub async fn set_simulated_override(&self, name: &str, value: u16) -> Result<(), ManagerError> {
        if !self.map.contains(name) {
            return Err(ManagerError::UnknownSignal(name.to_string()));
        }
        if self.state() != ConnectionState::SimulatedConnected {
            return Err(ManagerError::NotSimulated);
        }
        let (reply, response) = oneshot::channel();
        self.send(Command::Override {
            name: name.to_string(),
            value,
            reply,
        })?;
        response.await.map_err(|_| ManagerError::NotSimulated)?
    }

    /// Write one signal through the poll loop's source.
    ///
    /// Waits for at most one transport call. Never retried automatically;
    /// a failed write does not count toward the link failure threshold.
    pub async fn write_signal(&self, name: &str, value: u16) -> Result<(), ManagerError> {
        let spec = self
            .map
            .get(name)
            .ok_or_else(|| ManagerError::UnknownSignal(name.to_string()))?;
        if !spec.access.is_writable() {
            return Err(ManagerError::ReadOnlySignal(name.to_string()));
        }
        if !self.state().is_active() {
            return Err(ManagerError::NotConnected);
        }

        let (reply, response) = oneshot::channel();
        self.send(Command::Write {
            spec: spec.clone(),
            value,
            reply,
        })?;
        match response.await {
            Ok(result) => result.map_err(|err| {
                warn!("Write of {} to '{}' failed: {}", value, name, err);
                ManagerError::from(err)
            }),
            Err(_) => Err(ManagerError::NotConnected),
        }
    }

    /// Stop the poll loop, waiting for any in-flight I/O call to complete
    pub async fn shutdown(&mut self) {
        info!("Shutting down PLC data manager");
        self.disconnect().await;
    }

    fn send(&self, command: Command) -> Result<(), ManagerError> {
        self.worker
            .as_ref()
            .ok_or(ManagerError::NotConnected)?
            .commands
            .send(command)
            .map_err(|_| ManagerError::NotConnected)
    }

    fn spawn_worker(&mut self, source: Box<dyn SignalSource>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let poll_loop = PollLoop {
            source,
            map: Arc::clone(&self.map),
            poll_interval: self.settings.poll_interval(),
            failure_threshold: self.settings.failure_threshold.max(1),
            state: Arc::clone(&self.state),
            snapshot: Arc::clone(&self.snapshot),
            events: self.events.clone(),
            link_lost: Arc::clone(&self.link_lost),
            commands: receiver,
        };
        let handle = tokio::spawn(poll_loop.run());
        self.worker = Some(PollWorker { commands, handle });
    }

    async fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.commands.send(Command::Stop);
            if let Err(err) = worker.handle.await {
                error!("PLC poll task ended abnormally: {}", err);
            }
        }
    }
}

fn set_state(state: &watch::Sender<ConnectionState>, next: ConnectionState) {
    let previous = state.send_replace(next);
    if previous != next {
        info!("PLC connection state: {} -> {}", previous, next);
    }
}

fn publish_disconnected(snapshot: &watch::Sender<Arc<PlcSnapshot>>) {
    snapshot.send_modify(|current| {
        if current.connected {
            *current = Arc::new(current.disconnected());
        }
    });
}

/// Single owner of the signal source
struct PollLoop {
    source: Box<dyn SignalSource>,
    map: Arc<RegisterMap>,
    poll_interval: Duration,
    failure_threshold: u32,
    state: Arc<watch::Sender<ConnectionState>>,
    snapshot: Arc<watch::Sender<Arc<PlcSnapshot>>>,
    events: broadcast::Sender<PlcEvent>,
    link_lost: Arc<AtomicBool>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl PollLoop {
    async fn run(mut self) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures: u32 = 0;
        debug!(
            "Poll loop started ({}, every {:?})",
            if self.source.is_simulated() {
                "simulated"
            } else {
                "hardware"
            },
            self.poll_interval
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Write { spec, value, reply }) => {
                        let result = self.source.write(&spec, value).await;
                        if result.is_ok() {
                            info!("Wrote {} to '{}'", value, spec.name);
                        }
                        let _ = reply.send(result);
                    }
                    Some(Command::Override { name, value, reply }) => {
                        let _ = reply.send(self.source.set_override(&name, value));
                    }
                    Some(Command::Stop) | None => break,
                },
                _ = ticker.tick() => {
                    if self.poll(&mut failures).await {
                        break;
                    }
                }
            }
        }

        self.source.close().await;
        debug!("Poll loop stopped");
    }

    /// Run one poll cycle; returns `true` once the link is declared lost
    async fn poll(&mut self, failures: &mut u32) -> bool {
        match self.source.read_all(&self.map).await {
            Ok(values) => {
                *failures = 0;
                let sequence = self.snapshot.borrow().sequence + 1;
                let snapshot = Arc::new(PlcSnapshot::new(sequence, values));
                debug!("Snapshot {}: {:?}", sequence, snapshot.values);
                self.snapshot.send_replace(Arc::clone(&snapshot));
                let _ = self.events.send(PlcEvent::SnapshotUpdated(snapshot));
                false
            }
            Err(err) => {
                *failures += 1;
                warn!(
                    "Poll cycle failed ({}/{}): {}",
                    failures, self.failure_threshold, err
                );
                if *failures < self.failure_threshold {
                    return false;
                }
                error!(
                    "PLC link lost after {} consecutive failures",
                    self.failure_threshold
                );
                set_state(&self.state, ConnectionState::Disconnected);
                publish_disconnected(&self.snapshot);
                self.link_lost.store(true, Ordering::SeqCst);
                let _ = self.events.send(PlcEvent::LinkLost);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use mockall::predicate::eq;

    use super::*;
    use crate::modbus::register_map::{
        default_register_table, COMPLETION_SIGNAL, FRONT_LH_DIVISION,
    };
    use crate::modbus::transport::MockModbusTransport;
    use crate::modbus::ModbusTransport;

    /// Hands out one prepared transport
    struct OnceConnector(Mutex<Option<Box<dyn ModbusTransport>>>);

    #[async_trait]
    impl TransportConnector for OnceConnector {
        async fn open(
            &self,
            serial: &SerialConfig,
        ) -> Result<Box<dyn ModbusTransport>, TransportError> {
            self.0
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| TransportError::PortUnavailable(serial.port.clone()))
        }
    }

    fn manager(transport: Option<MockModbusTransport>) -> PlcDataManager {
        let settings = PlcConfig {
            poll_interval_ms: 10,
            failure_threshold: 3,
            ..PlcConfig::default()
        };
        let connector = OnceConnector(Mutex::new(
            transport.map(|t| Box::new(t) as Box<dyn ModbusTransport>),
        ));
        PlcDataManager::with_connector(
            SerialConfig::default(),
            settings,
            RegisterMap::from_table(&default_register_table()).unwrap(),
            Arc::new(connector),
        )
    }

    #[tokio::test]
    async fn test_write_while_disconnected_never_reaches_transport() {
        let mut transport = MockModbusTransport::new();
        transport.expect_write_holding_register().never();
        transport.expect_read_holding_registers().never();
        let manager = manager(Some(transport));

        assert_eq!(
            manager.write_signal(COMPLETION_SIGNAL, 1).await,
            Err(ManagerError::NotConnected)
        );
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.get_snapshot().is_sentinel());
    }

    #[tokio::test]
    async fn test_write_checks_signal_before_state() {
        let manager = manager(None);
        assert_eq!(
            manager.write_signal("missing", 1).await,
            Err(ManagerError::UnknownSignal("missing".to_string()))
        );
        assert_eq!(
            manager.write_signal(FRONT_LH_DIVISION, 1).await,
            Err(ManagerError::ReadOnlySignal(FRONT_LH_DIVISION.to_string()))
        );
    }

    #[tokio::test]
    async fn test_write_is_forwarded_to_transport() {
        let mut transport = MockModbusTransport::new();
        transport
            .expect_read_holding_registers()
            .returning(|_, count, _| Ok(vec![0; count as usize]));
        transport
            .expect_write_holding_register()
            .with(eq(0), eq(1), eq(1))
            .times(1)
            .returning(|_, _, _| Ok(()));
        transport.expect_close().times(1).return_const(());

        let mut manager = manager(Some(transport));
        manager.connect().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);

        manager.write_signal(COMPLETION_SIGNAL, 1).await.unwrap();
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_write_failure_is_reported_to_caller() {
        let mut transport = MockModbusTransport::new();
        transport
            .expect_read_holding_registers()
            .returning(|_, count, _| Ok(vec![0; count as usize]));
        transport
            .expect_write_holding_register()
            .times(1)
            .returning(|_, _, _| Err(TransportError::ExceptionResponse(4)));
        transport.expect_close().return_const(());

        let mut manager = manager(Some(transport));
        manager.connect().await.unwrap();

        assert_eq!(
            manager.write_signal(COMPLETION_SIGNAL, 1).await,
            Err(ManagerError::Transport(TransportError::ExceptionResponse(4)))
        );
        assert_eq!(manager.state(), ConnectionState::Connected);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_open_returns_to_disconnected() {
        let mut manager = manager(None);
        assert!(matches!(
            manager.connect().await,
            Err(ManagerError::Transport(TransportError::PortUnavailable(_)))
        ));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_refused_while_simulated() {
        let mut manager = manager(None);
        manager.enable_simulation().await;
        assert_eq!(
            manager.connect().await,
            Err(ManagerError::SimulationActive)
        );
        manager.disable_simulation().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(
            manager.disable_simulation().await,
            Err(ManagerError::NotSimulated)
        );
    }

    #[tokio::test]
    async fn test_override_requires_simulation() {
        let manager = manager(None);
        assert_eq!(
            manager.set_simulated_override(FRONT_LH_DIVISION, 1).await,
            Err(ManagerError::NotSimulated)
        );
        assert_eq!(
            manager.set_simulated_override("missing", 1).await,
            Err(ManagerError::UnknownSignal("missing".to_string()))
        );
    }
}
