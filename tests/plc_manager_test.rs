// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Behaviour of the PLC data manager against a scripted bus

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_scan_station::config::{PlcConfig, SerialConfig};
use rust_scan_station::modbus::register_map::{
    default_register_table, COMPLETION_SIGNAL, FRONT_LH_DIVISION, REAR_RH_DIVISION,
};
use rust_scan_station::modbus::{ModbusTransport, RegisterMap, TransportConnector, TransportError};
use rust_scan_station::plc::{
    ConnectionState, ManagerError, PlcDataManager, PlcEvent, PlcSnapshot,
};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

const POLL_MS: u64 = 10;
const WAIT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct Bus {
    registers: HashMap<u16, u16>,
    fail_reads: bool,
    reads: usize,
    writes: Vec<(u16, u16, u8)>,
    opens: usize,
    closes: usize,
}

type SharedBus = Arc<Mutex<Bus>>;

struct FakeTransport {
    bus: SharedBus,
}

#[async_trait]
impl ModbusTransport for FakeTransport {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
        _slave_id: u8,
    ) -> Result<Vec<u16>, TransportError> {
        let mut bus = self.bus.lock().unwrap();
        bus.reads += 1;
        if bus.fail_reads {
            return Err(TransportError::NoResponse(Duration::from_millis(POLL_MS)));
        }
        Ok((address..address + count)
            .map(|reg| bus.registers.get(&reg).copied().unwrap_or(0))
            .collect())
    }

    async fn write_holding_register(
        &mut self,
        address: u16,
        value: u16,
        slave_id: u8,
    ) -> Result<(), TransportError> {
        let mut bus = self.bus.lock().unwrap();
        bus.writes.push((address, value, slave_id));
        bus.registers.insert(address, value);
        Ok(())
    }

    async fn close(&mut self) {
        self.bus.lock().unwrap().closes += 1;
    }
}

struct FakeConnector {
    bus: SharedBus,
}

#[async_trait]
impl TransportConnector for FakeConnector {
    async fn open(
        &self,
        _serial: &SerialConfig,
    ) -> Result<Box<dyn ModbusTransport>, TransportError> {
        self.bus.lock().unwrap().opens += 1;
        Ok(Box::new(FakeTransport {
            bus: self.bus.clone(),
        }))
    }
}

fn manager_with(failure_threshold: u32) -> (PlcDataManager, SharedBus) {
    let bus: SharedBus = Arc::new(Mutex::new(Bus::default()));
    let serial = SerialConfig {
        slave_id: 7,
        ..SerialConfig::default()
    };
    let settings = PlcConfig {
        poll_interval_ms: POLL_MS,
        failure_threshold,
        ..PlcConfig::default()
    };
    let manager = PlcDataManager::with_connector(
        serial,
        settings,
        RegisterMap::from_table(&default_register_table()).unwrap(),
        Arc::new(FakeConnector { bus: bus.clone() }),
    );
    (manager, bus)
}

async fn next_snapshot<F>(events: &mut broadcast::Receiver<PlcEvent>, accept: F) -> Arc<PlcSnapshot>
where
    F: Fn(&PlcSnapshot) -> bool,
{
    timeout(WAIT, async {
        loop {
            if let Ok(PlcEvent::SnapshotUpdated(snapshot)) = events.recv().await {
                if accept(&snapshot) {
                    return snapshot;
                }
            }
        }
    })
    .await
    .expect("no matching snapshot")
}

async fn link_lost(events: &mut broadcast::Receiver<PlcEvent>) {
    timeout(WAIT, async {
        loop {
            if let Ok(PlcEvent::LinkLost) = events.recv().await {
                return;
            }
        }
    })
    .await
    .expect("link never lost")
}

#[tokio::test]
async fn test_snapshot_holds_every_signal_with_latest_value() {
    let (mut manager, bus) = manager_with(3);
    bus.lock().unwrap().registers = HashMap::from([(0, 0), (1, 11), (2, 22)]);
    let mut events = manager.subscribe();
    assert!(manager.get_snapshot().is_sentinel());

    manager.connect().await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Connected);

    let snapshot = next_snapshot(&mut events, |s| s.sequence >= 3).await;
    let names: Vec<&str> = snapshot.values.keys().map(String::as_str).collect();
    assert_eq!(names, vec![COMPLETION_SIGNAL, FRONT_LH_DIVISION, REAR_RH_DIVISION]);
    assert_eq!(snapshot.get(FRONT_LH_DIVISION), Some(11));
    assert_eq!(snapshot.get(REAR_RH_DIVISION), Some(22));
    assert!(snapshot.connected);

    bus.lock().unwrap().registers.insert(1, 12);
    let updated = next_snapshot(&mut events, |s| s.get(FRONT_LH_DIVISION) == Some(12)).await;
    assert!(updated.sequence > snapshot.sequence);
    assert!(manager.get_snapshot().sequence >= updated.sequence);

    manager.disconnect().await;
}

#[tokio::test]
async fn test_contiguous_map_is_read_in_one_request() {
    let (mut manager, bus) = manager_with(3);
    let mut events = manager.subscribe();
    manager.connect().await.unwrap();
    next_snapshot(&mut events, |s| s.sequence >= 1).await;
    manager.disconnect().await;

    let bus = bus.lock().unwrap();
    let snapshots = manager.get_snapshot().sequence as usize;
    assert_eq!(bus.reads, snapshots);
}

#[tokio::test]
async fn test_link_lost_after_threshold_exactly_once() {
    let (mut manager, bus) = manager_with(3);
    let mut events = manager.subscribe();
    manager.connect().await.unwrap();
    let good = next_snapshot(&mut events, |s| s.sequence >= 1).await;

    let reads_before = {
        let mut bus = bus.lock().unwrap();
        bus.fail_reads = true;
        bus.reads
    };
    link_lost(&mut events).await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    let reads_at_loss = bus.lock().unwrap().reads;
    // Snapshots already queued may have been read before failures started
    assert!(reads_at_loss - reads_before <= 3 + 1);

    sleep(Duration::from_millis(POLL_MS * 10)).await;
    assert_eq!(bus.lock().unwrap().reads, reads_at_loss, "polling continued");
    assert_eq!(bus.lock().unwrap().closes, 1);

    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, PlcEvent::LinkLost), "LinkLost sent twice");
    }

    let stale = manager.get_snapshot();
    assert!(!stale.connected);
    assert!(stale.sequence >= good.sequence);
    assert_eq!(stale.get(FRONT_LH_DIVISION), Some(0));

    assert_eq!(
        manager.write_signal(COMPLETION_SIGNAL, 1).await,
        Err(ManagerError::NotConnected)
    );
    assert!(bus.lock().unwrap().writes.is_empty());
}

#[tokio::test]
async fn test_failed_ticks_keep_last_good_snapshot() {
    let (mut manager, bus) = manager_with(1000);
    let mut events = manager.subscribe();
    manager.connect().await.unwrap();
    next_snapshot(&mut events, |s| s.sequence >= 1).await;

    bus.lock().unwrap().fail_reads = true;
    let last_good = manager.get_snapshot();
    sleep(Duration::from_millis(POLL_MS * 10)).await;

    let current = manager.get_snapshot();
    assert_eq!(current.sequence, last_good.sequence);
    assert!(current.connected);
    assert_eq!(manager.state(), ConnectionState::Connected);

    manager.disconnect().await;
}

#[tokio::test]
async fn test_reconnect_after_loss_restores_link() {
    let (mut manager, bus) = manager_with(2);
    let mut events = manager.subscribe();
    manager.connect().await.unwrap();
    next_snapshot(&mut events, |s| s.sequence >= 1).await;

    bus.lock().unwrap().fail_reads = true;
    link_lost(&mut events).await;

    bus.lock().unwrap().fail_reads = false;
    manager.connect().await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Connected);

    let restored = timeout(WAIT, async {
        loop {
            if let Ok(PlcEvent::LinkRestored) = events.recv().await {
                return;
            }
        }
    })
    .await;
    assert!(restored.is_ok(), "LinkRestored not sent");

    let fresh = next_snapshot(&mut events, |s| s.connected).await;
    assert!(fresh.sequence >= 2);
    assert_eq!(bus.lock().unwrap().opens, 2);

    manager.disconnect().await;
}

#[tokio::test]
async fn test_writes_reach_the_bus_with_configured_slave() {
    let (mut manager, bus) = manager_with(3);
    let mut events = manager.subscribe();
    manager.connect().await.unwrap();

    manager.write_signal(COMPLETION_SIGNAL, 1).await.unwrap();
    assert_eq!(bus.lock().unwrap().writes, vec![(0, 1, 7)]);

    let seen = next_snapshot(&mut events, |s| s.get(COMPLETION_SIGNAL) == Some(1)).await;
    assert!(seen.connected);

    manager.disconnect().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(!manager.get_snapshot().connected);
    assert_eq!(
        manager.write_signal(COMPLETION_SIGNAL, 0).await,
        Err(ManagerError::NotConnected)
    );
    assert_eq!(bus.lock().unwrap().writes.len(), 1);
}

#[tokio::test]
async fn test_simulation_never_touches_transport() {
    let (mut manager, bus) = manager_with(3);
    let mut events = manager.subscribe();
    manager.enable_simulation().await;
    assert_eq!(manager.state(), ConnectionState::SimulatedConnected);

    for sequence in 1..=3u64 {
        let snapshot = next_snapshot(&mut events, |s| s.sequence == sequence).await;
        assert_eq!(snapshot.get(FRONT_LH_DIVISION), Some(sequence as u16));
        assert_eq!(snapshot.get(REAR_RH_DIVISION), Some(sequence as u16));
        assert_eq!(snapshot.get(COMPLETION_SIGNAL), Some(0));
        assert!(snapshot.connected);
    }

    manager.write_signal(COMPLETION_SIGNAL, 1).await.unwrap();
    let written = next_snapshot(&mut events, |s| s.get(COMPLETION_SIGNAL) == Some(1)).await;
    assert!(written.sequence > 3);

    manager.disable_simulation().await.unwrap();
    let bus = bus.lock().unwrap();
    assert_eq!(bus.opens, 0);
    assert_eq!(bus.reads, 0);
    assert!(bus.writes.is_empty());
}

#[tokio::test]
async fn test_override_lands_in_exactly_the_next_snapshot() {
    let (mut manager, _bus) = manager_with(3);
    let mut events = manager.subscribe();
    manager.enable_simulation().await;
    next_snapshot(&mut events, |s| s.sequence >= 2).await;

    let before = manager.get_snapshot().sequence;
    manager
        .set_simulated_override(FRONT_LH_DIVISION, 5000)
        .await
        .unwrap();
    let acknowledged = manager.get_snapshot().sequence;

    let forced = next_snapshot(&mut events, |s| {
        s.sequence > before && s.get(FRONT_LH_DIVISION) == Some(5000)
    })
    .await;
    // The override is applied by the first cycle after the acknowledgement
    assert!(forced.sequence == acknowledged || forced.sequence == acknowledged + 1);
    assert_eq!(forced.get(REAR_RH_DIVISION), Some(forced.sequence as u16));

    let following = next_snapshot(&mut events, |s| s.sequence == forced.sequence + 1).await;
    assert_eq!(
        following.get(FRONT_LH_DIVISION),
        Some(following.sequence as u16)
    );

    manager.disconnect().await;
}
