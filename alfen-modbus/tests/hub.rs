use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeDelta};

use alfen_modbus::error::Error;
use alfen_modbus::registers::{ProductBlock, SocketEnergyBlock, SocketStatusBlock, StationStatusBlock};
use alfen_modbus::simulator::{Request, Station};
use alfen_modbus::snapshot::{SocketField, StationField};
use alfen_modbus::{CycleOutcome, Hub, HubConfig, HubState, Socket, Value};

const STATION: u8 = 200;

fn start_time() -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339("2024-03-01T12:00:00+01:00").unwrap()
}

fn config(read_scn: bool, read_socket_2: bool) -> HubConfig {
    HubConfig {
        read_scn,
        read_socket_2,
        ..HubConfig::new("simulator")
    }
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&alfen_modbus::Snapshot) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let handle = count.clone();
    (count, move |_: &alfen_modbus::Snapshot| {
        handle.fetch_add(1, Ordering::SeqCst);
    })
}

fn update_station(station: &Station, f: impl FnOnce(&mut ProductBlock)) {
    let mut product = station.block::<ProductBlock>(STATION).unwrap();
    f(&mut product);
    station.set_block(STATION, &product);
}

fn update_socket(station: &Station, unit: u8, f: impl FnOnce(&mut SocketEnergyBlock, &mut SocketStatusBlock)) {
    let mut energy = station.block::<SocketEnergyBlock>(unit).unwrap();
    let mut status = station.block::<SocketStatusBlock>(unit).unwrap();
    f(&mut energy, &mut status);
    station.set_block(unit, &energy);
    station.set_block(unit, &status);
}

fn units_read(station: &Station) -> Vec<u8> {
    let mut units: Vec<u8> = station
        .requests()
        .into_iter()
        .filter_map(|request| match request {
            Request::Read { unit, .. } => Some(unit),
            Request::Write { .. } => None,
        })
        .collect();
    units.dedup();
    units
}

#[tokio::test]
async fn test_failed_sub_read_keeps_later_fields() {
    let station = Station::populated(STATION, 1, start_time());
    let hub = Hub::new(config(false, false), station.clone());
    let (updates, on_update) = counter();
    hub.subscribe(on_update).await;

    hub.poll().await.unwrap();
    assert_eq!(updates.load(Ordering::SeqCst), 1);

    let later = start_time() + TimeDelta::seconds(30);
    update_station(&station, |product| *product = product.clone().with_station_time(later));
    let mut status = station.block::<StationStatusBlock>(STATION).unwrap();
    status.board_temperature = 41.25;
    station.set_block(STATION, &status);
    update_socket(&station, 1, |energy, status| {
        energy.real_energy_delivered_sum = 1234.5;
        status.mode3_state = "C2".to_string();
    });
    station.fail_reads(1, 1200);

    let err = hub.poll().await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
    assert_eq!(updates.load(Ordering::SeqCst), 1);

    let snapshot = hub.snapshot();
    assert_eq!(
        snapshot.station(StationField::StationTime).and_then(Value::as_time),
        Some(later)
    );
    assert_eq!(
        snapshot.station(StationField::BoardTemperature).and_then(Value::as_f64),
        Some(41.25)
    );
    assert_eq!(
        snapshot.socket(Socket::One, SocketField::Mode3State).and_then(Value::as_str),
        Some("A")
    );
    assert_eq!(
        snapshot.get_by_key("socket_1_realEnergyDeliveredSum").and_then(Value::as_f64),
        Some(0.0)
    );

    station.clear_faults();
    hub.poll().await.unwrap();
    assert_eq!(updates.load(Ordering::SeqCst), 2);
    assert_eq!(
        hub.snapshot().get_by_key("socket_1_mode3state").and_then(Value::as_str),
        Some("C2")
    );
}

#[tokio::test]
async fn test_second_socket_needs_flag_and_socket_count() {
    let station = Station::populated(STATION, 2, start_time());
    let hub = Hub::new(config(false, false), station.clone());
    hub.subscribe(|_| {}).await;
    hub.poll().await.unwrap();
    assert_eq!(units_read(&station), [STATION, 1]);
    assert!(hub.snapshot().socket(Socket::Two, SocketField::Mode3State).is_none());

    let station = Station::populated(STATION, 1, start_time());
    let hub = Hub::new(config(false, true), station.clone());
    hub.subscribe(|_| {}).await;
    hub.poll().await.unwrap();
    assert_eq!(units_read(&station), [STATION, 1]);

    let station = Station::populated(STATION, 2, start_time());
    let hub = Hub::new(config(true, true), station.clone());
    hub.subscribe(|_| {}).await;
    hub.poll().await.unwrap();
    assert_eq!(units_read(&station), [STATION, 1, 2]);
    let snapshot = hub.snapshot();
    assert_eq!(snapshot.get_by_key("scnName").and_then(Value::as_str), Some("SCN1"));
    assert_eq!(
        snapshot.get_by_key("socket_2_mode3state").and_then(Value::as_str),
        Some("A")
    );
}

#[tokio::test]
async fn test_charging_session_sequence() {
    let station = Station::populated(STATION, 1, start_time());
    let hub = Hub::new(config(false, false), station.clone());
    hub.subscribe(|_| {}).await;

    let samples = [
        ("A", 1000.0),
        ("B", 1000.0),
        ("C2", 1500.25),
        ("C2", 2500.5),
        ("C2", 4000.75),
        ("A", 4000.75),
    ];
    let mut charging = vec![];
    for (i, (state, energy)) in samples.into_iter().enumerate() {
        let now = start_time() + TimeDelta::seconds(30 * i as i64);
        update_station(&station, |product| *product = product.clone().with_station_time(now));
        update_socket(&station, 1, |block, status| {
            block.real_energy_delivered_sum = energy;
            status.mode3_state = state.to_string();
        });
        hub.poll().await.unwrap();

        let snapshot = hub.snapshot();
        charging.push(
            snapshot
                .socket(Socket::One, SocketField::CarCharging)
                .and_then(Value::as_bool)
                .unwrap(),
        );
        let start_energy = snapshot
            .socket(Socket::One, SocketField::ChargingStartEnergy)
            .and_then(Value::as_f64);
        match i {
            0 | 1 => assert_eq!(start_energy, None),
            _ => assert_eq!(start_energy, Some(1500.25)),
        }
        if i == 4 {
            assert_eq!(
                snapshot
                    .socket(Socket::One, SocketField::SessionEnergy)
                    .and_then(Value::as_f64),
                Some(4000.75 - 1500.25)
            );
            assert_eq!(
                snapshot
                    .socket(Socket::One, SocketField::SessionDuration)
                    .and_then(Value::as_duration),
                Some(TimeDelta::seconds(60))
            );
            assert_eq!(
                snapshot
                    .socket(Socket::One, SocketField::ChargingStart)
                    .and_then(Value::as_time),
                Some(start_time() + TimeDelta::seconds(60))
            );
        }
        if i == 1 {
            assert_eq!(
                snapshot
                    .socket(Socket::One, SocketField::CarConnected)
                    .and_then(Value::as_bool),
                Some(true)
            );
        }
    }
    assert_eq!(charging, [false, false, true, true, true, false]);
}

#[tokio::test]
async fn test_refresh_fires_once_per_cycle_when_setpoint_expires() {
    let station = Station::populated(STATION, 2, start_time());
    let hub = Hub::new(config(false, true), station.clone());
    let (updates, on_update) = counter();
    let (refreshes, on_refresh) = counter();
    hub.subscribe_with_refresh(on_update, on_refresh).await;

    assert_eq!(
        hub.poll().await.unwrap(),
        CycleOutcome::Completed {
            refresh_requested: false
        }
    );
    assert_eq!(refreshes.load(Ordering::SeqCst), 0);

    // 30 s scan interval: refresh below 40 s
    for unit in [1, 2] {
        update_socket(&station, unit, |_, status| status.max_current_valid_time = 39);
    }
    for _ in 0..2 {
        assert_eq!(
            hub.poll().await.unwrap(),
            CycleOutcome::Completed {
                refresh_requested: true
            }
        );
    }
    assert_eq!(refreshes.load(Ordering::SeqCst), 2);
    assert_eq!(updates.load(Ordering::SeqCst), 3);

    for unit in [1, 2] {
        update_socket(&station, unit, |_, status| status.max_current_valid_time = 40);
    }
    hub.poll().await.unwrap();
    assert_eq!(refreshes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_last_unsubscribe_closes_and_next_subscribe_reconnects() {
    let station = Station::populated(STATION, 1, start_time());
    let hub = Hub::new(config(false, false), station.clone());
    assert_eq!(hub.state().await, HubState::Idle);
    assert!(!station.is_open());

    let first = hub.subscribe(|_| {}).await;
    let second = hub.subscribe(|_| {}).await;
    assert_eq!(station.connects(), 1);
    assert_eq!(hub.subscribers(), 2);

    hub.unsubscribe(first).await;
    assert!(station.is_open());
    hub.unsubscribe(second).await;
    assert!(!station.is_open());
    assert_eq!(station.closes(), 1);
    assert_eq!(hub.state().await, HubState::Idle);

    hub.subscribe(|_| {}).await;
    assert!(station.is_open());
    assert_eq!(station.connects(), 2);
    assert!(station.requests().is_empty());
    assert_eq!(hub.state().await, HubState::Active);
}

#[tokio::test]
async fn test_out_of_range_write_issues_no_request() {
    let station = Station::populated(STATION, 1, start_time());
    let hub = Hub::new(config(false, false), station.clone());
    hub.subscribe(|_| {}).await;

    assert!(hub.set_max_current(Socket::One, 40.0).await.is_err());
    assert!(hub.set_phase_mode_raw(Socket::One, 0).await.is_err());
    assert!(station.requests().is_empty());

    hub.set_max_current(Socket::One, 13.0).await.unwrap();
    assert_eq!(station.block::<SocketStatusBlock>(1).unwrap().max_current, 13.0);
}

#[tokio::test(start_paused = true)]
async fn test_cycles_and_commands_never_overlap() {
    let station = Station::populated(STATION, 2, start_time());
    station.set_read_delay(Some(Duration::from_millis(200)));
    let hub = Hub::new(config(true, true), station.clone());
    hub.subscribe(|_| {}).await;

    let (first, second, write) = tokio::join!(
        hub.poll(),
        hub.poll(),
        hub.set_max_current(Socket::Two, 10.0)
    );
    first.unwrap();
    second.unwrap();
    write.unwrap();
    assert_eq!(station.max_in_flight(), 1);
    // Two full cycles of seven reads each.
    assert_eq!(station.requests().len(), 15);
}

#[tokio::test(start_paused = true)]
async fn test_timer_polls_every_scan_interval() {
    let station = Station::populated(STATION, 1, start_time());
    let hub = Hub::new(config(false, false), station.clone());
    let (updates, on_update) = counter();
    let id = hub.subscribe(on_update).await;

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(updates.load(Ordering::SeqCst), 0);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(updates.load(Ordering::SeqCst), 1);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(updates.load(Ordering::SeqCst), 2);

    hub.unsubscribe(id).await;
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(updates.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_waits_for_cycle_in_flight() {
    let station = Station::populated(STATION, 1, start_time());
    station.set_read_delay(Some(Duration::from_secs(1)));
    let hub = Hub::new(config(false, false), station.clone());
    let id = hub.subscribe(|_| {}).await;

    let polling = hub.clone();
    let cycle = tokio::spawn(async move { polling.poll().await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    hub.unsubscribe(id).await;
    assert!(!station.is_open());
    assert!(matches!(
        cycle.await.unwrap(),
        Ok(CycleOutcome::Completed { .. })
    ));
    assert_eq!(station.requests().len(), 4);
}

#[tokio::test]
async fn test_cycle_reconnects_after_transport_fault() {
    let station = Station::populated(STATION, 1, start_time());
    let hub = Hub::new(config(false, false), station.clone());
    hub.subscribe(|_| {}).await;

    station.break_reads(1, 300);
    assert!(matches!(hub.poll().await, Err(Error::Transport(_))));
    assert!(!station.is_open());

    station.clear_faults();
    hub.poll().await.unwrap();
    assert!(station.is_open());
    assert_eq!(station.connects(), 2);
}

#[tokio::test]
async fn test_refused_connect_fails_cycles_until_station_returns() {
    let station = Station::populated(STATION, 1, start_time());
    station.refuse_connect(true);
    let hub = Hub::new(config(false, false), station.clone());
    let (updates, on_update) = counter();
    hub.subscribe(on_update).await;
    assert_eq!(hub.state().await, HubState::Active);

    assert!(matches!(hub.poll().await, Err(Error::Transport(_))));
    assert!(hub.snapshot().is_empty());

    station.refuse_connect(false);
    hub.poll().await.unwrap();
    assert_eq!(updates.load(Ordering::SeqCst), 1);
    assert_eq!(
        hub.snapshot().station(StationField::NumberOfSockets).and_then(Value::as_i64),
        Some(1)
    );
}
