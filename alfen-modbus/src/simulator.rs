use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use parking_lot::Mutex;

use crate::codec::{Address, Quantity, RegisterBlock, Word};
use crate::error::ModbusError;
use crate::registers::{
    ProductBlock, ScnBlock, SocketEnergyBlock, SocketStatusBlock, StationStatusBlock,
};
use crate::transport::{Transport, UnitId};

const ILLEGAL_DATA_ADDRESS: &str = "IllegalDataAddress";
const SERVER_DEVICE_FAILURE: &str = "ServerDeviceFailure";

#[derive(Debug, Clone, Default)]
/// Raw holding registers of a single unit.
pub struct Registers(HashMap<Address, Word>);

impl Registers {
    /// Insert new consecutive registers with `words` values starting at `addr` address.
    pub fn insert(&mut self, addr: Address, words: Vec<Word>) {
        for (i, value) in words.into_iter().enumerate() {
            let reg_addr = addr + i as Address;
            self.0.insert(reg_addr, value);
        }
    }

    /// Read `cnt` consecutive registers starting at `addr`; `None` if any of them is undefined.
    pub fn read(&self, addr: Address, cnt: Quantity) -> Option<Vec<Word>> {
        (0..cnt)
            .map(|i| self.0.get(&(addr + i)).copied())
            .collect()
    }

    /// Write `words` into existing consecutive registers starting at `addr`.
    pub fn write(&mut self, addr: Address, words: &[Word]) -> bool {
        let defined = (0..words.len()).all(|i| self.0.contains_key(&(addr + i as Address)));
        if defined {
            self.insert(addr, words.to_vec());
        }
        defined
    }
}

/// Request seen by a simulated station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Read {
        unit: UnitId,
        address: Address,
        count: Quantity,
    },
    Write {
        unit: UnitId,
        address: Address,
        values: Vec<Word>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Exception,
    Transport,
}

#[derive(Debug, Default)]
struct StationState {
    units: HashMap<UnitId, Registers>,
    faults: HashMap<(UnitId, Address), Fault>,
    requests: Vec<Request>,
    refuse_connect: bool,
    read_delay: Option<Duration>,
    connected: bool,
    connects: usize,
    closes: usize,
    in_flight: usize,
    max_in_flight: usize,
}

#[derive(Debug, Clone, Default)]
/// In-memory station answering register requests like the real device.
///
/// Clones share the same registers, so a test keeps one handle while the hub owns another.
pub struct Station(Arc<Mutex<StationState>>);

impl Station {
    pub fn new() -> Self {
        Self::default()
    }

    /// Station with identification, status and `sockets` idle sockets.
    pub fn populated(station_unit: UnitId, sockets: u16, time: DateTime<FixedOffset>) -> Self {
        let station = Self::new();
        station.set_block(
            station_unit,
            &ProductBlock {
                name: "ALF_1000".to_string(),
                manufacturer: "Alfen".to_string(),
                modbus_table_version: 1,
                firmware_version: "6.4.0-4203".to_string(),
                platform_type: "NG910".to_string(),
                serial: "ACE0000001".to_string(),
                uptime: 3_600_000,
                ..Default::default()
            }
            .with_station_time(time),
        );
        station.set_block(
            station_unit,
            &StationStatusBlock {
                actual_max_current: 32.0,
                board_temperature: 35.5,
                backoffice_connected: 1,
                number_of_sockets: sockets,
            },
        );
        station.set_block(
            station_unit,
            &ScnBlock {
                name: "SCN1".to_string(),
                sockets,
            },
        );
        for unit in 1..=sockets.min(2) as UnitId {
            station.set_block(
                unit,
                &SocketEnergyBlock {
                    meter_state: 3,
                    meter_type: 0,
                    voltage_l1_n: 230.0,
                    voltage_l2_n: 230.0,
                    voltage_l3_n: 230.0,
                    frequency: 50.0,
                    ..Default::default()
                },
            );
            station.set_block(
                unit,
                &SocketStatusBlock {
                    availability: 1,
                    mode3_state: "A".to_string(),
                    actual_max_current: 16.0,
                    max_current_valid_time: 600,
                    max_current: 16.0,
                    safe_current: 6.0,
                    setpoint_accounted: 1,
                    charge_phases: 3,
                },
            );
        }
        station
    }

    /// Store the encoded block at its address of `unit`.
    pub fn set_block<B: RegisterBlock>(&self, unit: UnitId, block: &B) {
        self.0
            .lock()
            .units
            .entry(unit)
            .or_default()
            .insert(B::ADDRESS, block.encode());
    }

    /// Current content of a register block, reflecting writes.
    pub fn block<B: RegisterBlock>(&self, unit: UnitId) -> Option<B> {
        let words = self.registers(unit, B::ADDRESS, B::COUNT)?;
        B::decode(&words).ok()
    }

    pub fn registers(&self, unit: UnitId, address: Address, count: Quantity) -> Option<Vec<Word>> {
        self.0.lock().units.get(&unit)?.read(address, count)
    }

    /// Answer reads starting at `address` with an exception response.
    pub fn fail_reads(&self, unit: UnitId, address: Address) {
        self.0.lock().faults.insert((unit, address), Fault::Exception);
    }

    /// Drop the connection on reads starting at `address`.
    pub fn break_reads(&self, unit: UnitId, address: Address) {
        self.0.lock().faults.insert((unit, address), Fault::Transport);
    }

    pub fn clear_faults(&self) {
        self.0.lock().faults.clear();
    }

    pub fn refuse_connect(&self, refuse: bool) {
        self.0.lock().refuse_connect = refuse;
    }

    /// Delay every read, to keep requests in flight.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.0.lock().read_delay = delay;
    }

    pub fn requests(&self) -> Vec<Request> {
        self.0.lock().requests.clone()
    }

    pub fn writes(&self) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|request| matches!(request, Request::Write { .. }))
            .collect()
    }

    pub fn clear_requests(&self) {
        self.0.lock().requests.clear();
    }

    pub fn is_open(&self) -> bool {
        self.0.lock().connected
    }

    pub fn connects(&self) -> usize {
        self.0.lock().connects
    }

    pub fn closes(&self) -> usize {
        self.0.lock().closes
    }

    /// Highest number of requests ever served at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.0.lock().max_in_flight
    }

    fn begin(&self, request: Request) -> Result<Option<Duration>, ModbusError> {
        let mut state = self.0.lock();
        state.requests.push(request);
        if !state.connected {
            return Err(ModbusError::NotConnected);
        }
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        Ok(state.read_delay)
    }

    fn end(&self) {
        self.0.lock().in_flight -= 1;
    }
}

#[async_trait]
impl Transport for Station {
    async fn connect(&mut self) -> Result<(), ModbusError> {
        let mut state = self.0.lock();
        if state.refuse_connect {
            return Err(ModbusError::Connect {
                addr: "simulator".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            });
        }
        state.connected = true;
        state.connects += 1;
        Ok(())
    }

    async fn close(&mut self) {
        let mut state = self.0.lock();
        if state.connected {
            state.connected = false;
            state.closes += 1;
        }
    }

    fn is_connected(&self) -> bool {
        self.is_open()
    }

    async fn read_holding_registers(
        &mut self,
        unit: UnitId,
        address: Address,
        count: Quantity,
    ) -> Result<Vec<Word>, ModbusError> {
        let delay = self.begin(Request::Read {
            unit,
            address,
            count,
        })?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.0.lock();
        state.in_flight -= 1;
        let fault = state.faults.get(&(unit, address)).copied();
        match fault {
            Some(Fault::Exception) => {
                return Err(ModbusError::Exception {
                    unit,
                    exception: SERVER_DEVICE_FAILURE.to_string(),
                })
            }
            Some(Fault::Transport) => {
                state.connected = false;
                return Err(ModbusError::Transport("connection reset by peer".to_string()));
            }
            None => {}
        }
        state
            .units
            .get(&unit)
            .and_then(|registers| registers.read(address, count))
            .ok_or_else(|| ModbusError::Exception {
                unit,
                exception: ILLEGAL_DATA_ADDRESS.to_string(),
            })
    }

    async fn write_registers(
        &mut self,
        unit: UnitId,
        address: Address,
        values: &[Word],
    ) -> Result<(), ModbusError> {
        self.begin(Request::Write {
            unit,
            address,
            values: values.to_vec(),
        })?;
        self.end();

        let written = self
            .0
            .lock()
            .units
            .get_mut(&unit)
            .map(|registers| registers.write(address, values))
            .unwrap_or(false);
        if written {
            Ok(())
        } else {
            Err(ModbusError::Exception {
                unit,
                exception: ILLEGAL_DATA_ADDRESS.to_string(),
            })
        }
    }
}
