//! Typed state snapshot republished to subscribers.
//!
//! Every value the hub knows about is addressed by a [`Field`]. Each field renders to a
//! stable string key (e.g. `socket_1_realEnergyDeliveredSum`) which is also the key used
//! when the snapshot is serialized.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, TimeDelta};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::codec::CodecError;

/// Physical connector of the station. Its number doubles as the Modbus unit id of its registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Socket {
    One,
    Two,
}

impl Socket {
    pub fn number(self) -> u8 {
        match self {
            Socket::One => 1,
            Socket::Two => 2,
        }
    }

    pub fn unit(self) -> u8 {
        self.number()
    }
}

impl TryFrom<u8> for Socket {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Socket::One),
            2 => Ok(Socket::Two),
            other => Err(CodecError::InvalidSocket(other)),
        }
    }
}

impl fmt::Display for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StationField {
    Name,
    Manufacturer,
    ModbusTableVersion,
    FirmwareVersion,
    PlatformType,
    Serial,
    StationTime,
    LastBoot,
    ActualMaxCurrent,
    BoardTemperature,
    BackofficeConnected,
    NumberOfSockets,
}

impl StationField {
    pub fn key(self) -> &'static str {
        match self {
            StationField::Name => "name",
            StationField::Manufacturer => "manufacturer",
            StationField::ModbusTableVersion => "modbustableVersion",
            StationField::FirmwareVersion => "firmwareVersion",
            StationField::PlatformType => "platformType",
            StationField::Serial => "serial",
            StationField::StationTime => "stationTime",
            StationField::LastBoot => "lastBoot",
            StationField::ActualMaxCurrent => "actualMaxCurrent",
            StationField::BoardTemperature => "boardTemperature",
            StationField::BackofficeConnected => "backofficeConnected",
            StationField::NumberOfSockets => "numberOfSockets",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScnField {
    Name,
    Sockets,
}

impl ScnField {
    pub fn key(self) -> &'static str {
        match self {
            ScnField::Name => "scnName",
            ScnField::Sockets => "scnSockets",
        }
    }
}

/// Per-phase quantity selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    L1,
    L2,
    L3,
    Sum,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::L1, Phase::L2, Phase::L3, Phase::Sum];

    fn suffix(self) -> &'static str {
        match self {
            Phase::L1 => "L1",
            Phase::L2 => "L2",
            Phase::L3 => "L3",
            Phase::Sum => "Sum",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Voltage {
    L1N,
    L2N,
    L3N,
    L1L2,
    L2L3,
    L3L1,
}

impl Voltage {
    fn key(self) -> &'static str {
        match self {
            Voltage::L1N => "VL1-N",
            Voltage::L2N => "VL2-N",
            Voltage::L3N => "VL3-N",
            Voltage::L1L2 => "VL1-L2",
            Voltage::L2L3 => "VL2-L3",
            Voltage::L3L1 => "VL3-L1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SocketField {
    MeterState,
    MeterAge,
    MeterType,
    Voltage(Voltage),
    CurrentNeutral,
    Current(Phase),
    PowerFactor(Phase),
    Frequency,
    RealPower(Phase),
    ApparentPower(Phase),
    ReactivePower(Phase),
    RealEnergyDelivered(Phase),
    RealEnergyConsumed(Phase),
    ApparentEnergy(Phase),
    ReactiveEnergy(Phase),
    Availability,
    Mode3State,
    ActualMaxCurrent,
    MaxCurrentValidTime,
    MaxCurrent,
    SafeCurrent,
    SetpointAccounted,
    ChargePhases,
    CarConnected,
    CarCharging,
    ChargingStartEnergy,
    ChargingStart,
    SessionEnergy,
    SessionDuration,
}

impl SocketField {
    pub fn key(self, socket: Socket) -> String {
        let n = socket.number();
        let (stem, phase) = match self {
            SocketField::MaxCurrentValidTime => return format!("maxCurrentValidTime_socket_{n}"),
            SocketField::MaxCurrent => return format!("maxCurrent_socket_{n}"),
            SocketField::MeterState => ("meterstate", None),
            SocketField::MeterAge => ("meterAge", None),
            SocketField::MeterType => ("meterType", None),
            SocketField::Voltage(voltage) => (voltage.key(), None),
            SocketField::CurrentNeutral => ("currentN", None),
            SocketField::Current(phase) => ("current", Some(phase)),
            SocketField::PowerFactor(phase) => ("power", Some(phase)),
            SocketField::Frequency => ("frequency", None),
            SocketField::RealPower(phase) => ("realPower", Some(phase)),
            SocketField::ApparentPower(phase) => ("apparantPower", Some(phase)),
            SocketField::ReactivePower(phase) => ("reactivePower", Some(phase)),
            SocketField::RealEnergyDelivered(phase) => ("realEnergyDelivered", Some(phase)),
            SocketField::RealEnergyConsumed(phase) => ("realEnergyConsumed", Some(phase)),
            SocketField::ApparentEnergy(phase) => ("apparantEnergy", Some(phase)),
            SocketField::ReactiveEnergy(phase) => ("reactiveEnergy", Some(phase)),
            SocketField::Availability => ("available", None),
            SocketField::Mode3State => ("mode3state", None),
            SocketField::ActualMaxCurrent => ("actualMaxCurrent", None),
            SocketField::SafeCurrent => ("saveCurrent", None),
            SocketField::SetpointAccounted => ("setpointAccounted", None),
            SocketField::ChargePhases => ("chargephases", None),
            SocketField::CarConnected => ("carconnected", None),
            SocketField::CarCharging => ("carcharging", None),
            SocketField::ChargingStartEnergy => ("chargingStartWh", None),
            SocketField::ChargingStart => ("chargingStart", None),
            SocketField::SessionEnergy => ("currentSession", None),
            SocketField::SessionDuration => ("currentSessionDuration", None),
        };
        let suffix = phase.map_or("", Phase::suffix);
        format!("socket_{n}_{stem}{suffix}")
    }
}

/// Identifier of a single snapshot value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Station(StationField),
    Scn(ScnField),
    Socket(Socket, SocketField),
}

impl Field {
    pub fn key(&self) -> String {
        match self {
            Field::Station(field) => field.key().to_string(),
            Field::Scn(field) => field.key().to_string(),
            Field::Socket(socket, field) => field.key(*socket),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Time(DateTime<FixedOffset>),
    Duration(TimeDelta),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            Value::Time(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<TimeDelta> {
        match self {
            Value::Duration(value) => Some(*value),
            _ => None,
        }
    }
}

macro_rules! impl_from_int {
    ($($int:ty),*) => {
        $(
            impl From<$int> for Value {
                fn from(value: $int) -> Self {
                    Value::Int(i64::from(value))
                }
            }
        )*
    };
}

impl_from_int!(u16, i16, u32, i32, u8);

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Value::Time(value)
    }
}

impl From<TimeDelta> for Value {
    fn from(value: TimeDelta) -> Self {
        Value::Duration(value)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Int(value) => serializer.serialize_i64(*value),
            Value::Float(value) => serializer.serialize_f64(*value),
            Value::Text(value) => serializer.serialize_str(value),
            Value::Bool(value) => serializer.serialize_bool(*value),
            Value::Time(value) => serializer.serialize_str(&value.to_rfc3339()),
            // Whole seconds
            Value::Duration(value) => serializer.serialize_i64(value.num_seconds()),
        }
    }
}

/// Point-in-time view of everything decoded so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot(BTreeMap<Field, Value>);

impl Snapshot {
    pub fn get(&self, field: &Field) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: Field, value: impl Into<Value>) {
        self.0.insert(field, value.into());
    }

    /// Merge decoded values, overwriting earlier ones.
    pub fn extend(&mut self, values: impl IntoIterator<Item = (Field, Value)>) {
        self.0.extend(values);
    }

    pub fn contains(&self, field: &Field) -> bool {
        self.0.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Field, &Value)> {
        self.0.iter()
    }

    /// Look a value up by its string key.
    pub fn get_by_key(&self, key: &str) -> Option<&Value> {
        self.0
            .iter()
            .find(|(field, _)| field.key() == key)
            .map(|(_, value)| value)
    }

    pub fn station(&self, field: StationField) -> Option<&Value> {
        self.get(&Field::Station(field))
    }

    pub fn socket(&self, socket: Socket, field: SocketField) -> Option<&Value> {
        self.get(&Field::Socket(socket, field))
    }

    pub fn scn(&self, field: ScnField) -> Option<&Value> {
        self.get(&Field::Scn(field))
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (field, value) in &self.0 {
            map.serialize_entry(&field.key(), value)?;
        }
        map.end()
    }
}

/// Meter kind reported in the socket energy block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterType {
    Rtu,
    TcpIp,
    Udp,
    P1,
    Other,
}

impl TryFrom<u16> for MeterType {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MeterType::Rtu),
            1 => Ok(MeterType::TcpIp),
            2 => Ok(MeterType::Udp),
            3 => Ok(MeterType::P1),
            4 => Ok(MeterType::Other),
            value => Err(CodecError::InvalidOption {
                name: "meter type",
                value,
            }),
        }
    }
}

impl fmt::Display for MeterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MeterType::Rtu => "RTU",
            MeterType::TcpIp => "TCP/IP",
            MeterType::Udp => "UDP",
            MeterType::P1 => "P1",
            MeterType::Other => "Other",
        })
    }
}

/// Meter state flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeterState {
    pub initialised: bool,
    pub updated: bool,
    pub warning: bool,
    pub error: bool,
}

impl From<u16> for MeterState {
    fn from(value: u16) -> Self {
        Self {
            initialised: value & 0b0001 != 0,
            updated: value & 0b0010 != 0,
            warning: value & 0b0100 != 0,
            error: value & 0b1000 != 0,
        }
    }
}

impl fmt::Display for MeterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (self.initialised, "Initialised"),
            (self.updated, "Updated"),
            (self.warning, "Warning"),
            (self.error, "Error"),
        ]
        .into_iter()
        .filter_map(|(set, label)| set.then_some(label))
        .collect::<Vec<_>>();
        if flags.is_empty() {
            f.write_str("Unknown")
        } else {
            f.write_str(&flags.join(", "))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Inoperative,
    Operative,
}

impl From<u16> for Availability {
    fn from(value: u16) -> Self {
        if value == 1 {
            Availability::Operative
        } else {
            Availability::Inoperative
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Availability::Operative => "Operative",
            Availability::Inoperative => "Inoperative",
        })
    }
}

/// Usable phases of a socket, register 1215.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseMode {
    OnePhase,
    ThreePhases,
}

impl PhaseMode {
    pub fn code(self) -> u16 {
        match self {
            PhaseMode::OnePhase => 1,
            PhaseMode::ThreePhases => 3,
        }
    }
}

impl TryFrom<u16> for PhaseMode {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PhaseMode::OnePhase),
            3 => Ok(PhaseMode::ThreePhases),
            value => Err(CodecError::InvalidOption {
                name: "phase mode",
                value,
            }),
        }
    }
}

impl fmt::Display for PhaseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PhaseMode::OnePhase => "1 Phase",
            PhaseMode::ThreePhases => "3 Phases",
        })
    }
}
