//! Charging session tracking derived from the mode-3 state of a socket.

use std::fmt;

use chrono::{DateTime, FixedOffset, TimeDelta};

use crate::codec::round2;
use crate::snapshot::{Field, Socket, SocketField, Value};

/// IEC 61851 charge point state as reported by the socket controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode3State {
    A,
    B1,
    B2,
    C1,
    C2,
    D1,
    D2,
    E,
    F,
    Other(String),
}

impl Mode3State {
    pub fn parse(state: &str) -> Self {
        match state.trim() {
            "A" => Mode3State::A,
            "B1" => Mode3State::B1,
            "B2" => Mode3State::B2,
            "C1" => Mode3State::C1,
            "C2" => Mode3State::C2,
            "D1" => Mode3State::D1,
            "D2" => Mode3State::D2,
            "E" => Mode3State::E,
            "F" => Mode3State::F,
            other => Mode3State::Other(other.to_string()),
        }
    }

    /// Anything but "no vehicle" (A) or an error state (E, F).
    pub fn car_connected(&self) -> bool {
        !matches!(self, Mode3State::A | Mode3State::E | Mode3State::F)
    }

    pub fn car_charging(&self) -> bool {
        matches!(self, Mode3State::C2 | Mode3State::D2)
    }
}

impl fmt::Display for Mode3State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Mode3State::A => "A",
            Mode3State::B1 => "B1",
            Mode3State::B2 => "B2",
            Mode3State::C1 => "C1",
            Mode3State::C2 => "C2",
            Mode3State::D1 => "D1",
            Mode3State::D2 => "D2",
            Mode3State::E => "E",
            Mode3State::F => "F",
            Mode3State::Other(other) => other.as_str(),
        };
        f.write_str(label)
    }
}

/// Baseline captured when charging starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionStart {
    pub energy: f64,
    pub time: DateTime<FixedOffset>,
}

/// Derived socket state after one observation.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub car_connected: bool,
    pub car_charging: bool,
    pub start: Option<SessionStart>,
    /// Present while charging.
    pub energy: Option<f64>,
    pub duration: Option<TimeDelta>,
}

impl SessionState {
    pub fn fields(&self, socket: Socket) -> Vec<(Field, Value)> {
        let socket_field = |field| Field::Socket(socket, field);
        let mut fields = vec![
            (socket_field(SocketField::CarConnected), self.car_connected.into()),
            (socket_field(SocketField::CarCharging), self.car_charging.into()),
        ];
        if let Some(start) = self.start {
            fields.push((socket_field(SocketField::ChargingStartEnergy), start.energy.into()));
            fields.push((socket_field(SocketField::ChargingStart), start.time.into()));
        }
        if let Some(energy) = self.energy {
            fields.push((socket_field(SocketField::SessionEnergy), energy.into()));
        }
        if let Some(duration) = self.duration {
            fields.push((socket_field(SocketField::SessionDuration), duration.into()));
        }
        fields
    }
}

/// Per-socket charging session state machine.
///
/// The start baseline is captured on the not-charging to charging edge and kept until the
/// next edge; it is never cleared.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    charging: bool,
    start: Option<SessionStart>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) -> Option<SessionStart> {
        self.start
    }

    pub fn is_charging(&self) -> bool {
        self.charging
    }

    pub fn observe(
        &mut self,
        state: &Mode3State,
        delivered_energy: f64,
        station_time: DateTime<FixedOffset>,
    ) -> SessionState {
        let charging = state.car_charging();
        if charging && !self.charging {
            self.start = Some(SessionStart {
                energy: delivered_energy,
                time: station_time,
            });
        }
        self.charging = charging;

        let (energy, duration) = match (charging, self.start) {
            (true, Some(start)) => (
                Some(round2(delivered_energy - start.energy)),
                Some(station_time - start.time),
            ),
            _ => (None, None),
        };

        SessionState {
            car_connected: state.car_connected(),
            car_charging: charging,
            start: self.start,
            energy,
            duration,
        }
    }
}
