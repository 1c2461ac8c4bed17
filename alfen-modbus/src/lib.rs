//! Polling hub for Alfen EV charging stations speaking Modbus/TCP, based on
//! [tokio-modbus](https://github.com/slowtec/tokio-modbus).
//!
//! ## Overview
//!
//! A [`Hub`] reads the register map of one station every scan interval, decodes it into a
//! [`Snapshot`] and notifies its subscribers. The connection is only open while somebody is
//! subscribed.
//!
//! - [`registers`] holds one struct per register block. Their decode rules are generated by
//!   the [`derive::RegisterBlock`] macro from `modbus` attributes.
//! - [`session`] derives the charging session of a socket from its mode 3 state.
//! - [`Hub::set_max_current`] and [`Hub::set_phase_mode`] write the control points of a socket.
//! - [`simulator::Station`] is an in-memory station implementing [`Transport`].
//!
//! ## Derive macro
//!
//! The struct `modbus` attribute **must** contain:
//! - `addr` - first holding register of the block, `u16` integer,
//! - `cnt` - number of registers of the block, at most `125`.
//!
//! Mapped fields carry a `modbus` attribute with:
//! - `offset` - register offset of the field inside the block,
//! - `ty` - register type, one of `"i16"`, `"i32"`, `"i64"`, `"u16"`, `"u32"`, `"u64"`,
//!   `"f32"`, `"f64"` or `"str(size)"`.
//!
//! Float registers are rounded to 2 decimals when decoded. Fields without attribute are left
//! at their default value.
//!
//! ```
//! use alfen_modbus::codec::RegisterBlock;
//! use alfen_modbus::derive::RegisterBlock;
//!
//! #[derive(Debug, Default, RegisterBlock)]
//! #[modbus(addr = 1400, cnt = 5)]
//! struct Scn {
//!     #[modbus(offset = 0, ty = "str(4)")]
//!     name: String,
//!     #[modbus(offset = 4, ty = "u16")]
//!     sockets: u16,
//! }
//!
//! let words = Scn { name: "SCN1".into(), sockets: 2 }.encode();
//! let scn = Scn::decode(&words).unwrap();
//! assert_eq!((scn.name.as_str(), scn.sockets), ("SCN1", 2));
//! ```

extern crate self as alfen_modbus;

/// Big-endian register encoding and decoding
pub mod codec;
mod command;
pub mod config;
pub mod error;
pub mod hub;
pub mod registers;
pub mod registry;
pub mod session;
/// In-memory station for tests and development
pub mod simulator;
pub mod snapshot;
/// Register level I/O
pub mod transport;

pub mod derive {
    /// Re-export.
    pub use alfen_modbus_derive::RegisterBlock;
}

pub use config::HubConfig;
pub use error::{Error, Result};
pub use hub::{CycleOutcome, Hub, HubState};
pub use registry::SubscriptionId;
pub use snapshot::{Field, PhaseMode, Snapshot, Socket, Value};
pub use transport::{TcpTransport, Transport};
