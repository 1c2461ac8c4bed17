//! Error types for alfen-modbus

use std::time::Duration;

use thiserror::Error;

use crate::codec::CodecError;

/// Failure of a single register read or write.
#[derive(Error, Debug)]
pub enum ModbusError {
    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("not connected")]
    NotConnected,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unit {unit} answered with exception {exception}")]
    Exception { unit: u8, exception: String },
}

impl ModbusError {
    /// True for device exception responses; everything else is a transport fault.
    pub fn is_protocol(&self) -> bool {
        matches!(self, ModbusError::Exception { .. })
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level error of the hub.
#[derive(Error, Debug)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(ModbusError),

    #[error("protocol error: {0}")]
    Protocol(ModbusError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<ModbusError> for Error {
    fn from(err: ModbusError) -> Self {
        if err.is_protocol() {
            Error::Protocol(err)
        } else {
            Error::Transport(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
