use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::{Reader, Slave, SlaveContext, Writer};
use tracing::debug;

use crate::codec::{Address, Quantity, Word};
use crate::error::ModbusError;

/// Modbus unit (slave) id a request is addressed to.
pub type UnitId = u8;

#[async_trait]
/// Register level I/O against one station.
///
/// Implementations perform no locking of their own, the hub serializes every call.
pub trait Transport: Send + 'static {
    /// Open the session, replacing an already open one.
    async fn connect(&mut self) -> Result<(), ModbusError>;

    async fn close(&mut self);

    fn is_connected(&self) -> bool;

    async fn read_holding_registers(
        &mut self,
        unit: UnitId,
        address: Address,
        count: Quantity,
    ) -> Result<Vec<Word>, ModbusError>;

    async fn write_registers(
        &mut self,
        unit: UnitId,
        address: Address,
        values: &[Word],
    ) -> Result<(), ModbusError>;
}

/// Modbus/TCP transport based on tokio-modbus.
///
/// A timed out or failed request drops the connection, the hub reconnects before its next cycle.
pub struct TcpTransport {
    host: String,
    port: u16,
    timeout: Duration,
    context: Option<Context>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .field("connected", &self.context.is_some())
            .finish()
    }
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            context: None,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn context(&mut self) -> Result<&mut Context, ModbusError> {
        self.context.as_mut().ok_or(ModbusError::NotConnected)
    }
}

async fn resolve(host: String, port: u16) -> Result<SocketAddr, ModbusError> {
    let connect_error = |source| ModbusError::Connect {
        addr: format!("{host}:{port}"),
        source,
    };
    let mut addrs = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(connect_error)?;
    addrs.next().ok_or_else(|| {
        connect_error(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "host resolved to no address",
        ))
    })
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<(), ModbusError> {
        // Dropping the old context closes its socket
        self.context = None;

        let timeout = self.timeout;
        let socket_addr = tokio::time::timeout(timeout, resolve(self.host.clone(), self.port))
            .await
            .map_err(|_| ModbusError::Timeout(timeout))??;
        let context = tokio::time::timeout(timeout, tcp::connect(socket_addr))
            .await
            .map_err(|_| ModbusError::Timeout(timeout))?
            .map_err(|source| ModbusError::Connect {
                addr: socket_addr.to_string(),
                source,
            })?;

        debug!("Connected to {socket_addr}");
        self.context = Some(context);
        Ok(())
    }

    async fn close(&mut self) {
        if self.context.take().is_some() {
            debug!("Closed connection to {}", self.endpoint());
        }
    }

    fn is_connected(&self) -> bool {
        self.context.is_some()
    }

    async fn read_holding_registers(
        &mut self,
        unit: UnitId,
        address: Address,
        count: Quantity,
    ) -> Result<Vec<Word>, ModbusError> {
        let timeout = self.timeout;
        let context = self.context()?;
        context.set_slave(Slave(unit));

        let result =
            tokio::time::timeout(timeout, context.read_holding_registers(address, count)).await;
        match result {
            Ok(Ok(Ok(words))) => Ok(words),
            Ok(Ok(Err(exception))) => Err(ModbusError::Exception {
                unit,
                exception: format!("{exception:?}"),
            }),
            Ok(Err(err)) => {
                self.context = None;
                Err(ModbusError::Transport(err.to_string()))
            }
            Err(_) => {
                self.context = None;
                Err(ModbusError::Timeout(timeout))
            }
        }
    }

    async fn write_registers(
        &mut self,
        unit: UnitId,
        address: Address,
        values: &[Word],
    ) -> Result<(), ModbusError> {
        let timeout = self.timeout;
        let context = self.context()?;
        context.set_slave(Slave(unit));

        let result =
            tokio::time::timeout(timeout, context.write_multiple_registers(address, values)).await;
        match result {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(exception))) => Err(ModbusError::Exception {
                unit,
                exception: format!("{exception:?}"),
            }),
            Ok(Err(err)) => {
                self.context = None;
                Err(ModbusError::Transport(err.to_string()))
            }
            Err(_) => {
                self.context = None;
                Err(ModbusError::Timeout(timeout))
            }
        }
    }
}
