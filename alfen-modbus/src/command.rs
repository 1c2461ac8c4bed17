//! Write path for the writable control points of a socket.

use tracing::{debug, info};

use crate::codec::{Address, CodecError, Encode, Word};
use crate::error::{ModbusError, Result};
use crate::hub::Hub;
use crate::registers::{
    encode_max_current, max_current_value, MAX_CURRENT_REGISTER, PHASE_MODE_REGISTER,
};
use crate::snapshot::{Field, PhaseMode, Socket, SocketField, Value};
use crate::transport::Transport;

impl<T: Transport> Hub<T> {
    /// Write the max-current setpoint of `socket`, in amperes.
    ///
    /// The value is validated before any request is issued. On success the snapshot reports
    /// the requested value until the next cycle reads the actual one.
    pub async fn set_max_current(&self, socket: Socket, amps: f64) -> Result<()> {
        self.check_socket(socket)?;
        let words = encode_max_current(amps)?;

        self.write(socket, MAX_CURRENT_REGISTER, &words).await?;
        self.inner.snapshot.write().set(
            Field::Socket(socket, SocketField::MaxCurrent),
            max_current_value(amps),
        );
        info!(hub = %self.name(), %socket, amps, "max current set");
        Ok(())
    }

    /// Select the phases `socket` may charge on.
    pub async fn set_phase_mode(&self, socket: Socket, mode: PhaseMode) -> Result<()> {
        self.check_socket(socket)?;
        let code = mode.code();

        self.write(socket, PHASE_MODE_REGISTER, &code.to_be_words()).await?;
        self.inner.snapshot.write().set(
            Field::Socket(socket, SocketField::ChargePhases),
            Value::from(code),
        );
        info!(hub = %self.name(), %socket, "phase mode set to {mode}");
        Ok(())
    }

    /// [`Hub::set_phase_mode`] from the register code, 1 or 3.
    pub async fn set_phase_mode_raw(&self, socket: Socket, code: u16) -> Result<()> {
        let mode = PhaseMode::try_from(code)?;
        self.set_phase_mode(socket, mode).await
    }

    /// Write the max-current setpoint the snapshot currently holds for `socket` again, before
    /// the station drops it. Returns `false` when no setpoint is known yet.
    pub async fn reassert_max_current(&self, socket: Socket) -> Result<bool> {
        let amps = self
            .inner
            .snapshot
            .read()
            .socket(socket, SocketField::MaxCurrent)
            .and_then(Value::as_f64);
        match amps {
            Some(amps) => {
                self.set_max_current(socket, amps).await?;
                Ok(true)
            }
            None => {
                debug!(hub = %self.name(), %socket, "no max current to reassert");
                Ok(false)
            }
        }
    }

    fn check_socket(&self, socket: Socket) -> std::result::Result<(), CodecError> {
        if socket == Socket::Two && !self.has_second_socket() {
            return Err(CodecError::InvalidSocket(socket.number()));
        }
        Ok(())
    }

    async fn write(&self, socket: Socket, address: Address, words: &[Word]) -> Result<()> {
        let mut transport = self.inner.transport.lock().await;
        if !transport.is_connected() {
            return Err(ModbusError::NotConnected.into());
        }
        transport
            .write_registers(socket.unit(), address, words)
            .await?;
        Ok(())
    }
}
