use crate::error::TransportError;

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SGC_BAUD_RATE: u32 = 38400;
const SGC_TIMEOUT: Duration = Duration::from_secs(1);

/// Byte sink for generator commands. Writes are fire-and-forget: nothing is
/// read back and nothing is retried.
pub trait Transport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}

// SERIAL ----------------------------------------------------------------------

pub struct SerialTransport {
    port_name: String,
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub fn open(port_name: &str) -> Result<Self, TransportError> {
        let port = serialport::new(port_name, SGC_BAUD_RATE)
            .timeout(SGC_TIMEOUT)
            .open()
            .map_err(|source| TransportError::Serial {
                port: port_name.to_string(),
                source,
            })?;

        tracing::info!(port = port_name, baud = SGC_BAUD_RATE, "opened stimulator port");
        Ok(Self {
            port_name: port_name.to_string(),
            port,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(bytes)?;
        Ok(())
    }
}

// FAKE ------------------------------------------------------------------------

/// Records commands instead of transmitting them. Clones share the record, so
/// a clone kept by the caller can inspect what the driver issued.
#[derive(Clone, Default)]
pub struct FakeTransport {
    sent: Arc<Mutex<Vec<String>>>,
    failing: bool,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A link whose every write fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Transport for FakeTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.failing {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "fake transport configured to fail",
            )));
        }
        let command = String::from_utf8_lossy(bytes).into_owned();
        tracing::debug!(%command, "[FAKE SEND]");
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(command);
        Ok(())
    }
}
