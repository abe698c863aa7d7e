//! Opening the physical port

use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};
use tracing::debug;

/// Byte stream to the device
pub trait SerialIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> SerialIo for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Opens the device stream.
///
/// Called from inside the serial worker's runtime, so implementations may
/// register with the tokio reactor.
pub trait PortOpener: Send + Sync {
    fn open(&self, port: &str, baud_rate: u32) -> io::Result<Box<dyn SerialIo>>;
}

/// Opens a real serial port: 8 data bits, no parity, one stop bit
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPortOpener;

impl PortOpener for SystemPortOpener {
    fn open(&self, port: &str, baud_rate: u32) -> io::Result<Box<dyn SerialIo>> {
        let stream = tokio_serial::new(port, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()?;

        debug!(port, baud_rate, "Serial port opened (8N1)");
        Ok(Box::new(stream))
    }
}
