//! Serial link to the slider controller
//!
//! The link is best effort and self-healing: [`ConnectionManager`] keeps
//! reopening the port after any failure and hands every complete line to a
//! [`LineConsumer`](volware_core::domain::dispatch::LineConsumer).

pub mod codec;
pub mod connection;
pub mod transport;

pub use codec::{DeviceLineCodec, MAX_LINE_LENGTH};
pub use connection::{ConnectionError, ConnectionManager, ConnectionState, SerialSettings};
pub use transport::{PortOpener, SerialIo, SystemPortOpener};
