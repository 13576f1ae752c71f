// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus RTU transport adapter
//!
//! For avoiding confusion with the Modbus master/slave terminology: the station
//! is the client (master) and the PLC is the server (slave) addressed by its
//! unit id on the RS-485 bus.
//!
//! The adapter exposes only what the station needs: reading a run of holding
//! registers and writing a single holding register. Every call is bounded by
//! the configured per-call timeout and fails with a [`TransportError`] from a
//! small, closed set. A handle is not meant to be shared: its single owner is
//! the PLC poll loop.

use std::fmt::Debug;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::time::Instant;
use tokio_modbus::client::{self, rtu};
use tokio_modbus::prelude::*;
use tokio_serial::{DataBits, SerialStream, StopBits};

use crate::config::{Parity, SerialConfig};

/// Failure of a single transport call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The serial device could not be opened or the handle is closed
    #[error("serial port unavailable: {0}")]
    PortUnavailable(String),
    /// No frame arrived within the response window
    #[error("no response within {0:?}")]
    NoResponse(Duration),
    /// A frame arrived but failed CRC or format checks
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    /// The device answered with a Modbus exception code
    #[error("device returned exception code {0:#04x}")]
    ExceptionResponse(u8),
    /// The serial settings cannot be applied to a device
    #[error("invalid serial configuration: {0}")]
    InvalidConfig(String),
}

/// Holding-register access to one Modbus RTU device.
///
/// Operations take `&mut self`: a handle serves one caller at a time, so a
/// poll read and a manual write can never interleave mid-frame.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModbusTransport: Send {
    /// Read `count` consecutive holding registers starting at `address`
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
        slave_id: u8,
    ) -> Result<Vec<u16>, TransportError>;

    /// Write one holding register
    async fn write_holding_register(
        &mut self,
        address: u16,
        value: u16,
        slave_id: u8,
    ) -> Result<(), TransportError>;

    /// Release the device. Calling it again is a no-op.
    async fn close(&mut self);
}

/// Factory for transport handles, selected when the PLC manager is built
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Open the device described by `serial`.
    ///
    /// Only the device is opened; the PLC is not probed.
    async fn open(&self, serial: &SerialConfig) -> Result<Box<dyn ModbusTransport>, TransportError>;
}

/// Connector opening real serial devices
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

#[async_trait]
impl TransportConnector for SerialConnector {
    async fn open(&self, serial: &SerialConfig) -> Result<Box<dyn ModbusTransport>, TransportError> {
        Ok(Box::new(RtuTransport::open(serial)?))
    }
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

fn data_bits(bits: u8) -> Result<DataBits, TransportError> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(TransportError::InvalidConfig(format!(
            "unsupported data bits: {other}"
        ))),
    }
}

fn stop_bits(bits: u8) -> Result<StopBits, TransportError> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(TransportError::InvalidConfig(format!(
            "unsupported stop bits: {other}"
        ))),
    }
}

/// Byte stream the RTU client runs over
trait RawStream: AsyncRead + AsyncWrite + Debug + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Debug + Send + Unpin> RawStream for T {}

/// Upper bound on the quiet-line wait, in multiples of the call timeout
const DRAIN_LIMIT: u32 = 10;

/// Stream shared between the current client context and the transport.
///
/// The transport keeps its own handle so input can be drained after a failed
/// call, before a fresh client context is attached. Every byte read through
/// any handle is counted.
#[derive(Debug, Clone)]
struct SharedStream {
    inner: Arc<Mutex<Box<dyn RawStream>>>,
    received: Arc<AtomicUsize>,
}

impl SharedStream {
    fn new<T>(stream: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Debug + Unpin + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Box::new(stream))),
            received: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn received(&self) -> usize {
        self.received.load(Ordering::Relaxed)
    }

    fn with_stream<R>(
        &self,
        op: impl FnOnce(Pin<&mut (dyn RawStream + 'static)>) -> Poll<io::Result<R>>,
    ) -> Poll<io::Result<R>> {
        match self.inner.lock() {
            Ok(mut stream) => op(Pin::new(&mut **stream)),
            Err(_) => Poll::Ready(Err(io::Error::other("serial stream lock poisoned"))),
        }
    }

    /// Read and drop input until the line stays silent for `quiet`.
    /// Returns the number of bytes dropped.
    async fn discard_input(&self, quiet: Duration) -> io::Result<usize> {
        let mut reader = self.clone();
        let mut scratch = [0u8; 64];
        let mut discarded = 0;
        let deadline = Instant::now() + quiet * DRAIN_LIMIT;
        loop {
            if Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line did not go quiet, {discarded} byte(s) dropped"),
                ));
            }
            match tokio::time::timeout(quiet, reader.read(&mut scratch)).await {
                Err(_) | Ok(Ok(0)) => return Ok(discarded),
                Ok(Ok(n)) => discarded += n,
                Ok(Err(err)) => return Err(err),
            }
        }
    }
}

impl AsyncRead for SharedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = self.with_stream(|stream| stream.poll_read(cx, buf));
        if let Poll::Ready(Ok(())) = poll {
            self.received
                .fetch_add(buf.filled().len() - before, Ordering::Relaxed);
        }
        poll
    }
}

impl AsyncWrite for SharedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.with_stream(|stream| stream.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.with_stream(|stream| stream.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.with_stream(|stream| stream.poll_shutdown(cx))
    }
}

/// An open device and the client context currently attached to it.
///
/// `client` is dropped after a timeout or a bad frame; the next call drains
/// the line and attaches a fresh one, so a late reply is never taken as the
/// answer to a later request.
struct Link {
    stream: SharedStream,
    slave: Slave,
    client: Option<client::Context>,
}

/// Modbus RTU client over any byte stream, usually a serial port
pub struct RtuTransport {
    link: Option<Link>,
    timeout: Duration,
    label: String,
}

impl Debug for RtuTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtuTransport")
            .field("label", &self.label)
            .field("timeout", &self.timeout)
            .field("open", &self.link.is_some())
            .finish()
    }
}

impl RtuTransport {
    /// Open the serial device described by `serial`
    pub fn open(serial: &SerialConfig) -> Result<Self, TransportError> {
        if serial.timeout_ms == 0 {
            return Err(TransportError::InvalidConfig(
                "timeout must be greater than zero".to_string(),
            ));
        }
        let builder = tokio_serial::new(serial.port.as_str(), serial.baud_rate)
            .parity(serial.parity.into())
            .data_bits(data_bits(serial.data_bits)?)
            .stop_bits(stop_bits(serial.stop_bits)?)
            .timeout(serial.timeout());

        let stream = SerialStream::open(&builder)
            .map_err(|e| TransportError::PortUnavailable(format!("{}: {}", serial.port, e)))?;

        info!(
            "Opened {} at {} baud ({:?}, {}{}), slave {}",
            serial.port,
            serial.baud_rate,
            serial.parity,
            serial.data_bits,
            serial.stop_bits,
            serial.slave_id
        );
        Ok(Self::attach(
            stream,
            Slave(serial.slave_id),
            serial.timeout(),
            serial.port.clone(),
        ))
    }

    /// Run the RTU client over an already open stream
    pub fn attach<T>(stream: T, slave: Slave, timeout: Duration, label: impl Into<String>) -> Self
    where
        T: AsyncRead + AsyncWrite + Debug + Unpin + Send + 'static,
    {
        let stream = SharedStream::new(stream);
        Self {
            link: Some(Link {
                client: Some(rtu::attach_slave(stream.clone(), slave)),
                stream,
                slave,
            }),
            timeout,
            label: label.into(),
        }
    }

    /// Client context ready for the next request, with the received-byte
    /// count taken just before the request goes out
    async fn client(&mut self) -> Result<(&mut client::Context, SharedStream), TransportError> {
        let timeout = self.timeout;
        let label = &self.label;
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| TransportError::PortUnavailable(format!("{label}: handle closed")))?;

        if link.client.is_none() {
            let discarded = link
                .stream
                .discard_input(timeout)
                .await
                .map_err(|err| classify_io(err, timeout))?;
            if discarded > 0 {
                warn!("Discarded {discarded} stale byte(s) on {label}");
            }
            link.client = Some(rtu::attach_slave(link.stream.clone(), link.slave));
        }

        let stream = link.stream.clone();
        let client = link
            .client
            .as_mut()
            .ok_or_else(|| TransportError::PortUnavailable(format!("{label}: no client")))?;
        Ok((client, stream))
    }

    /// Drop the client after a failure that may leave bytes in flight
    fn settle<T>(&mut self, result: &Result<T, TransportError>) {
        if let Err(TransportError::NoResponse(_) | TransportError::MalformedFrame(_)) = result {
            if let Some(link) = self.link.as_mut() {
                debug!("Resynchronising {} before the next request", self.label);
                link.client = None;
            }
        }
    }
}

/// Map a tokio-modbus call outcome onto the transport error set.
///
/// A timeout after some bytes arrived means a reply was dropped by the
/// decoder, which only happens on CRC or framing errors.
fn classify<T>(
    outcome: Result<tokio_modbus::Result<T>, tokio::time::error::Elapsed>,
    timeout: Duration,
    bytes_arrived: bool,
) -> Result<T, TransportError> {
    match outcome {
        Err(_) if bytes_arrived => Err(TransportError::MalformedFrame(
            "reply failed CRC or framing checks".to_string(),
        )),
        Err(_) => Err(TransportError::NoResponse(timeout)),
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(exception))) => Err(TransportError::ExceptionResponse(u8::from(exception))),
        Ok(Err(tokio_modbus::Error::Transport(err))) => Err(classify_io(err, timeout)),
        Ok(Err(other)) => Err(TransportError::MalformedFrame(other.to_string())),
    }
}

fn classify_io(err: io::Error, timeout: Duration) -> TransportError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::NoResponse(timeout),
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => {
            TransportError::MalformedFrame(err.to_string())
        }
        _ => TransportError::PortUnavailable(err.to_string()),
    }
}

#[async_trait]
impl ModbusTransport for RtuTransport {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
        slave_id: u8,
    ) -> Result<Vec<u16>, TransportError> {
        let timeout = self.timeout;
        let (client, stream) = self.client().await?;
        client.set_slave(Slave(slave_id));

        let before = stream.received();
        let outcome =
            tokio::time::timeout(timeout, client.read_holding_registers(address, count)).await;
        let result = classify(outcome, timeout, stream.received() > before).and_then(|words| {
            if words.len() == usize::from(count) {
                Ok(words)
            } else {
                Err(TransportError::MalformedFrame(format!(
                    "expected {} registers, got {}",
                    count,
                    words.len()
                )))
            }
        });
        self.settle(&result);

        let words = result?;
        debug!("Read {count} register(s) at {address} from slave {slave_id}: {words:?}");
        Ok(words)
    }

    async fn write_holding_register(
        &mut self,
        address: u16,
        value: u16,
        slave_id: u8,
    ) -> Result<(), TransportError> {
        let timeout = self.timeout;
        let (client, stream) = self.client().await?;
        client.set_slave(Slave(slave_id));

        let before = stream.received();
        let outcome =
            tokio::time::timeout(timeout, client.write_single_register(address, value)).await;
        let result = classify(outcome, timeout, stream.received() > before);
        self.settle(&result);

        result?;
        debug!("Wrote {value} at {address} on slave {slave_id}");
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Some(mut client) = link.client.take() {
                let _ = client.disconnect().await;
            }
            info!("Closed {}", self.label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_settings_are_validated() {
        assert!(matches!(data_bits(9), Err(TransportError::InvalidConfig(_))));
        assert!(matches!(stop_bits(0), Err(TransportError::InvalidConfig(_))));
        assert_eq!(data_bits(8).unwrap(), DataBits::Eight);
        assert_eq!(stop_bits(2).unwrap(), StopBits::Two);
    }

    #[test]
    fn test_missing_device_is_port_unavailable() {
        let serial = SerialConfig {
            port: "/dev/this-port-does-not-exist".to_string(),
            ..SerialConfig::default()
        };
        assert!(matches!(
            RtuTransport::open(&serial),
            Err(TransportError::PortUnavailable(_))
        ));
    }

    #[test]
    fn test_io_errors_are_classified() {
        let timeout = Duration::from_millis(50);
        assert_eq!(
            classify_io(io::Error::from(io::ErrorKind::TimedOut), timeout),
            TransportError::NoResponse(timeout)
        );
        assert!(matches!(
            classify_io(io::Error::new(io::ErrorKind::InvalidData, "crc"), timeout),
            TransportError::MalformedFrame(_)
        ));
        assert!(matches!(
            classify_io(io::Error::from(io::ErrorKind::BrokenPipe), timeout),
            TransportError::PortUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_closed_handle_reports_unavailable() {
        let (client, _server) = tokio::io::duplex(256);
        let mut transport =
            RtuTransport::attach(client, Slave(1), Duration::from_millis(50), "duplex");
        transport.close().await;
        transport.close().await;

        assert!(matches!(
            transport.read_holding_registers(0, 1, 1).await,
            Err(TransportError::PortUnavailable(_))
        ));
    }
}
