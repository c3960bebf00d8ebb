// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte links: where frames come from.
//!
//! A link is opened once, read one byte at a time by the frame reader and
//! closed on shutdown. Every read is bounded by the link's read timeout so
//! the reading thread never blocks forever; an elapsed timeout surfaces as
//! [`LinkError::Timeout`], which callers treat as "nothing yet, try again".

use crate::config::LinkConfig;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;

/// Size of the read-ahead buffer used by the concrete links.
const READ_AHEAD_SIZE: usize = 256;

/// Link-level errors.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to open {target}: {source}")]
    Open {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("link is not open")]
    NotOpen,

    #[error("link closed by peer")]
    Closed,

    #[error("no data received within the read timeout")]
    Timeout,

    #[error("frame exceeded {limit} bytes without a terminator")]
    Overrun { limit: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl LinkError {
    /// Whether the reader can keep going after this error.
    ///
    /// Timeouts and overruns only cost the current (partial) frame; all
    /// other errors mean the link itself is gone.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LinkError::Timeout | LinkError::Overrun { .. })
    }
}

/// A byte source that frames are read from.
pub trait ByteLink: Send {
    /// Open the underlying connection. Opening an open link is a no-op.
    fn open(&mut self) -> Result<(), LinkError>;

    /// Close the underlying connection. Closing a closed link is a no-op.
    fn close(&mut self);

    /// Whether the link is currently open.
    fn is_open(&self) -> bool;

    /// Read a single byte, waiting at most the configured read timeout.
    fn read_byte(&mut self) -> Result<u8, LinkError>;

    /// Human readable description for logs (e.g. `serial:/dev/ttyUSB0@57600`).
    fn describe(&self) -> String;
}

impl<L: ByteLink + ?Sized> ByteLink for Box<L> {
    fn open(&mut self) -> Result<(), LinkError> {
        (**self).open()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn read_byte(&mut self) -> Result<u8, LinkError> {
        (**self).read_byte()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Small buffer so that byte-at-a-time reads do not cost one syscall each.
struct ReadAhead {
    buf: [u8; READ_AHEAD_SIZE],
    pos: usize,
    len: usize,
}

impl ReadAhead {
    fn new() -> Self {
        Self {
            buf: [0; READ_AHEAD_SIZE],
            pos: 0,
            len: 0,
        }
    }

    fn next_byte<R: Read + ?Sized>(&mut self, src: &mut R) -> Result<u8, LinkError> {
        if self.pos < self.len {
            let byte = self.buf[self.pos];
            self.pos += 1;
            return Ok(byte);
        }

        loop {
            match src.read(&mut self.buf) {
                Ok(0) => return Err(LinkError::Closed),
                Ok(n) => {
                    self.len = n;
                    self.pos = 1;
                    return Ok(self.buf[0]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                    ) =>
                {
                    return Err(LinkError::Timeout)
                }
                Err(e) => return Err(LinkError::Io(e)),
            }
        }
    }

    fn clear(&mut self) {
        self.pos = 0;
        self.len = 0;
    }
}

/// Serial port link (8N1, no flow control).
pub struct SerialLink {
    port_name: String,
    baud_rate: u32,
    read_timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
    read_ahead: ReadAhead,
}

impl SerialLink {
    /// Create a closed serial link.
    pub fn new(port_name: impl Into<String>, baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            read_timeout,
            port: None,
            read_ahead: ReadAhead::new(),
        }
    }

    /// Configured port name.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

impl ByteLink for SerialLink {
    fn open(&mut self) -> Result<(), LinkError> {
        if self.port.is_some() {
            return Ok(());
        }

        let port = serialport::new(&self.port_name, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| LinkError::Open {
                target: self.describe(),
                source: e.into(),
            })?;

        tracing::info!(
            port = %self.port_name,
            baud_rate = self.baud_rate,
            "Serial link opened"
        );

        self.read_ahead.clear();
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            self.read_ahead.clear();
            tracing::info!(port = %self.port_name, "Serial link closed");
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read_byte(&mut self) -> Result<u8, LinkError> {
        let port = self.port.as_mut().ok_or(LinkError::NotOpen)?;
        self.read_ahead.next_byte(port.as_mut())
    }

    fn describe(&self) -> String {
        format!("serial:{}@{}", self.port_name, self.baud_rate)
    }
}

/// TCP link, for serial-over-IP adapters such as ser2net.
pub struct TcpLink {
    address: String,
    read_timeout: Duration,
    stream: Option<TcpStream>,
    read_ahead: ReadAhead,
}

impl TcpLink {
    /// Create a closed TCP link.
    pub fn new(address: impl Into<String>, read_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            read_timeout,
            stream: None,
            read_ahead: ReadAhead::new(),
        }
    }

    fn connect(&self) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in self.address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.read_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.read_timeout))?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} did not resolve to any address", self.address),
            )
        }))
    }
}

impl ByteLink for TcpLink {
    fn open(&mut self) -> Result<(), LinkError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = self.connect().map_err(|e| LinkError::Open {
            target: self.describe(),
            source: e,
        })?;

        tracing::info!(address = %self.address, "TCP link connected");

        self.read_ahead.clear();
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            self.read_ahead.clear();
            tracing::info!(address = %self.address, "TCP link closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn read_byte(&mut self) -> Result<u8, LinkError> {
        let stream = self.stream.as_mut().ok_or(LinkError::NotOpen)?;
        self.read_ahead.next_byte(stream)
    }

    fn describe(&self) -> String {
        format!("tcp:{}", self.address)
    }
}

/// Create a (closed) link from configuration.
pub fn create_link(config: &LinkConfig) -> Box<dyn ByteLink> {
    match config {
        LinkConfig::Serial {
            port,
            baud_rate,
            read_timeout_ms,
        } => Box::new(SerialLink::new(
            port.clone(),
            *baud_rate,
            Duration::from_millis(*read_timeout_ms),
        )),
        LinkConfig::Tcp {
            address,
            read_timeout_ms,
        } => Box::new(TcpLink::new(
            address.clone(),
            Duration::from_millis(*read_timeout_ms),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    /// Reader that replays a script of read results.
    struct Scripted {
        steps: Vec<io::Result<Vec<u8>>>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.steps.is_empty() {
                return Ok(0);
            }
            match self.steps.remove(0) {
                Ok(bytes) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Err(e) => Err(e),
            }
        }
    }

    #[test]
    fn test_read_ahead_serves_buffered_bytes() {
        let mut src = Scripted {
            steps: vec![Ok(b"#{}$".to_vec())],
        };
        let mut ra = ReadAhead::new();

        let bytes: Vec<u8> = (0..4).map(|_| ra.next_byte(&mut src).unwrap()).collect();
        assert_eq!(bytes, b"#{}$");
        assert!(matches!(ra.next_byte(&mut src), Err(LinkError::Closed)));
    }

    #[test]
    fn test_read_ahead_maps_errors() {
        let mut src = Scripted {
            steps: vec![
                Err(io::Error::from(io::ErrorKind::Interrupted)),
                Ok(b"a".to_vec()),
                Err(io::Error::from(io::ErrorKind::TimedOut)),
                Err(io::Error::from(io::ErrorKind::WouldBlock)),
                Err(io::Error::from(io::ErrorKind::BrokenPipe)),
            ],
        };
        let mut ra = ReadAhead::new();

        // Interrupted is retried transparently
        assert_eq!(ra.next_byte(&mut src).unwrap(), b'a');
        assert!(matches!(ra.next_byte(&mut src), Err(LinkError::Timeout)));
        assert!(matches!(ra.next_byte(&mut src), Err(LinkError::Timeout)));
        assert!(matches!(ra.next_byte(&mut src), Err(LinkError::Io(_))));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(LinkError::Timeout.is_recoverable());
        assert!(LinkError::Overrun { limit: 8 }.is_recoverable());
        assert!(!LinkError::Closed.is_recoverable());
        assert!(!LinkError::NotOpen.is_recoverable());
        assert!(!LinkError::Io(io::Error::from(io::ErrorKind::Other)).is_recoverable());
    }

    #[test]
    fn test_serial_link_not_open() {
        let mut link = SerialLink::new("/dev/does-not-exist", 57600, Duration::from_millis(10));
        assert!(!link.is_open());
        assert!(matches!(link.read_byte(), Err(LinkError::NotOpen)));
        assert_eq!(link.describe(), "serial:/dev/does-not-exist@57600");
    }

    #[test]
    fn test_serial_link_open_failure() {
        let mut link = SerialLink::new("/dev/does-not-exist", 57600, Duration::from_millis(10));
        let err = link.open().unwrap_err();
        assert!(matches!(err, LinkError::Open { .. }));
        assert!(!link.is_open());
    }

    #[test]
    fn test_tcp_link_reads_and_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(b"#{\"id\":\"a\"}$").unwrap();
            // Keep the connection open long enough for the client to hit a timeout
            std::thread::sleep(Duration::from_millis(300));
        });

        let mut link = TcpLink::new(addr.to_string(), Duration::from_millis(50));
        link.open().unwrap();
        assert!(link.is_open());

        let mut got = Vec::new();
        loop {
            let b = link.read_byte().unwrap();
            got.push(b);
            if b == b'$' {
                break;
            }
        }
        assert_eq!(got, b"#{\"id\":\"a\"}$");
        assert!(matches!(link.read_byte(), Err(LinkError::Timeout)));

        link.close();
        assert!(!link.is_open());
        server.join().unwrap();
    }
}
