//! Connection manager: owns the TCP socket or serial port of one client
//!
//! The transport is opened lazily by [`Connection::ensure_open`] and reused until an error
//! forces it closed (see [`Connection::reset_after`]) or the client shuts down.
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::config::{RtuFraming, Transport};
use crate::consts::{MBAP_HEADER_LEN, RTU_MAX_FRAME_LEN};
use crate::{guess_response_frame_len, Error, ModbusProto};

/// Silence kept after an RTU request before the response is read (3.5 character times, rounded
/// up for all baud rates below 115200)
pub const RTU_SETTLE_DELAY: Duration = Duration::from_millis(5);

/// Read timeout used while draining stale input from a serial line
const DRAIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Byte stream of a serial port with an adjustable read timeout
pub trait SerialLine: Read + Write {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

enum Link {
    Tcp(TcpStream),
    #[cfg_attr(not(feature = "rtu"), allow(dead_code))]
    Rtu(Box<dyn SerialLine + Send>, RtuFraming),
}

pub struct Connection {
    transport: Transport,
    link: Option<Link>,
    tr_id: u16,
}

impl Connection {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            link: None,
            tr_id: 0,
        }
    }

    pub fn proto(&self) -> ModbusProto {
        self.transport.proto()
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// Transaction id for the next TCP request, starts at 1 and wraps at 65536
    pub fn next_transaction_id(&mut self) -> u16 {
        self.tr_id = self.tr_id.wrapping_add(1);
        self.tr_id
    }

    /// Opens the transport unless it is already open
    ///
    /// `timeout` is used as the TCP dial timeout and the serial read timeout.
    pub fn ensure_open(&mut self, timeout: Duration) -> Result<(), Error> {
        if self.link.is_some() {
            return Ok(());
        }
        let endpoint = self.transport.endpoint();
        let link = match &self.transport {
            Transport::Tcp { host, port } => {
                Link::Tcp(connect_tcp(host, *port, timeout).map_err(|source| Error::Conn {
                    endpoint: endpoint.clone(),
                    source,
                })?)
            }
            #[cfg(feature = "rtu")]
            Transport::Rtu(settings) => {
                let port = rtu::open(settings, timeout).map_err(|source| Error::Conn {
                    endpoint: endpoint.clone(),
                    source,
                })?;
                Link::Rtu(Box::new(port), settings.framing)
            }
            #[cfg(not(feature = "rtu"))]
            Transport::Rtu(_) => {
                return Err(Error::Config(
                    "rtu mode requires the \"rtu\" feature".to_owned(),
                ))
            }
        };
        debug!(endpoint = %endpoint, proto = %self.proto(), "transport opened");
        self.link = Some(link);
        Ok(())
    }

    /// Sends one request frame and receives one response frame
    ///
    /// Does not open the transport, call [`Connection::ensure_open`] first.
    pub fn send_and_receive(&mut self, frame: &[u8], timeout: Duration) -> Result<Vec<u8>, Error> {
        let Some(link) = self.link.as_mut() else {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport is not open",
            )));
        };
        debug!("request frame {:02X?}", frame);
        let response = match link {
            Link::Tcp(stream) => exchange_tcp(stream, frame, timeout),
            Link::Rtu(line, framing) => exchange_rtu(line.as_mut(), frame, *framing, timeout),
        }?;
        debug!("response frame {:02X?}", response);
        Ok(response)
    }

    /// Drops the transport after a failed call if the error leaves the stream out of sync
    ///
    /// TCP is closed on i/o errors, timeouts and framing errors. A serial port is only closed on
    /// i/o errors: after a timeout or a bad frame it stays open and stale bytes are discarded
    /// before the next request is written.
    pub fn reset_after(&mut self, err: &Error) {
        let close = match err {
            Error::Io(_) => true,
            Error::Timeout(_) | Error::Frame(_) => self.proto() == ModbusProto::Tcp,
            Error::Config(_) | Error::Conn { .. } | Error::Exception { .. } => false,
        };
        if close && self.link.take().is_some() {
            warn!(endpoint = %self.transport.endpoint(), error = %err, "transport dropped");
        }
    }

    /// Uses `line` as the already opened serial link of an RTU connection
    #[cfg(test)]
    pub(crate) fn attach_serial(&mut self, line: Box<dyn SerialLine + Send>) {
        if let Transport::Rtu(settings) = &self.transport {
            self.link = Some(Link::Rtu(line, settings.framing));
        }
    }

    pub fn close(&mut self) {
        if let Some(link) = self.link.take() {
            match link {
                Link::Tcp(stream) => {
                    let _ = stream.shutdown(std::net::Shutdown::Both);
                }
                Link::Rtu(..) => {}
            }
            info!(endpoint = %self.transport.endpoint(), "transport closed");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn connect_tcp(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
    }))
}

fn exchange_tcp(stream: &mut TcpStream, frame: &[u8], timeout: Duration) -> Result<Vec<u8>, Error> {
    stream.set_write_timeout(Some(timeout)).map_err(Error::Io)?;
    stream.set_read_timeout(Some(timeout)).map_err(Error::Io)?;
    stream
        .write_all(frame)
        .map_err(|e| Error::from_io(e, timeout))?;
    read_tcp_frame(stream, timeout)
}

/// Reads the MBAP header, then exactly the number of bytes its length field declares
pub(crate) fn read_tcp_frame<R: Read + ?Sized>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; MBAP_HEADER_LEN];
    reader
        .read_exact(&mut buf)
        .map_err(|e| Error::from_io(e, timeout))?;
    let total = guess_response_frame_len(&buf, ModbusProto::Tcp)?;
    buf.resize(total, 0);
    reader
        .read_exact(&mut buf[MBAP_HEADER_LEN..])
        .map_err(|e| Error::from_io(e, timeout))?;
    Ok(buf)
}

/// Takes a single read (up to 256 bytes) as the whole response frame
///
/// A frame still in transit when the read returns comes back truncated and fails the checksum.
pub(crate) fn read_rtu_available<R: Read + ?Sized>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; RTU_MAX_FRAME_LEN];
    let n = reader
        .read(&mut buf)
        .map_err(|e| Error::from_io(e, timeout))?;
    if n == 0 {
        return Err(Error::Timeout(timeout));
    }
    buf.truncate(n);
    Ok(buf)
}

/// Reads the 3-byte frame head, then the rest of the frame as derived from the head
pub(crate) fn read_rtu_frame<R: Read + ?Sized>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; 3];
    reader
        .read_exact(&mut buf)
        .map_err(|e| Error::from_io(e, timeout))?;
    let total = guess_response_frame_len(&buf, ModbusProto::Rtu)?;
    buf.resize(total, 0);
    reader
        .read_exact(&mut buf[3..])
        .map_err(|e| Error::from_io(e, timeout))?;
    Ok(buf)
}

/// Writes one RTU request and reads the response
///
/// Input left on the line by earlier, abandoned exchanges is discarded before the request is
/// written.
pub(crate) fn exchange_rtu<L: SerialLine + ?Sized>(
    line: &mut L,
    frame: &[u8],
    framing: RtuFraming,
    timeout: Duration,
) -> Result<Vec<u8>, Error> {
    discard_input(line, timeout)?;
    line.write_all(frame)
        .and_then(|()| line.flush())
        .map_err(|e| Error::from_io(e, timeout))?;
    thread::sleep(RTU_SETTLE_DELAY);
    match framing {
        RtuFraming::Settle => read_rtu_available(line, timeout),
        RtuFraming::LengthAware => read_rtu_frame(line, timeout),
    }
}

/// Reads and drops whatever is pending on the line, then restores the read timeout
///
/// A line which keeps delivering bytes for longer than `timeout` fails with `Error::Timeout`.
pub(crate) fn discard_input<L: SerialLine + ?Sized>(
    line: &mut L,
    timeout: Duration,
) -> Result<(), Error> {
    line.set_read_timeout(DRAIN_TIMEOUT).map_err(Error::Io)?;
    let started = Instant::now();
    let mut buf = [0u8; RTU_MAX_FRAME_LEN];
    let mut discarded = 0;
    let result = loop {
        if started.elapsed() >= timeout {
            break Err(Error::Timeout(timeout));
        }
        match line.read(&mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => discarded += n,
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                break Ok(());
            }
            Err(e) => break Err(Error::Io(e)),
        }
    };
    if discarded > 0 {
        trace!(bytes = discarded, "stale input discarded");
    }
    line.set_read_timeout(timeout).map_err(Error::Io)?;
    result
}

#[cfg(feature = "rtu")]
mod rtu {
    use std::io;
    use std::time::Duration;

    use serial::prelude::*;

    use super::SerialLine;
    use crate::config::{Parity, SerialSettings};

    impl SerialLine for serial::SystemPort {
        fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
            self.set_timeout(timeout).map_err(io::Error::from)
        }
    }

    pub(super) fn open(
        settings: &SerialSettings,
        timeout: Duration,
    ) -> io::Result<serial::SystemPort> {
        let mut port = serial::open(&settings.device)?;
        let port_settings = serial::PortSettings {
            baud_rate: serial::BaudRate::from_speed(settings.baud_rate as usize),
            char_size: match settings.data_bits {
                5 => serial::Bits5,
                6 => serial::Bits6,
                7 => serial::Bits7,
                _ => serial::Bits8,
            },
            parity: match settings.parity {
                Parity::None => serial::ParityNone,
                Parity::Odd => serial::ParityOdd,
                Parity::Even => serial::ParityEven,
            },
            stop_bits: if settings.stop_bits == 2 {
                serial::Stop2
            } else {
                serial::Stop1
            },
            flow_control: serial::FlowNone,
        };
        port.configure(&port_settings)?;
        port.set_timeout(timeout)?;
        Ok(port)
    }
}
