use std::io;
use std::time::Duration;

use crate::consts::{
    MODBUS_ERROR_ACKNOWLEDGE, MODBUS_ERROR_GATEWAY_PATH_UNAVAILABLE,
    MODBUS_ERROR_GATEWAY_TARGET_FAILED, MODBUS_ERROR_ILLEGAL_DATA_ADDRESS,
    MODBUS_ERROR_ILLEGAL_DATA_VALUE, MODBUS_ERROR_ILLEGAL_FUNCTION, MODBUS_ERROR_MEMORY_PARITY,
    MODBUS_ERROR_NEGATIVE_ACKNOWLEDGE, MODBUS_ERROR_SLAVE_DEVICE_BUSY,
    MODBUS_ERROR_SLAVE_DEVICE_FAILURE,
};
use crate::function::Function;

/// Exception code returned by a device which rejected a request
///
/// Codes outside of the standard set are kept as-is in `Unknown`, so `code()` always gives back
/// the byte the device sent.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    SlaveDeviceFailure,
    Acknowledge,
    SlaveDeviceBusy,
    NegativeAcknowledge,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailed,
    Unknown(u8),
}

impl ExceptionCode {
    pub fn from_modbus_error(code: u8) -> Self {
        match code {
            MODBUS_ERROR_ILLEGAL_FUNCTION => ExceptionCode::IllegalFunction,
            MODBUS_ERROR_ILLEGAL_DATA_ADDRESS => ExceptionCode::IllegalDataAddress,
            MODBUS_ERROR_ILLEGAL_DATA_VALUE => ExceptionCode::IllegalDataValue,
            MODBUS_ERROR_SLAVE_DEVICE_FAILURE => ExceptionCode::SlaveDeviceFailure,
            MODBUS_ERROR_ACKNOWLEDGE => ExceptionCode::Acknowledge,
            MODBUS_ERROR_SLAVE_DEVICE_BUSY => ExceptionCode::SlaveDeviceBusy,
            MODBUS_ERROR_NEGATIVE_ACKNOWLEDGE => ExceptionCode::NegativeAcknowledge,
            MODBUS_ERROR_MEMORY_PARITY => ExceptionCode::MemoryParityError,
            MODBUS_ERROR_GATEWAY_PATH_UNAVAILABLE => ExceptionCode::GatewayPathUnavailable,
            MODBUS_ERROR_GATEWAY_TARGET_FAILED => ExceptionCode::GatewayTargetFailed,
            other => ExceptionCode::Unknown(other),
        }
    }

    /// Raw exception byte
    pub fn code(self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => MODBUS_ERROR_ILLEGAL_FUNCTION,
            ExceptionCode::IllegalDataAddress => MODBUS_ERROR_ILLEGAL_DATA_ADDRESS,
            ExceptionCode::IllegalDataValue => MODBUS_ERROR_ILLEGAL_DATA_VALUE,
            ExceptionCode::SlaveDeviceFailure => MODBUS_ERROR_SLAVE_DEVICE_FAILURE,
            ExceptionCode::Acknowledge => MODBUS_ERROR_ACKNOWLEDGE,
            ExceptionCode::SlaveDeviceBusy => MODBUS_ERROR_SLAVE_DEVICE_BUSY,
            ExceptionCode::NegativeAcknowledge => MODBUS_ERROR_NEGATIVE_ACKNOWLEDGE,
            ExceptionCode::MemoryParityError => MODBUS_ERROR_MEMORY_PARITY,
            ExceptionCode::GatewayPathUnavailable => MODBUS_ERROR_GATEWAY_PATH_UNAVAILABLE,
            ExceptionCode::GatewayTargetFailed => MODBUS_ERROR_GATEWAY_TARGET_FAILED,
            ExceptionCode::Unknown(code) => code,
        }
    }
}

impl core::fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg: &str = match self {
            ExceptionCode::IllegalFunction => "MODBUS ERROR CODE 01 - ILLEGAL FUNCTION",
            ExceptionCode::IllegalDataAddress => "MODBUS ERROR CODE 02 - ILLEGAL DATA ADDRESS",
            ExceptionCode::IllegalDataValue => "MODBUS ERROR CODE 03 - ILLEGAL DATA VALUE",
            ExceptionCode::SlaveDeviceFailure => "MODBUS ERROR CODE 04 - SLAVE DEVICE FAILURE",
            ExceptionCode::Acknowledge => "MODBUS ERROR CODE 05 - ACKNOWLEDGE",
            ExceptionCode::SlaveDeviceBusy => "MODBUS ERROR CODE 06 - SLAVE DEVICE BUSY",
            ExceptionCode::NegativeAcknowledge => "MODBUS ERROR CODE 07 - NEGATIVE ACKNOWLEDGE",
            ExceptionCode::MemoryParityError => "MODBUS ERROR CODE 08 - MEMORY PARITY ERROR",
            ExceptionCode::GatewayPathUnavailable => {
                "MODBUS ERROR CODE 10 - GATEWAY PATH UNAVAILABLE"
            }
            ExceptionCode::GatewayTargetFailed => {
                "MODBUS ERROR CODE 11 - GATEWAY TARGET DEVICE FAILED TO RESPOND"
            }
            ExceptionCode::Unknown(code) => {
                return write!(f, "UNKNOWN MODBUS ERROR CODE {:02X}", code);
            }
        };
        write!(f, "{}", msg)
    }
}

/// Malformed, mismatched or corrupted frame
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short: {len} bytes")]
    TooShort { len: usize },
    #[error("invalid protocol id {0:#06x}")]
    ProtocolId(u16),
    #[error("transaction id mismatch: sent {sent}, received {received}")]
    TransactionMismatch { sent: u16, received: u16 },
    #[error("unit id mismatch: expected {expected}, received {received}")]
    UnitMismatch { expected: u8, received: u8 },
    #[error("invalid length field {0}")]
    InvalidLength(u16),
    #[error("CRC mismatch: calculated {calculated:#06x}, received {received:#06x}")]
    CrcMismatch { calculated: u16, received: u16 },
    #[error("unexpected function code: expected {expected:#04x}, received {received:#04x}")]
    UnexpectedFunction { expected: u8, received: u8 },
    #[error("unknown function code {0:#04x}")]
    UnknownFunction(u8),
    #[error("invalid byte count {byte_count} for quantity {quantity}")]
    ByteCount { byte_count: usize, quantity: u16 },
    #[error("PDU of {0} bytes does not fit into a frame")]
    Oversize(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unable to open {endpoint}: {source}")]
    Conn {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("transport i/o error: {0}")]
    Io(#[source] io::Error),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("function {function:#04x} rejected by device: {code}")]
    Exception { function: u8, code: ExceptionCode },
}

impl Error {
    /// Classifies a transport error, read/write deadlines surface as `Timeout`
    pub(crate) fn from_io(err: io::Error, timeout: Duration) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::Timeout(timeout),
            _ => Error::Io(err),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    pub fn exception(&self) -> Option<ExceptionCode> {
        match self {
            Error::Exception { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Failure of a single client call, with the request it belongs to
#[derive(Debug, thiserror::Error)]
#[error("{function} at address {address} (slave {slave_id}): {error}")]
pub struct RequestError {
    pub function: Function,
    pub address: u16,
    pub slave_id: u8,
    #[source]
    pub error: Error,
}

impl RequestError {
    pub fn kind(&self) -> &Error {
        &self.error
    }

    /// Exception code if the device answered with a Modbus exception
    pub fn exception(&self) -> Option<ExceptionCode> {
        self.error.exception()
    }

    pub fn is_timeout(&self) -> bool {
        self.error.is_timeout()
    }
}
