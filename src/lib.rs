//! Blocking Modbus master (client) for TCP and RTU transports
//!
//! ```no_run
//! use modbus_master::{Config, ModbusClient};
//!
//! # fn code() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_json(r#"{"mode": "tcp", "host": "10.0.0.5", "slave_id": 3}"#)?;
//! let client = ModbusClient::new(config)?;
//! let registers = client.read_holding_registers(100, 10)?;
//! println!("{:?}", registers);
//! client.close();
//! # Ok(())
//! # }
//! ```
pub mod client;
pub mod config;
pub mod consts;
pub mod frame;
pub mod function;
pub mod transport;

mod error;
pub use error::{Error, ExceptionCode, FrameError, RequestError};

pub use client::{ModbusClient, Overrides, Response};
pub use config::{Config, Parity, RtuFraming, SerialSettings, Settings, Transport};
pub use function::{Function, Operation, Value};

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};

use crate::consts::{
    MBAP_MAX_LENGTH, MODBUS_EXCEPTION_FLAG, MODBUS_GET_COILS, MODBUS_GET_HOLDINGS,
    MODBUS_SET_COIL, MODBUS_SET_COILS_BULK, MODBUS_SET_HOLDING, MODBUS_SET_HOLDINGS_BULK,
    MODBUS_GET_DISCRETES, MODBUS_GET_INPUTS, RTU_MAX_FRAME_LEN,
};

/// Modbus protocol selection for frame processing
///
/// * for **Tcp**, MBAP headers are added to requests / verified in responses
/// * for **Rtu**, frame checksums are added to requests / verified in responses
#[derive(PartialEq, Eq, Debug, Copy, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModbusProto {
    Tcp,
    Rtu,
}

impl core::fmt::Display for ModbusProto {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ModbusProto::Tcp => write!(f, "tcp"),
            ModbusProto::Rtu => write!(f, "rtu"),
        }
    }
}

/// Modbus RTU checksum (CRC-16, polynomial 0xA001, initial value 0xFFFF)
///
/// Appended to frames low byte first.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xffff;
    for i in data {
        crc ^= u16::from(*i);
        for _ in 0..8 {
            if (crc & 0x0001) == 0 {
                crc >>= 1;
            } else {
                crc >>= 1;
                crc ^= 0xA001;
            }
        }
    }
    crc
}

/// Guess response frame length
///
/// Frames are often read in pieces. The function allows to guess the total frame length, having
/// the first bytes read: 6 for TCP (up to the MBAP length field), 3 for RTU (slave id, function
/// and either the byte count of a read response or the exception code).
///
/// * the function may return wrong result for broken frames
///
/// * lengths above the protocol maximum return [`FrameError::InvalidLength`], RTU frames with
///   a function code this crate never sends return [`FrameError::UnknownFunction`]
pub fn guess_response_frame_len(buf: &[u8], proto: ModbusProto) -> Result<usize, FrameError> {
    match proto {
        ModbusProto::Tcp => {
            if buf.len() < 6 {
                return Err(FrameError::TooShort { len: buf.len() });
            }
            let proto_id = u16::from_be_bytes([buf[2], buf[3]]);
            if proto_id != 0 {
                return Err(FrameError::ProtocolId(proto_id));
            }
            let len = u16::from_be_bytes([buf[4], buf[5]]);
            if len < 2 || len > MBAP_MAX_LENGTH {
                return Err(FrameError::InvalidLength(len));
            }
            Ok(usize::from(len) + 6)
        }
        ModbusProto::Rtu => {
            if buf.len() < 3 {
                return Err(FrameError::TooShort { len: buf.len() });
            }
            let func = buf[1];
            let len = if func & MODBUS_EXCEPTION_FLAG == 0 {
                match func {
                    MODBUS_GET_COILS | MODBUS_GET_DISCRETES | MODBUS_GET_HOLDINGS
                    | MODBUS_GET_INPUTS => usize::from(buf[2]) + 5,
                    MODBUS_SET_COIL
                    | MODBUS_SET_HOLDING
                    | MODBUS_SET_COILS_BULK
                    | MODBUS_SET_HOLDINGS_BULK => 8,
                    _ => return Err(FrameError::UnknownFunction(func)),
                }
            } else {
                5
            };
            if len > RTU_MAX_FRAME_LEN {
                #[allow(clippy::cast_possible_truncation)]
                return Err(FrameError::InvalidLength(len as u16));
            }
            Ok(len)
        }
    }
}
