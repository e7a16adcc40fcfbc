//! MODBUS Constants

// MODBUS Functions
pub const MODBUS_GET_COILS: u8 = 1;
pub const MODBUS_GET_DISCRETES: u8 = 2;
pub const MODBUS_GET_HOLDINGS: u8 = 3;
pub const MODBUS_GET_INPUTS: u8 = 4;
pub const MODBUS_SET_COIL: u8 = 5;
pub const MODBUS_SET_HOLDING: u8 = 6;
pub const MODBUS_SET_COILS_BULK: u8 = 15;
pub const MODBUS_SET_HOLDINGS_BULK: u8 = 16;

/// Set in the echoed function code of an exception response
pub const MODBUS_EXCEPTION_FLAG: u8 = 0x80;

// MODBUS Errors
pub const MODBUS_ERROR_ILLEGAL_FUNCTION: u8 = 1;
pub const MODBUS_ERROR_ILLEGAL_DATA_ADDRESS: u8 = 2;
pub const MODBUS_ERROR_ILLEGAL_DATA_VALUE: u8 = 3;
pub const MODBUS_ERROR_SLAVE_DEVICE_FAILURE: u8 = 4;
pub const MODBUS_ERROR_ACKNOWLEDGE: u8 = 5;
pub const MODBUS_ERROR_SLAVE_DEVICE_BUSY: u8 = 6;
pub const MODBUS_ERROR_NEGATIVE_ACKNOWLEDGE: u8 = 7;
pub const MODBUS_ERROR_MEMORY_PARITY: u8 = 8;
pub const MODBUS_ERROR_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0a;
pub const MODBUS_ERROR_GATEWAY_TARGET_FAILED: u8 = 0x0b;

// Coil values of write single coil (FC05)
pub const COIL_ON: u16 = 0xff00;
pub const COIL_OFF: u16 = 0x0000;

// Framing
pub const MBAP_HEADER_LEN: usize = 7;
/// Largest value of the MBAP length field (unit id + 253 bytes of PDU)
pub const MBAP_MAX_LENGTH: u16 = 254;
pub const RTU_MIN_FRAME_LEN: usize = 4;
pub const RTU_MAX_FRAME_LEN: usize = 256;
pub const MAX_PDU_LEN: usize = 253;

// Slave (unit) ids accepted in configuration
pub const MIN_SLAVE_ID: u8 = 1;
pub const MAX_SLAVE_ID: u8 = 247;

pub const DEFAULT_TCP_PORT: u16 = 502;
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
