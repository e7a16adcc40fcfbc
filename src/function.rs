//! Function dispatcher: semantic operations to PDU payloads and back
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::consts::{
    COIL_OFF, COIL_ON, MODBUS_GET_COILS, MODBUS_GET_DISCRETES, MODBUS_GET_HOLDINGS,
    MODBUS_GET_INPUTS, MODBUS_SET_COIL, MODBUS_SET_COILS_BULK, MODBUS_SET_HOLDING,
    MODBUS_SET_HOLDINGS_BULK,
};
use crate::{Error, FrameError};

/// One of the eight standard Modbus functions
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Function {
    ReadCoils,
    ReadDiscrete,
    #[default]
    ReadHolding,
    ReadInput,
    WriteCoil,
    WriteRegister,
    WriteCoils,
    WriteRegisters,
}

impl Function {
    pub const ALL: [Function; 8] = [
        Function::ReadCoils,
        Function::ReadDiscrete,
        Function::ReadHolding,
        Function::ReadInput,
        Function::WriteCoil,
        Function::WriteRegister,
        Function::WriteCoils,
        Function::WriteRegisters,
    ];

    pub fn code(self) -> u8 {
        match self {
            Function::ReadCoils => MODBUS_GET_COILS,
            Function::ReadDiscrete => MODBUS_GET_DISCRETES,
            Function::ReadHolding => MODBUS_GET_HOLDINGS,
            Function::ReadInput => MODBUS_GET_INPUTS,
            Function::WriteCoil => MODBUS_SET_COIL,
            Function::WriteRegister => MODBUS_SET_HOLDING,
            Function::WriteCoils => MODBUS_SET_COILS_BULK,
            Function::WriteRegisters => MODBUS_SET_HOLDINGS_BULK,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Function::ALL.into_iter().find(|f| f.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Function::ReadCoils => "read_coils",
            Function::ReadDiscrete => "read_discrete",
            Function::ReadHolding => "read_holding",
            Function::ReadInput => "read_input",
            Function::WriteCoil => "write_coil",
            Function::WriteRegister => "write_register",
            Function::WriteCoils => "write_coils",
            Function::WriteRegisters => "write_registers",
        }
    }

    pub fn is_read(self) -> bool {
        matches!(
            self,
            Function::ReadCoils
                | Function::ReadDiscrete
                | Function::ReadHolding
                | Function::ReadInput
        )
    }
}

impl FromStr for Function {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Function::ALL
            .into_iter()
            .find(|f| f.name() == s)
            .ok_or_else(|| Error::Config(format!("unknown function \"{}\"", s)))
    }
}

impl core::fmt::Display for Function {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Operation with its typed parameters
///
/// Quantities are not checked against protocol limits here, a device rejects out-of-range
/// requests with an exception.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Operation {
    ReadCoils { address: u16, quantity: u16 },
    ReadDiscrete { address: u16, quantity: u16 },
    ReadHolding { address: u16, quantity: u16 },
    ReadInput { address: u16, quantity: u16 },
    WriteCoil { address: u16, value: bool },
    WriteRegister { address: u16, value: u16 },
    WriteCoils { address: u16, values: Vec<bool> },
    WriteRegisters { address: u16, values: Vec<u16> },
}

/// Decoded response data
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// coils, discrete inputs
    Bits(Vec<bool>),
    /// holding, input registers
    Registers(Vec<u16>),
    /// echoed by the device: the register value (write register), 1 or 0 for the coil word
    /// 0xFF00 / any other word (write coil), the quantity (multiple writes)
    Echo(u16),
}

impl Value {
    /// Coil / discrete input states, empty for any other value
    pub fn into_bits(self) -> Vec<bool> {
        match self {
            Value::Bits(bits) => bits,
            Value::Registers(_) | Value::Echo(_) => Vec::new(),
        }
    }

    /// Register contents, empty for any other value
    pub fn into_registers(self) -> Vec<u16> {
        match self {
            Value::Registers(registers) => registers,
            Value::Bits(_) | Value::Echo(_) => Vec::new(),
        }
    }
}

impl Operation {
    pub fn function(&self) -> Function {
        match self {
            Operation::ReadCoils { .. } => Function::ReadCoils,
            Operation::ReadDiscrete { .. } => Function::ReadDiscrete,
            Operation::ReadHolding { .. } => Function::ReadHolding,
            Operation::ReadInput { .. } => Function::ReadInput,
            Operation::WriteCoil { .. } => Function::WriteCoil,
            Operation::WriteRegister { .. } => Function::WriteRegister,
            Operation::WriteCoils { .. } => Function::WriteCoils,
            Operation::WriteRegisters { .. } => Function::WriteRegisters,
        }
    }

    pub fn address(&self) -> u16 {
        match self {
            Operation::ReadCoils { address, .. }
            | Operation::ReadDiscrete { address, .. }
            | Operation::ReadHolding { address, .. }
            | Operation::ReadInput { address, .. }
            | Operation::WriteCoil { address, .. }
            | Operation::WriteRegister { address, .. }
            | Operation::WriteCoils { address, .. }
            | Operation::WriteRegisters { address, .. } => *address,
        }
    }

    /// Number of coils / registers the operation covers
    #[allow(clippy::cast_possible_truncation)]
    pub fn quantity(&self) -> u16 {
        match self {
            Operation::ReadCoils { quantity, .. }
            | Operation::ReadDiscrete { quantity, .. }
            | Operation::ReadHolding { quantity, .. }
            | Operation::ReadInput { quantity, .. } => *quantity,
            Operation::WriteCoil { .. } | Operation::WriteRegister { .. } => 1,
            Operation::WriteCoils { values, .. } => values.len().min(usize::from(u16::MAX)) as u16,
            Operation::WriteRegisters { values, .. } => {
                values.len().min(usize::from(u16::MAX)) as u16
            }
        }
    }

    /// PDU payload following the function code
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut data = Vec::with_capacity(5);
        data.extend_from_slice(&self.address().to_be_bytes());
        match self {
            Operation::ReadCoils { quantity, .. }
            | Operation::ReadDiscrete { quantity, .. }
            | Operation::ReadHolding { quantity, .. }
            | Operation::ReadInput { quantity, .. } => {
                data.extend_from_slice(&quantity.to_be_bytes());
            }
            Operation::WriteCoil { value, .. } => {
                let v = if *value { COIL_ON } else { COIL_OFF };
                data.extend_from_slice(&v.to_be_bytes());
            }
            Operation::WriteRegister { value, .. } => {
                data.extend_from_slice(&value.to_be_bytes());
            }
            Operation::WriteCoils { values, .. } => {
                let packed = pack_bits(values);
                self.push_bulk_header(&mut data, packed.len())?;
                data.extend(packed);
            }
            Operation::WriteRegisters { values, .. } => {
                self.push_bulk_header(&mut data, values.len() * 2)?;
                for v in values {
                    data.extend_from_slice(&v.to_be_bytes());
                }
            }
        }
        Ok(data)
    }

    fn push_bulk_header(&self, data: &mut Vec<u8>, byte_count: usize) -> Result<(), FrameError> {
        let bc = u8::try_from(byte_count).map_err(|_| FrameError::Oversize(byte_count + 6))?;
        data.extend_from_slice(&self.quantity().to_be_bytes());
        data.push(bc);
        Ok(())
    }

    /// Decodes the response payload following the function code
    pub fn decode(&self, data: &[u8]) -> Result<Value, FrameError> {
        match self {
            Operation::ReadCoils { quantity, .. } | Operation::ReadDiscrete { quantity, .. } => {
                let values = read_payload(data, *quantity, (usize::from(*quantity) + 7) / 8)?;
                Ok(Value::Bits(unpack_bits(values, *quantity)))
            }
            Operation::ReadHolding { quantity, .. } | Operation::ReadInput { quantity, .. } => {
                let values = read_payload(data, *quantity, usize::from(*quantity) * 2)?;
                Ok(Value::Registers(
                    values
                        .chunks_exact(2)
                        .map(|c| u16::from_be_bytes([c[0], c[1]]))
                        .collect(),
                ))
            }
            Operation::WriteCoil { .. }
            | Operation::WriteRegister { .. }
            | Operation::WriteCoils { .. }
            | Operation::WriteRegisters { .. } => {
                if data.len() < 4 {
                    return Err(FrameError::TooShort { len: data.len() + 1 });
                }
                let echo = u16::from_be_bytes([data[2], data[3]]);
                if let Operation::WriteCoil { .. } = self {
                    Ok(Value::Echo(u16::from(echo == COIL_ON)))
                } else {
                    Ok(Value::Echo(echo))
                }
            }
        }
    }
}

/// Checks the byte count of a read response and returns the data bytes it covers
fn read_payload(data: &[u8], quantity: u16, expected: usize) -> Result<&[u8], FrameError> {
    let Some((&byte_count, values)) = data.split_first() else {
        return Err(FrameError::TooShort { len: 1 });
    };
    let byte_count = usize::from(byte_count);
    if byte_count != expected || values.len() < byte_count {
        return Err(FrameError::ByteCount {
            byte_count,
            quantity,
        });
    }
    Ok(&values[..byte_count])
}

/// Packs booleans LSB-first: bit `i` goes to bit `i % 8` of byte `i / 8`
pub fn pack_bits(values: &[bool]) -> Vec<u8> {
    let mut data = vec![0u8; (values.len() + 7) / 8];
    for (i, v) in values.iter().enumerate() {
        if *v {
            data[i / 8] |= 1 << (i % 8);
        }
    }
    data
}

/// Unpacks the first `quantity` bits, LSB-first per byte
pub fn unpack_bits(data: &[u8], quantity: u16) -> Vec<bool> {
    let mut result = Vec::with_capacity(usize::from(quantity));
    for b in data {
        for i in 0..8 {
            if result.len() >= usize::from(quantity) {
                return result;
            }
            result.push((b >> i) & 1 == 1);
        }
    }
    result
}
