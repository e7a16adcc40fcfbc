//! Modbus client: one transport endpoint, one request in flight at a time
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Settings;
use crate::consts::{MAX_SLAVE_ID, MIN_SLAVE_ID, MODBUS_EXCEPTION_FLAG};
use crate::frame::{build_frame, parse_frame};
use crate::transport::Connection;
use crate::{Config, Error, FrameError, Function, ModbusProto, Operation, RequestError, Value};

/// Per-call parameters, unset fields fall back to the client configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Overrides {
    #[serde(default)]
    pub function: Option<Function>,
    #[serde(default)]
    pub slave_id: Option<u8>,
    #[serde(default)]
    pub address: Option<u16>,
    #[serde(default)]
    pub quantity: Option<u16>,
    #[serde(default)]
    pub value: Option<i64>,
    #[serde(default)]
    pub values: Option<Vec<i64>>,
}

impl Overrides {
    /// Reads overrides from a message payload, unknown fields are ignored
    pub fn from_json(payload: &serde_json::Value) -> Result<Self, Error> {
        serde_json::from_value(payload.clone()).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Result of a successful call
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub operation: Function,
    pub function_code: u8,
    pub address: u16,
    pub quantity: u16,
    pub slave_id: u8,
    pub value: Value,
    pub mode: ModbusProto,
    pub timestamp: DateTime<Utc>,
}

/// Modbus master bound to one TCP endpoint or serial port
///
/// The transport is opened on the first call and reused. Calls from different threads are
/// serialized, each holds the client lock for the full request/response round trip.
pub struct ModbusClient {
    settings: Settings,
    conn: Mutex<Connection>,
}

impl ModbusClient {
    pub fn new(config: Config) -> Result<Self, Error> {
        Ok(Self::from_settings(config.validate()?))
    }

    pub fn from_settings(settings: Settings) -> Self {
        let conn = Mutex::new(Connection::new(settings.transport.clone()));
        Self { settings, conn }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn mode(&self) -> ModbusProto {
        self.settings.transport.proto()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_open()
    }

    /// Closes the transport, the next call opens it again
    pub fn close(&self) {
        self.lock().close();
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // the connection is reset after any failed call, a poisoned lock holds nothing stale
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Executes the configured operation, with `overrides` applied for this call only
    pub fn execute(&self, overrides: &Overrides) -> Result<Response, RequestError> {
        let function = overrides.function.unwrap_or(self.settings.function);
        let slave_id = overrides.slave_id.unwrap_or(self.settings.slave_id);
        let address = overrides.address.unwrap_or(self.settings.address);
        let op = self
            .operation(function, address, overrides)
            .map_err(|error| RequestError {
                function,
                address,
                slave_id,
                error,
            })?;
        self.execute_operation(slave_id, op)
    }

    fn operation(
        &self,
        function: Function,
        address: u16,
        overrides: &Overrides,
    ) -> Result<Operation, Error> {
        let quantity = overrides.quantity.unwrap_or(self.settings.quantity);
        let value = overrides.value.or(self.settings.value);
        let values = overrides
            .values
            .as_deref()
            .unwrap_or(self.settings.values.as_slice());
        let op = match function {
            Function::ReadCoils => Operation::ReadCoils { address, quantity },
            Function::ReadDiscrete => Operation::ReadDiscrete { address, quantity },
            Function::ReadHolding => Operation::ReadHolding { address, quantity },
            Function::ReadInput => Operation::ReadInput { address, quantity },
            Function::WriteCoil => Operation::WriteCoil {
                address,
                value: required_value(function, value)? != 0,
            },
            Function::WriteRegister => Operation::WriteRegister {
                address,
                value: register_value(required_value(function, value)?)?,
            },
            Function::WriteCoils => Operation::WriteCoils {
                address,
                values: required_values(function, values)?
                    .iter()
                    .map(|v| *v != 0)
                    .collect(),
            },
            Function::WriteRegisters => Operation::WriteRegisters {
                address,
                values: required_values(function, values)?
                    .iter()
                    .map(|v| register_value(*v))
                    .collect::<Result<_, _>>()?,
            },
        };
        Ok(op)
    }

    /// Executes a typed operation against `slave_id`
    pub fn execute_operation(&self, slave_id: u8, op: Operation) -> Result<Response, RequestError> {
        let function = op.function();
        let address = op.address();
        if !(MIN_SLAVE_ID..=MAX_SLAVE_ID).contains(&slave_id) {
            return Err(RequestError {
                function,
                address,
                slave_id,
                error: Error::Config(format!("slave_id {} out of range", slave_id)),
            });
        }
        let mut conn = self.lock();
        let value = self.round_trip(&mut conn, slave_id, &op).map_err(|error| {
            debug!(%function, address, slave_id, %error, "request failed");
            conn.reset_after(&error);
            RequestError {
                function,
                address,
                slave_id,
                error,
            }
        })?;
        drop(conn);
        debug!(%function, address, slave_id, "request completed");
        Ok(Response {
            operation: function,
            function_code: function.code(),
            address,
            quantity: op.quantity(),
            slave_id,
            value,
            mode: self.mode(),
            timestamp: Utc::now(),
        })
    }

    fn round_trip(
        &self,
        conn: &mut Connection,
        slave_id: u8,
        op: &Operation,
    ) -> Result<Value, Error> {
        let timeout = self.settings.timeout;
        let func = op.function().code();
        let payload = op.encode()?;
        conn.ensure_open(timeout)?;
        let proto = conn.proto();
        let tr_id = match proto {
            ModbusProto::Tcp => conn.next_transaction_id(),
            ModbusProto::Rtu => 0,
        };
        let request = build_frame(proto, tr_id, slave_id, func, &payload)?;
        debug!(tr_id, slave_id, func, "sending request");
        let response = conn.send_and_receive(&request, timeout)?;
        let pdu = match parse_frame(proto, tr_id, slave_id, &response) {
            // an exception answering some other request
            Err(Error::Exception { function, .. }) if function != func => {
                return Err(FrameError::UnexpectedFunction {
                    expected: func,
                    received: function | MODBUS_EXCEPTION_FLAG,
                }
                .into());
            }
            result => result?,
        };
        if pdu.func != func {
            return Err(FrameError::UnexpectedFunction {
                expected: func,
                received: pdu.func,
            }
            .into());
        }
        Ok(op.decode(pdu.data)?)
    }

    pub fn read_coils(&self, address: u16, quantity: u16) -> Result<Vec<bool>, RequestError> {
        let op = Operation::ReadCoils { address, quantity };
        Ok(self.execute_operation(self.settings.slave_id, op)?.value.into_bits())
    }

    pub fn read_discrete_inputs(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, RequestError> {
        let op = Operation::ReadDiscrete { address, quantity };
        Ok(self.execute_operation(self.settings.slave_id, op)?.value.into_bits())
    }

    pub fn read_holding_registers(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, RequestError> {
        let op = Operation::ReadHolding { address, quantity };
        Ok(self
            .execute_operation(self.settings.slave_id, op)?
            .value
            .into_registers())
    }

    pub fn read_input_registers(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, RequestError> {
        let op = Operation::ReadInput { address, quantity };
        Ok(self
            .execute_operation(self.settings.slave_id, op)?
            .value
            .into_registers())
    }

    pub fn write_single_coil(&self, address: u16, value: bool) -> Result<(), RequestError> {
        let op = Operation::WriteCoil { address, value };
        self.execute_operation(self.settings.slave_id, op)
            .map(|_| ())
    }

    pub fn write_single_register(&self, address: u16, value: u16) -> Result<(), RequestError> {
        let op = Operation::WriteRegister { address, value };
        self.execute_operation(self.settings.slave_id, op)
            .map(|_| ())
    }

    pub fn write_multiple_coils(&self, address: u16, values: &[bool]) -> Result<(), RequestError> {
        let op = Operation::WriteCoils {
            address,
            values: values.to_vec(),
        };
        self.execute_operation(self.settings.slave_id, op)
            .map(|_| ())
    }

    pub fn write_multiple_registers(
        &self,
        address: u16,
        values: &[u16],
    ) -> Result<(), RequestError> {
        let op = Operation::WriteRegisters {
            address,
            values: values.to_vec(),
        };
        self.execute_operation(self.settings.slave_id, op)
            .map(|_| ())
    }
}

fn required_value(function: Function, value: Option<i64>) -> Result<i64, Error> {
    value.ok_or_else(|| Error::Config(format!("{} requires a value", function)))
}

fn required_values(function: Function, values: &[i64]) -> Result<&[i64], Error> {
    if values.is_empty() {
        Err(Error::Config(format!("{} requires values", function)))
    } else {
        Ok(values)
    }
}

/// Register values are accepted as unsigned or as signed 16-bit (two's complement)
#[allow(clippy::cast_sign_loss)]
fn register_value(value: i64) -> Result<u16, Error> {
    if let Ok(v) = u16::try_from(value) {
        return Ok(v);
    }
    i16::try_from(value)
        .map(|v| v as u16)
        .map_err(|_| Error::Config(format!("register value {} overflows 16 bits", value)))
}
