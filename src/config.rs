//! Client configuration
//!
//! [`Config`] is what the configuration loader hands over (usually as JSON). It is validated once
//! into immutable [`Settings`] when a client is created.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_TCP_PORT, DEFAULT_TIMEOUT_MS, MAX_SLAVE_ID, MIN_SLAVE_ID};
use crate::{Error, Function, ModbusProto};

fn default_port() -> u16 {
    DEFAULT_TCP_PORT
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_slave_id() -> u8 {
    1
}

fn default_quantity() -> u16 {
    1
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// How a response is cut out of the serial byte stream
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RtuFraming {
    /// wait a short settle delay, then take whatever arrived (up to 256 bytes) as one frame
    #[default]
    Settle,
    /// read the frame head, derive the full length from it and read exactly the rest
    LengthAware,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mode: ModbusProto,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub rtu_framing: RtuFraming,
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,
    #[serde(default)]
    pub function: Function,
    #[serde(default)]
    pub address: u16,
    #[serde(default = "default_quantity")]
    pub quantity: u16,
    #[serde(default)]
    pub value: Option<i64>,
    #[serde(default)]
    pub values: Vec<i64>,
    /// response timeout, milliseconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Config {
    fn with_mode(mode: ModbusProto) -> Self {
        Self {
            mode,
            host: None,
            port: default_port(),
            device: None,
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
            rtu_framing: RtuFraming::default(),
            slave_id: default_slave_id(),
            function: Function::default(),
            address: 0,
            quantity: default_quantity(),
            value: None,
            values: Vec::new(),
            timeout: default_timeout(),
        }
    }

    pub fn tcp(host: &str, port: u16) -> Self {
        let mut config = Self::with_mode(ModbusProto::Tcp);
        config.host = Some(host.to_owned());
        config.port = port;
        config
    }

    pub fn rtu(device: &str, baud_rate: u32) -> Self {
        let mut config = Self::with_mode(ModbusProto::Rtu);
        config.device = Some(device.to_owned());
        config.baud_rate = baud_rate;
        config
    }

    pub fn from_json(s: &str) -> Result<Self, Error> {
        serde_json::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(self) -> Result<Settings, Error> {
        if !(MIN_SLAVE_ID..=MAX_SLAVE_ID).contains(&self.slave_id) {
            return Err(Error::Config(format!(
                "slave_id {} out of range {}-{}",
                self.slave_id, MIN_SLAVE_ID, MAX_SLAVE_ID
            )));
        }
        if self.timeout == 0 {
            return Err(Error::Config("timeout must be positive".to_owned()));
        }
        let transport = match self.mode {
            ModbusProto::Tcp => {
                let host = required(self.host, "host")?;
                if self.port == 0 {
                    return Err(Error::Config("port must be positive".to_owned()));
                }
                Transport::Tcp {
                    host,
                    port: self.port,
                }
            }
            ModbusProto::Rtu => {
                if !cfg!(feature = "rtu") {
                    return Err(Error::Config(
                        "rtu mode requires the \"rtu\" feature".to_owned(),
                    ));
                }
                let device = required(self.device, "device")?;
                if self.baud_rate == 0 {
                    return Err(Error::Config("baud_rate must be positive".to_owned()));
                }
                if !(5..=8).contains(&self.data_bits) {
                    return Err(Error::Config(format!(
                        "data_bits {} not in 5-8",
                        self.data_bits
                    )));
                }
                if self.stop_bits != 1 && self.stop_bits != 2 {
                    return Err(Error::Config(format!(
                        "stop_bits {} not 1 or 2",
                        self.stop_bits
                    )));
                }
                Transport::Rtu(SerialSettings {
                    device,
                    baud_rate: self.baud_rate,
                    data_bits: self.data_bits,
                    stop_bits: self.stop_bits,
                    parity: self.parity,
                    framing: self.rtu_framing,
                })
            }
        };
        Ok(Settings {
            transport,
            slave_id: self.slave_id,
            function: self.function,
            address: self.address,
            quantity: self.quantity,
            value: self.value,
            values: self.values,
            timeout: Duration::from_millis(self.timeout),
        })
    }
}

fn required(field: Option<String>, name: &str) -> Result<String, Error> {
    match field {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::Config(format!("{} is required", name))),
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SerialSettings {
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    pub framing: RtuFraming,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Transport {
    Tcp { host: String, port: u16 },
    Rtu(SerialSettings),
}

impl Transport {
    pub fn proto(&self) -> ModbusProto {
        match self {
            Transport::Tcp { .. } => ModbusProto::Tcp,
            Transport::Rtu(_) => ModbusProto::Rtu,
        }
    }

    /// `host:port` or the serial device path
    pub fn endpoint(&self) -> String {
        match self {
            Transport::Tcp { host, port } => format!("{}:{}", host, port),
            Transport::Rtu(serial) => serial.device.clone(),
        }
    }
}

/// Validated, immutable client configuration
#[derive(Debug, Clone)]
pub struct Settings {
    pub transport: Transport,
    pub slave_id: u8,
    pub function: Function,
    pub address: u16,
    pub quantity: u16,
    pub value: Option<i64>,
    pub values: Vec<i64>,
    pub timeout: Duration,
}
